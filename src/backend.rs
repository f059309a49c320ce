// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Backend contract and the typed capabilities the core consumes.
//!
//! A `DrmBackend` services raw device-control requests: the remote proxy and the in-process
//! emulation both implement it. `IoctlConnection` turns any such backend into a `Connection`
//! exposing the `DrmControl` and `GpuControl` capabilities that devices are built on.

use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use log::trace;

use crate::bo::BoAllocRequest;
use crate::bo::BoInfo;
use crate::bo::BoMetadata;
use crate::drm_protocol::*;
use crate::ioctl::CsChunk;
use crate::ioctl::CsRequest;
use crate::ioctl::InfoRequest;
use crate::ioctl::Ioctl;
use crate::ioctl::SyncobjArray;
use crate::ioctl::SyncobjWait;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Services device-control requests and buffer mappings.
pub trait DrmBackend: Send + Sync {
    /// Executes `ioctl`, filling in its outputs.
    fn ioctl(&self, ioctl: &mut Ioctl) -> ShimResult<()>;

    /// Maps `size` bytes of the buffer behind a mapping offset from `GemMmap`.
    fn mmap(&self, offset: u64, size: usize) -> ShimResult<NonNull<u8>>;

    /// Releases a pointer returned by `mmap`.
    fn munmap(&self, addr: NonNull<u8>, size: usize) -> ShimResult<()>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrmVersion {
    pub major: i32,
    pub minor: i32,
    pub patchlevel: i32,
    pub name: String,
}

/// Generic DRM device control.
pub trait DrmControl: Send + Sync {
    fn version(&self) -> ShimResult<DrmVersion>;
    fn get_cap(&self, capability: u64) -> ShimResult<u64>;
    fn close_buffer_handle(&self, handle: u32) -> ShimResult<()>;
    fn prime_handle_to_fd(&self, handle: u32, flags: u32) -> ShimResult<i32>;
    fn prime_fd_to_handle(&self, fd: i32) -> ShimResult<u32>;
    fn syncobj_create(&self, flags: u32) -> ShimResult<u32>;
    fn syncobj_destroy(&self, handle: u32) -> ShimResult<()>;
    /// Returns the index of the first signaled handle.
    fn syncobj_wait(&self, handles: &[u32], timeout_nsec: i64, flags: u32) -> ShimResult<u32>;
    fn syncobj_timeline_wait(
        &self,
        handles: &[u32],
        points: &[u64],
        timeout_nsec: i64,
        flags: u32,
    ) -> ShimResult<u32>;
    fn syncobj_reset(&self, handles: &[u32]) -> ShimResult<()>;
    fn syncobj_signal(&self, handles: &[u32]) -> ShimResult<()>;
    fn syncobj_transfer(&self, transfer: &drm_syncobj_transfer) -> ShimResult<()>;
    fn syncobj_export(&self, handle: u32) -> ShimResult<i32>;
    fn syncobj_import(&self, fd: i32) -> ShimResult<u32>;
}

/// amdgpu specific control.
pub trait GpuControl: Send + Sync {
    fn query_info(&self, request: &mut InfoRequest) -> ShimResult<()>;
    fn bo_alloc(&self, request: &BoAllocRequest) -> ShimResult<u32>;
    fn bo_query_info(&self, handle: u32) -> ShimResult<BoInfo>;
    fn bo_set_metadata(&self, handle: u32, metadata: &BoMetadata) -> ShimResult<()>;
    fn bo_cpu_map(&self, handle: u32, size: u64) -> ShimResult<NonNull<u8>>;
    fn bo_cpu_unmap(&self, addr: NonNull<u8>, size: u64) -> ShimResult<()>;
    fn bo_from_user_mem(&self, addr: u64, size: u64) -> ShimResult<u32>;
    fn bo_va_op(&self, request: &drm_amdgpu_gem_va) -> ShimResult<()>;
    fn ctx_create(&self, priority: i32) -> ShimResult<u32>;
    fn ctx_free(&self, ctx_id: u32) -> ShimResult<()>;
    /// Submits `chunks` and returns the sequence number of the submission.
    fn cs_submit(&self, ctx_id: u32, chunks: Vec<CsChunk>) -> ShimResult<u64>;
    /// Returns true if the submission is still busy.
    fn wait_cs(&self, request: &drm_amdgpu_wait_cs_in) -> ShimResult<bool>;

    fn accel_working(&self) -> ShimResult<bool> {
        let mut request = InfoRequest::for_type::<u32>(AMDGPU_INFO_ACCEL_WORKING);
        self.query_info(&mut request)?;
        Ok(request.value::<u32>()? != 0)
    }

    fn device_info(&self) -> ShimResult<drm_amdgpu_info_device> {
        let mut request = InfoRequest::for_type::<drm_amdgpu_info_device>(AMDGPU_INFO_DEV_INFO);
        self.query_info(&mut request)?;
        request.value()
    }
}

/// An opened backend connection. Capabilities are obtained once at device bring-up.
pub trait Connection: Send + Sync {
    fn drm_control(&self) -> Option<Arc<dyn DrmControl>>;
    fn gpu_control(&self) -> Option<Arc<dyn GpuControl>>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TracePhase {
    Before,
    After,
}

/// Observes every request on a connection.
pub trait IoctlTracer: Send + Sync {
    fn trace(&self, connection_id: u64, ioctl: &Ioctl, phase: TracePhase);
}

/// Tracer forwarding to the `log` facade.
pub struct LogTracer;

impl IoctlTracer for LogTracer {
    fn trace(&self, connection_id: u64, ioctl: &Ioctl, phase: TracePhase) {
        match phase {
            TracePhase::Before => trace!("[{}] -> {:#x} {:?}", connection_id, ioctl.code(), ioctl),
            TracePhase::After => trace!("[{}] <- {:#x} {:?}", connection_id, ioctl.code(), ioctl),
        }
    }
}

/// Forwards to `primary` and retries on `fallback` when `primary` does not carry a request.
pub struct DispatchBackend {
    primary: Arc<dyn DrmBackend>,
    fallback: Arc<dyn DrmBackend>,
}

impl DispatchBackend {
    pub fn new(primary: Arc<dyn DrmBackend>, fallback: Arc<dyn DrmBackend>) -> DispatchBackend {
        DispatchBackend { primary, fallback }
    }
}

impl DrmBackend for DispatchBackend {
    fn ioctl(&self, ioctl: &mut Ioctl) -> ShimResult<()> {
        match self.primary.ioctl(ioctl) {
            Err(ShimError::NotSupported) => {
                debug!("request {:#x} handled by fallback backend", ioctl.code());
                self.fallback.ioctl(ioctl)
            }
            result => result,
        }
    }

    fn mmap(&self, offset: u64, size: usize) -> ShimResult<NonNull<u8>> {
        match self.primary.mmap(offset, size) {
            Err(ShimError::NotSupported) => self.fallback.mmap(offset, size),
            result => result,
        }
    }

    fn munmap(&self, addr: NonNull<u8>, size: usize) -> ShimResult<()> {
        match self.primary.munmap(addr, size) {
            Err(ShimError::NotSupported) => self.fallback.munmap(addr, size),
            result => result,
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// Runs a request and hands back its arguments.
macro_rules! submit {
    ($control:expr, $variant:ident, $args:expr) => {{
        let mut ioctl = Ioctl::$variant($args);
        $control.submit(&mut ioctl)?;
        match ioctl {
            Ioctl::$variant(args) => args,
            _ => return Err(ShimError::ProtocolError),
        }
    }};
}

/// `DrmControl` and `GpuControl` expressed as requests on a `DrmBackend`.
pub struct IoctlControl {
    connection_id: u64,
    backend: Arc<dyn DrmBackend>,
    tracer: Option<Arc<dyn IoctlTracer>>,
}

impl IoctlControl {
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn submit(&self, ioctl: &mut Ioctl) -> ShimResult<()> {
        if let Some(tracer) = &self.tracer {
            tracer.trace(self.connection_id, ioctl, TracePhase::Before);
        }

        let result = self.backend.ioctl(ioctl);

        if let Some(tracer) = &self.tracer {
            tracer.trace(self.connection_id, ioctl, TracePhase::After);
        }

        result
    }
}

impl DrmControl for IoctlControl {
    fn version(&self) -> ShimResult<DrmVersion> {
        let version = submit!(self, Version, drm_version::default());
        Ok(DrmVersion {
            major: version.version_major,
            minor: version.version_minor,
            patchlevel: version.version_patchlevel,
            name: version.name(),
        })
    }

    fn get_cap(&self, capability: u64) -> ShimResult<u64> {
        let cap = submit!(
            self,
            GetCap,
            drm_get_cap {
                capability,
                value: 0
            }
        );
        Ok(cap.value)
    }

    fn close_buffer_handle(&self, handle: u32) -> ShimResult<()> {
        submit!(self, GemClose, drm_gem_close { handle, pad: 0 });
        Ok(())
    }

    fn prime_handle_to_fd(&self, handle: u32, flags: u32) -> ShimResult<i32> {
        let prime = submit!(
            self,
            PrimeHandleToFd,
            drm_prime_handle {
                handle,
                flags,
                ..Default::default()
            }
        );
        Ok(prime.fd)
    }

    fn prime_fd_to_handle(&self, fd: i32) -> ShimResult<u32> {
        let prime = submit!(
            self,
            PrimeFdToHandle,
            drm_prime_fd {
                fd,
                ..Default::default()
            }
        );
        Ok(prime.handle)
    }

    fn syncobj_create(&self, flags: u32) -> ShimResult<u32> {
        let create = submit!(self, SyncobjCreate, drm_syncobj_create { flags, handle: 0 });
        Ok(create.handle)
    }

    fn syncobj_destroy(&self, handle: u32) -> ShimResult<()> {
        submit!(self, SyncobjDestroy, drm_syncobj_destroy { handle, pad: 0 });
        Ok(())
    }

    fn syncobj_wait(&self, handles: &[u32], timeout_nsec: i64, flags: u32) -> ShimResult<u32> {
        let wait = submit!(
            self,
            SyncobjWait,
            SyncobjWait::new(handles, timeout_nsec, flags)?
        );
        Ok(wait.args.first_signaled)
    }

    fn syncobj_timeline_wait(
        &self,
        handles: &[u32],
        points: &[u64],
        timeout_nsec: i64,
        flags: u32,
    ) -> ShimResult<u32> {
        let wait = submit!(
            self,
            SyncobjTimelineWait,
            SyncobjWait::timeline(handles, points, timeout_nsec, flags)?
        );
        Ok(wait.args.first_signaled)
    }

    fn syncobj_reset(&self, handles: &[u32]) -> ShimResult<()> {
        submit!(self, SyncobjReset, SyncobjArray::new(handles)?);
        Ok(())
    }

    fn syncobj_signal(&self, handles: &[u32]) -> ShimResult<()> {
        submit!(self, SyncobjSignal, SyncobjArray::new(handles)?);
        Ok(())
    }

    fn syncobj_transfer(&self, transfer: &drm_syncobj_transfer) -> ShimResult<()> {
        submit!(self, SyncobjTransfer, *transfer);
        Ok(())
    }

    fn syncobj_export(&self, handle: u32) -> ShimResult<i32> {
        let export = submit!(
            self,
            SyncobjHandleToFd,
            drm_prime_handle {
                handle,
                ..Default::default()
            }
        );
        Ok(export.fd)
    }

    fn syncobj_import(&self, fd: i32) -> ShimResult<u32> {
        let import = submit!(
            self,
            SyncobjFdToHandle,
            drm_prime_fd {
                fd,
                ..Default::default()
            }
        );
        Ok(import.handle)
    }
}

impl GpuControl for IoctlControl {
    fn query_info(&self, request: &mut InfoRequest) -> ShimResult<()> {
        *request = submit!(self, Info, request.clone());
        Ok(())
    }

    fn bo_alloc(&self, request: &BoAllocRequest) -> ShimResult<u32> {
        let create = submit!(
            self,
            GemCreate,
            drm_amdgpu_gem_create {
                in_: drm_amdgpu_gem_create_in {
                    bo_size: request.alloc_size,
                    alignment: request.phys_alignment,
                    domains: request.preferred_heap.bits(),
                    domain_flags: request.flags.bits(),
                },
                ..Default::default()
            }
        );
        Ok(create.out.handle)
    }

    fn bo_query_info(&self, handle: u32) -> ShimResult<BoInfo> {
        let op = submit!(
            self,
            GemOp,
            drm_amdgpu_gem_op {
                handle,
                op: AMDGPU_GEM_OP_GET_GEM_CREATE_INFO,
                ..Default::default()
            }
        );
        let metadata = submit!(
            self,
            GemMetadata,
            drm_amdgpu_gem_metadata::new(handle, AMDGPU_GEM_METADATA_OP_GET_METADATA)
        );

        let dwords = (metadata.data_size_bytes as usize)
            .div_ceil(4)
            .min(AMDGPU_GEM_METADATA_MAX_DWORDS);
        Ok(BoInfo {
            alloc_size: op.create_info.bo_size,
            phys_alignment: op.create_info.alignment,
            preferred_heap: GemDomains::from_bits_retain(op.create_info.domains),
            alloc_flags: GemCreateFlags::from_bits_retain(op.create_info.domain_flags),
            metadata: BoMetadata {
                flags: metadata.flags,
                tiling_info: metadata.tiling_info,
                umd_metadata: metadata.data[..dwords].to_vec(),
            },
        })
    }

    fn bo_set_metadata(&self, handle: u32, metadata: &BoMetadata) -> ShimResult<()> {
        if metadata.umd_metadata.len() > AMDGPU_GEM_METADATA_MAX_DWORDS {
            return Err(ShimError::InvalidArgument);
        }

        let mut args = drm_amdgpu_gem_metadata::new(handle, AMDGPU_GEM_METADATA_OP_SET_METADATA);
        args.flags = metadata.flags;
        args.tiling_info = metadata.tiling_info;
        args.data_size_bytes = (metadata.umd_metadata.len() * 4).try_into()?;
        args.data[..metadata.umd_metadata.len()].copy_from_slice(&metadata.umd_metadata);
        submit!(self, GemMetadata, args);
        Ok(())
    }

    fn bo_cpu_map(&self, handle: u32, size: u64) -> ShimResult<NonNull<u8>> {
        let mmap = submit!(
            self,
            GemMmap,
            drm_amdgpu_gem_mmap {
                handle,
                ..Default::default()
            }
        );
        self.backend.mmap(mmap.addr_ptr, size.try_into()?)
    }

    fn bo_cpu_unmap(&self, addr: NonNull<u8>, size: u64) -> ShimResult<()> {
        self.backend.munmap(addr, size.try_into()?)
    }

    fn bo_from_user_mem(&self, addr: u64, size: u64) -> ShimResult<u32> {
        let userptr = submit!(
            self,
            GemUserptr,
            drm_amdgpu_gem_userptr {
                addr,
                size,
                ..Default::default()
            }
        );
        Ok(userptr.handle)
    }

    fn bo_va_op(&self, request: &drm_amdgpu_gem_va) -> ShimResult<()> {
        submit!(self, GemVa, *request);
        Ok(())
    }

    fn ctx_create(&self, priority: i32) -> ShimResult<u32> {
        let ctx = submit!(
            self,
            Ctx,
            drm_amdgpu_ctx {
                in_: drm_amdgpu_ctx_in {
                    op: AMDGPU_CTX_OP_ALLOC_CTX,
                    priority,
                    ..Default::default()
                },
                ..Default::default()
            }
        );
        Ok(ctx.out.ctx_id)
    }

    fn ctx_free(&self, ctx_id: u32) -> ShimResult<()> {
        submit!(
            self,
            Ctx,
            drm_amdgpu_ctx {
                in_: drm_amdgpu_ctx_in {
                    op: AMDGPU_CTX_OP_FREE_CTX,
                    ctx_id,
                    ..Default::default()
                },
                ..Default::default()
            }
        );
        Ok(())
    }

    fn cs_submit(&self, ctx_id: u32, chunks: Vec<CsChunk>) -> ShimResult<u64> {
        let cs = submit!(self, Cs, CsRequest::new(ctx_id, chunks)?);
        Ok(cs.args.out.handle)
    }

    fn wait_cs(&self, request: &drm_amdgpu_wait_cs_in) -> ShimResult<bool> {
        let wait = submit!(
            self,
            WaitCs,
            drm_amdgpu_wait_cs {
                in_: *request,
                ..Default::default()
            }
        );
        Ok(wait.out.status != 0)
    }
}

/// A `Connection` over a `DrmBackend`.
pub struct IoctlConnection {
    control: Arc<IoctlControl>,
}

impl IoctlConnection {
    pub fn new(
        backend: Arc<dyn DrmBackend>,
        tracer: Option<Arc<dyn IoctlTracer>>,
    ) -> IoctlConnection {
        IoctlConnection {
            control: Arc::new(IoctlControl {
                connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                backend,
                tracer,
            }),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.control.connection_id()
    }
}

impl Connection for IoctlConnection {
    fn drm_control(&self) -> Option<Arc<dyn DrmControl>> {
        let control: Arc<dyn DrmControl> = self.control.clone();
        Some(control)
    }

    fn gpu_control(&self) -> Option<Arc<dyn GpuControl>> {
        let control: Arc<dyn GpuControl> = self.control.clone();
        Some(control)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::emulation::EmulatedDevice;

    #[derive(Default)]
    struct RecordingTracer {
        events: Mutex<Vec<(u64, u32, TracePhase)>>,
    }

    impl IoctlTracer for RecordingTracer {
        fn trace(&self, connection_id: u64, ioctl: &Ioctl, phase: TracePhase) {
            self.events.lock().push((connection_id, ioctl.code(), phase));
        }
    }

    /// Carries nothing, so everything lands on the fallback.
    struct EmptyBackend;

    impl DrmBackend for EmptyBackend {
        fn ioctl(&self, _ioctl: &mut Ioctl) -> ShimResult<()> {
            Err(ShimError::NotSupported)
        }

        fn mmap(&self, _offset: u64, _size: usize) -> ShimResult<NonNull<u8>> {
            Err(ShimError::NotSupported)
        }

        fn munmap(&self, _addr: NonNull<u8>, _size: usize) -> ShimResult<()> {
            Err(ShimError::NotSupported)
        }
    }

    /// Fails every request with a fixed error.
    struct FailingBackend(fn() -> ShimError);

    impl DrmBackend for FailingBackend {
        fn ioctl(&self, _ioctl: &mut Ioctl) -> ShimResult<()> {
            Err((self.0)())
        }

        fn mmap(&self, _offset: u64, _size: usize) -> ShimResult<NonNull<u8>> {
            Err((self.0)())
        }

        fn munmap(&self, _addr: NonNull<u8>, _size: usize) -> ShimResult<()> {
            Err((self.0)())
        }
    }

    #[test]
    fn tracer_sees_both_phases() {
        let tracer = Arc::new(RecordingTracer::default());
        let sink: Arc<dyn IoctlTracer> = tracer.clone();
        let connection = IoctlConnection::new(Arc::new(EmulatedDevice::new()), Some(sink));
        let drm = connection.drm_control().unwrap();

        assert_eq!(drm.version().unwrap().major, AMDGPU_DRM_MAJOR);

        let id = connection.connection_id();
        assert_eq!(
            *tracer.events.lock(),
            vec![
                (id, DRM_IOCTL_VERSION, TracePhase::Before),
                (id, DRM_IOCTL_VERSION, TracePhase::After)
            ]
        );
    }

    #[test]
    fn dispatch_falls_back_only_on_not_supported() {
        let emulated: Arc<dyn DrmBackend> = Arc::new(EmulatedDevice::new());
        let dispatch = DispatchBackend::new(Arc::new(EmptyBackend), emulated.clone());
        let connection = IoctlConnection::new(Arc::new(dispatch), None);
        let gpu = connection.gpu_control().unwrap();
        assert!(gpu.accel_working().unwrap());

        let failing = DispatchBackend::new(
            Arc::new(FailingBackend(|| ShimError::PermissionDenied)),
            emulated,
        );
        let connection = IoctlConnection::new(Arc::new(failing), None);
        let drm = connection.drm_control().unwrap();
        assert!(matches!(drm.version(), Err(ShimError::PermissionDenied)));

        let unmapped = DispatchBackend::new(
            Arc::new(FailingBackend(|| ShimError::NotFound)),
            Arc::new(EmulatedDevice::new()),
        );
        assert!(matches!(
            unmapped.munmap(NonNull::dangling(), 0x1000),
            Err(ShimError::NotFound)
        ));
    }

    #[test]
    fn connections_get_distinct_ids() {
        let backend: Arc<dyn DrmBackend> = Arc::new(EmulatedDevice::new());
        let a = IoctlConnection::new(backend.clone(), None);
        let b = IoctlConnection::new(backend, None);
        assert_ne!(a.connection_id(), b.connection_id());
    }

    #[test]
    fn metadata_round_trips_through_backend() {
        let connection = IoctlConnection::new(Arc::new(EmulatedDevice::new()), None);
        let gpu = connection.gpu_control().unwrap();
        let handle = gpu
            .bo_alloc(&BoAllocRequest {
                alloc_size: 0x1000,
                phys_alignment: 0x1000,
                preferred_heap: GemDomains::GTT,
                flags: GemCreateFlags::CPU_ACCESS_REQUIRED,
            })
            .unwrap();

        let metadata = BoMetadata {
            flags: 1,
            tiling_info: 0x40,
            umd_metadata: vec![1, 2, 3],
        };
        gpu.bo_set_metadata(handle, &metadata).unwrap();

        let info = gpu.bo_query_info(handle).unwrap();
        assert_eq!(info.alloc_size, 0x1000);
        assert_eq!(info.preferred_heap, GemDomains::GTT);
        assert_eq!(info.alloc_flags, GemCreateFlags::CPU_ACCESS_REQUIRED);
        assert_eq!(info.metadata, metadata);

        let too_long = BoMetadata {
            umd_metadata: vec![0; AMDGPU_GEM_METADATA_MAX_DWORDS + 1],
            ..Default::default()
        };
        assert!(matches!(
            gpu.bo_set_metadata(handle, &too_long),
            Err(ShimError::InvalidArgument)
        ));
    }

    #[test]
    fn submission_signals_out_fence() {
        let connection = IoctlConnection::new(Arc::new(EmulatedDevice::new()), None);
        let drm = connection.drm_control().unwrap();
        let gpu = connection.gpu_control().unwrap();

        let handle = gpu
            .bo_alloc(&BoAllocRequest {
                alloc_size: 0x1000,
                ..Default::default()
            })
            .unwrap();
        gpu.bo_va_op(&drm_amdgpu_gem_va {
            handle,
            operation: AMDGPU_VA_OP_MAP,
            va_address: 0x100000,
            map_size: 0x1000,
            ..Default::default()
        })
        .unwrap();
        let ctx = gpu.ctx_create(0).unwrap();

        let fence = drm.syncobj_create(0).unwrap();
        assert!(matches!(
            drm.syncobj_wait(&[fence], 0, 0),
            Err(ShimError::TimedOut)
        ));

        let ib = drm_amdgpu_cs_chunk_ib {
            va_start: 0x100000,
            ib_bytes: 64,
            ..Default::default()
        };
        let out = [drm_amdgpu_cs_chunk_syncobj {
            handle: fence,
            flags: 0,
            point: 0,
        }];
        let chunks = vec![
            CsChunk::ib(&ib),
            CsChunk::syncobjs(AMDGPU_CHUNK_ID_SYNCOBJ_OUT, &out),
        ];
        let seq = gpu.cs_submit(ctx, chunks).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(drm.syncobj_wait(&[fence], 0, 0).unwrap(), 0);

        let busy = gpu
            .wait_cs(&drm_amdgpu_wait_cs_in {
                handle: seq,
                ctx_id: ctx,
                ..Default::default()
            })
            .unwrap();
        assert!(!busy);

        gpu.ctx_free(ctx).unwrap();
        assert!(matches!(
            gpu.cs_submit(ctx, vec![CsChunk::ib(&ib)]),
            Err(ShimError::InvalidArgument)
        ));
    }

    #[test]
    fn syncobj_descriptors_and_timelines() {
        let connection = IoctlConnection::new(Arc::new(EmulatedDevice::new()), None);
        let drm = connection.drm_control().unwrap();

        let binary = drm.syncobj_create(DRM_SYNCOBJ_CREATE_SIGNALED).unwrap();
        let timeline = drm.syncobj_create(0).unwrap();
        assert_eq!(drm.syncobj_wait(&[timeline, binary], 0, 0).unwrap(), 1);
        assert!(matches!(
            drm.syncobj_wait(&[timeline, binary], 0, DRM_SYNCOBJ_WAIT_FLAGS_WAIT_ALL),
            Err(ShimError::TimedOut)
        ));

        drm.syncobj_transfer(&drm_syncobj_transfer {
            src_handle: binary,
            dst_handle: timeline,
            dst_point: 5,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(drm.syncobj_timeline_wait(&[timeline], &[5], 0, 0).unwrap(), 0);
        assert!(matches!(
            drm.syncobj_timeline_wait(&[timeline], &[6], 0, 0),
            Err(ShimError::TimedOut)
        ));

        drm.syncobj_reset(&[binary]).unwrap();
        assert!(drm.syncobj_wait(&[binary], 0, 0).is_err());
        drm.syncobj_signal(&[binary]).unwrap();
        drm.syncobj_wait(&[binary], 0, 0).unwrap();

        let fd = drm.syncobj_export(timeline).unwrap();
        assert_eq!(drm.syncobj_import(fd).unwrap(), timeline);
        assert!(matches!(drm.prime_fd_to_handle(fd), Err(ShimError::NotFound)));

        drm.syncobj_destroy(binary).unwrap();
        assert!(matches!(drm.syncobj_destroy(binary), Err(ShimError::NotFound)));
        assert!(matches!(
            drm.syncobj_timeline_wait(&[timeline], &[], 0, 0),
            Err(ShimError::InvalidArgument)
        ));
    }

    #[test]
    fn capabilities() {
        let connection = IoctlConnection::new(Arc::new(EmulatedDevice::new()), None);
        let drm = connection.drm_control().unwrap();
        assert_eq!(
            drm.get_cap(DRM_CAP_PRIME).unwrap(),
            DRM_PRIME_CAP_IMPORT | DRM_PRIME_CAP_EXPORT
        );
        assert!(matches!(drm.get_cap(0xffff), Err(ShimError::InvalidArgument)));
        assert_eq!(drm.version().unwrap().name, "amdgpu");
    }
}
