// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer objects: allocation, sharing, CPU mappings and GPU virtual address mappings.

use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;

use crate::device::Device;
use crate::drm_protocol::*;
use crate::shim_utils::page_align;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Parameters of a new buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BoAllocRequest {
    pub alloc_size: u64,
    pub phys_alignment: u64,
    pub preferred_heap: GemDomains,
    pub flags: GemCreateFlags,
}

/// Driver-private metadata attached to a buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoMetadata {
    pub flags: u64,
    pub tiling_info: u64,
    /// Opaque to the kernel interface, at most 64 dwords.
    pub umd_metadata: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoInfo {
    pub alloc_size: u64,
    pub phys_alignment: u64,
    pub preferred_heap: GemDomains,
    pub alloc_flags: GemCreateFlags,
    pub metadata: BoMetadata,
}

/// Kinds of identifier a buffer can be shared through.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleType {
    /// Legacy global name.
    GemFlinkName,
    /// Handle local to the device connection.
    Kms,
    /// Foreign memory descriptor.
    DmaBufFd,
    /// Local handle that must not be imported back.
    KmsNoImport,
}

#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VaOp {
    Map = AMDGPU_VA_OP_MAP,
    Unmap = AMDGPU_VA_OP_UNMAP,
    Clear = AMDGPU_VA_OP_CLEAR,
    Replace = AMDGPU_VA_OP_REPLACE,
}

impl TryFrom<u32> for VaOp {
    type Error = ShimError;

    fn try_from(op: u32) -> ShimResult<VaOp> {
        match op {
            AMDGPU_VA_OP_MAP => Ok(VaOp::Map),
            AMDGPU_VA_OP_UNMAP => Ok(VaOp::Unmap),
            AMDGPU_VA_OP_CLEAR => Ok(VaOp::Clear),
            AMDGPU_VA_OP_REPLACE => Ok(VaOp::Replace),
            _ => Err(ShimError::InvalidArgument),
        }
    }
}

/// A buffer obtained through `Device::bo_import`.
pub struct ImportResult {
    pub buffer: Arc<BufferObject>,
    pub alloc_size: u64,
}

struct CpuMapping {
    ptr: Option<NonNull<u8>>,
    map_count: u32,
}

// SAFETY:
// The pointer is only handed out, never dereferenced here.
unsafe impl Send for CpuMapping {}

/// A GPU buffer tracked by its device.
pub struct BufferObject {
    device: Arc<Device>,
    handle: u32,
    alloc_size: u64,
    refcount: AtomicU32,
    cpu: Mutex<CpuMapping>,
}

impl BufferObject {
    fn new(device: Arc<Device>, handle: u32, alloc_size: u64) -> BufferObject {
        BufferObject {
            device,
            handle,
            alloc_size,
            refcount: AtomicU32::new(1),
            cpu: Mutex::new(CpuMapping {
                ptr: None,
                map_count: 0,
            }),
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn alloc_size(&self) -> u64 {
        self.alloc_size
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Number of outstanding `cpu_map` calls.
    pub fn cpu_map_count(&self) -> u32 {
        self.cpu.lock().map_count
    }

    /// Takes another reference, to be released with `free`.
    pub fn inc_ref(self: &Arc<Self>) -> Arc<BufferObject> {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }

    pub fn export(&self, kind: HandleType) -> ShimResult<u32> {
        match kind {
            HandleType::GemFlinkName => Err(ShimError::NotSupported),
            HandleType::Kms | HandleType::KmsNoImport => Ok(self.handle),
            HandleType::DmaBufFd => {
                let fd = self
                    .device
                    .drm()
                    .prime_handle_to_fd(self.handle, DRM_CLOEXEC | DRM_RDWR)?;
                Ok(fd.try_into()?)
            }
        }
    }

    /// Drops one reference. The last one unregisters the buffer, releases any CPU mapping and
    /// closes the backend handle, all under the device lock.
    pub fn free(self: Arc<Self>) -> ShimResult<()> {
        let mut tables = self.device.tables.lock();
        let previous = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| ShimError::InvalidState)?;
        if previous > 1 {
            return Ok(());
        }

        tables.handles.remove(self.handle);
        self.release_cpu_mapping();
        self.device.drm().close_buffer_handle(self.handle)
    }

    fn release_cpu_mapping(&self) {
        let mut cpu = self.cpu.lock();
        if let Some(ptr) = cpu.ptr.take() {
            cpu.map_count = 0;
            if let Err(e) = self.device.gpu().bo_cpu_unmap(ptr, self.alloc_size) {
                error!("failed to unmap buffer {}: {}", self.handle, e);
            }
        }
    }

    /// Maps the buffer for CPU access. Nested calls share one mapping.
    pub fn cpu_map(&self) -> ShimResult<NonNull<u8>> {
        let mut cpu = self.cpu.lock();
        match (cpu.ptr, cpu.map_count) {
            (Some(ptr), count) if count > 0 => {
                cpu.map_count = count + 1;
                Ok(ptr)
            }
            (None, 0) => {
                let ptr = self
                    .device
                    .gpu()
                    .bo_cpu_map(self.handle, self.alloc_size)?;
                cpu.ptr = Some(ptr);
                cpu.map_count = 1;
                Ok(ptr)
            }
            (ptr, count) => panic!(
                "buffer {} has mapping {:?} with count {}",
                self.handle, ptr, count
            ),
        }
    }

    /// Undoes one `cpu_map`. The mapping goes away with the last call.
    pub fn cpu_unmap(&self) -> ShimResult<()> {
        let mut cpu = self.cpu.lock();
        match (cpu.ptr, cpu.map_count) {
            (None, 0) => Err(ShimError::InvalidState),
            (Some(ptr), 1) => {
                cpu.ptr = None;
                cpu.map_count = 0;
                self.device.gpu().bo_cpu_unmap(ptr, self.alloc_size)
            }
            (Some(_), count) if count > 1 => {
                cpu.map_count = count - 1;
                Ok(())
            }
            (ptr, count) => panic!(
                "buffer {} has mapping {:?} with count {}",
                self.handle, ptr, count
            ),
        }
    }

    pub fn set_metadata(&self, metadata: &BoMetadata) -> ShimResult<()> {
        self.device.gpu().bo_set_metadata(self.handle, metadata)
    }

    pub fn query_info(&self) -> ShimResult<BoInfo> {
        self.device.gpu().bo_query_info(self.handle)
    }

    /// Maps, unmaps or replaces a GPU virtual address range with readable, writeable and
    /// executable permissions.
    pub fn va_op(&self, offset: u64, size: u64, address: u64, op: VaOp) -> ShimResult<()> {
        self.device.va_op_raw(
            Some(self),
            offset,
            size,
            address,
            VmPageFlags::READABLE | VmPageFlags::WRITEABLE | VmPageFlags::EXECUTABLE,
            op as u32,
        )
    }

    pub fn wait_for_idle(&self, _timeout_ns: u64) -> ShimResult<bool> {
        Err(ShimError::NotSupported)
    }
}

impl Device {
    fn register_buffer(
        self: &Arc<Self>,
        handle: u32,
        alloc_size: u64,
    ) -> ShimResult<Arc<BufferObject>> {
        let buffer = Arc::new(BufferObject::new(self.clone(), handle, alloc_size));
        let inserted = self.tables.lock().handles.insert(handle, buffer.clone());
        if let Err(e) = inserted {
            self.close_untracked(handle);
            return Err(e);
        }
        Ok(buffer)
    }

    fn close_untracked(&self, handle: u32) {
        if let Err(e) = self.drm().close_buffer_handle(handle) {
            error!("failed to close handle {}: {}", handle, e);
        }
    }

    /// Allocates a new buffer with one reference.
    pub fn bo_alloc(self: &Arc<Self>, request: &BoAllocRequest) -> ShimResult<Arc<BufferObject>> {
        let handle = self.gpu().bo_alloc(request)?;
        self.register_buffer(handle, request.alloc_size)
    }

    /// Wraps existing process memory in a buffer.
    pub fn bo_from_user_mem(
        self: &Arc<Self>,
        cpu: *mut u8,
        size: u64,
    ) -> ShimResult<Arc<BufferObject>> {
        if cpu.is_null() || size == 0 {
            return Err(ShimError::InvalidArgument);
        }

        let handle = self.gpu().bo_from_user_mem(cpu as u64, size)?;
        self.register_buffer(handle, size)
    }

    /// Imports a shared buffer. Importing a buffer that is already tracked returns the same
    /// object with an extra reference.
    pub fn bo_import(
        self: &Arc<Self>,
        kind: HandleType,
        shared_handle: u32,
    ) -> ShimResult<ImportResult> {
        match kind {
            HandleType::Kms | HandleType::KmsNoImport => return Err(ShimError::PermissionDenied),
            // Flink names are never handed out, so there is nothing to look up.
            HandleType::GemFlinkName => return Err(ShimError::NotSupported),
            HandleType::DmaBufFd => (),
        }

        let fd = shared_handle.try_into()?;
        // Held from conversion to registration. `free` closes handles under the same lock.
        let mut tables = self.tables.lock();
        let handle = self.drm().prime_fd_to_handle(fd)?;
        if let Ok(buffer) = tables.handles.lookup(handle) {
            let buffer = buffer.inc_ref();
            return Ok(ImportResult {
                alloc_size: buffer.alloc_size,
                buffer,
            });
        }

        let info = match self.gpu().bo_query_info(handle) {
            Ok(info) => info,
            Err(e) => {
                self.close_untracked(handle);
                return Err(e);
            }
        };

        let buffer = Arc::new(BufferObject::new(self.clone(), handle, info.alloc_size));
        if let Err(e) = tables.handles.insert(handle, buffer.clone()) {
            self.close_untracked(handle);
            return Err(e);
        }
        Ok(ImportResult {
            alloc_size: info.alloc_size,
            buffer,
        })
    }

    /// Finds the CPU-mapped buffer containing `cpu` and returns it with an extra reference
    /// together with the offset of `cpu` inside it.
    pub fn find_bo_by_cpu_mapping(
        &self,
        cpu: *const u8,
        size: u64,
    ) -> ShimResult<(Arc<BufferObject>, u64)> {
        if cpu.is_null() || size == 0 {
            return Err(ShimError::InvalidArgument);
        }

        let address = cpu as usize as u64;
        let tables = self.tables.lock();
        for (_, buffer) in tables.handles.iter() {
            if size > buffer.alloc_size {
                continue;
            }

            let Some(ptr) = buffer.cpu.lock().ptr else {
                continue;
            };
            let start = ptr.as_ptr() as usize as u64;
            if address >= start && address < start + buffer.alloc_size {
                return Ok((buffer.inc_ref(), address - start));
            }
        }

        Err(ShimError::NotFound)
    }

    /// GPU virtual address operation with explicit permissions. `buffer` may be omitted for
    /// operations that do not reference one, such as `AMDGPU_VA_OP_CLEAR`.
    pub fn va_op_raw(
        &self,
        buffer: Option<&BufferObject>,
        offset: u64,
        size: u64,
        address: u64,
        flags: VmPageFlags,
        op: u32,
    ) -> ShimResult<()> {
        let op = VaOp::try_from(op)?;
        let request = drm_amdgpu_gem_va {
            handle: buffer.map_or(0, |buffer| buffer.handle),
            operation: op as u32,
            flags: flags.bits(),
            va_address: address,
            offset_in_bo: offset,
            map_size: page_align(size)?,
            ..Default::default()
        };
        self.gpu().bo_va_op(&request)
    }

    pub fn bo_list_create(&self, _buffers: &[&BufferObject]) -> ShimResult<u32> {
        Err(ShimError::NotSupported)
    }

    pub fn bo_list_destroy(&self, _list: u32) -> ShimResult<()> {
        Err(ShimError::NotSupported)
    }
}
