// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! In-process GPU emulation.
//!
//! `EmulatedDevice` answers every device-control request without hardware. Buffers live in
//! shared memory, GPU mappings are tracked in an ordered map and submissions complete at once,
//! so sync objects they signal are signaled by the time the submission returns.

mod device_info;
mod fd_mapper;
mod memory;

use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;

use log::debug;
use log::warn;
use parking_lot::Mutex;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

pub use self::device_info::device_info;
use self::fd_mapper::FdMapper;
use self::fd_mapper::FdTarget;
use self::memory::GpuBuffer;
use self::memory::GpuMapping;
use self::memory::GpuMappings;
use crate::backend::DrmBackend;
use crate::drm_protocol::*;
use crate::handle_table::HandleTable;
use crate::ioctl::read_array;
use crate::ioctl::CsRequest;
use crate::ioctl::InfoRequest;
use crate::ioctl::Ioctl;
use crate::ioctl::SyncobjWait;
use crate::proxy::RegionExporter;
use crate::shm::map_region;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

const MAX_REGISTER_READ: u32 = 128;

struct EmulationState {
    buffers: HandleTable<Arc<GpuBuffer>>,
    next_buffer: u32,
    mappings: GpuMappings,
    /// Last signaled point of each sync object. Binary objects are signaled at point 1.
    syncobjs: HandleTable<u64>,
    next_syncobj: u32,
    /// Priority of each live context.
    contexts: HandleTable<i32>,
    next_context: u32,
    last_submission: u64,
    fds: FdMapper,
}

/// A `DrmBackend` emulating an amdgpu device.
pub struct EmulatedDevice {
    state: Mutex<EmulationState>,
}

impl Default for EmulatedDevice {
    fn default() -> EmulatedDevice {
        EmulatedDevice::new()
    }
}

impl EmulatedDevice {
    pub fn new() -> EmulatedDevice {
        EmulatedDevice {
            state: Mutex::new(EmulationState {
                buffers: HandleTable::new(),
                next_buffer: 1,
                mappings: GpuMappings::default(),
                syncobjs: HandleTable::new(),
                next_syncobj: 1,
                contexts: HandleTable::new(),
                next_context: 1,
                last_submission: 0,
                fds: FdMapper::default(),
            }),
        }
    }

    /// Buffer handle and offset backing GPU address `address`.
    pub fn lookup_va(&self, address: u64) -> ShimResult<(u32, u64)> {
        let state = self.state.lock();
        let (mapping, offset) = state.mappings.lookup(address)?;
        Ok((mapping.handle, offset))
    }

    pub fn read_buffer(&self, handle: u32, offset: u64, len: usize) -> ShimResult<Vec<u8>> {
        let buffer = self.state.lock().buffers.lookup(handle)?.clone();
        buffer.read_bytes(offset, len)
    }

    pub fn write_buffer(&self, handle: u32, offset: u64, data: &[u8]) -> ShimResult<()> {
        let buffer = self.state.lock().buffers.lookup(handle)?.clone();
        buffer.write_bytes(offset, data)
    }

    /// Closes a descriptor handed out by a handle-to-descriptor conversion.
    pub fn close_fd(&self, fd: RawFd) -> ShimResult<()> {
        self.state.lock().fds.close(fd)
    }

    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn mapping_count(&self) -> usize {
        self.state.lock().mappings.len()
    }

    fn buffer_for_offset(&self, offset: u64) -> ShimResult<Arc<GpuBuffer>> {
        let handle = u32::try_from(offset).map_err(|_| ShimError::NotFound)?;
        Ok(self.state.lock().buffers.lookup(handle)?.clone())
    }
}

fn fill_version(version: &mut drm_version) {
    let name = device_info::DRIVER_NAME.as_bytes();
    version.version_major = AMDGPU_DRM_MAJOR;
    version.version_minor = device_info::DRIVER_MINOR;
    version.version_patchlevel = 0;
    version.name = [0; 32];
    version.name[..name.len()].copy_from_slice(name);
    version.name_len = name.len() as u32;
}

fn get_cap(capability: u64) -> ShimResult<u64> {
    match capability {
        DRM_CAP_PRIME => Ok(DRM_PRIME_CAP_IMPORT | DRM_PRIME_CAP_EXPORT),
        DRM_CAP_SYNCOBJ | DRM_CAP_SYNCOBJ_TIMELINE => Ok(1),
        _ => Err(ShimError::InvalidArgument),
    }
}

impl EmulationState {
    fn insert_buffer(&mut self, buffer: GpuBuffer) -> ShimResult<u32> {
        let handle = self.next_buffer;
        self.buffers.insert(handle, Arc::new(buffer))?;
        self.next_buffer += 1;
        Ok(handle)
    }

    fn export(&mut self, target: FdTarget) -> ShimResult<RawFd> {
        match target {
            FdTarget::Buffer(handle) => self.buffers.lookup(handle).map(|_| ())?,
            FdTarget::Syncobj(handle) => self.syncobjs.lookup(handle).map(|_| ())?,
        }
        self.fds.export(target)
    }

    fn create_syncobj(&mut self, flags: u32) -> ShimResult<u32> {
        let point = if flags & DRM_SYNCOBJ_CREATE_SIGNALED != 0 {
            1
        } else {
            0
        };
        let handle = self.next_syncobj;
        self.syncobjs.insert(handle, point)?;
        self.next_syncobj += 1;
        Ok(handle)
    }

    // Nothing is ever pending, so a wait that is not satisfied now never will be.
    fn wait_syncobjs(&self, wait: &SyncobjWait) -> ShimResult<u32> {
        if wait.handles.is_empty() {
            return Err(ShimError::InvalidArgument);
        }

        let mut first_signaled = None;
        let mut all_signaled = true;
        for (index, handle) in wait.handles.iter().enumerate() {
            let point = *self.syncobjs.lookup(*handle)?;
            let wanted = wait.points.get(index).copied().unwrap_or(0).max(1);
            if point >= wanted {
                first_signaled.get_or_insert(index as u32);
            } else {
                all_signaled = false;
            }
        }

        let wait_all = wait.args.flags & DRM_SYNCOBJ_WAIT_FLAGS_WAIT_ALL != 0;
        match first_signaled {
            Some(index) if all_signaled || !wait_all => Ok(index),
            _ => Err(ShimError::TimedOut),
        }
    }

    fn set_syncobjs(&mut self, handles: &[u32], point: Option<u64>) -> ShimResult<()> {
        for handle in handles {
            self.syncobjs.lookup(*handle)?;
        }
        for handle in handles {
            let current = self.syncobjs.lookup_mut(*handle)?;
            *current = match point {
                Some(point) => (*current).max(point),
                None => 0,
            };
        }
        Ok(())
    }

    fn transfer_syncobj(&mut self, transfer: &drm_syncobj_transfer) -> ShimResult<()> {
        let source = *self.syncobjs.lookup(transfer.src_handle)?;
        let destination = self.syncobjs.lookup_mut(transfer.dst_handle)?;
        if source >= transfer.src_point.max(1) {
            *destination = (*destination).max(transfer.dst_point.max(1));
        } else if transfer.dst_point == 0 {
            *destination = 0;
        }
        Ok(())
    }

    fn usage(&self, domain: GemDomains, cpu_visible: bool) -> u64 {
        self.buffers
            .iter()
            .filter_map(|(_, buffer)| {
                let create_info = buffer.attributes().create_info;
                let domains = GemDomains::from_bits_retain(create_info.domains);
                let flags = GemCreateFlags::from_bits_retain(create_info.domain_flags);
                let visible = !cpu_visible || flags.contains(GemCreateFlags::CPU_ACCESS_REQUIRED);
                (domains.contains(domain) && visible).then_some(create_info.bo_size)
            })
            .sum()
    }

    fn query_info(&self, request: &mut InfoRequest) -> ShimResult<()> {
        let params = request.args.params;
        match request.args.query {
            AMDGPU_INFO_ACCEL_WORKING => request.set_data(1u32.as_bytes()),
            AMDGPU_INFO_DEV_INFO => request.set_data(device_info().as_bytes()),
            AMDGPU_INFO_MEMORY => request.set_data(device_info::memory_info().as_bytes()),
            AMDGPU_INFO_VRAM_GTT => request.set_data(device_info::vram_gtt().as_bytes()),
            AMDGPU_INFO_VRAM_USAGE => {
                request.set_data(self.usage(GemDomains::VRAM, false).as_bytes())
            }
            AMDGPU_INFO_VIS_VRAM_USAGE => {
                request.set_data(self.usage(GemDomains::VRAM, true).as_bytes())
            }
            AMDGPU_INFO_GTT_USAGE => {
                request.set_data(self.usage(GemDomains::GTT, false).as_bytes())
            }
            AMDGPU_INFO_FW_VERSION => {
                request.set_data(device_info::firmware(params[0])?.as_bytes())
            }
            AMDGPU_INFO_HW_IP_INFO => {
                if params[1] != 0 {
                    return Err(ShimError::InvalidArgument);
                }
                request.set_data(device_info::hw_ip(params[0])?.as_bytes())
            }
            AMDGPU_INFO_READ_MMR_REG => {
                let (offset, count) = (params[0], params[1]);
                if count == 0 || count > MAX_REGISTER_READ {
                    return Err(ShimError::InvalidArgument);
                }
                let values = (0..count)
                    .map(|index| device_info::read_register(offset.wrapping_add(index)))
                    .collect::<ShimResult<Vec<u32>>>()?;
                request.set_data(values.as_bytes())
            }
            query => {
                debug!("info query {:#x} is not emulated", query);
                return Err(ShimError::NotSupported);
            }
        }
        Ok(())
    }

    fn gem_metadata(&mut self, args: &mut drm_amdgpu_gem_metadata) -> ShimResult<()> {
        let buffer = self.buffers.lookup(args.handle)?;
        let mut attributes = buffer.attributes();
        match args.op {
            AMDGPU_GEM_METADATA_OP_SET_METADATA => {
                if args.data_size_bytes as usize > AMDGPU_GEM_METADATA_MAX_DWORDS * 4 {
                    return Err(ShimError::InvalidArgument);
                }
                attributes.metadata = *args;
            }
            AMDGPU_GEM_METADATA_OP_GET_METADATA => {
                let stored = &attributes.metadata;
                args.flags = stored.flags;
                args.tiling_info = stored.tiling_info;
                args.data_size_bytes = stored.data_size_bytes;
                args.data = stored.data;
            }
            _ => return Err(ShimError::InvalidArgument),
        }
        Ok(())
    }

    fn context(&mut self, args: &mut drm_amdgpu_ctx) -> ShimResult<()> {
        match args.in_.op {
            AMDGPU_CTX_OP_ALLOC_CTX => {
                let ctx_id = self.next_context;
                self.contexts.insert(ctx_id, args.in_.priority)?;
                self.next_context += 1;
                args.out.ctx_id = ctx_id;
            }
            AMDGPU_CTX_OP_FREE_CTX => {
                self.contexts
                    .remove(args.in_.ctx_id)
                    .ok_or(ShimError::InvalidArgument)?;
            }
            AMDGPU_CTX_OP_QUERY_STATE => {
                if !self.contexts.contains(args.in_.ctx_id) {
                    return Err(ShimError::InvalidArgument);
                }
                args.out.reset_status = AMDGPU_CTX_NO_RESET;
                args.out.hangs = 0;
            }
            _ => return Err(ShimError::InvalidArgument),
        }
        Ok(())
    }

    fn gem_op(&mut self, args: &mut drm_amdgpu_gem_op) -> ShimResult<()> {
        let buffer = self.buffers.lookup(args.handle)?;
        let mut attributes = buffer.attributes();
        match args.op {
            AMDGPU_GEM_OP_GET_GEM_CREATE_INFO => args.create_info = attributes.create_info,
            AMDGPU_GEM_OP_SET_PLACEMENT => {
                let domains = GemDomains::from_bits(args.create_info.domains)
                    .ok_or(ShimError::InvalidArgument)?;
                attributes.create_info.domains = domains.bits();
            }
            _ => return Err(ShimError::InvalidArgument),
        }
        Ok(())
    }

    fn userptr(&mut self, args: &mut drm_amdgpu_gem_userptr) -> ShimResult<()> {
        // Plain addresses of the client cannot be reached from here.
        if args.region_id == 0 {
            return Err(ShimError::NotSupported);
        }

        let mapping = map_region(args.region_id)?;
        let buffer = GpuBuffer::borrow_region(args.region_id, mapping, args.addr, args.size)?;
        args.handle = self.insert_buffer(buffer)?;
        Ok(())
    }

    fn mapping_for(&self, args: &drm_amdgpu_gem_va) -> ShimResult<GpuMapping> {
        let buffer = self.buffers.lookup(args.handle)?;
        let end = args
            .offset_in_bo
            .checked_add(args.map_size)
            .ok_or(ShimError::InvalidArgument)?;
        if end > buffer.size() {
            return Err(ShimError::InvalidArgument);
        }

        Ok(GpuMapping {
            handle: args.handle,
            _buffer: buffer.clone(),
            offset: args.offset_in_bo,
            size: args.map_size,
        })
    }

    fn gem_va(&mut self, args: &drm_amdgpu_gem_va) -> ShimResult<()> {
        match args.operation {
            AMDGPU_VA_OP_MAP => {
                let mapping = self.mapping_for(args)?;
                self.mappings.insert(args.va_address, mapping)
            }
            AMDGPU_VA_OP_UNMAP => {
                let mapped = self.mappings.get(args.va_address).map(|mapping| mapping.handle);
                if mapped != Some(args.handle) {
                    return Err(ShimError::NotFound);
                }
                self.mappings.remove(args.va_address).map(|_| ())
            }
            AMDGPU_VA_OP_CLEAR => self.mappings.clear(args.va_address, args.map_size),
            AMDGPU_VA_OP_REPLACE => {
                let mapping = self.mapping_for(args)?;
                self.mappings.clear(args.va_address, args.map_size)?;
                self.mappings.insert(args.va_address, mapping)
            }
            _ => Err(ShimError::InvalidArgument),
        }
    }

    fn check_ib(&self, data: &[u8]) -> ShimResult<()> {
        let ib = drm_amdgpu_cs_chunk_ib::read_from(data).ok_or(ShimError::InvalidArgument)?;
        if ib.ib_bytes == 0 || ib.ib_bytes % 4 != 0 {
            return Err(ShimError::InvalidArgument);
        }

        let last = ib
            .va_start
            .checked_add(u64::from(ib.ib_bytes) - 1)
            .ok_or(ShimError::InvalidArgument)?;
        for address in [ib.va_start, last] {
            self.mappings
                .lookup(address)
                .map_err(|_| ShimError::InvalidArgument)?;
        }
        Ok(())
    }

    fn syncobj_chunk(&self, data: &[u8]) -> ShimResult<Vec<drm_amdgpu_cs_chunk_syncobj>> {
        let syncobjs: Vec<drm_amdgpu_cs_chunk_syncobj> =
            read_array(data).map_err(|_| ShimError::InvalidArgument)?;
        for syncobj in &syncobjs {
            if !self.syncobjs.contains(syncobj.handle) {
                return Err(ShimError::InvalidArgument);
            }
        }
        Ok(syncobjs)
    }

    fn submit(&mut self, request: &mut CsRequest) -> ShimResult<()> {
        if !self.contexts.contains(request.args.in_.ctx_id) || request.chunks.is_empty() {
            return Err(ShimError::InvalidArgument);
        }

        let mut signals = Vec::new();
        for chunk in &request.chunks {
            match chunk.chunk_id {
                AMDGPU_CHUNK_ID_IB => self.check_ib(&chunk.data)?,
                AMDGPU_CHUNK_ID_FENCE => {
                    let fence = drm_amdgpu_cs_chunk_fence::read_from(chunk.data.as_slice())
                        .ok_or(ShimError::InvalidArgument)?;
                    if !self.buffers.contains(fence.handle) {
                        return Err(ShimError::InvalidArgument);
                    }
                }
                AMDGPU_CHUNK_ID_DEPENDENCIES => {
                    let deps: Vec<drm_amdgpu_cs_chunk_dep> =
                        read_array(&chunk.data).map_err(|_| ShimError::InvalidArgument)?;
                    if deps.iter().any(|dep| dep.handle > self.last_submission) {
                        return Err(ShimError::InvalidArgument);
                    }
                }
                AMDGPU_CHUNK_ID_BO_HANDLES => {
                    for entry in chunk.bo_list_entries()? {
                        if !self.buffers.contains(entry.bo_handle) {
                            return Err(ShimError::InvalidArgument);
                        }
                    }
                }
                AMDGPU_CHUNK_ID_SYNCOBJ_IN | AMDGPU_CHUNK_ID_SYNCOBJ_TIMELINE_WAIT => {
                    self.syncobj_chunk(&chunk.data)?;
                }
                AMDGPU_CHUNK_ID_SYNCOBJ_OUT | AMDGPU_CHUNK_ID_SYNCOBJ_TIMELINE_SIGNAL => {
                    signals.extend(self.syncobj_chunk(&chunk.data)?);
                }
                id => {
                    warn!("unknown command submission chunk {:#x}", id);
                    return Err(ShimError::InvalidArgument);
                }
            }
        }

        for syncobj in signals {
            let point = self.syncobjs.lookup_mut(syncobj.handle)?;
            *point = (*point).max(syncobj.point.max(1));
        }

        self.last_submission += 1;
        request.args.out.handle = self.last_submission;
        Ok(())
    }
}

impl DrmBackend for EmulatedDevice {
    fn ioctl(&self, ioctl: &mut Ioctl) -> ShimResult<()> {
        let mut state = self.state.lock();
        match ioctl {
            Ioctl::Version(args) => fill_version(args),
            Ioctl::GetCap(args) => args.value = get_cap(args.capability)?,
            Ioctl::GemClose(args) => {
                state
                    .buffers
                    .remove(args.handle)
                    .ok_or(ShimError::NotFound)?;
            }
            Ioctl::PrimeHandleToFd(args) => {
                args.fd = state.export(FdTarget::Buffer(args.handle))?;
            }
            Ioctl::PrimeFdToHandle(args) => match state.fds.lookup(args.fd)? {
                FdTarget::Buffer(handle) => args.handle = handle,
                FdTarget::Syncobj(_) => return Err(ShimError::NotFound),
            },
            Ioctl::SyncobjCreate(args) => args.handle = state.create_syncobj(args.flags)?,
            Ioctl::SyncobjDestroy(args) => {
                state
                    .syncobjs
                    .remove(args.handle)
                    .ok_or(ShimError::NotFound)?;
            }
            Ioctl::SyncobjHandleToFd(args) => {
                args.fd = state.export(FdTarget::Syncobj(args.handle))?;
            }
            Ioctl::SyncobjFdToHandle(args) => match state.fds.lookup(args.fd)? {
                FdTarget::Syncobj(handle) => args.handle = handle,
                FdTarget::Buffer(_) => return Err(ShimError::NotFound),
            },
            Ioctl::SyncobjWait(wait) | Ioctl::SyncobjTimelineWait(wait) => {
                wait.args.first_signaled = state.wait_syncobjs(wait)?;
            }
            Ioctl::SyncobjReset(array) => state.set_syncobjs(&array.handles, None)?,
            Ioctl::SyncobjSignal(array) => state.set_syncobjs(&array.handles, Some(1))?,
            Ioctl::SyncobjTransfer(args) => state.transfer_syncobj(args)?,
            Ioctl::Info(request) => state.query_info(request)?,
            Ioctl::GemMetadata(args) => state.gem_metadata(args)?,
            Ioctl::Ctx(args) => state.context(args)?,
            Ioctl::GemCreate(args) => {
                if args.in_.bo_size == 0 {
                    return Err(ShimError::InvalidArgument);
                }
                let buffer = GpuBuffer::allocate(args.in_)?;
                args.out.handle = state.insert_buffer(buffer)?;
            }
            Ioctl::GemOp(args) => state.gem_op(args)?,
            Ioctl::GemUserptr(args) => state.userptr(args)?,
            Ioctl::GemVa(args) => state.gem_va(args)?,
            Ioctl::GemMmap(args) => {
                state.buffers.lookup(args.handle)?;
                args.addr_ptr = u64::from(args.handle);
            }
            Ioctl::Cs(request) => state.submit(request)?,
            Ioctl::WaitCs(args) => {
                if args.in_.handle > state.last_submission {
                    return Err(ShimError::InvalidArgument);
                }
                args.out.status = 0;
            }
        }
        Ok(())
    }

    fn mmap(&self, offset: u64, size: usize) -> ShimResult<NonNull<u8>> {
        let buffer = self.buffer_for_offset(offset)?;
        if size as u64 > buffer.size() {
            return Err(ShimError::InvalidArgument);
        }
        buffer.as_ptr()
    }

    // Buffer memory stays mapped for the lifetime of the buffer.
    fn munmap(&self, _addr: NonNull<u8>, _size: usize) -> ShimResult<()> {
        Ok(())
    }
}

impl RegionExporter for EmulatedDevice {
    fn export_region(&self, offset: u64, size: u64) -> ShimResult<(u64, u64)> {
        let buffer = self.buffer_for_offset(offset)?;
        if size > buffer.size() {
            return Err(ShimError::InvalidArgument);
        }
        Ok(buffer.region())
    }
}
