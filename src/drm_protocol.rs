// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Request numbers, constants and fixed argument blocks of the DRM/amdgpu control interface.
//!
//! The blocks mirror the kernel layout closely but carry no user pointers: variable-length
//! payloads travel next to the block (see `crate::ioctl`).

#![allow(non_camel_case_types)]

use bitflags::bitflags;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

/// Protocol major version spoken by the amdgpu interface.
pub const AMDGPU_DRM_MAJOR: i32 = 3;

pub const DRM_IOCTL_VERSION: u32 = 0x00;
pub const DRM_IOCTL_GEM_CLOSE: u32 = 0x09;
pub const DRM_IOCTL_GET_CAP: u32 = 0x0c;
pub const DRM_IOCTL_PRIME_HANDLE_TO_FD: u32 = 0x2d;
pub const DRM_IOCTL_PRIME_FD_TO_HANDLE: u32 = 0x2e;
pub const DRM_IOCTL_SYNCOBJ_CREATE: u32 = 0xbf;
pub const DRM_IOCTL_SYNCOBJ_DESTROY: u32 = 0xc0;
pub const DRM_IOCTL_SYNCOBJ_HANDLE_TO_FD: u32 = 0xc1;
pub const DRM_IOCTL_SYNCOBJ_FD_TO_HANDLE: u32 = 0xc2;
pub const DRM_IOCTL_SYNCOBJ_WAIT: u32 = 0xc3;
pub const DRM_IOCTL_SYNCOBJ_RESET: u32 = 0xc4;
pub const DRM_IOCTL_SYNCOBJ_SIGNAL: u32 = 0xc5;
pub const DRM_IOCTL_SYNCOBJ_TIMELINE_WAIT: u32 = 0xca;
pub const DRM_IOCTL_SYNCOBJ_TRANSFER: u32 = 0xcc;

pub const DRM_COMMAND_BASE: u32 = 0x40;
pub const DRM_AMDGPU_GEM_CREATE: u32 = DRM_COMMAND_BASE + 0x00;
pub const DRM_AMDGPU_GEM_MMAP: u32 = DRM_COMMAND_BASE + 0x01;
pub const DRM_AMDGPU_CTX: u32 = DRM_COMMAND_BASE + 0x02;
pub const DRM_AMDGPU_CS: u32 = DRM_COMMAND_BASE + 0x04;
pub const DRM_AMDGPU_INFO: u32 = DRM_COMMAND_BASE + 0x05;
pub const DRM_AMDGPU_GEM_METADATA: u32 = DRM_COMMAND_BASE + 0x06;
pub const DRM_AMDGPU_GEM_VA: u32 = DRM_COMMAND_BASE + 0x08;
pub const DRM_AMDGPU_WAIT_CS: u32 = DRM_COMMAND_BASE + 0x09;
pub const DRM_AMDGPU_GEM_OP: u32 = DRM_COMMAND_BASE + 0x10;
pub const DRM_AMDGPU_GEM_USERPTR: u32 = DRM_COMMAND_BASE + 0x11;

pub const DRM_CAP_PRIME: u64 = 0x5;
pub const DRM_CAP_SYNCOBJ: u64 = 0x13;
pub const DRM_CAP_SYNCOBJ_TIMELINE: u64 = 0x14;

pub const DRM_PRIME_CAP_IMPORT: u64 = 0x1;
pub const DRM_PRIME_CAP_EXPORT: u64 = 0x2;

pub const DRM_SYNCOBJ_CREATE_SIGNALED: u32 = 1 << 0;
pub const DRM_SYNCOBJ_WAIT_FLAGS_WAIT_ALL: u32 = 1 << 0;
pub const DRM_SYNCOBJ_WAIT_FLAGS_WAIT_FOR_SUBMIT: u32 = 1 << 1;

pub const DRM_CLOEXEC: u32 = libc::O_CLOEXEC as u32;
pub const DRM_RDWR: u32 = libc::O_RDWR as u32;

pub const AMDGPU_VA_OP_MAP: u32 = 1;
pub const AMDGPU_VA_OP_UNMAP: u32 = 2;
pub const AMDGPU_VA_OP_CLEAR: u32 = 3;
pub const AMDGPU_VA_OP_REPLACE: u32 = 4;

pub const AMDGPU_GEM_OP_GET_GEM_CREATE_INFO: u32 = 0;
pub const AMDGPU_GEM_OP_SET_PLACEMENT: u32 = 1;

pub const AMDGPU_GEM_METADATA_OP_SET_METADATA: u32 = 1;
pub const AMDGPU_GEM_METADATA_OP_GET_METADATA: u32 = 2;
pub const AMDGPU_GEM_METADATA_MAX_DWORDS: usize = 64;

pub const AMDGPU_CTX_OP_ALLOC_CTX: u32 = 1;
pub const AMDGPU_CTX_OP_FREE_CTX: u32 = 2;
pub const AMDGPU_CTX_OP_QUERY_STATE: u32 = 3;
pub const AMDGPU_CTX_NO_RESET: u32 = 0;

pub const AMDGPU_CHUNK_ID_IB: u32 = 0x01;
pub const AMDGPU_CHUNK_ID_FENCE: u32 = 0x02;
pub const AMDGPU_CHUNK_ID_DEPENDENCIES: u32 = 0x03;
pub const AMDGPU_CHUNK_ID_SYNCOBJ_IN: u32 = 0x04;
pub const AMDGPU_CHUNK_ID_SYNCOBJ_OUT: u32 = 0x05;
pub const AMDGPU_CHUNK_ID_BO_HANDLES: u32 = 0x06;
pub const AMDGPU_CHUNK_ID_SYNCOBJ_TIMELINE_WAIT: u32 = 0x08;
pub const AMDGPU_CHUNK_ID_SYNCOBJ_TIMELINE_SIGNAL: u32 = 0x09;

pub const AMDGPU_INFO_ACCEL_WORKING: u32 = 0x00;
pub const AMDGPU_INFO_HW_IP_INFO: u32 = 0x02;
pub const AMDGPU_INFO_FW_VERSION: u32 = 0x0e;
pub const AMDGPU_INFO_VRAM_USAGE: u32 = 0x10;
pub const AMDGPU_INFO_GTT_USAGE: u32 = 0x11;
pub const AMDGPU_INFO_GDS_CONFIG: u32 = 0x13;
pub const AMDGPU_INFO_VRAM_GTT: u32 = 0x14;
pub const AMDGPU_INFO_READ_MMR_REG: u32 = 0x15;
pub const AMDGPU_INFO_DEV_INFO: u32 = 0x16;
pub const AMDGPU_INFO_VIS_VRAM_USAGE: u32 = 0x17;
pub const AMDGPU_INFO_MEMORY: u32 = 0x19;

pub const AMDGPU_INFO_FW_UVD: u32 = 0x02;
pub const AMDGPU_INFO_FW_GFX_ME: u32 = 0x04;
pub const AMDGPU_INFO_FW_GFX_PFP: u32 = 0x05;
pub const AMDGPU_INFO_FW_GFX_CE: u32 = 0x06;

pub const AMDGPU_HW_IP_GFX: u32 = 0;
pub const AMDGPU_HW_IP_COMPUTE: u32 = 1;
pub const AMDGPU_HW_IP_DMA: u32 = 2;
pub const AMDGPU_HW_IP_UVD: u32 = 3;

pub const AMDGPU_FAMILY_SI: u32 = 110;
pub const AMDGPU_VRAM_TYPE_GDDR5: u32 = 5;

bitflags! {
    /// Memory domains a buffer may be placed in.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct GemDomains: u64 {
        const CPU = 0x1;
        const GTT = 0x2;
        const VRAM = 0x4;
        const GDS = 0x8;
        const GWS = 0x10;
        const OA = 0x20;
    }
}

bitflags! {
    /// Buffer creation flags.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct GemCreateFlags: u64 {
        const CPU_ACCESS_REQUIRED = 1 << 0;
        const NO_CPU_ACCESS = 1 << 1;
        const CPU_GTT_USWC = 1 << 2;
        const VRAM_CLEARED = 1 << 3;
        const VRAM_CONTIGUOUS = 1 << 5;
        const VM_ALWAYS_VALID = 1 << 6;
        const EXPLICIT_SYNC = 1 << 7;
    }
}

bitflags! {
    /// Page permissions of a GPU virtual address mapping.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct VmPageFlags: u32 {
        const READABLE = 1 << 1;
        const WRITEABLE = 1 << 2;
        const EXECUTABLE = 1 << 3;
        const PRT = 1 << 4;
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_version {
    pub version_major: i32,
    pub version_minor: i32,
    pub version_patchlevel: i32,
    pub name_len: u32,
    pub name: [u8; 32],
}

impl drm_version {
    pub fn name(&self) -> String {
        let len = (self.name_len as usize).min(self.name.len());
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_get_cap {
    pub capability: u64,
    pub value: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_gem_close {
    pub handle: u32,
    pub pad: u32,
}

/// Handle to descriptor conversion, for buffers and sync objects alike.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_prime_handle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
    pub pad: u32,
}

/// Descriptor to handle conversion. Inputs lead, the resulting handle trails.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_prime_fd {
    pub fd: i32,
    pub flags: u32,
    pub handle: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_syncobj_create {
    pub flags: u32,
    pub handle: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_syncobj_destroy {
    pub handle: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_syncobj_wait {
    pub timeout_nsec: i64,
    pub count_handles: u32,
    pub flags: u32,
    pub first_signaled: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_syncobj_array {
    pub count_handles: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_syncobj_transfer {
    pub src_handle: u32,
    pub dst_handle: u32,
    pub src_point: u64,
    pub dst_point: u64,
    pub flags: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_info {
    pub return_size: u32,
    pub query: u32,
    /// Query specific parameters: `[dword_offset, count, instance, flags]` for register reads,
    /// `[fw_type, ip_instance, index, _]` for firmware and `[type, ip_instance, _, _]` for
    /// hardware IP queries.
    pub params: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_metadata {
    pub handle: u32,
    pub op: u32,
    pub flags: u64,
    pub tiling_info: u64,
    pub data_size_bytes: u32,
    pub data: [u32; AMDGPU_GEM_METADATA_MAX_DWORDS],
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_ctx_in {
    pub op: u32,
    pub flags: u32,
    pub ctx_id: u32,
    pub priority: i32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_ctx_out {
    pub ctx_id: u32,
    pub reset_status: u32,
    pub flags: u64,
    pub hangs: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_ctx {
    pub in_: drm_amdgpu_ctx_in,
    pub out: drm_amdgpu_ctx_out,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_create_in {
    pub bo_size: u64,
    pub alignment: u64,
    pub domains: u64,
    pub domain_flags: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_create_out {
    pub handle: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_create {
    pub in_: drm_amdgpu_gem_create_in,
    pub out: drm_amdgpu_gem_create_out,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_op {
    pub handle: u32,
    pub op: u32,
    pub create_info: drm_amdgpu_gem_create_in,
}

/// User memory import. `region_id` is zero for a plain process address, otherwise `addr` is an
/// offset into the named shared region.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_userptr {
    pub addr: u64,
    pub size: u64,
    pub region_id: u64,
    pub flags: u32,
    pub handle: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_va {
    pub handle: u32,
    pub pad: u32,
    pub operation: u32,
    pub flags: u32,
    pub va_address: u64,
    pub offset_in_bo: u64,
    pub map_size: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_gem_mmap {
    pub handle: u32,
    pub pad: u32,
    pub addr_ptr: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs_in {
    pub ctx_id: u32,
    pub bo_list_handle: u32,
    pub num_chunks: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs_out {
    pub handle: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs {
    pub in_: drm_amdgpu_cs_in,
    pub out: drm_amdgpu_cs_out,
}

/// Chunk header as sent on the wire; the payload follows separately.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs_chunk {
    pub chunk_id: u32,
    pub length_dw: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs_chunk_ib {
    pub pad: u32,
    pub flags: u32,
    pub va_start: u64,
    pub ib_bytes: u32,
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs_chunk_fence {
    pub handle: u32,
    pub offset: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs_chunk_dep {
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
    pub ctx_id: u32,
    pub handle: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_cs_chunk_syncobj {
    pub handle: u32,
    pub flags: u32,
    pub point: u64,
}

/// Leading part of a buffer list chunk. `bo_number` entries follow it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_bo_list_in {
    pub operation: u32,
    pub list_handle: u32,
    pub bo_number: u32,
    pub bo_info_size: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_bo_list_entry {
    pub bo_handle: u32,
    pub bo_priority: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_wait_cs_in {
    pub handle: u64,
    pub timeout: u64,
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
    pub ctx_id: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_wait_cs_out {
    pub status: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_wait_cs {
    pub in_: drm_amdgpu_wait_cs_in,
    pub out: drm_amdgpu_wait_cs_out,
}

/// Static description of the GPU returned by `AMDGPU_INFO_DEV_INFO`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_info_device {
    pub device_id: u32,
    pub chip_rev: u32,
    pub external_rev: u32,
    pub pci_rev: u32,
    pub family: u32,
    pub num_shader_engines: u32,
    pub num_shader_arrays_per_engine: u32,
    pub gpu_counter_freq: u32,
    pub max_engine_clock: u64,
    pub max_memory_clock: u64,
    pub cu_active_number: u32,
    pub cu_ao_mask: u32,
    pub cu_bitmap: [[u32; 4]; 4],
    pub enabled_rb_pipes_mask: u32,
    pub num_rb_pipes: u32,
    pub num_hw_gfx_contexts: u32,
    pub pad: u32,
    pub ids_flags: u64,
    pub virtual_address_offset: u64,
    pub virtual_address_max: u64,
    pub virtual_address_alignment: u32,
    pub pte_fragment_size: u32,
    pub gart_page_size: u32,
    pub ce_ram_size: u32,
    pub vram_type: u32,
    pub vram_bit_width: u32,
    pub vce_harvest_config: u32,
    pub gc_double_offchip_lds_buf: u32,
    pub num_shader_visible_vgprs: u32,
    pub num_cu_per_sh: u32,
    pub num_tcc_blocks: u32,
    pub max_gs_waves_per_vgt: u32,
    pub high_va_offset: u64,
    pub high_va_max: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_heap_info {
    pub total_heap_size: u64,
    pub usable_heap_size: u64,
    pub heap_usage: u64,
    pub max_allocation: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_memory_info {
    pub vram: drm_amdgpu_heap_info,
    pub cpu_accessible_vram: drm_amdgpu_heap_info,
    pub gtt: drm_amdgpu_heap_info,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_info_vram_gtt {
    pub vram_size: u64,
    pub vram_cpu_accessible_size: u64,
    pub gtt_size: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_info_firmware {
    pub ver: u32,
    pub feature: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct drm_amdgpu_info_hw_ip {
    pub hw_ip_version_major: u32,
    pub hw_ip_version_minor: u32,
    pub capabilities_flags: u64,
    pub ib_start_alignment: u32,
    pub ib_size_alignment: u32,
    pub available_rings: u32,
    pub ip_discovery_version: u32,
}
