// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed description of the emulated GPU, a Cape Verde class Southern Islands part.

use crate::drm_protocol::*;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

pub const DRIVER_NAME: &str = "amdgpu";
pub const DRIVER_MINOR: i32 = 42;

const VRAM_SIZE: u64 = 0x8000_0000;
const VISIBLE_VRAM_SIZE: u64 = 0x1000_0000;
const GTT_SIZE: u64 = 0xc000_0000;

const GB_TILE_MODE0: u32 = 0x2644;

// GB_TILE_MODE0..31.
const TILE_MODES: [u32; 32] = [
    0x3a0112, 0x3a0912, 0x3a1112, 0x212912, 0x10a, 0x111912, 0x121112, 0x22112, 0x4, 0x108,
    0x3a1110, 0x351110, 0x341910, 0x109, 0x361111, 0x351111, 0x341911, 0x342911, 0x10d,
    0x342921, 0x34291d, 0x221111, 0x211111, 0x121111, 0x111911, 0x22111, 0x22111, 0x22111,
    0x22111, 0x22111, 0x12911, 0,
];

const REGISTERS: [(u32, u32); 4] = [
    (0x263d, 0x1),
    (0x263e, 0x1201_0002),
    (0x9d8, 0x262),
    (0xa0d4, 0x1240),
];

pub fn device_info() -> drm_amdgpu_info_device {
    let mut cu_bitmap = [[0; 4]; 4];
    cu_bitmap[0][0] = 0x1e;
    cu_bitmap[0][1] = 0x1e;

    drm_amdgpu_info_device {
        device_id: 0x683f,
        chip_rev: 0x1,
        external_rev: 0x29,
        pci_rev: 0x87,
        family: AMDGPU_FAMILY_SI,
        num_shader_engines: 1,
        num_shader_arrays_per_engine: 2,
        gpu_counter_freq: 0x6978,
        max_engine_clock: 0xc3500,
        max_memory_clock: 0x112a88,
        cu_active_number: 0x8,
        cu_ao_mask: 0x1e1e,
        cu_bitmap,
        enabled_rb_pipes_mask: 0xf,
        num_rb_pipes: 0x4,
        num_hw_gfx_contexts: 0x8,
        virtual_address_offset: 0x200000,
        virtual_address_max: 0xf_ffe0_0000,
        virtual_address_alignment: 0x1000,
        pte_fragment_size: 0x200000,
        gart_page_size: 0x1000,
        ce_ram_size: 0x8000,
        vram_type: AMDGPU_VRAM_TYPE_GDDR5,
        vram_bit_width: 0x80,
        num_shader_visible_vgprs: 0x100,
        num_cu_per_sh: 0x5,
        num_tcc_blocks: 0x4,
        max_gs_waves_per_vgt: 0x20,
        ..Default::default()
    }
}

pub fn memory_info() -> drm_amdgpu_memory_info {
    drm_amdgpu_memory_info {
        vram: drm_amdgpu_heap_info {
            total_heap_size: VRAM_SIZE,
            usable_heap_size: 0x7e38_0000,
            heap_usage: 0x266_4000,
            max_allocation: 0x5eaa_0000,
        },
        cpu_accessible_vram: drm_amdgpu_heap_info {
            total_heap_size: VISIBLE_VRAM_SIZE,
            usable_heap_size: 0xf37_8000,
            heap_usage: 0x129_0000,
            max_allocation: 0xb69_a000,
        },
        gtt: drm_amdgpu_heap_info {
            total_heap_size: GTT_SIZE,
            usable_heap_size: 0xbfdd_d000,
            heap_usage: 0xce_1000,
            max_allocation: 0x8fe6_5c00,
        },
    }
}

pub fn vram_gtt() -> drm_amdgpu_info_vram_gtt {
    drm_amdgpu_info_vram_gtt {
        vram_size: VRAM_SIZE,
        vram_cpu_accessible_size: VISIBLE_VRAM_SIZE,
        gtt_size: GTT_SIZE,
    }
}

pub fn firmware(fw_type: u32) -> ShimResult<drm_amdgpu_info_firmware> {
    let (ver, feature) = match fw_type {
        AMDGPU_INFO_FW_UVD => (0x4000_0d00, 0),
        AMDGPU_INFO_FW_GFX_ME => (0x91, 0x1d),
        AMDGPU_INFO_FW_GFX_PFP => (0x54, 0x1d),
        AMDGPU_INFO_FW_GFX_CE => (0x3d, 0x1d),
        _ => return Err(ShimError::InvalidArgument),
    };
    Ok(drm_amdgpu_info_firmware { ver, feature })
}

pub fn hw_ip(ip_type: u32) -> ShimResult<drm_amdgpu_info_hw_ip> {
    let (major, minor, alignment, size_alignment, rings) = match ip_type {
        AMDGPU_HW_IP_GFX => (6, 0, 0x20, 0x20, 1),
        AMDGPU_HW_IP_COMPUTE => (6, 0, 0x20, 0x20, 3),
        AMDGPU_HW_IP_DMA => (1, 0, 0x100, 0x4, 3),
        AMDGPU_HW_IP_UVD => (3, 1, 0x40, 0x40, 1),
        _ => return Err(ShimError::InvalidArgument),
    };
    Ok(drm_amdgpu_info_hw_ip {
        hw_ip_version_major: major,
        hw_ip_version_minor: minor,
        ib_start_alignment: alignment,
        ib_size_alignment: size_alignment,
        available_rings: rings,
        ..Default::default()
    })
}

pub fn read_register(dword_offset: u32) -> ShimResult<u32> {
    if let Some(index) = dword_offset.checked_sub(GB_TILE_MODE0) {
        if let Some(value) = TILE_MODES.get(index as usize) {
            return Ok(*value);
        }
    }

    REGISTERS
        .iter()
        .find(|(offset, _)| *offset == dword_offset)
        .map(|(_, value)| *value)
        .ok_or(ShimError::InvalidArgument)
}
