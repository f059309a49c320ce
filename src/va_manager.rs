// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! GPU virtual address space bookkeeping.
//!
//! A device exposes two address windows: the regular one starting at `offset` and, on newer
//! parts, a "high" one starting at `high_offset`. Each window is split at the first 4GiB
//! boundary into a 32-bit region and a standard region, giving four allocators per device.

use std::collections::BTreeMap as Map;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::shim_utils::align_up;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;
use crate::shim_utils::HIGH_32_MASK;
use crate::shim_utils::SIZE_4GIB;

bitflags! {
    /// Placement constraints for `VaManager::alloc_range`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct VaRangeFlags: u32 {
        /// The range must be addressable with 32 bits (within its window).
        const RANGE_32_BIT = 0x1;
        /// Allocate from the high window.
        const HIGH = 0x2;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VaRegionKind {
    Low32,
    Standard,
    High32,
    High,
}

/// Address-space parameters reported by the device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VaLayout {
    pub offset: u64,
    pub max: u64,
    pub alignment: u64,
    pub high_offset: u64,
    pub high_max: u64,
}

/// One contiguous allocatable range `[start, end)`.
pub struct VaRegion {
    start: u64,
    end: u64,
    alignment: u64,
    // Free intervals, start -> end.
    holes: Mutex<Map<u64, u64>>,
}

impl VaRegion {
    /// Creates a region. Inverted bounds produce an empty region.
    pub fn new(start: u64, end: u64, alignment: u64) -> VaRegion {
        let end = end.max(start);
        let mut holes = Map::new();
        if end > start {
            holes.insert(start, end);
        }

        VaRegion {
            start,
            end,
            alignment,
            holes: Mutex::new(holes),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Reserves `size` bytes aligned to at least the region alignment and returns the start
    /// address. `base_required` pins the allocation to an exact address.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
        base_required: Option<u64>,
    ) -> ShimResult<u64> {
        if size == 0 {
            return Err(ShimError::InvalidArgument);
        }

        let alignment = alignment.max(self.alignment);
        let size = align_up(size, self.alignment)?;
        let mut holes = self.holes.lock();

        let found = match base_required {
            Some(base) => {
                if base % alignment != 0 {
                    return Err(ShimError::InvalidArgument);
                }
                let (&hole_start, &hole_end) = holes
                    .range(..=base)
                    .next_back()
                    .ok_or(ShimError::ResourceExhausted)?;
                let fits = base
                    .checked_add(size)
                    .is_some_and(|alloc_end| alloc_end <= hole_end);
                if !fits {
                    return Err(ShimError::ResourceExhausted);
                }
                (hole_start, hole_end, base)
            }
            None => holes
                .iter()
                .find_map(|(&hole_start, &hole_end)| {
                    let address = align_up(hole_start, alignment).ok()?;
                    let alloc_end = address.checked_add(size)?;
                    (alloc_end <= hole_end).then_some((hole_start, hole_end, address))
                })
                .ok_or(ShimError::ResourceExhausted)?,
        };

        let (hole_start, hole_end, address) = found;
        holes.remove(&hole_start);
        if address > hole_start {
            holes.insert(hole_start, address);
        }
        if address + size < hole_end {
            holes.insert(address + size, hole_end);
        }

        Ok(address)
    }

    /// Returns a range obtained from `allocate` to the free pool.
    pub fn free(&self, address: u64, size: u64) -> ShimResult<()> {
        let size = align_up(size, self.alignment)?;
        let end = address
            .checked_add(size)
            .ok_or(ShimError::InvalidArgument)?;
        if size == 0 || address < self.start || end > self.end {
            return Err(ShimError::InvalidArgument);
        }

        let mut holes = self.holes.lock();

        let mut merged_start = address;
        let mut merged_end = end;
        if let Some((&prev_start, &prev_end)) = holes.range(..=address).next_back() {
            if prev_end > address {
                return Err(ShimError::InvalidArgument);
            }
            if prev_end == address {
                merged_start = prev_start;
            }
        }
        if let Some((&next_start, &next_end)) = holes.range(address..).next() {
            if next_start < end {
                return Err(ShimError::InvalidArgument);
            }
            if next_start == end {
                merged_end = next_end;
                holes.remove(&next_start);
            }
        }

        holes.insert(merged_start, merged_end);
        Ok(())
    }
}

/// A range handed out by `VaManager::alloc_range`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VaRange {
    pub address: u64,
    pub size: u64,
    pub kind: VaRegionKind,
}

/// The four regions of one device.
pub struct VaManager {
    low_32: VaRegion,
    standard: VaRegion,
    high_32: VaRegion,
    high: VaRegion,
}

impl VaManager {
    pub fn new(layout: &VaLayout) -> ShimResult<VaManager> {
        if layout.alignment == 0 || !layout.alignment.is_power_of_two() {
            return Err(ShimError::InvalidArgument);
        }

        let low_end = layout.max.min(SIZE_4GIB);
        let standard_start = layout.offset.max(SIZE_4GIB);
        let standard_end = layout.max.max(SIZE_4GIB);

        let high_boundary = (layout.high_offset & HIGH_32_MASK).saturating_add(SIZE_4GIB);
        let high_32_end = layout.high_max.min(high_boundary);
        let high_start = layout.high_offset.max(high_boundary);

        Ok(VaManager {
            low_32: VaRegion::new(layout.offset, low_end, layout.alignment),
            standard: VaRegion::new(standard_start, standard_end, layout.alignment),
            high_32: VaRegion::new(layout.high_offset, high_32_end, layout.alignment),
            high: VaRegion::new(high_start, layout.high_max, layout.alignment),
        })
    }

    pub fn region(&self, kind: VaRegionKind) -> &VaRegion {
        match kind {
            VaRegionKind::Low32 => &self.low_32,
            VaRegionKind::Standard => &self.standard,
            VaRegionKind::High32 => &self.high_32,
            VaRegionKind::High => &self.high,
        }
    }

    /// Allocates a range. A request without `RANGE_32_BIT` that cannot be satisfied by the
    /// standard region of its window falls back to the window's 32-bit region.
    pub fn alloc_range(
        &self,
        size: u64,
        alignment: u64,
        base_required: Option<u64>,
        flags: VaRangeFlags,
    ) -> ShimResult<VaRange> {
        let (narrow, wide) = if flags.contains(VaRangeFlags::HIGH) {
            (VaRegionKind::High32, VaRegionKind::High)
        } else {
            (VaRegionKind::Low32, VaRegionKind::Standard)
        };

        let mut kind = if flags.contains(VaRangeFlags::RANGE_32_BIT) {
            narrow
        } else {
            wide
        };

        let mut result = self.region(kind).allocate(size, alignment, base_required);
        if kind == wide && matches!(result, Err(ShimError::ResourceExhausted)) {
            kind = narrow;
            result = self.region(kind).allocate(size, alignment, base_required);
        }

        let region = self.region(kind);
        let address = result?;
        Ok(VaRange {
            address,
            size: align_up(size, region.alignment())?,
            kind,
        })
    }

    pub fn free_range(&self, range: &VaRange) -> ShimResult<()> {
        self.region(range.kind).free(range.address, range.size)
    }

    /// Upper 32 bits shared by every address of the 32-bit regions.
    pub fn address32_hi(&self) -> u32 {
        let end = if self.high_32.is_empty() {
            self.low_32.end()
        } else {
            self.high_32.end()
        };

        (end.saturating_sub(1) >> 32) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> VaLayout {
        VaLayout {
            offset: 0x20_0000,
            max: 0xf_ffe0_0000,
            alignment: 0x1000,
            high_offset: 0xffff_8000_0000_0000,
            high_max: 0xffff_ffff_ffe0_0000,
        }
    }

    fn bounds(manager: &VaManager, kind: VaRegionKind) -> (u64, u64) {
        let region = manager.region(kind);
        (region.start(), region.end())
    }

    #[test]
    fn regions_split_at_4gib() {
        let manager = VaManager::new(&layout()).unwrap();
        assert_eq!(bounds(&manager, VaRegionKind::Low32), (0x20_0000, SIZE_4GIB));
        assert_eq!(
            bounds(&manager, VaRegionKind::Standard),
            (SIZE_4GIB, 0xf_ffe0_0000)
        );
        assert_eq!(
            bounds(&manager, VaRegionKind::High32),
            (0xffff_8000_0000_0000, 0xffff_8001_0000_0000)
        );
        assert_eq!(
            bounds(&manager, VaRegionKind::High),
            (0xffff_8001_0000_0000, 0xffff_ffff_ffe0_0000)
        );
    }

    #[test]
    fn missing_high_window_gives_empty_regions() {
        let manager = VaManager::new(&VaLayout {
            high_offset: 0,
            high_max: 0,
            ..layout()
        })
        .unwrap();
        assert!(manager.region(VaRegionKind::High32).is_empty());
        assert!(manager.region(VaRegionKind::High).is_empty());
        assert_eq!(manager.address32_hi(), 0);
        assert!(matches!(
            manager.alloc_range(0x1000, 0, None, VaRangeFlags::HIGH),
            Err(ShimError::ResourceExhausted)
        ));
    }

    #[test]
    fn small_address_space_leaves_standard_empty() {
        let manager = VaManager::new(&VaLayout {
            max: 0x8000_0000,
            ..layout()
        })
        .unwrap();
        assert_eq!(bounds(&manager, VaRegionKind::Low32), (0x20_0000, 0x8000_0000));
        assert!(manager.region(VaRegionKind::Standard).is_empty());
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let region = VaRegion::new(0x1000, 0x100_0000, 0x1000);
        let a = region.allocate(0x1800, 0x1_0000, None).unwrap();
        let b = region.allocate(0x1000, 0, None).unwrap();
        let c = region.allocate(0x1000, 0x1_0000, None).unwrap();
        assert_eq!(a, 0x1_0000);
        assert_eq!(b, 0x1000);
        assert_eq!(c, 0x2_0000);
        assert_eq!(a % 0x1_0000, 0);
        assert!(b + 0x1000 <= a);
    }

    #[test]
    fn freed_space_is_merged_and_reused() {
        let region = VaRegion::new(0, 0x4000, 0x1000);
        let a = region.allocate(0x1000, 0, None).unwrap();
        let b = region.allocate(0x1000, 0, None).unwrap();
        let c = region.allocate(0x2000, 0, None).unwrap();
        assert!(matches!(
            region.allocate(0x1000, 0, None),
            Err(ShimError::ResourceExhausted)
        ));

        region.free(a, 0x1000).unwrap();
        region.free(b, 0x1000).unwrap();
        assert_eq!(region.allocate(0x2000, 0, None).unwrap(), 0);
        region.free(c, 0x2000).unwrap();
        assert!(matches!(region.free(c, 0x2000), Err(ShimError::InvalidArgument)));
    }

    #[test]
    fn base_required_is_honored() {
        let region = VaRegion::new(0, 0x10_0000, 0x1000);
        assert_eq!(region.allocate(0x1000, 0, Some(0x8000)).unwrap(), 0x8000);
        assert!(matches!(
            region.allocate(0x1000, 0, Some(0x8000)),
            Err(ShimError::ResourceExhausted)
        ));
        assert!(matches!(
            region.allocate(0x1000, 0, Some(0x8800)),
            Err(ShimError::InvalidArgument)
        ));
    }

    #[test]
    fn standard_exhaustion_falls_back_to_32_bit() {
        let manager = VaManager::new(&VaLayout {
            offset: 0x1000,
            max: SIZE_4GIB + 0x1000,
            alignment: 0x1000,
            ..Default::default()
        })
        .unwrap();

        let first = manager
            .alloc_range(0x1000, 0, None, VaRangeFlags::empty())
            .unwrap();
        assert_eq!(first.kind, VaRegionKind::Standard);

        let second = manager
            .alloc_range(0x1000, 0, None, VaRangeFlags::empty())
            .unwrap();
        assert_eq!(second.kind, VaRegionKind::Low32);
        assert!(second.address + second.size <= SIZE_4GIB);

        manager.free_range(&first).unwrap();
        manager.free_range(&second).unwrap();
    }

    #[test]
    fn narrow_regions_never_cross_4gib() {
        let manager = VaManager::new(&layout()).unwrap();
        let mut last_end = 0;
        while let Ok(range) =
            manager.alloc_range(0x4000_0000, 0, None, VaRangeFlags::RANGE_32_BIT)
        {
            assert_eq!(range.kind, VaRegionKind::Low32);
            assert!(range.address + range.size <= SIZE_4GIB);
            last_end = range.address + range.size;
        }
        assert!(last_end > 0);
    }

    #[test]
    fn address32_hi_reports_high_window() {
        let manager = VaManager::new(&layout()).unwrap();
        assert_eq!(manager.address32_hi(), 0xffff_8000);
    }
}
