// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Emulated buffer storage and the GPU virtual address map.

use std::collections::BTreeMap as Map;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::MutexGuard;
use zerocopy::FromZeroes;

use crate::drm_protocol::drm_amdgpu_gem_create_in;
use crate::drm_protocol::drm_amdgpu_gem_metadata;
use crate::shm::MemoryMapping;
use crate::shm::SharedMemory;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

enum BufferStorage {
    /// Memory created for the buffer.
    Owned(SharedMemory),
    /// A window into an existing shared region.
    Borrowed {
        region_id: u64,
        mapping: MemoryMapping,
        offset: usize,
    },
}

/// Attributes a client can read back or change after creation.
pub struct BufferAttributes {
    pub create_info: drm_amdgpu_gem_create_in,
    pub metadata: drm_amdgpu_gem_metadata,
}

pub struct GpuBuffer {
    storage: BufferStorage,
    size: u64,
    attributes: Mutex<BufferAttributes>,
}

impl GpuBuffer {
    /// Allocates zeroed shared memory for a new buffer.
    pub fn allocate(create_info: drm_amdgpu_gem_create_in) -> ShimResult<GpuBuffer> {
        let memory = SharedMemory::new(create_info.bo_size)?;
        Ok(GpuBuffer {
            storage: BufferStorage::Owned(memory),
            size: create_info.bo_size,
            attributes: Mutex::new(BufferAttributes {
                create_info,
                metadata: drm_amdgpu_gem_metadata::new_zeroed(),
            }),
        })
    }

    /// Wraps `size` bytes at `offset` of shared region `region_id`.
    pub fn borrow_region(
        region_id: u64,
        mapping: MemoryMapping,
        offset: u64,
        size: u64,
    ) -> ShimResult<GpuBuffer> {
        let end = offset.checked_add(size).ok_or(ShimError::InvalidArgument)?;
        if size == 0 || end > mapping.size() as u64 {
            return Err(ShimError::InvalidArgument);
        }

        Ok(GpuBuffer {
            storage: BufferStorage::Borrowed {
                region_id,
                mapping,
                offset: offset.try_into()?,
            },
            size,
            attributes: Mutex::new(BufferAttributes {
                create_info: drm_amdgpu_gem_create_in {
                    bo_size: size,
                    ..Default::default()
                },
                metadata: drm_amdgpu_gem_metadata::new_zeroed(),
            }),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn attributes(&self) -> MutexGuard<'_, BufferAttributes> {
        self.attributes.lock()
    }

    fn mapping(&self) -> (&MemoryMapping, usize) {
        match &self.storage {
            BufferStorage::Owned(memory) => (memory.mapping(), 0),
            BufferStorage::Borrowed {
                mapping, offset, ..
            } => (mapping, *offset),
        }
    }

    /// Start of the buffer in this process.
    pub fn as_ptr(&self) -> ShimResult<NonNull<u8>> {
        let (mapping, offset) = self.mapping();
        NonNull::new(mapping.as_ptr().as_ptr().wrapping_add(offset))
            .ok_or(ShimError::InvalidState)
    }

    /// The shared region holding the buffer and the buffer's offset in it.
    pub fn region(&self) -> (u64, u64) {
        match &self.storage {
            BufferStorage::Owned(memory) => (memory.id(), 0),
            BufferStorage::Borrowed {
                region_id, offset, ..
            } => (*region_id, *offset as u64),
        }
    }

    pub fn read_bytes(&self, offset: u64, len: usize) -> ShimResult<Vec<u8>> {
        let (mapping, base) = self.mapping();
        self.check_range(offset, len)?;
        mapping.read_bytes(base + offset as usize, len)
    }

    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> ShimResult<()> {
        let (mapping, base) = self.mapping();
        self.check_range(offset, data.len())?;
        mapping.write_bytes(base + offset as usize, data)
    }

    fn check_range(&self, offset: u64, len: usize) -> ShimResult<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ShimError::InvalidArgument),
        }
    }
}

/// One GPU virtual address mapping.
#[derive(Clone)]
pub struct GpuMapping {
    pub handle: u32,
    // Keeps the memory alive after the buffer handle is closed.
    pub _buffer: Arc<GpuBuffer>,
    pub offset: u64,
    pub size: u64,
}

/// Disjoint GPU mappings keyed by their start address.
#[derive(Default)]
pub struct GpuMappings {
    map: Map<u64, GpuMapping>,
}

impl GpuMappings {
    pub fn insert(&mut self, address: u64, mapping: GpuMapping) -> ShimResult<()> {
        let end = address
            .checked_add(mapping.size)
            .ok_or(ShimError::InvalidArgument)?;
        if mapping.size == 0 || self.overlapping(address, end).next().is_some() {
            return Err(ShimError::InvalidArgument);
        }

        self.map.insert(address, mapping);
        Ok(())
    }

    /// The mapping starting exactly at `address`.
    pub fn get(&self, address: u64) -> Option<&GpuMapping> {
        self.map.get(&address)
    }

    /// Removes the mapping starting exactly at `address`.
    pub fn remove(&mut self, address: u64) -> ShimResult<GpuMapping> {
        self.map.remove(&address).ok_or(ShimError::NotFound)
    }

    /// Unmaps `[address, address + size)`, trimming mappings that straddle its edges.
    pub fn clear(&mut self, address: u64, size: u64) -> ShimResult<()> {
        let end = address
            .checked_add(size)
            .ok_or(ShimError::InvalidArgument)?;
        let keys: Vec<u64> = self.overlapping(address, end).collect();

        for key in keys {
            let Some(mapping) = self.map.remove(&key) else {
                continue;
            };
            let mapping_end = key + mapping.size;

            if key < address {
                self.map.insert(
                    key,
                    GpuMapping {
                        size: address - key,
                        ..mapping.clone()
                    },
                );
            }
            if mapping_end > end {
                self.map.insert(
                    end,
                    GpuMapping {
                        offset: mapping.offset + (end - key),
                        size: mapping_end - end,
                        ..mapping
                    },
                );
            }
        }
        Ok(())
    }

    /// Finds the mapping containing `address` and the matching offset into its buffer.
    pub fn lookup(&self, address: u64) -> ShimResult<(&GpuMapping, u64)> {
        let (start, mapping) = self
            .map
            .range(..=address)
            .next_back()
            .ok_or(ShimError::NotFound)?;
        if address - start >= mapping.size {
            return Err(ShimError::NotFound);
        }
        Ok((mapping, mapping.offset + (address - start)))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    // Mappings are disjoint, so their ends grow with their starts.
    fn overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = u64> + '_ {
        self.map
            .range(..end)
            .rev()
            .take_while(move |(key, mapping)| **key + mapping.size > start)
            .map(|(key, _)| *key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(size: u64) -> Arc<GpuBuffer> {
        Arc::new(
            GpuBuffer::allocate(drm_amdgpu_gem_create_in {
                bo_size: size,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn mapping(buffer: &Arc<GpuBuffer>, offset: u64, size: u64) -> GpuMapping {
        GpuMapping {
            handle: 1,
            _buffer: buffer.clone(),
            offset,
            size,
        }
    }

    #[test]
    fn lookup_respects_bounds() {
        let buffer = buffer(0x3000);
        let mut mappings = GpuMappings::default();
        mappings.insert(0x10000, mapping(&buffer, 0x1000, 0x2000)).unwrap();

        assert!(matches!(mappings.lookup(0xffff), Err(ShimError::NotFound)));
        assert_eq!(mappings.lookup(0x10000).unwrap().1, 0x1000);
        assert_eq!(mappings.lookup(0x11fff).unwrap().1, 0x2fff);
        assert!(matches!(mappings.lookup(0x12000), Err(ShimError::NotFound)));
    }

    #[test]
    fn overlapping_insert_is_rejected() {
        let buffer = buffer(0x4000);
        let mut mappings = GpuMappings::default();
        mappings.insert(0x10000, mapping(&buffer, 0, 0x2000)).unwrap();

        assert!(mappings.insert(0xf000, mapping(&buffer, 0, 0x2000)).is_err());
        assert!(mappings.insert(0x11000, mapping(&buffer, 0, 0x1000)).is_err());
        assert!(mappings.insert(0x10000, mapping(&buffer, 0, 0)).is_err());
        mappings.insert(0x12000, mapping(&buffer, 0, 0x1000)).unwrap();
        mappings.insert(0xe000, mapping(&buffer, 0, 0x2000)).unwrap();
        assert_eq!(mappings.len(), 3);
    }

    #[test]
    fn clear_trims_both_edges() {
        let buffer = buffer(0x10000);
        let mut mappings = GpuMappings::default();
        mappings.insert(0x10000, mapping(&buffer, 0, 0x4000)).unwrap();
        mappings.insert(0x14000, mapping(&buffer, 0x4000, 0x4000)).unwrap();

        mappings.clear(0x12000, 0x4000).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings.lookup(0x11fff).unwrap().1, 0x1fff);
        assert!(mappings.lookup(0x12000).is_err());
        assert!(mappings.lookup(0x15fff).is_err());
        assert_eq!(mappings.lookup(0x16000).unwrap().1, 0x6000);
        assert_eq!(mappings.lookup(0x17fff).unwrap().1, 0x7fff);
        assert!(mappings.lookup(0x18000).is_err());
    }

    #[test]
    fn clear_inside_one_mapping_splits_it() {
        let buffer = buffer(0x4000);
        let mut mappings = GpuMappings::default();
        mappings.insert(0x10000, mapping(&buffer, 0, 0x4000)).unwrap();

        mappings.clear(0x11000, 0x1000).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings.lookup(0x10fff).unwrap().1, 0xfff);
        assert!(mappings.lookup(0x11000).is_err());
        assert_eq!(mappings.lookup(0x12000).unwrap().1, 0x2000);
    }

    #[test]
    fn borrowed_buffer_shares_region() {
        let region = SharedMemory::new(0x2000).unwrap();
        let mapping = crate::shm::map_region(region.id()).unwrap();
        let borrowed = GpuBuffer::borrow_region(region.id(), mapping, 0x1000, 0x800).unwrap();

        borrowed.write_bytes(0x10, b"abc").unwrap();
        assert_eq!(region.mapping().read_bytes(0x1010, 3).unwrap(), b"abc");
        assert_eq!(borrowed.region(), (region.id(), 0x1000));
        assert!(borrowed.read_bytes(0x7ff, 2).is_err());
    }

    #[test]
    fn borrowed_range_must_fit() {
        let region = SharedMemory::new(0x1000).unwrap();
        let mapping = crate::shm::map_region(region.id()).unwrap();
        assert!(matches!(
            GpuBuffer::borrow_region(region.id(), mapping, 0x800, 0x1000),
            Err(ShimError::InvalidArgument)
        ));
    }
}
