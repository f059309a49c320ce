// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Client-side cache of shared regions cloned from the server.
//!
//! Every region is mapped once no matter how many buffers live in it. The cache is indexed both
//! by region id and by the start address of the local mapping, so that an unmap, which only
//! carries an address, can find its region.

use std::cell::RefCell;
use std::collections::BTreeMap as Map;
use std::ptr::NonNull;

use log::debug;
use parking_lot::ReentrantMutex;

use crate::shm;
use crate::shm::MemoryMapping;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Opens a region shared by the server.
pub trait RegionMapper: Send + Sync {
    fn map_region(&self, region_id: u64) -> ShimResult<MemoryMapping>;
}

/// Maps regions through named POSIX shared memory.
pub struct ShmRegionMapper;

impl RegionMapper for ShmRegionMapper {
    fn map_region(&self, region_id: u64) -> ShimResult<MemoryMapping> {
        shm::map_region(region_id)
    }
}

struct CachedRegion {
    mapping: MemoryMapping,
    refcount: u32,
}

impl CachedRegion {
    fn start(&self) -> usize {
        self.mapping.as_ptr().as_ptr() as usize
    }

    fn contains(&self, address: usize) -> bool {
        address >= self.start() && address - self.start() < self.mapping.size()
    }
}

#[derive(Default)]
struct CacheState {
    regions: Map<u64, CachedRegion>,
    by_address: Map<usize, u64>,
}

impl CacheState {
    fn containing(&self, address: usize) -> Option<u64> {
        let (_, id) = self.by_address.range(..=address).next_back()?;
        self.regions
            .get(id)
            .filter(|region| region.contains(address))
            .map(|_| *id)
    }
}

pub struct RegionCache {
    mapper: Box<dyn RegionMapper>,
    state: ReentrantMutex<RefCell<CacheState>>,
}

impl RegionCache {
    pub fn new(mapper: Box<dyn RegionMapper>) -> RegionCache {
        RegionCache {
            mapper,
            state: ReentrantMutex::new(RefCell::new(CacheState::default())),
        }
    }

    /// Returns the local address of `offset` within region `region_id`, cloning the region on
    /// first use.
    pub fn map(&self, region_id: u64, offset: u64) -> ShimResult<NonNull<u8>> {
        let guard = self.state.lock();
        let offset: usize = offset.try_into()?;

        if let Some(region) = guard.borrow_mut().regions.get_mut(&region_id) {
            if offset >= region.mapping.size() {
                return Err(ShimError::ProtocolError);
            }
            region.refcount += 1;
            return Ok(offset_ptr(&region.mapping, offset));
        }

        let mapping = self.mapper.map_region(region_id)?;
        if offset >= mapping.size() {
            return Err(ShimError::ProtocolError);
        }
        let addr = offset_ptr(&mapping, offset);
        debug!("cloned region {} ({} bytes)", region_id, mapping.size());

        let mut state = guard.borrow_mut();
        state
            .by_address
            .insert(mapping.as_ptr().as_ptr() as usize, region_id);
        state.regions.insert(
            region_id,
            CachedRegion {
                mapping,
                refcount: 1,
            },
        );
        Ok(addr)
    }

    /// Drops one reference to the region containing `addr`, releasing the clone with the last.
    pub fn unmap(&self, addr: NonNull<u8>) -> ShimResult<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let region_id = state
            .containing(addr.as_ptr() as usize)
            .ok_or(ShimError::NotFound)?;

        let region = state
            .regions
            .get_mut(&region_id)
            .ok_or(ShimError::NotFound)?;
        region.refcount -= 1;
        if region.refcount > 0 {
            return Ok(());
        }

        if let Some(region) = state.regions.remove(&region_id) {
            state.by_address.remove(&region.start());
            debug!("released region {}", region_id);
        }
        Ok(())
    }

    /// Region id and offset of a local address inside a cloned region.
    pub fn lookup(&self, addr: u64) -> Option<(u64, u64)> {
        let addr: usize = addr.try_into().ok()?;
        let guard = self.state.lock();
        let state = guard.borrow();
        let region_id = state.containing(addr)?;
        let start = state.regions.get(&region_id)?.start();
        Some((region_id, (addr - start) as u64))
    }

    /// Runs `f` while holding the cache lock. `f` may call back into the cache.
    pub fn locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.state.lock();
        f()
    }

    pub fn refcount(&self, region_id: u64) -> u32 {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .regions
            .get(&region_id)
            .map_or(0, |region| region.refcount)
    }

    /// Number of cloned regions.
    pub fn len(&self) -> usize {
        self.state.lock().borrow().regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn offset_ptr(mapping: &MemoryMapping, offset: usize) -> NonNull<u8> {
    // SAFETY:
    // Callers check `offset` against the mapping size.
    unsafe { NonNull::new_unchecked(mapping.as_ptr().as_ptr().add(offset)) }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::shm::SharedMemory;

    struct CountingMapper(Arc<AtomicUsize>);

    impl RegionMapper for CountingMapper {
        fn map_region(&self, region_id: u64) -> ShimResult<MemoryMapping> {
            self.0.fetch_add(1, Ordering::SeqCst);
            shm::map_region(region_id)
        }
    }

    fn cache() -> (RegionCache, Arc<AtomicUsize>) {
        let clones = Arc::new(AtomicUsize::new(0));
        (
            RegionCache::new(Box::new(CountingMapper(clones.clone()))),
            clones,
        )
    }

    #[test]
    fn region_is_cloned_once() {
        let region = SharedMemory::new(0x2000).unwrap();
        let (cache, clones) = cache();

        let first = cache.map(region.id(), 0).unwrap();
        let second = cache.map(region.id(), 0x1000).unwrap();
        assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 0x1000);
        assert_eq!(cache.refcount(region.id()), 2);
        assert_eq!(clones.load(Ordering::SeqCst), 1);

        cache.unmap(second).unwrap();
        assert_eq!(cache.refcount(region.id()), 1);
        cache.unmap(first).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(first.as_ptr() as u64), None);
        assert!(matches!(cache.unmap(first), Err(ShimError::NotFound)));
    }

    #[test]
    fn lookup_translates_addresses() {
        let region = SharedMemory::new(0x2000).unwrap();
        let (cache, _) = cache();
        let base = cache.map(region.id(), 0).unwrap().as_ptr() as u64;

        assert_eq!(cache.lookup(base + 0x1234), Some((region.id(), 0x1234)));
        assert_eq!(cache.lookup(base + 0x2000), None);
        assert_eq!(cache.lookup(base.wrapping_sub(1)), None);
    }

    #[test]
    fn offsets_past_region_end_are_rejected() {
        let region = SharedMemory::new(0x1000).unwrap();
        let (cache, _) = cache();
        assert!(matches!(
            cache.map(region.id(), 0x1000),
            Err(ShimError::ProtocolError)
        ));
        assert!(cache.is_empty());

        cache.map(region.id(), 0).unwrap();
        assert!(matches!(
            cache.map(region.id(), 0x1000),
            Err(ShimError::ProtocolError)
        ));
        assert_eq!(cache.refcount(region.id()), 1);
    }

    #[test]
    fn unmap_inside_region_finds_it() {
        let region = SharedMemory::new(0x2000).unwrap();
        let (cache, _) = cache();
        let addr = cache.map(region.id(), 0x800).unwrap();
        cache.unmap(addr).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn locked_section_can_reenter() {
        let region = SharedMemory::new(0x1000).unwrap();
        let (cache, _) = cache();
        let found = cache.locked(|| {
            let addr = cache.map(region.id(), 0).unwrap();
            cache.lookup(addr.as_ptr() as u64)
        });
        assert_eq!(found, Some((region.id(), 0)));
    }

    #[test]
    fn missing_region_is_not_found() {
        let (cache, _) = cache();
        assert!(matches!(
            cache.map(u64::MAX, 0),
            Err(ShimError::NotFound)
        ));
    }
}
