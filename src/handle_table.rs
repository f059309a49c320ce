// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Slots are added in multiples of this count.
const HANDLE_TABLE_GROWTH: usize = 512;

/// Sparse map from small integer handles to objects.
///
/// Handles are chosen by whoever owns the namespace (usually the backend), so the table never
/// allocates keys itself. It is not synchronized; callers hold the lock of the owning device.
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    max_key: u32,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        HandleTable {
            slots: Vec::new(),
            max_key: 0,
        }
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> HandleTable<T> {
        Default::default()
    }

    /// Stores `value` under `key`. Fails with `AlreadyExists` when the slot is taken.
    pub fn insert(&mut self, key: u32, value: T) -> ShimResult<()> {
        let index: usize = key.try_into()?;
        if index >= self.slots.len() {
            let wanted = (index + 1).next_multiple_of(HANDLE_TABLE_GROWTH);
            self.slots
                .try_reserve_exact(wanted - self.slots.len())
                .map_err(|_| ShimError::ResourceExhausted)?;
            self.slots.resize_with(wanted, || None);
        }

        let slot = &mut self.slots[index];
        if slot.is_some() {
            return Err(ShimError::AlreadyExists);
        }

        *slot = Some(value);
        self.max_key = self.max_key.max(key);
        Ok(())
    }

    pub fn lookup(&self, key: u32) -> ShimResult<&T> {
        self.slots
            .get(key as usize)
            .and_then(Option::as_ref)
            .ok_or(ShimError::NotFound)
    }

    pub fn lookup_mut(&mut self, key: u32) -> ShimResult<&mut T> {
        self.slots
            .get_mut(key as usize)
            .and_then(Option::as_mut)
            .ok_or(ShimError::NotFound)
    }

    /// Detaches and returns the object stored under `key`, if any.
    pub fn remove(&mut self, key: u32) -> Option<T> {
        self.slots.get_mut(key as usize).and_then(Option::take)
    }

    pub fn contains(&self, key: u32) -> bool {
        self.lookup(key).is_ok()
    }

    /// Highest key ever inserted. Removal does not lower it.
    pub fn max_key(&self) -> u32 {
        self.max_key
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Walks occupied slots from key 0 up to `max_key()`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        let end = self.slots.len().min(self.max_key as usize + 1);
        self.slots[..end]
            .iter()
            .enumerate()
            .filter_map(|(key, slot)| slot.as_ref().map(|value| (key as u32, value)))
    }

    /// Drops every stored object.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.max_key = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let mut table = HandleTable::new();
        table.insert(3, "three").unwrap();
        assert_eq!(*table.lookup(3).unwrap(), "three");
        assert!(matches!(table.lookup(4), Err(ShimError::NotFound)));
        assert_eq!(table.remove(3), Some("three"));
        assert!(matches!(table.lookup(3), Err(ShimError::NotFound)));
        assert_eq!(table.remove(3), None);
    }

    #[test]
    fn occupied_slot_is_rejected() {
        let mut table = HandleTable::new();
        table.insert(1, 10u32).unwrap();
        assert!(matches!(table.insert(1, 11), Err(ShimError::AlreadyExists)));
        assert_eq!(*table.lookup(1).unwrap(), 10);
    }

    #[test]
    fn max_key_survives_removal() {
        let mut table = HandleTable::new();
        table.insert(2000, ()).unwrap();
        table.insert(5, ()).unwrap();
        assert_eq!(table.max_key(), 2000);
        table.remove(2000);
        assert_eq!(table.max_key(), 2000);
        assert_eq!(table.iter().map(|(key, _)| key).collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn iteration_is_sorted_and_sparse() {
        let mut table = HandleTable::new();
        for key in [700, 1, 42] {
            table.insert(key, key * 2).unwrap();
        }
        let entries: Vec<_> = table.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(entries, vec![(1, 2), (42, 84), (700, 1400)]);
        assert_eq!(table.len(), 3);
        table.clear();
        assert!(table.is_empty());
    }
}
