// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap as Map;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;

use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Object a descriptor stands for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FdTarget {
    Buffer(u32),
    Syncobj(u32),
}

/// Hands out real descriptors standing for emulated objects. A descriptor stays valid, and can
/// be converted back any number of times, until `close` is called on it.
#[derive(Default)]
pub struct FdMapper {
    entries: Map<RawFd, (OwnedFd, FdTarget)>,
}

impl FdMapper {
    pub fn export(&mut self, target: FdTarget) -> ShimResult<RawFd> {
        let fd = OwnedFd::from(File::open("/dev/null")?);
        let raw = fd.as_raw_fd();
        self.entries.insert(raw, (fd, target));
        Ok(raw)
    }

    pub fn lookup(&self, fd: RawFd) -> ShimResult<FdTarget> {
        self.entries
            .get(&fd)
            .map(|(_, target)| *target)
            .ok_or(ShimError::NotFound)
    }

    pub fn close(&mut self, fd: RawFd) -> ShimResult<()> {
        self.entries
            .remove(&fd)
            .map(|_| ())
            .ok_or(ShimError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_resolve_until_closed() {
        let mut mapper = FdMapper::default();
        let buffer = mapper.export(FdTarget::Buffer(3)).unwrap();
        let syncobj = mapper.export(FdTarget::Syncobj(3)).unwrap();
        assert_ne!(buffer, syncobj);

        assert_eq!(mapper.lookup(buffer).unwrap(), FdTarget::Buffer(3));
        assert_eq!(mapper.lookup(buffer).unwrap(), FdTarget::Buffer(3));
        assert_eq!(mapper.lookup(syncobj).unwrap(), FdTarget::Syncobj(3));

        mapper.close(buffer).unwrap();
        assert!(matches!(mapper.lookup(buffer), Err(ShimError::NotFound)));
        assert!(matches!(mapper.close(buffer), Err(ShimError::NotFound)));
        mapper.close(syncobj).unwrap();
    }
}
