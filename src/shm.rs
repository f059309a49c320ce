// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Named shared memory regions and process-local mappings of them.
//!
//! Buffer storage of the emulation backend lives in POSIX shared memory so that a client in
//! another process can map the same pages. A region is addressed by a 64-bit id that both
//! sides turn into the same object name.

use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use log::warn;
use nix::fcntl::OFlag;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::shm_open;
use nix::sys::mman::shm_unlink;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;
use nix::sys::stat::Mode;

use crate::shim_utils::page_align;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

static NEXT_REGION: AtomicU32 = AtomicU32::new(1);

/// Name of the shared memory object backing region `id`.
pub fn region_name(id: u64) -> String {
    format!("/drm_shim.{:016x}", id)
}

/// A read/write shared mapping, unmapped on drop.
#[derive(Debug)]
pub struct MemoryMapping {
    addr: NonNull<u8>,
    size: usize,
}

// SAFETY:
// The mapping is plain shared memory; callers synchronize access to its contents.
unsafe impl Send for MemoryMapping {}
// SAFETY:
// See above.
unsafe impl Sync for MemoryMapping {}

impl MemoryMapping {
    pub fn from_descriptor<F: AsFd>(descriptor: F, size: usize) -> ShimResult<MemoryMapping> {
        let length = NonZeroUsize::new(size).ok_or(ShimError::InvalidArgument)?;

        // SAFETY:
        // A fresh mapping is requested at a kernel-chosen address, so no existing memory is
        // affected. The descriptor is valid for the duration of the call.
        let addr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                descriptor,
                0,
            )?
        };

        Ok(MemoryMapping {
            addr: addr.cast(),
            size,
        })
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Copies `data` into the mapping at `offset`.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> ShimResult<()> {
        let end = offset
            .checked_add(data.len())
            .ok_or(ShimError::InvalidArgument)?;
        if end > self.size {
            return Err(ShimError::InvalidArgument);
        }

        // SAFETY:
        // The destination range was checked against the mapping bounds.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.addr.as_ptr().add(offset), data.len())
        };
        Ok(())
    }

    /// Copies `len` bytes starting at `offset` out of the mapping.
    pub fn read_bytes(&self, offset: usize, len: usize) -> ShimResult<Vec<u8>> {
        let end = offset.checked_add(len).ok_or(ShimError::InvalidArgument)?;
        if end > self.size {
            return Err(ShimError::InvalidArgument);
        }

        let mut data = vec![0u8; len];
        // SAFETY:
        // The source range was checked against the mapping bounds.
        unsafe {
            std::ptr::copy_nonoverlapping(self.addr.as_ptr().add(offset), data.as_mut_ptr(), len)
        };
        Ok(data)
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        // SAFETY:
        // The range was returned by mmap and is not referenced once the mapping is dropped.
        if let Err(e) = unsafe { munmap(self.addr.cast(), self.size) } {
            warn!("munmap failed: {}", e);
        }
    }
}

/// A shared memory region owned by this process. The name is unlinked on drop; mappings
/// elsewhere stay valid until they are unmapped.
#[derive(Debug)]
pub struct SharedMemory {
    id: u64,
    name: String,
    mapping: MemoryMapping,
}

impl SharedMemory {
    /// Creates a zero-filled region of at least `size` bytes.
    pub fn new(size: u64) -> ShimResult<SharedMemory> {
        if size == 0 {
            return Err(ShimError::InvalidArgument);
        }

        let size = page_align(size)?;
        let id = (u64::from(std::process::id()) << 32)
            | u64::from(NEXT_REGION.fetch_add(1, Ordering::Relaxed));
        let name = region_name(id);

        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        let file = File::from(fd);

        let region = (|| -> ShimResult<MemoryMapping> {
            file.set_len(size)?;
            MemoryMapping::from_descriptor(&file, size.try_into()?)
        })();

        match region {
            Ok(mapping) => Ok(SharedMemory { id, name, mapping }),
            Err(e) => {
                if let Err(unlink_err) = shm_unlink(name.as_str()) {
                    warn!("failed to unlink {}: {}", name, unlink_err);
                }
                Err(e)
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.mapping.size()
    }

    pub fn mapping(&self) -> &MemoryMapping {
        &self.mapping
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if let Err(e) = shm_unlink(self.name.as_str()) {
            warn!("failed to unlink {}: {}", self.name, e);
        }
    }
}

/// Maps the whole of region `id`, created by another `SharedMemory`.
pub fn map_region(id: u64) -> ShimResult<MemoryMapping> {
    let fd = shm_open(region_name(id).as_str(), OFlag::O_RDWR, Mode::empty()).map_err(|e| {
        match e {
            nix::errno::Errno::ENOENT => ShimError::NotFound,
            e => ShimError::NixError(e),
        }
    })?;
    let file = File::from(fd);
    let size: usize = file.metadata()?.len().try_into()?;
    MemoryMapping::from_descriptor(&file, size)
}
