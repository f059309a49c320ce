// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Common error type, constants and helpers shared by every part of the shim.

use std::io::Error as IoError;
use std::num::TryFromIntError;

use nix::unistd::sysconf;
use nix::unistd::SysconfVar;
use once_cell::sync::Lazy;
use remain::sorted;
use thiserror::Error;

/// Size of a 32-bit GPU address window.
pub const SIZE_4GIB: u64 = 0x1_0000_0000;

/// Mask selecting the bits above a 32-bit address window.
pub const HIGH_32_MASK: u64 = !0xffff_ffff;

const FALLBACK_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| match sysconf(SysconfVar::PAGE_SIZE) {
    Ok(Some(size)) if size > 0 => size as usize,
    _ => FALLBACK_PAGE_SIZE,
});

/// Returns the page size of the running platform.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Rounds `value` up to the next multiple of `alignment`. An alignment of zero leaves the value
/// untouched.
pub fn align_up(value: u64, alignment: u64) -> ShimResult<u64> {
    if alignment == 0 {
        return Ok(value);
    }

    value
        .checked_next_multiple_of(alignment)
        .ok_or(ShimError::InvalidArgument)
}

/// Rounds `value` up to the platform page size.
pub fn page_align(value: u64) -> ShimResult<u64> {
    align_up(value, page_size() as u64)
}

/// An error generated while servicing a device request.
#[sorted]
#[derive(Error, Debug)]
pub enum ShimError {
    /// A handle table slot is already occupied.
    #[error("object already exists")]
    AlreadyExists,
    /// The backend cannot service the device (missing capability or no acceleration).
    #[error("backend unavailable")]
    BackendUnavailable,
    /// An argument is malformed or out of range.
    #[error("invalid argument")]
    InvalidArgument,
    /// The object is not in a state that allows the operation.
    #[error("invalid state")]
    InvalidState,
    /// An input/output error occured.
    #[error("an input/output error occurred: {0}")]
    IoError(#[from] IoError),
    /// Nix crate error.
    #[error("The errno is {0}")]
    NixError(#[from] nix::Error),
    /// The requested object does not exist.
    #[error("not found")]
    NotFound,
    /// The operation or request type is not carried by this backend.
    #[error("operation not supported")]
    NotSupported,
    /// The caller may not perform the operation.
    #[error("permission denied")]
    PermissionDenied,
    /// A peer spoke an incompatible or malformed protocol.
    #[error("protocol error")]
    ProtocolError,
    /// Memory or another resource ran out.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// A wait finished before its condition was met.
    #[error("timed out")]
    TimedOut,
    /// An integer conversion failed.
    #[error("int conversion failed: {0}")]
    TryFromIntError(#[from] TryFromIntError),
}

impl ShimError {
    /// Wire status for this error: a negated errno value.
    pub fn to_status(&self) -> i32 {
        let errno = match self {
            ShimError::AlreadyExists => libc::EEXIST,
            ShimError::BackendUnavailable => libc::ENODEV,
            ShimError::InvalidArgument => libc::EINVAL,
            ShimError::InvalidState => libc::EALREADY,
            ShimError::IoError(e) => e.raw_os_error().unwrap_or(libc::EIO),
            ShimError::NixError(e) => *e as i32,
            ShimError::NotFound => libc::ENOENT,
            ShimError::NotSupported => libc::ENOSYS,
            ShimError::PermissionDenied => libc::EPERM,
            ShimError::ProtocolError => libc::EPROTO,
            ShimError::ResourceExhausted => libc::ENOMEM,
            ShimError::TimedOut => libc::ETIME,
            ShimError::TryFromIntError(_) => libc::EINVAL,
        };

        -errno
    }

    /// Rebuilds an error from a non-zero wire status.
    pub fn from_status(status: i32) -> ShimError {
        match status.checked_neg().unwrap_or(libc::EIO) {
            libc::EEXIST => ShimError::AlreadyExists,
            libc::ENODEV => ShimError::BackendUnavailable,
            libc::EINVAL => ShimError::InvalidArgument,
            libc::EALREADY => ShimError::InvalidState,
            libc::ENOENT => ShimError::NotFound,
            libc::ENOSYS => ShimError::NotSupported,
            libc::EPERM => ShimError::PermissionDenied,
            libc::EPROTO => ShimError::ProtocolError,
            libc::ENOMEM => ShimError::ResourceExhausted,
            libc::ETIME => ShimError::TimedOut,
            errno => ShimError::IoError(IoError::from_raw_os_error(errno)),
        }
    }
}

/// The result of an operation in this crate.
pub type ShimResult<T> = std::result::Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0x950, 0x1000).unwrap(), 0x1000);
        assert_eq!(align_up(0x1000, 0x1000).unwrap(), 0x1000);
        assert_eq!(align_up(0, 0x1000).unwrap(), 0);
        assert_eq!(align_up(7, 0).unwrap(), 7);
        assert!(matches!(
            align_up(u64::MAX, 0x1000),
            Err(ShimError::InvalidArgument)
        ));
    }

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn status_preserves_error_kind() {
        let errors = [
            ShimError::AlreadyExists,
            ShimError::BackendUnavailable,
            ShimError::InvalidArgument,
            ShimError::InvalidState,
            ShimError::NotFound,
            ShimError::NotSupported,
            ShimError::PermissionDenied,
            ShimError::ProtocolError,
            ShimError::ResourceExhausted,
            ShimError::TimedOut,
        ];

        for error in errors {
            let status = error.to_status();
            assert!(status < 0);
            assert_eq!(
                std::mem::discriminant(&ShimError::from_status(status)),
                std::mem::discriminant(&error)
            );
        }
    }

    #[test]
    fn unknown_status_becomes_io_error() {
        match ShimError::from_status(-libc::EBUSY) {
            ShimError::IoError(e) => assert_eq!(e.raw_os_error(), Some(libc::EBUSY)),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
