// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device-control requests and their marshaling schema.
//!
//! Every request owns a fixed argument block. The leading `input_len()` bytes of that block are
//! inputs, the rest are outputs filled in by the backend. Requests that reference arrays or
//! command chunks carry them as separate sections, each with its own length on the wire.

use std::mem::offset_of;
use std::mem::size_of;

use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

use crate::drm_protocol::*;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Marshaling schema of one request type.
pub trait IoctlArgs {
    /// The fixed argument block.
    fn fixed(&self) -> &[u8];

    fn fixed_mut(&mut self) -> &mut [u8];

    /// Number of leading bytes of `fixed()` that are inputs.
    fn input_len(&self) -> usize;

    /// Whether the instance can be relayed to a remote server.
    fn proxied(&self) -> bool {
        true
    }

    /// Variable-length inputs, in wire order.
    fn input_sections(&self) -> ShimResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    /// Variable-length outputs, in wire order.
    fn output_sections(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn set_output_sections(&mut self, sections: Vec<Vec<u8>>) -> ShimResult<()> {
        if sections.is_empty() {
            Ok(())
        } else {
            Err(ShimError::ProtocolError)
        }
    }

    /// Rebuilds a request from its input bytes and sections.
    fn from_input(fixed: &[u8], sections: Vec<Vec<u8>>) -> ShimResult<Self>
    where
        Self: Sized;
}

/// Copies the input prefix of a fixed block into a zeroed one and checks its length.
fn read_input<T: IoctlArgs + FromZeroes>(fixed: &[u8]) -> ShimResult<T> {
    let mut args = T::new_zeroed();
    args.fixed_mut()
        .get_mut(..fixed.len())
        .ok_or(ShimError::ProtocolError)?
        .copy_from_slice(fixed);

    if args.input_len() != fixed.len() {
        return Err(ShimError::ProtocolError);
    }

    Ok(args)
}

/// Decodes a packed array of `T`.
pub fn read_array<T: FromBytes>(bytes: &[u8]) -> ShimResult<Vec<T>> {
    if bytes.len() % size_of::<T>() != 0 {
        return Err(ShimError::ProtocolError);
    }

    bytes
        .chunks_exact(size_of::<T>())
        .map(|chunk| T::read_from(chunk).ok_or(ShimError::ProtocolError))
        .collect()
}

fn expect_sections(sections: Vec<Vec<u8>>, count: usize) -> ShimResult<Vec<Vec<u8>>> {
    if sections.len() != count {
        return Err(ShimError::ProtocolError);
    }
    Ok(sections)
}

macro_rules! fixed_ioctl {
    ($args:ty, $input_len:expr) => {
        fixed_ioctl!($args, $input_len, |_args: &$args| true);
    };
    ($args:ty, $input_len:expr, $proxied:expr) => {
        impl IoctlArgs for $args {
            fn fixed(&self) -> &[u8] {
                self.as_bytes()
            }

            fn fixed_mut(&mut self) -> &mut [u8] {
                self.as_bytes_mut()
            }

            fn input_len(&self) -> usize {
                let input_len: fn(&$args) -> usize = $input_len;
                input_len(self)
            }

            fn proxied(&self) -> bool {
                let proxied: fn(&$args) -> bool = $proxied;
                proxied(self)
            }

            fn from_input(fixed: &[u8], sections: Vec<Vec<u8>>) -> ShimResult<Self> {
                expect_sections(sections, 0)?;
                read_input(fixed)
            }
        }
    };
}

fixed_ioctl!(drm_version, |_| 0);
fixed_ioctl!(drm_get_cap, |_| offset_of!(drm_get_cap, value));
fixed_ioctl!(drm_gem_close, |_| size_of::<drm_gem_close>());
fixed_ioctl!(drm_prime_handle, |_| offset_of!(drm_prime_handle, fd));
fixed_ioctl!(drm_prime_fd, |_| offset_of!(drm_prime_fd, handle));
fixed_ioctl!(drm_syncobj_create, |_| offset_of!(drm_syncobj_create, handle));
fixed_ioctl!(drm_syncobj_destroy, |_| size_of::<drm_syncobj_destroy>());
fixed_ioctl!(drm_syncobj_transfer, |_| size_of::<drm_syncobj_transfer>());
fixed_ioctl!(
    drm_amdgpu_gem_metadata,
    |args| match args.op {
        AMDGPU_GEM_METADATA_OP_GET_METADATA => offset_of!(drm_amdgpu_gem_metadata, flags),
        _ => size_of::<drm_amdgpu_gem_metadata>(),
    },
    |args| matches!(
        args.op,
        AMDGPU_GEM_METADATA_OP_SET_METADATA | AMDGPU_GEM_METADATA_OP_GET_METADATA
    )
);
fixed_ioctl!(drm_amdgpu_ctx, |_| offset_of!(drm_amdgpu_ctx, out));
fixed_ioctl!(drm_amdgpu_gem_create, |_| offset_of!(drm_amdgpu_gem_create, out));
fixed_ioctl!(
    drm_amdgpu_gem_op,
    |_| offset_of!(drm_amdgpu_gem_op, create_info),
    |args| args.op == AMDGPU_GEM_OP_GET_GEM_CREATE_INFO
);
fixed_ioctl!(drm_amdgpu_gem_userptr, |_| offset_of!(drm_amdgpu_gem_userptr, handle));
fixed_ioctl!(drm_amdgpu_gem_va, |_| size_of::<drm_amdgpu_gem_va>());
fixed_ioctl!(drm_amdgpu_gem_mmap, |_| offset_of!(drm_amdgpu_gem_mmap, addr_ptr));
fixed_ioctl!(drm_amdgpu_wait_cs, |_| offset_of!(drm_amdgpu_wait_cs, out));

impl drm_amdgpu_gem_metadata {
    pub fn new(handle: u32, op: u32) -> drm_amdgpu_gem_metadata {
        drm_amdgpu_gem_metadata {
            handle,
            op,
            ..FromZeroes::new_zeroed()
        }
    }
}

/// Sync object wait, optionally on timeline points.
#[derive(Clone, Debug, Default)]
pub struct SyncobjWait {
    pub args: drm_syncobj_wait,
    pub handles: Vec<u32>,
    /// Empty for binary waits.
    pub points: Vec<u64>,
}

impl SyncobjWait {
    pub fn new(handles: &[u32], timeout_nsec: i64, flags: u32) -> ShimResult<SyncobjWait> {
        Ok(SyncobjWait {
            args: drm_syncobj_wait {
                timeout_nsec,
                count_handles: handles.len().try_into()?,
                flags,
                ..Default::default()
            },
            handles: handles.to_vec(),
            points: Vec::new(),
        })
    }

    pub fn timeline(
        handles: &[u32],
        points: &[u64],
        timeout_nsec: i64,
        flags: u32,
    ) -> ShimResult<SyncobjWait> {
        if handles.len() != points.len() {
            return Err(ShimError::InvalidArgument);
        }

        let mut wait = SyncobjWait::new(handles, timeout_nsec, flags)?;
        wait.points = points.to_vec();
        Ok(wait)
    }

    fn check_counts(&self) -> bool {
        let count = self.args.count_handles as usize;
        self.handles.len() == count && (self.points.is_empty() || self.points.len() == count)
    }
}

impl IoctlArgs for SyncobjWait {
    fn fixed(&self) -> &[u8] {
        self.args.as_bytes()
    }

    fn fixed_mut(&mut self) -> &mut [u8] {
        self.args.as_bytes_mut()
    }

    fn input_len(&self) -> usize {
        offset_of!(drm_syncobj_wait, first_signaled)
    }

    fn input_sections(&self) -> ShimResult<Vec<Vec<u8>>> {
        if !self.check_counts() {
            return Err(ShimError::InvalidArgument);
        }

        let mut sections = vec![self.handles.as_bytes().to_vec()];
        if !self.points.is_empty() {
            sections.push(self.points.as_bytes().to_vec());
        }
        Ok(sections)
    }

    fn from_input(fixed: &[u8], sections: Vec<Vec<u8>>) -> ShimResult<Self> {
        let args: drm_syncobj_wait =
            read_input_block(fixed, offset_of!(drm_syncobj_wait, first_signaled))?;
        let mut sections = sections.into_iter();
        let handles = read_array(&sections.next().ok_or(ShimError::ProtocolError)?)?;
        let points = match sections.next() {
            Some(points) => read_array(&points)?,
            None => Vec::new(),
        };
        if sections.next().is_some() {
            return Err(ShimError::ProtocolError);
        }

        let wait = SyncobjWait {
            args,
            handles,
            points,
        };
        if !wait.check_counts() {
            return Err(ShimError::ProtocolError);
        }
        Ok(wait)
    }
}

/// Handle array for sync object reset and signal.
#[derive(Clone, Debug, Default)]
pub struct SyncobjArray {
    pub args: drm_syncobj_array,
    pub handles: Vec<u32>,
}

impl SyncobjArray {
    pub fn new(handles: &[u32]) -> ShimResult<SyncobjArray> {
        Ok(SyncobjArray {
            args: drm_syncobj_array {
                count_handles: handles.len().try_into()?,
                pad: 0,
            },
            handles: handles.to_vec(),
        })
    }
}

impl IoctlArgs for SyncobjArray {
    fn fixed(&self) -> &[u8] {
        self.args.as_bytes()
    }

    fn fixed_mut(&mut self) -> &mut [u8] {
        self.args.as_bytes_mut()
    }

    fn input_len(&self) -> usize {
        size_of::<drm_syncobj_array>()
    }

    fn input_sections(&self) -> ShimResult<Vec<Vec<u8>>> {
        if self.handles.len() != self.args.count_handles as usize {
            return Err(ShimError::InvalidArgument);
        }
        Ok(vec![self.handles.as_bytes().to_vec()])
    }

    fn from_input(fixed: &[u8], sections: Vec<Vec<u8>>) -> ShimResult<Self> {
        let args: drm_syncobj_array = read_input_block(fixed, size_of::<drm_syncobj_array>())?;
        let sections = expect_sections(sections, 1)?;
        let handles: Vec<u32> = read_array(&sections[0])?;
        if handles.len() != args.count_handles as usize {
            return Err(ShimError::ProtocolError);
        }
        Ok(SyncobjArray { args, handles })
    }
}

/// Queries the proxy relays; everything else is answered locally or not at all.
const PROXIED_INFO_QUERIES: [u32; 8] = [
    AMDGPU_INFO_ACCEL_WORKING,
    AMDGPU_INFO_VRAM_USAGE,
    AMDGPU_INFO_GTT_USAGE,
    AMDGPU_INFO_GDS_CONFIG,
    AMDGPU_INFO_VRAM_GTT,
    AMDGPU_INFO_DEV_INFO,
    AMDGPU_INFO_VIS_VRAM_USAGE,
    AMDGPU_INFO_READ_MMR_REG,
];

/// Information query. The backend writes at most `return_size` bytes into `data`.
#[derive(Clone, Debug, Default)]
pub struct InfoRequest {
    pub args: drm_amdgpu_info,
    pub data: Vec<u8>,
}

impl InfoRequest {
    pub fn new(query: u32, return_size: u32) -> InfoRequest {
        InfoRequest {
            args: drm_amdgpu_info {
                return_size,
                query,
                params: [0; 4],
            },
            data: Vec::new(),
        }
    }

    /// Query returning a single `T`.
    pub fn for_type<T>(query: u32) -> InfoRequest {
        InfoRequest::new(query, size_of::<T>() as u32)
    }

    pub fn read_mmr_reg(dword_offset: u32, count: u32, instance: u32, flags: u32) -> InfoRequest {
        let mut request = InfoRequest::new(AMDGPU_INFO_READ_MMR_REG, count.saturating_mul(4));
        request.args.params = [dword_offset, count, instance, flags];
        request
    }

    pub fn hw_ip_info(ip_type: u32, ip_instance: u32) -> InfoRequest {
        let mut request = InfoRequest::for_type::<drm_amdgpu_info_hw_ip>(AMDGPU_INFO_HW_IP_INFO);
        request.args.params = [ip_type, ip_instance, 0, 0];
        request
    }

    pub fn fw_version(fw_type: u32, ip_instance: u32, index: u32) -> InfoRequest {
        let mut request = InfoRequest::for_type::<drm_amdgpu_info_firmware>(AMDGPU_INFO_FW_VERSION);
        request.args.params = [fw_type, ip_instance, index, 0];
        request
    }

    /// Stores a reply, truncated to the requested size.
    pub fn set_data(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(self.args.return_size as usize);
        self.data = bytes[..len].to_vec();
    }

    /// Decodes the reply as a `T`.
    pub fn value<T: FromBytes>(&self) -> ShimResult<T> {
        T::read_from_prefix(&self.data).ok_or(ShimError::ProtocolError)
    }
}

impl IoctlArgs for InfoRequest {
    fn fixed(&self) -> &[u8] {
        self.args.as_bytes()
    }

    fn fixed_mut(&mut self) -> &mut [u8] {
        self.args.as_bytes_mut()
    }

    fn input_len(&self) -> usize {
        size_of::<drm_amdgpu_info>()
    }

    fn proxied(&self) -> bool {
        PROXIED_INFO_QUERIES.contains(&self.args.query)
    }

    fn output_sections(&self) -> Vec<Vec<u8>> {
        vec![self.data.clone()]
    }

    fn set_output_sections(&mut self, sections: Vec<Vec<u8>>) -> ShimResult<()> {
        let mut sections = expect_sections(sections, 1)?;
        let data = sections.remove(0);
        if data.len() > self.args.return_size as usize {
            return Err(ShimError::ProtocolError);
        }
        self.data = data;
        Ok(())
    }

    fn from_input(fixed: &[u8], sections: Vec<Vec<u8>>) -> ShimResult<Self> {
        expect_sections(sections, 0)?;
        Ok(InfoRequest {
            args: read_input_block(fixed, size_of::<drm_amdgpu_info>())?,
            data: Vec::new(),
        })
    }
}

/// One unit of a command submission. `data` is the chunk payload, a whole number of dwords.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CsChunk {
    pub chunk_id: u32,
    pub data: Vec<u8>,
}

impl CsChunk {
    pub fn ib(ib: &drm_amdgpu_cs_chunk_ib) -> CsChunk {
        CsChunk {
            chunk_id: AMDGPU_CHUNK_ID_IB,
            data: ib.as_bytes().to_vec(),
        }
    }

    pub fn fence(fence: &drm_amdgpu_cs_chunk_fence) -> CsChunk {
        CsChunk {
            chunk_id: AMDGPU_CHUNK_ID_FENCE,
            data: fence.as_bytes().to_vec(),
        }
    }

    pub fn dependencies(deps: &[drm_amdgpu_cs_chunk_dep]) -> CsChunk {
        CsChunk {
            chunk_id: AMDGPU_CHUNK_ID_DEPENDENCIES,
            data: deps.as_bytes().to_vec(),
        }
    }

    /// `chunk_id` selects wait or signal, binary or timeline.
    pub fn syncobjs(chunk_id: u32, syncobjs: &[drm_amdgpu_cs_chunk_syncobj]) -> CsChunk {
        CsChunk {
            chunk_id,
            data: syncobjs.as_bytes().to_vec(),
        }
    }

    pub fn bo_handles(entries: &[drm_amdgpu_bo_list_entry]) -> ShimResult<CsChunk> {
        let header = drm_amdgpu_bo_list_in {
            bo_number: entries.len().try_into()?,
            bo_info_size: size_of::<drm_amdgpu_bo_list_entry>() as u32,
            ..Default::default()
        };

        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(entries.as_bytes());
        Ok(CsChunk {
            chunk_id: AMDGPU_CHUNK_ID_BO_HANDLES,
            data,
        })
    }

    fn is_known(&self) -> bool {
        matches!(
            self.chunk_id,
            AMDGPU_CHUNK_ID_IB
                | AMDGPU_CHUNK_ID_FENCE
                | AMDGPU_CHUNK_ID_DEPENDENCIES
                | AMDGPU_CHUNK_ID_SYNCOBJ_IN
                | AMDGPU_CHUNK_ID_SYNCOBJ_OUT
                | AMDGPU_CHUNK_ID_BO_HANDLES
                | AMDGPU_CHUNK_ID_SYNCOBJ_TIMELINE_WAIT
                | AMDGPU_CHUNK_ID_SYNCOBJ_TIMELINE_SIGNAL
        )
    }

    fn header(&self) -> ShimResult<drm_amdgpu_cs_chunk> {
        if !self.is_known() || self.data.len() % 4 != 0 {
            return Err(ShimError::InvalidArgument);
        }

        Ok(drm_amdgpu_cs_chunk {
            chunk_id: self.chunk_id,
            length_dw: (self.data.len() / 4).try_into()?,
        })
    }

    /// Splits a buffer list chunk into its entries.
    pub fn bo_list_entries(&self) -> ShimResult<Vec<drm_amdgpu_bo_list_entry>> {
        if self.chunk_id != AMDGPU_CHUNK_ID_BO_HANDLES {
            return Err(ShimError::InvalidArgument);
        }

        let header_len = size_of::<drm_amdgpu_bo_list_in>();
        let header = drm_amdgpu_bo_list_in::read_from_prefix(&self.data)
            .ok_or(ShimError::InvalidArgument)?;
        let entries: Vec<drm_amdgpu_bo_list_entry> = read_array(&self.data[header_len..])
            .map_err(|_| ShimError::InvalidArgument)?;
        if entries.len() != header.bo_number as usize {
            return Err(ShimError::InvalidArgument);
        }
        Ok(entries)
    }
}

/// Command submission with its chunk list.
#[derive(Clone, Debug, Default)]
pub struct CsRequest {
    pub args: drm_amdgpu_cs,
    pub chunks: Vec<CsChunk>,
}

impl CsRequest {
    pub fn new(ctx_id: u32, chunks: Vec<CsChunk>) -> ShimResult<CsRequest> {
        Ok(CsRequest {
            args: drm_amdgpu_cs {
                in_: drm_amdgpu_cs_in {
                    ctx_id,
                    num_chunks: chunks.len().try_into()?,
                    ..Default::default()
                },
                ..Default::default()
            },
            chunks,
        })
    }
}

impl IoctlArgs for CsRequest {
    fn fixed(&self) -> &[u8] {
        self.args.as_bytes()
    }

    fn fixed_mut(&mut self) -> &mut [u8] {
        self.args.as_bytes_mut()
    }

    fn input_len(&self) -> usize {
        offset_of!(drm_amdgpu_cs, out)
    }

    // All chunk headers go first, then one section per chunk payload.
    fn input_sections(&self) -> ShimResult<Vec<Vec<u8>>> {
        if self.chunks.len() != self.args.in_.num_chunks as usize {
            return Err(ShimError::InvalidArgument);
        }

        let headers = self
            .chunks
            .iter()
            .map(CsChunk::header)
            .collect::<ShimResult<Vec<_>>>()?;

        let mut sections = Vec::with_capacity(self.chunks.len() + 1);
        sections.push(headers.as_bytes().to_vec());
        sections.extend(self.chunks.iter().map(|chunk| chunk.data.clone()));
        Ok(sections)
    }

    fn from_input(fixed: &[u8], sections: Vec<Vec<u8>>) -> ShimResult<Self> {
        let args: drm_amdgpu_cs = read_input_block(fixed, offset_of!(drm_amdgpu_cs, out))?;
        let mut sections = sections.into_iter();
        let headers: Vec<drm_amdgpu_cs_chunk> =
            read_array(&sections.next().ok_or(ShimError::ProtocolError)?)?;
        if headers.len() != args.in_.num_chunks as usize || sections.len() != headers.len() {
            return Err(ShimError::ProtocolError);
        }

        let chunks = headers
            .iter()
            .zip(sections)
            .map(|(header, data)| {
                if data.len() != header.length_dw as usize * 4 {
                    return Err(ShimError::ProtocolError);
                }
                Ok(CsChunk {
                    chunk_id: header.chunk_id,
                    data,
                })
            })
            .collect::<ShimResult<Vec<_>>>()?;

        Ok(CsRequest { args, chunks })
    }
}

/// Reads the input prefix of a plain zerocopy block of known input length.
fn read_input_block<T: AsBytes + FromBytes>(fixed: &[u8], input_len: usize) -> ShimResult<T> {
    if fixed.len() != input_len {
        return Err(ShimError::ProtocolError);
    }

    let mut args = T::new_zeroed();
    args.as_bytes_mut()
        .get_mut(..input_len)
        .ok_or(ShimError::ProtocolError)?
        .copy_from_slice(fixed);
    Ok(args)
}

macro_rules! ioctls {
    ($($variant:ident($args:ty) = $code:ident, proxy: $proxy:expr;)*) => {
        /// A device-control request together with its arguments.
        #[derive(Clone, Debug)]
        pub enum Ioctl {
            $($variant($args),)*
        }

        impl Ioctl {
            /// Request number.
            pub fn code(&self) -> u32 {
                match self {
                    $(Ioctl::$variant(_) => $code,)*
                }
            }

            pub fn args(&self) -> &dyn IoctlArgs {
                match self {
                    $(Ioctl::$variant(args) => args,)*
                }
            }

            pub fn args_mut(&mut self) -> &mut dyn IoctlArgs {
                match self {
                    $(Ioctl::$variant(args) => args,)*
                }
            }

            /// Whether the proxy carries this request.
            pub fn proxied(&self) -> bool {
                match self {
                    $(Ioctl::$variant(args) => $proxy && args.proxied(),)*
                }
            }

            /// Rebuilds a request received from a peer.
            pub fn from_input(
                code: u32,
                fixed: &[u8],
                sections: Vec<Vec<u8>>,
            ) -> ShimResult<Ioctl> {
                match code {
                    $($code => Ok(Ioctl::$variant(<$args>::from_input(fixed, sections)?)),)*
                    _ => Err(ShimError::NotSupported),
                }
            }
        }
    };
}

ioctls! {
    Version(drm_version) = DRM_IOCTL_VERSION, proxy: true;
    GetCap(drm_get_cap) = DRM_IOCTL_GET_CAP, proxy: true;
    GemClose(drm_gem_close) = DRM_IOCTL_GEM_CLOSE, proxy: true;
    PrimeHandleToFd(drm_prime_handle) = DRM_IOCTL_PRIME_HANDLE_TO_FD, proxy: true;
    PrimeFdToHandle(drm_prime_fd) = DRM_IOCTL_PRIME_FD_TO_HANDLE, proxy: true;
    SyncobjCreate(drm_syncobj_create) = DRM_IOCTL_SYNCOBJ_CREATE, proxy: true;
    SyncobjDestroy(drm_syncobj_destroy) = DRM_IOCTL_SYNCOBJ_DESTROY, proxy: true;
    SyncobjHandleToFd(drm_prime_handle) = DRM_IOCTL_SYNCOBJ_HANDLE_TO_FD, proxy: false;
    SyncobjFdToHandle(drm_prime_fd) = DRM_IOCTL_SYNCOBJ_FD_TO_HANDLE, proxy: false;
    SyncobjWait(SyncobjWait) = DRM_IOCTL_SYNCOBJ_WAIT, proxy: true;
    SyncobjTimelineWait(SyncobjWait) = DRM_IOCTL_SYNCOBJ_TIMELINE_WAIT, proxy: true;
    SyncobjReset(SyncobjArray) = DRM_IOCTL_SYNCOBJ_RESET, proxy: true;
    SyncobjSignal(SyncobjArray) = DRM_IOCTL_SYNCOBJ_SIGNAL, proxy: false;
    SyncobjTransfer(drm_syncobj_transfer) = DRM_IOCTL_SYNCOBJ_TRANSFER, proxy: true;
    Info(InfoRequest) = DRM_AMDGPU_INFO, proxy: true;
    GemMetadata(drm_amdgpu_gem_metadata) = DRM_AMDGPU_GEM_METADATA, proxy: true;
    Ctx(drm_amdgpu_ctx) = DRM_AMDGPU_CTX, proxy: true;
    GemCreate(drm_amdgpu_gem_create) = DRM_AMDGPU_GEM_CREATE, proxy: true;
    GemOp(drm_amdgpu_gem_op) = DRM_AMDGPU_GEM_OP, proxy: true;
    GemUserptr(drm_amdgpu_gem_userptr) = DRM_AMDGPU_GEM_USERPTR, proxy: true;
    GemVa(drm_amdgpu_gem_va) = DRM_AMDGPU_GEM_VA, proxy: true;
    GemMmap(drm_amdgpu_gem_mmap) = DRM_AMDGPU_GEM_MMAP, proxy: true;
    Cs(CsRequest) = DRM_AMDGPU_CS, proxy: true;
    WaitCs(drm_amdgpu_wait_cs) = DRM_AMDGPU_WAIT_CS, proxy: true;
}
