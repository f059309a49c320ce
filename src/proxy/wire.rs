// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Message encoding between the proxy and its server.
//!
//! A request is a `wire_request_hdr`, the input bytes of the fixed argument block and then each
//! input section as a `u32` length followed by its bytes. A reply is a `wire_reply_hdr` followed
//! by the output bytes of the fixed block and the output sections in the same format. Both
//! peers run on the same host, so integers use native byte order.

#![allow(non_camel_case_types)]

use std::mem::size_of;

use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

use crate::ioctl::Ioctl;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

pub const WIRE_MESSAGE_IOCTL: u32 = 1;
pub const WIRE_MESSAGE_MMAP: u32 = 2;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct wire_request_hdr {
    pub kind: u32,
    pub code: u32,
    pub fixed_len: u32,
    pub section_count: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct wire_reply_hdr {
    /// Zero or a negated errno.
    pub status: i32,
    pub fixed_len: u32,
    pub section_count: u32,
    pub reserved: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct wire_mmap_request {
    pub offset: u64,
    pub size: u64,
}

/// Location of buffer memory in the server's shared regions.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
pub struct wire_map_reply {
    pub region_id: u64,
    pub offset: u64,
}

#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn write_obj<T: AsBytes>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_section(&mut self, section: &[u8]) -> ShimResult<()> {
        let len: u32 = section.len().try_into()?;
        self.write_obj(&len);
        self.write_bytes(section);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub struct WireReader<'a> {
    data: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> WireReader<'a> {
        WireReader { data }
    }

    pub fn read_obj<T: FromBytes>(&mut self) -> ShimResult<T> {
        let bytes = self.read_bytes(size_of::<T>())?;
        T::read_from(bytes).ok_or(ShimError::ProtocolError)
    }

    pub fn read_bytes(&mut self, len: usize) -> ShimResult<&'a [u8]> {
        if len > self.data.len() {
            return Err(ShimError::ProtocolError);
        }

        let (bytes, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(bytes)
    }

    pub fn read_section(&mut self) -> ShimResult<Vec<u8>> {
        let len: u32 = self.read_obj()?;
        Ok(self.read_bytes(len as usize)?.to_vec())
    }

    pub fn read_sections(&mut self, count: u32) -> ShimResult<Vec<Vec<u8>>> {
        (0..count).map(|_| self.read_section()).collect()
    }

    /// Fails if anything is left unread.
    pub fn finish(self) -> ShimResult<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(ShimError::ProtocolError)
        }
    }
}

/// A decoded request.
pub enum WireRequest {
    Ioctl(Ioctl),
    Mmap { offset: u64, size: u64 },
}

pub fn encode_ioctl_request(ioctl: &Ioctl) -> ShimResult<Vec<u8>> {
    let args = ioctl.args();
    let input = args
        .fixed()
        .get(..args.input_len())
        .ok_or(ShimError::InvalidArgument)?;
    let sections = args.input_sections()?;

    let mut writer = WireWriter::default();
    writer.write_obj(&wire_request_hdr {
        kind: WIRE_MESSAGE_IOCTL,
        code: ioctl.code(),
        fixed_len: input.len().try_into()?,
        section_count: sections.len().try_into()?,
    });
    writer.write_bytes(input);
    for section in &sections {
        writer.write_section(section)?;
    }
    Ok(writer.into_bytes())
}

pub fn encode_mmap_request(offset: u64, size: u64) -> Vec<u8> {
    let mut writer = WireWriter::default();
    writer.write_obj(&wire_request_hdr {
        kind: WIRE_MESSAGE_MMAP,
        code: 0,
        fixed_len: size_of::<wire_mmap_request>() as u32,
        section_count: 0,
    });
    writer.write_obj(&wire_mmap_request { offset, size });
    writer.into_bytes()
}

pub fn decode_request(message: &[u8]) -> ShimResult<WireRequest> {
    let mut reader = WireReader::new(message);
    let hdr: wire_request_hdr = reader.read_obj()?;
    let request = match hdr.kind {
        WIRE_MESSAGE_IOCTL => {
            let fixed = reader.read_bytes(hdr.fixed_len as usize)?;
            let sections = reader.read_sections(hdr.section_count)?;
            WireRequest::Ioctl(Ioctl::from_input(hdr.code, fixed, sections)?)
        }
        WIRE_MESSAGE_MMAP => {
            if hdr.fixed_len as usize != size_of::<wire_mmap_request>() || hdr.section_count != 0 {
                return Err(ShimError::ProtocolError);
            }
            let request: wire_mmap_request = reader.read_obj()?;
            WireRequest::Mmap {
                offset: request.offset,
                size: request.size,
            }
        }
        _ => return Err(ShimError::ProtocolError),
    };
    reader.finish()?;
    Ok(request)
}

/// Reply carrying only a failure status.
pub fn encode_error_reply(error: &ShimError) -> Vec<u8> {
    let mut writer = WireWriter::default();
    writer.write_obj(&wire_reply_hdr {
        status: error.to_status(),
        ..Default::default()
    });
    writer.into_bytes()
}

pub fn encode_ioctl_reply(result: ShimResult<&Ioctl>) -> Vec<u8> {
    let ioctl = match result {
        Ok(ioctl) => ioctl,
        Err(e) => return encode_error_reply(&e),
    };

    let args = ioctl.args();
    let output = args.fixed().get(args.input_len()..).unwrap_or_default();
    let sections = args.output_sections();
    let encoded = (|| -> ShimResult<Vec<u8>> {
        let mut writer = WireWriter::default();
        writer.write_obj(&wire_reply_hdr {
            status: 0,
            fixed_len: output.len().try_into()?,
            section_count: sections.len().try_into()?,
            reserved: 0,
        });
        writer.write_bytes(output);
        for section in &sections {
            writer.write_section(section)?;
        }
        Ok(writer.into_bytes())
    })();

    encoded.unwrap_or_else(|e| encode_error_reply(&e))
}

/// Applies a reply to the request it answers.
pub fn decode_ioctl_reply(message: &[u8], ioctl: &mut Ioctl) -> ShimResult<()> {
    let mut reader = WireReader::new(message);
    let hdr: wire_reply_hdr = reader.read_obj()?;
    if hdr.status != 0 {
        return Err(ShimError::from_status(hdr.status));
    }

    let args = ioctl.args_mut();
    let input_len = args.input_len();
    let output = args
        .fixed_mut()
        .get_mut(input_len..)
        .ok_or(ShimError::ProtocolError)?;
    if hdr.fixed_len as usize != output.len() {
        return Err(ShimError::ProtocolError);
    }
    output.copy_from_slice(reader.read_bytes(output.len())?);

    let sections = reader.read_sections(hdr.section_count)?;
    reader.finish()?;
    args.set_output_sections(sections)
}

pub fn encode_mmap_reply(result: ShimResult<(u64, u64)>) -> Vec<u8> {
    match result {
        Ok((region_id, offset)) => {
            let mut writer = WireWriter::default();
            writer.write_obj(&wire_reply_hdr {
                status: 0,
                fixed_len: size_of::<wire_map_reply>() as u32,
                ..Default::default()
            });
            writer.write_obj(&wire_map_reply { region_id, offset });
            writer.into_bytes()
        }
        Err(e) => encode_error_reply(&e),
    }
}

/// Returns the region id and offset of a mapping reply.
pub fn decode_mmap_reply(message: &[u8]) -> ShimResult<(u64, u64)> {
    let mut reader = WireReader::new(message);
    let hdr: wire_reply_hdr = reader.read_obj()?;
    if hdr.status != 0 {
        return Err(ShimError::from_status(hdr.status));
    }
    if hdr.fixed_len as usize != size_of::<wire_map_reply>() || hdr.section_count != 0 {
        return Err(ShimError::ProtocolError);
    }

    let reply: wire_map_reply = reader.read_obj()?;
    reader.finish()?;
    Ok((reply.region_id, reply.offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm_protocol::*;
    use crate::ioctl::CsChunk;
    use crate::ioctl::CsRequest;
    use crate::ioctl::InfoRequest;
    use crate::ioctl::SyncobjWait;

    #[test]
    fn request_carries_only_inputs() {
        let ioctl = Ioctl::GemCreate(drm_amdgpu_gem_create {
            in_: drm_amdgpu_gem_create_in {
                bo_size: 0x1000,
                ..Default::default()
            },
            out: drm_amdgpu_gem_create_out {
                handle: 0xdead,
                pad: 0,
            },
        });
        let message = encode_ioctl_request(&ioctl).unwrap();
        assert_eq!(
            message.len(),
            size_of::<wire_request_hdr>() + size_of::<drm_amdgpu_gem_create_in>()
        );

        match decode_request(&message).unwrap() {
            WireRequest::Ioctl(Ioctl::GemCreate(args)) => {
                assert_eq!(args.in_.bo_size, 0x1000);
                assert_eq!(args.out.handle, 0);
            }
            _ => panic!("wrong request"),
        }
    }

    #[test]
    fn submission_sends_headers_then_payloads() {
        let ib = drm_amdgpu_cs_chunk_ib {
            va_start: 0x1000,
            ib_bytes: 16,
            ..Default::default()
        };
        let fence = drm_amdgpu_cs_chunk_fence {
            handle: 3,
            offset: 0,
        };
        let request =
            CsRequest::new(7, vec![CsChunk::ib(&ib), CsChunk::fence(&fence)]).unwrap();
        let message = encode_ioctl_request(&Ioctl::Cs(request)).unwrap();

        let mut reader = WireReader::new(&message);
        let hdr: wire_request_hdr = reader.read_obj().unwrap();
        assert_eq!(hdr.section_count, 3);
        reader.read_bytes(hdr.fixed_len as usize).unwrap();
        let headers: Vec<drm_amdgpu_cs_chunk> =
            crate::ioctl::read_array(&reader.read_section().unwrap()).unwrap();
        assert_eq!(headers[0].chunk_id, AMDGPU_CHUNK_ID_IB);
        assert_eq!(headers[0].length_dw, 8);
        assert_eq!(headers[1].chunk_id, AMDGPU_CHUNK_ID_FENCE);
        assert_eq!(reader.read_section().unwrap(), ib.as_bytes());
        assert_eq!(reader.read_section().unwrap(), fence.as_bytes());
        reader.finish().unwrap();

        match decode_request(&message).unwrap() {
            WireRequest::Ioctl(Ioctl::Cs(decoded)) => {
                assert_eq!(decoded.args.in_.ctx_id, 7);
                assert_eq!(decoded.chunks.len(), 2);
            }
            _ => panic!("wrong request"),
        }
    }

    #[test]
    fn reply_fills_outputs_and_sections() {
        let mut served = Ioctl::Info(InfoRequest::for_type::<u64>(AMDGPU_INFO_VRAM_USAGE));
        if let Ioctl::Info(request) = &mut served {
            request.set_data(0x4000u64.as_bytes());
        }
        let reply = encode_ioctl_reply(Ok(&served));

        let mut client = Ioctl::Info(InfoRequest::for_type::<u64>(AMDGPU_INFO_VRAM_USAGE));
        decode_ioctl_reply(&reply, &mut client).unwrap();
        match client {
            Ioctl::Info(request) => assert_eq!(request.value::<u64>().unwrap(), 0x4000),
            _ => unreachable!(),
        }

        let mut wait = Ioctl::SyncobjWait(SyncobjWait::new(&[1, 2], 0, 0).unwrap());
        let mut served = wait.clone();
        if let Ioctl::SyncobjWait(args) = &mut served {
            args.args.first_signaled = 1;
        }
        decode_ioctl_reply(&encode_ioctl_reply(Ok(&served)), &mut wait).unwrap();
        assert!(matches!(wait, Ioctl::SyncobjWait(args) if args.args.first_signaled == 1));
    }

    #[test]
    fn remote_errors_keep_their_kind() {
        let mut ioctl = Ioctl::GemClose(drm_gem_close { handle: 1, pad: 0 });
        let reply = encode_ioctl_reply(Err(ShimError::NotFound));
        assert!(matches!(
            decode_ioctl_reply(&reply, &mut ioctl),
            Err(ShimError::NotFound)
        ));
        assert!(matches!(
            decode_mmap_reply(&encode_mmap_reply(Err(ShimError::InvalidArgument))),
            Err(ShimError::InvalidArgument)
        ));
    }

    #[test]
    fn malformed_messages_are_protocol_errors() {
        let mut message = encode_ioctl_request(&Ioctl::GemClose(drm_gem_close {
            handle: 1,
            pad: 0,
        }))
        .unwrap();
        assert!(matches!(
            decode_request(&message[..message.len() - 1]),
            Err(ShimError::ProtocolError)
        ));
        message.push(0);
        assert!(matches!(
            decode_request(&message),
            Err(ShimError::ProtocolError)
        ));

        let mut ioctl = Ioctl::GemClose(drm_gem_close::default());
        let short = wire_reply_hdr::default();
        assert!(decode_ioctl_reply(short.as_bytes(), &mut ioctl).is_ok());
        let wrong_len = wire_reply_hdr {
            fixed_len: 4,
            ..Default::default()
        };
        assert!(matches!(
            decode_ioctl_reply(wrong_len.as_bytes(), &mut ioctl),
            Err(ShimError::ProtocolError)
        ));

        let unknown = wire_request_hdr {
            kind: WIRE_MESSAGE_IOCTL,
            code: 0xff,
            ..Default::default()
        };
        assert!(matches!(
            decode_request(unknown.as_bytes()),
            Err(ShimError::NotSupported)
        ));
    }

    #[test]
    fn mmap_messages() {
        match decode_request(&encode_mmap_request(5, 0x1000)).unwrap() {
            WireRequest::Mmap { offset, size } => assert_eq!((offset, size), (5, 0x1000)),
            _ => panic!("wrong request"),
        }
        assert_eq!(
            decode_mmap_reply(&encode_mmap_reply(Ok((9, 0x40)))).unwrap(),
            (9, 0x40)
        );
    }
}
