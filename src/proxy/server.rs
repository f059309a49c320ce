// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use log::debug;
use log::error;
use log::warn;

use crate::backend::DrmBackend;
use crate::proxy::transport::read_message;
use crate::proxy::transport::write_message;
use crate::proxy::wire::decode_request;
use crate::proxy::wire::encode_error_reply;
use crate::proxy::wire::encode_ioctl_reply;
use crate::proxy::wire::encode_mmap_reply;
use crate::proxy::wire::WireRequest;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Makes buffer memory reachable from another process.
pub trait RegionExporter: Send + Sync {
    /// Returns the shared region and the offset within it holding `size` bytes of the buffer
    /// behind mapping offset `offset`.
    fn export_region(&self, offset: u64, size: u64) -> ShimResult<(u64, u64)>;
}

/// Serves proxy messages from a backend.
pub struct ProxyServer<B> {
    backend: Arc<B>,
}

impl<B: DrmBackend + RegionExporter> ProxyServer<B> {
    pub fn new(backend: Arc<B>) -> ProxyServer<B> {
        ProxyServer { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Executes one request and returns the encoded reply. Failures are sent back as statuses.
    pub fn handle_message(&self, message: &[u8]) -> Vec<u8> {
        let request = match decode_request(message) {
            Ok(request) => request,
            Err(e) => {
                error!("malformed request: {}", e);
                return encode_error_reply(&e);
            }
        };

        match request {
            WireRequest::Ioctl(mut ioctl) => {
                if !ioctl.proxied() {
                    warn!("unsupported request {:#x}", ioctl.code());
                    return encode_error_reply(&ShimError::NotSupported);
                }

                let result = self.backend.ioctl(&mut ioctl);
                if let Err(e) = &result {
                    debug!("request {:#x} failed: {}", ioctl.code(), e);
                }
                encode_ioctl_reply(result.map(|()| &ioctl))
            }
            WireRequest::Mmap { offset, size } => {
                encode_mmap_reply(self.backend.export_region(offset, size))
            }
        }
    }

    /// Answers requests on `stream` until the peer hangs up.
    pub fn serve_stream(&self, mut stream: UnixStream) -> ShimResult<()> {
        while let Some(message) = read_message(&mut stream)? {
            let reply = self.handle_message(&message);
            write_message(&mut stream, &reply)?;
        }

        debug!("client hung up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm_protocol::*;
    use crate::emulation::EmulatedDevice;
    use crate::ioctl::Ioctl;
    use crate::ioctl::SyncobjArray;
    use crate::proxy::wire::decode_ioctl_reply;
    use crate::proxy::wire::decode_mmap_reply;
    use crate::proxy::wire::encode_ioctl_request;
    use crate::proxy::wire::encode_mmap_request;

    fn server() -> ProxyServer<EmulatedDevice> {
        ProxyServer::new(Arc::new(EmulatedDevice::new()))
    }

    #[test]
    fn serves_buffer_creation_and_regions() {
        let server = server();
        let mut create = Ioctl::GemCreate(drm_amdgpu_gem_create {
            in_: drm_amdgpu_gem_create_in {
                bo_size: 0x2000,
                ..Default::default()
            },
            ..Default::default()
        });
        let reply = server.handle_message(&encode_ioctl_request(&create).unwrap());
        decode_ioctl_reply(&reply, &mut create).unwrap();
        let handle = match create {
            Ioctl::GemCreate(args) => args.out.handle,
            _ => unreachable!(),
        };
        assert_ne!(handle, 0);

        let reply = server.handle_message(&encode_mmap_request(u64::from(handle), 0x2000));
        let (region_id, offset) = decode_mmap_reply(&reply).unwrap();
        assert_eq!(offset, 0);
        assert_ne!(region_id, 0);

        let reply = server.handle_message(&encode_mmap_request(u64::from(handle), 0x3000));
        assert!(matches!(
            decode_mmap_reply(&reply),
            Err(ShimError::InvalidArgument)
        ));
    }

    #[test]
    fn local_only_requests_are_refused() {
        let server = server();
        let mut signal = Ioctl::SyncobjSignal(SyncobjArray::new(&[1]).unwrap());
        let reply = server.handle_message(&encode_ioctl_request(&signal).unwrap());
        assert!(matches!(
            decode_ioctl_reply(&reply, &mut signal),
            Err(ShimError::NotSupported)
        ));
    }

    #[test]
    fn garbage_gets_a_protocol_error() {
        let server = server();
        let mut close = Ioctl::GemClose(drm_gem_close::default());
        let reply = server.handle_message(&[1, 2, 3]);
        assert!(matches!(
            decode_ioctl_reply(&reply, &mut close),
            Err(ShimError::ProtocolError)
        ));
    }

    #[test]
    fn stream_is_served_until_hangup() {
        let (mut client, server_end) = UnixStream::pair().unwrap();
        let server = server();
        let worker = std::thread::spawn(move || server.serve_stream(server_end));

        let mut version = Ioctl::Version(drm_version::default());
        write_message(&mut client, &encode_ioctl_request(&version).unwrap()).unwrap();
        let reply = read_message(&mut client).unwrap().unwrap();
        decode_ioctl_reply(&reply, &mut version).unwrap();
        assert!(matches!(version, Ioctl::Version(v) if v.version_major == 3));

        drop(client);
        worker.join().unwrap().unwrap();
    }
}
