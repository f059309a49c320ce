// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Backend relaying requests to a server process.
//!
//! Only the request types with a declared wire contract are carried. Everything else fails with
//! `NotSupported` before any message is sent. Buffer memory is reached through shared regions
//! exported by the server and cloned into this process on first use.

mod region_cache;
mod server;
mod transport;
pub mod wire;

use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use log::debug;

pub use self::region_cache::RegionCache;
pub use self::region_cache::RegionMapper;
pub use self::region_cache::ShmRegionMapper;
pub use self::server::ProxyServer;
pub use self::server::RegionExporter;
pub use self::transport::read_message;
pub use self::transport::write_message;
pub use self::transport::LoopbackTransport;
pub use self::transport::SocketTransport;
pub use self::transport::Transport;
pub use self::transport::MAX_MESSAGE_SIZE;
use self::wire::decode_ioctl_reply;
use self::wire::decode_mmap_reply;
use self::wire::encode_ioctl_request;
use self::wire::encode_mmap_request;
use crate::backend::DrmBackend;
use crate::drm_protocol::drm_amdgpu_gem_userptr;
use crate::ioctl::Ioctl;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

pub struct ProxyBackend {
    transport: Arc<dyn Transport>,
    cache: RegionCache,
}

impl ProxyBackend {
    pub fn new(transport: Arc<dyn Transport>) -> ProxyBackend {
        ProxyBackend::with_mapper(transport, Box::new(ShmRegionMapper))
    }

    pub fn with_mapper(
        transport: Arc<dyn Transport>,
        mapper: Box<dyn RegionMapper>,
    ) -> ProxyBackend {
        ProxyBackend {
            transport,
            cache: RegionCache::new(mapper),
        }
    }

    /// Connects to a server listening on the Unix socket at `path`.
    pub fn connect<P: AsRef<Path>>(path: P) -> ShimResult<ProxyBackend> {
        let transport = SocketTransport::connect(path)?;
        Ok(ProxyBackend::new(Arc::new(transport)))
    }

    pub fn cache(&self) -> &RegionCache {
        &self.cache
    }

    fn round_trip(&self, ioctl: &mut Ioctl) -> ShimResult<()> {
        let request = encode_ioctl_request(ioctl)?;
        let reply = self.transport.round_trip(&request)?;
        decode_ioctl_reply(&reply, ioctl)
    }

    // The server cannot see our address space. Memory inside a cloned region is sent as
    // (region id, offset) instead; the caller's arguments keep the original address.
    fn userptr(&self, args: &mut drm_amdgpu_gem_userptr) -> ShimResult<()> {
        self.cache.locked(|| -> ShimResult<()> {
            let mut request = *args;
            if let Some((region_id, offset)) = self.cache.lookup(args.addr) {
                request.region_id = region_id;
                request.addr = offset;
            }

            let mut ioctl = Ioctl::GemUserptr(request);
            self.round_trip(&mut ioctl)?;
            if let Ioctl::GemUserptr(reply) = ioctl {
                args.handle = reply.handle;
            }
            Ok(())
        })
    }
}

impl DrmBackend for ProxyBackend {
    fn ioctl(&self, ioctl: &mut Ioctl) -> ShimResult<()> {
        if !ioctl.proxied() {
            debug!("request {:#x} is not carried by the proxy", ioctl.code());
            return Err(ShimError::NotSupported);
        }

        match ioctl {
            Ioctl::GemUserptr(args) => self.userptr(args),
            _ => self.round_trip(ioctl),
        }
    }

    fn mmap(&self, offset: u64, size: usize) -> ShimResult<NonNull<u8>> {
        let reply = self
            .transport
            .round_trip(&encode_mmap_request(offset, size as u64))?;
        let (region_id, region_offset) = decode_mmap_reply(&reply)?;
        self.cache.map(region_id, region_offset)
    }

    fn munmap(&self, addr: NonNull<u8>, _size: usize) -> ShimResult<()> {
        self.cache.unmap(addr)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::drm_protocol::*;
    use crate::emulation::EmulatedDevice;
    use crate::ioctl::SyncobjArray;

    struct CountingTransport {
        inner: LoopbackTransport<EmulatedDevice>,
        trips: AtomicUsize,
    }

    impl Transport for CountingTransport {
        fn round_trip(&self, request: &[u8]) -> ShimResult<Vec<u8>> {
            self.trips.fetch_add(1, Ordering::SeqCst);
            self.inner.round_trip(request)
        }
    }

    fn proxy() -> (ProxyBackend, Arc<CountingTransport>, Arc<EmulatedDevice>) {
        let device = Arc::new(EmulatedDevice::new());
        let transport = Arc::new(CountingTransport {
            inner: LoopbackTransport::new(Arc::new(ProxyServer::new(device.clone()))),
            trips: AtomicUsize::new(0),
        });
        (ProxyBackend::new(transport.clone()), transport, device)
    }

    fn create(proxy: &ProxyBackend, size: u64) -> u32 {
        let mut ioctl = Ioctl::GemCreate(drm_amdgpu_gem_create {
            in_: drm_amdgpu_gem_create_in {
                bo_size: size,
                ..Default::default()
            },
            ..Default::default()
        });
        proxy.ioctl(&mut ioctl).unwrap();
        match ioctl {
            Ioctl::GemCreate(args) => args.out.handle,
            _ => unreachable!(),
        }
    }

    fn mmap_offset(proxy: &ProxyBackend, handle: u32) -> u64 {
        let mut ioctl = Ioctl::GemMmap(drm_amdgpu_gem_mmap {
            handle,
            ..Default::default()
        });
        proxy.ioctl(&mut ioctl).unwrap();
        match ioctl {
            Ioctl::GemMmap(args) => args.addr_ptr,
            _ => unreachable!(),
        }
    }

    #[test]
    fn unsupported_requests_never_reach_the_transport() {
        let (proxy, transport, _) = proxy();
        let mut signal = Ioctl::SyncobjSignal(SyncobjArray::new(&[1]).unwrap());
        assert!(matches!(
            proxy.ioctl(&mut signal),
            Err(ShimError::NotSupported)
        ));

        let mut fd = Ioctl::SyncobjHandleToFd(drm_prime_handle::default());
        assert!(matches!(proxy.ioctl(&mut fd), Err(ShimError::NotSupported)));
        assert_eq!(transport.trips.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn one_round_trip_per_request() {
        let (proxy, transport, device) = proxy();
        let handle = create(&proxy, 0x1000);
        assert_eq!(transport.trips.load(Ordering::SeqCst), 1);
        assert_eq!(device.buffer_count(), 1);

        let mut unmap = Ioctl::GemVa(drm_amdgpu_gem_va {
            handle,
            operation: AMDGPU_VA_OP_UNMAP,
            va_address: 0x10000,
            map_size: 0x1000,
            ..Default::default()
        });
        assert!(matches!(proxy.ioctl(&mut unmap), Err(ShimError::NotFound)));
        assert_eq!(transport.trips.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn buffer_memory_is_shared_with_server() {
        let (proxy, _, device) = proxy();
        let handle = create(&proxy, 0x2000);
        let offset = mmap_offset(&proxy, handle);

        let first = proxy.mmap(offset, 0x2000).unwrap();
        let second = proxy.mmap(offset, 0x2000).unwrap();
        assert_eq!(first, second);
        assert_eq!(proxy.cache().len(), 1);

        // SAFETY:
        // The mapping is 0x2000 bytes long and stays mapped until unmapped below.
        unsafe { first.as_ptr().add(0x10).write(0x5a) };
        assert_eq!(device.read_buffer(handle, 0x10, 1).unwrap(), vec![0x5a]);

        proxy.munmap(second, 0x2000).unwrap();
        assert_eq!(proxy.cache().len(), 1);
        proxy.munmap(first, 0x2000).unwrap();
        assert!(proxy.cache().is_empty());
        assert!(matches!(
            proxy.munmap(first, 0x2000),
            Err(ShimError::NotFound)
        ));
    }

    #[test]
    fn user_memory_in_cloned_region_is_translated() {
        let (proxy, _, device) = proxy();
        let handle = create(&proxy, 0x2000);
        let base = proxy.mmap(mmap_offset(&proxy, handle), 0x2000).unwrap();
        let addr = base.as_ptr() as u64 + 0x1000;

        let mut ioctl = Ioctl::GemUserptr(drm_amdgpu_gem_userptr {
            addr,
            size: 0x1000,
            ..Default::default()
        });
        proxy.ioctl(&mut ioctl).unwrap();
        let args = match ioctl {
            Ioctl::GemUserptr(args) => args,
            _ => unreachable!(),
        };
        assert_eq!(args.addr, addr);
        assert_eq!(args.region_id, 0);
        assert_ne!(args.handle, handle);

        device.write_buffer(handle, 0x1008, &[7]).unwrap();
        assert_eq!(device.read_buffer(args.handle, 8, 1).unwrap(), vec![7]);
        proxy.munmap(base, 0x2000).unwrap();
    }

    #[test]
    fn plain_user_memory_is_refused_by_server() {
        let (proxy, transport, _) = proxy();
        let mut ioctl = Ioctl::GemUserptr(drm_amdgpu_gem_userptr {
            addr: 0x7000_0000,
            size: 0x1000,
            ..Default::default()
        });
        assert!(matches!(
            proxy.ioctl(&mut ioctl),
            Err(ShimError::NotSupported)
        ));
        assert_eq!(transport.trips.load(Ordering::SeqCst), 1);
    }
}
