// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Message channels between the proxy and its server.

use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::backend::DrmBackend;
use crate::proxy::server::ProxyServer;
use crate::proxy::server::RegionExporter;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;

/// Largest message either side accepts.
pub const MAX_MESSAGE_SIZE: usize = 16 << 20;

/// Carries one request to the server and returns its reply.
pub trait Transport: Send + Sync {
    fn round_trip(&self, request: &[u8]) -> ShimResult<Vec<u8>>;
}

/// Writes `message` with its `u32` length prefix.
pub fn write_message<W: Write>(stream: &mut W, message: &[u8]) -> ShimResult<()> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(ShimError::InvalidArgument);
    }

    let len: u32 = message.len().try_into()?;
    stream.write_all(&len.to_ne_bytes())?;
    stream.write_all(message)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed message. Returns `None` if the peer hung up between messages.
pub fn read_message<R: Read>(stream: &mut R) -> ShimResult<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match stream.read_exact(&mut len) {
        Ok(()) => (),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_ne_bytes(len) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ShimError::ProtocolError);
    }

    let mut message = vec![0u8; len];
    stream.read_exact(&mut message)?;
    Ok(Some(message))
}

/// Transport over a connected Unix stream socket. Round trips are serialized.
pub struct SocketTransport {
    stream: Mutex<UnixStream>,
}

impl SocketTransport {
    pub fn new(stream: UnixStream) -> SocketTransport {
        SocketTransport {
            stream: Mutex::new(stream),
        }
    }

    pub fn connect<P: AsRef<Path>>(path: P) -> ShimResult<SocketTransport> {
        let stream = UnixStream::connect(path.as_ref())?;
        debug!("connected to {}", path.as_ref().display());
        Ok(SocketTransport::new(stream))
    }
}

impl Transport for SocketTransport {
    fn round_trip(&self, request: &[u8]) -> ShimResult<Vec<u8>> {
        let mut stream = self.stream.lock();
        write_message(&mut *stream, request)?;
        read_message(&mut *stream)?.ok_or(ShimError::BackendUnavailable)
    }
}

/// Hands messages straight to a server in the same process.
pub struct LoopbackTransport<B> {
    server: Arc<ProxyServer<B>>,
}

impl<B: DrmBackend + RegionExporter> LoopbackTransport<B> {
    pub fn new(server: Arc<ProxyServer<B>>) -> LoopbackTransport<B> {
        LoopbackTransport { server }
    }
}

impl<B: DrmBackend + RegionExporter> Transport for LoopbackTransport<B> {
    fn round_trip(&self, request: &[u8]) -> ShimResult<Vec<u8>> {
        Ok(self.server.handle_message(request))
    }
}
