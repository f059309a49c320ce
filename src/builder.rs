// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use log::error;

use crate::backend::Connection;
use crate::backend::DispatchBackend;
use crate::backend::DrmBackend;
use crate::backend::IoctlConnection;
use crate::backend::IoctlTracer;
use crate::emulation::EmulatedDevice;
use crate::proxy::ProxyBackend;
use crate::shim_utils::ShimResult;

/// Where device requests are serviced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// The in-process emulated GPU.
    Emulated,
    /// A server listening on a Unix socket.
    Proxy { socket: PathBuf },
}

/// Builds a `Connection` that devices can be brought up on.
pub struct ShimBuilder {
    kind: BackendKind,
    tracer: Option<Arc<dyn IoctlTracer>>,
    emulation_fallback: bool,
}

impl ShimBuilder {
    pub fn new(kind: BackendKind) -> ShimBuilder {
        ShimBuilder {
            kind,
            tracer: None,
            emulation_fallback: false,
        }
    }

    /// Installs a sink called around every request.
    pub fn set_tracer(mut self, tracer: Arc<dyn IoctlTracer>) -> ShimBuilder {
        self.tracer = Some(tracer);
        self
    }

    /// With a proxy backend, services the requests the proxy does not carry with a local
    /// emulated device.
    pub fn set_emulation_fallback(mut self, emulation_fallback: bool) -> ShimBuilder {
        self.emulation_fallback = emulation_fallback;
        self
    }

    pub fn build(self) -> ShimResult<Arc<dyn Connection>> {
        let backend: Arc<dyn DrmBackend> = match &self.kind {
            BackendKind::Emulated => Arc::new(EmulatedDevice::new()),
            BackendKind::Proxy { socket } => {
                let proxy = ProxyBackend::connect(socket).map_err(|e| {
                    error!("failed to connect to {}: {}", socket.display(), e);
                    e
                })?;

                if self.emulation_fallback {
                    Arc::new(DispatchBackend::new(
                        Arc::new(proxy),
                        Arc::new(EmulatedDevice::new()),
                    ))
                } else {
                    Arc::new(proxy)
                }
            }
        };

        let connection = IoctlConnection::new(backend, self.tracer);
        debug!(
            "connection {} uses {:?}",
            connection.connection_id(),
            self.kind
        );
        Ok(Arc::new(connection))
    }
}
