// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Emulated backend that counts the requests it services.

use std::collections::BTreeMap as Map;
use std::ptr::NonNull;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::backend::Connection;
use crate::backend::DrmBackend;
use crate::backend::IoctlConnection;
use crate::drm_protocol::DRM_IOCTL_GEM_CLOSE;
use crate::emulation::EmulatedDevice;
use crate::ioctl::Ioctl;
use crate::shim_utils::ShimResult;

#[derive(Default)]
struct GateState {
    waiting: bool,
    open: bool,
}

/// Parks buffer-handle closes until opened.
#[derive(Default)]
pub struct CloseGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl CloseGate {
    fn pass(&self) {
        let mut state = self.state.lock();
        state.waiting = true;
        self.changed.notify_all();
        while !state.open {
            self.changed.wait(&mut state);
        }
    }

    /// Blocks until some close is parked at the gate.
    pub fn wait_for_close(&self) {
        let mut state = self.state.lock();
        while !state.waiting {
            self.changed.wait(&mut state);
        }
    }

    /// Lets parked and future closes through.
    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }
}

#[derive(Default)]
pub struct CountingBackend {
    emulated: EmulatedDevice,
    counts: Mutex<Map<u32, usize>>,
    munmaps: AtomicUsize,
    close_gate: Mutex<Option<Arc<CloseGate>>>,
}

impl CountingBackend {
    pub fn new() -> CountingBackend {
        CountingBackend::default()
    }

    /// A fresh backend and a connection over it.
    pub fn connection() -> (Arc<CountingBackend>, Arc<dyn Connection>) {
        let backend = Arc::new(CountingBackend::new());
        let connection: Arc<dyn Connection> =
            Arc::new(IoctlConnection::new(backend.clone(), None));
        (backend, connection)
    }

    /// Number of requests with request number `code` seen so far, failed ones included.
    pub fn count(&self, code: u32) -> usize {
        self.counts.lock().get(&code).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    pub fn munmaps(&self) -> usize {
        self.munmaps.load(Ordering::SeqCst)
    }

    pub fn emulated(&self) -> &EmulatedDevice {
        &self.emulated
    }

    /// Installs a gate that every later `GemClose` has to pass.
    pub fn gate_closes(&self) -> Arc<CloseGate> {
        let gate = Arc::new(CloseGate::default());
        *self.close_gate.lock() = Some(gate.clone());
        gate
    }
}

impl DrmBackend for CountingBackend {
    fn ioctl(&self, ioctl: &mut Ioctl) -> ShimResult<()> {
        *self.counts.lock().entry(ioctl.code()).or_default() += 1;
        if ioctl.code() == DRM_IOCTL_GEM_CLOSE {
            let gate = self.close_gate.lock().clone();
            if let Some(gate) = gate {
                gate.pass();
            }
        }
        self.emulated.ioctl(ioctl)
    }

    fn mmap(&self, offset: u64, size: usize) -> ShimResult<NonNull<u8>> {
        self.emulated.mmap(offset, size)
    }

    fn munmap(&self, addr: NonNull<u8>, size: usize) -> ShimResult<()> {
        self.munmaps.fetch_add(1, Ordering::SeqCst);
        self.emulated.munmap(addr, size)
    }
}
