// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A userspace amdgpu device shim.
//!
//! Devices are brought up on a `Connection`, whose requests are serviced either by an emulated
//! GPU in this process or by a server reached through the proxy.

mod backend;
mod bo;
mod builder;
mod device;
pub mod drm_protocol;
mod emulation;
mod handle_table;
pub mod ioctl;
pub mod proxy;
mod shim_utils;
mod shm;
#[cfg(test)]
mod testing;
mod va_manager;

pub use crate::backend::Connection;
pub use crate::backend::DispatchBackend;
pub use crate::backend::DrmBackend;
pub use crate::backend::DrmControl;
pub use crate::backend::DrmVersion;
pub use crate::backend::GpuControl;
pub use crate::backend::IoctlConnection;
pub use crate::backend::IoctlTracer;
pub use crate::backend::LogTracer;
pub use crate::backend::TracePhase;
pub use crate::bo::BoAllocRequest;
pub use crate::bo::BoInfo;
pub use crate::bo::BoMetadata;
pub use crate::bo::BufferObject;
pub use crate::bo::HandleType;
pub use crate::bo::ImportResult;
pub use crate::bo::VaOp;
pub use crate::builder::BackendKind;
pub use crate::builder::ShimBuilder;
pub use crate::device::BufferSizeAlignments;
pub use crate::device::Device;
pub use crate::device::DeviceRegistry;
pub use crate::device::SwInfo;
pub use crate::emulation::EmulatedDevice;
pub use crate::handle_table::HandleTable;
pub use crate::shim_utils::page_align;
pub use crate::shim_utils::page_size;
pub use crate::shim_utils::ShimError;
pub use crate::shim_utils::ShimResult;
pub use crate::shm::MemoryMapping;
pub use crate::shm::SharedMemory;
pub use crate::va_manager::VaManager;
pub use crate::va_manager::VaRange;
pub use crate::va_manager::VaRangeFlags;
pub use crate::va_manager::VaRegionKind;
