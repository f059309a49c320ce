// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device bring-up and the registry that deduplicates devices per backend connection.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use log::error;
use parking_lot::Mutex;

use crate::backend::Connection;
use crate::backend::DrmControl;
use crate::backend::GpuControl;
use crate::bo::BufferObject;
use crate::drm_protocol::drm_amdgpu_info_device;
use crate::drm_protocol::AMDGPU_DRM_MAJOR;
use crate::handle_table::HandleTable;
use crate::ioctl::InfoRequest;
use crate::shim_utils::ShimError;
use crate::shim_utils::ShimResult;
use crate::va_manager::VaLayout;
use crate::va_manager::VaManager;
use crate::va_manager::VaRange;
use crate::va_manager::VaRangeFlags;

/// Buffer lookup tables of one device, guarded by the device lock.
#[derive(Default)]
pub(crate) struct BoTables {
    pub handles: HandleTable<Arc<BufferObject>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwInfo {
    Address32Hi,
}

/// Preferred buffer size granularity for local (VRAM) and remote (GTT) memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferSizeAlignments {
    pub size_local: u64,
    pub size_remote: u64,
}

/// One brought-up GPU device.
pub struct Device {
    connection: Arc<dyn Connection>,
    drm: Arc<dyn DrmControl>,
    gpu: Arc<dyn GpuControl>,
    major_version: u32,
    minor_version: u32,
    info: drm_amdgpu_info_device,
    va_manager: VaManager,
    refcount: AtomicU32,
    pub(crate) tables: Mutex<BoTables>,
}

impl Device {
    fn initialize(connection: &Arc<dyn Connection>) -> ShimResult<Device> {
        let connection = connection.clone();
        let drm = connection
            .drm_control()
            .ok_or(ShimError::BackendUnavailable)?;
        let gpu = connection
            .gpu_control()
            .ok_or(ShimError::BackendUnavailable)?;

        let version = drm.version()?;
        if version.major != AMDGPU_DRM_MAJOR {
            error!(
                "{}: unsupported protocol version {}.{}",
                version.name, version.major, version.minor
            );
            return Err(ShimError::ProtocolError);
        }

        if !gpu.accel_working()? {
            error!("acceleration is not working");
            return Err(ShimError::BackendUnavailable);
        }

        let info = gpu.device_info()?;
        let va_manager = VaManager::new(&VaLayout {
            offset: info.virtual_address_offset,
            max: info.virtual_address_max,
            alignment: u64::from(info.virtual_address_alignment),
            high_offset: info.high_va_offset,
            high_max: info.high_va_max,
        })?;

        Ok(Device {
            connection,
            drm,
            gpu,
            major_version: version.major.try_into()?,
            minor_version: version.minor.try_into()?,
            info,
            va_manager,
            refcount: AtomicU32::new(1),
            tables: Mutex::new(Default::default()),
        })
    }

    pub fn major_version(&self) -> u32 {
        self.major_version
    }

    pub fn minor_version(&self) -> u32 {
        self.minor_version
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn drm(&self) -> &Arc<dyn DrmControl> {
        &self.drm
    }

    pub fn gpu(&self) -> &Arc<dyn GpuControl> {
        &self.gpu
    }

    /// Static GPU description captured at bring-up.
    pub fn info(&self) -> &drm_amdgpu_info_device {
        &self.info
    }

    pub fn va_manager(&self) -> &VaManager {
        &self.va_manager
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Whether a live buffer object is registered under `handle`.
    pub fn is_tracked(&self, handle: u32) -> bool {
        self.tables.lock().handles.contains(handle)
    }

    pub fn query_info(&self, request: &mut InfoRequest) -> ShimResult<()> {
        self.gpu.query_info(request)
    }

    pub fn query_sw_info(&self, info: SwInfo) -> u32 {
        match info {
            SwInfo::Address32Hi => self.va_manager.address32_hi(),
        }
    }

    pub fn query_buffer_size_alignment(&self) -> BufferSizeAlignments {
        BufferSizeAlignments {
            size_local: u64::from(self.info.pte_fragment_size),
            size_remote: u64::from(self.info.gart_page_size),
        }
    }

    pub fn va_range_alloc(
        &self,
        size: u64,
        alignment: u64,
        base_required: Option<u64>,
        flags: VaRangeFlags,
    ) -> ShimResult<VaRange> {
        self.va_manager
            .alloc_range(size, alignment, base_required, flags)
    }

    pub fn va_range_free(&self, range: &VaRange) -> ShimResult<()> {
        self.va_manager.free_range(range)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        debug!("device {:#x} released", self.info.device_id);
    }
}

/// Every device brought up by this process.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<Vec<Arc<Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        Default::default()
    }

    /// Returns the device for `connection` with its protocol version, creating it on first
    /// use. A repeated call for the same connection hands out the same device.
    pub fn bring_up(
        &self,
        connection: &Arc<dyn Connection>,
    ) -> ShimResult<(u32, u32, Arc<Device>)> {
        let mut devices = self.devices.lock();

        let existing = devices.iter().find(|device| {
            std::ptr::addr_eq(Arc::as_ptr(&device.connection), Arc::as_ptr(connection))
        });
        if let Some(device) = existing {
            device.refcount.fetch_add(1, Ordering::AcqRel);
            return Ok((device.major_version, device.minor_version, device.clone()));
        }

        let device = match Device::initialize(connection) {
            Ok(device) => Arc::new(device),
            Err(e) => {
                error!("device bring-up failed: {}", e);
                return Err(e);
            }
        };

        debug!(
            "brought up device {:#x}, protocol {}.{}",
            device.info.device_id, device.major_version, device.minor_version
        );
        devices.push(device.clone());
        Ok((device.major_version, device.minor_version, device))
    }

    /// Drops one reference to `device`. The last one unregisters it and releases its buffer
    /// tables; the device itself goes away once no buffer refers to it anymore.
    pub fn tear_down(&self, device: Arc<Device>) -> ShimResult<()> {
        let mut devices = self.devices.lock();

        let previous = device
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .map_err(|_| ShimError::InvalidState)?;
        if previous > 1 {
            return Ok(());
        }

        devices.retain(|registered| !Arc::ptr_eq(registered, &device));
        drop(devices);

        device.tables.lock().handles.clear();
        Ok(())
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}
