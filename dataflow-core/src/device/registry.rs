//! Device Registry
//!
//! The registry is the collaborator that turns abstract requirements into
//! concrete device handles. Platform discovery is outside the engine; the
//! [`StaticDeviceRegistry`] serves a fixed list handed to it at startup.

use super::criteria::DeviceCriteria;
use super::handle::{Device, DeviceCapabilities, DeviceHandle, DeviceType};
use crate::error::{EngineError, Result};

/// Resolves capability requirements to devices.
pub trait DeviceRegistry: Send + Sync {
    /// Device nodes compute on unless told otherwise.
    fn default_compute_device(&self) -> Result<DeviceHandle>;

    /// Device renderers draw with unless told otherwise.
    fn default_visualization_device(&self) -> Result<DeviceHandle>;

    /// Pick a device meeting `criteria`.
    fn device_for(&self, criteria: &DeviceCriteria) -> Result<DeviceHandle>;

    fn satisfies(&self, device: &Device, criteria: &DeviceCriteria) -> bool {
        criteria.matches(device)
    }
}

/// A registry over a fixed set of devices.
///
/// The first device is the default compute device. The default
/// visualization device is the first one with render interop, falling back
/// to the compute default.
#[derive(Debug, Clone)]
pub struct StaticDeviceRegistry {
    devices: Vec<DeviceHandle>,
}

impl StaticDeviceRegistry {
    pub fn new(devices: Vec<DeviceHandle>) -> Result<Self> {
        if devices.is_empty() {
            return Err(EngineError::Configuration(
                "a device registry needs at least one device".to_string(),
            ));
        }
        Ok(Self { devices })
    }

    /// A registry holding only the host processor.
    pub fn host_only() -> Self {
        let host = Device::new("host", "host", DeviceType::Cpu).with_capabilities(
            DeviceCapabilities {
                gl_interop: false,
                image_3d_writes: true,
                global_memory: 0,
            },
        );
        Self {
            devices: vec![host.into_handle()],
        }
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }
}

impl DeviceRegistry for StaticDeviceRegistry {
    fn default_compute_device(&self) -> Result<DeviceHandle> {
        self.devices
            .first()
            .cloned()
            .ok_or_else(|| EngineError::Configuration("no devices registered".to_string()))
    }

    fn default_visualization_device(&self) -> Result<DeviceHandle> {
        match self.devices.iter().find(|d| d.capabilities().gl_interop) {
            Some(device) => Ok(device.clone()),
            None => self.default_compute_device(),
        }
    }

    fn device_for(&self, criteria: &DeviceCriteria) -> Result<DeviceHandle> {
        self.devices
            .iter()
            .find(|d| self.satisfies(d, criteria))
            .cloned()
            .ok_or_else(|| {
                EngineError::Configuration(format!("no device satisfies {:?}", criteria))
            })
    }
}
