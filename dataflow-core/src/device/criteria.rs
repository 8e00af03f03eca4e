//! Device Criteria
//!
//! Criteria describe what a node needs from the device in one of its slots.
//! Every field is optional; an empty criteria value matches any device.

use serde::{Deserialize, Serialize};

use super::handle::{Device, DeviceType};

/// Capability requirements for a device slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCriteria {
    /// Required device class.
    pub device_type: Option<DeviceType>,

    /// Required platform name (case-insensitive substring match).
    pub platform: Option<String>,

    pub require_gl_interop: bool,

    pub require_image_3d_writes: bool,

    /// Minimum global memory in bytes.
    pub min_global_memory: u64,
}

impl DeviceCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn gl_interop(mut self) -> Self {
        self.require_gl_interop = true;
        self
    }

    pub fn image_3d_writes(mut self) -> Self {
        self.require_image_3d_writes = true;
        self
    }

    pub fn min_global_memory(mut self, bytes: u64) -> Self {
        self.min_global_memory = bytes;
        self
    }

    /// Check whether `device` meets every requirement.
    pub fn matches(&self, device: &Device) -> bool {
        if let Some(device_type) = self.device_type {
            if device.device_type() != device_type {
                return false;
            }
        }

        if let Some(platform) = &self.platform {
            let wanted = platform.to_lowercase();
            if !device.platform().to_lowercase().contains(&wanted) {
                return false;
            }
        }

        let caps = device.capabilities();
        if self.require_gl_interop && !caps.gl_interop {
            return false;
        }
        if self.require_image_3d_writes && !caps.image_3d_writes {
            return false;
        }

        caps.global_memory >= self.min_global_memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceCapabilities;

    fn gpu() -> Device {
        Device::new("gpu0", "Vendor OpenCL", DeviceType::Gpu).with_capabilities(
            DeviceCapabilities {
                gl_interop: true,
                image_3d_writes: false,
                global_memory: 4 << 30,
            },
        )
    }

    #[test]
    fn empty_criteria_matches_anything() {
        assert!(DeviceCriteria::new().matches(&gpu()));
        assert!(DeviceCriteria::new().matches(&Device::new("cpu", "host", DeviceType::Cpu)));
    }

    #[test]
    fn type_and_platform() {
        assert!(DeviceCriteria::new().device_type(DeviceType::Gpu).matches(&gpu()));
        assert!(!DeviceCriteria::new().device_type(DeviceType::Cpu).matches(&gpu()));
        assert!(DeviceCriteria::new().platform("opencl").matches(&gpu()));
        assert!(!DeviceCriteria::new().platform("cuda").matches(&gpu()));
    }

    #[test]
    fn capabilities() {
        assert!(DeviceCriteria::new().gl_interop().matches(&gpu()));
        assert!(!DeviceCriteria::new().image_3d_writes().matches(&gpu()));
        assert!(DeviceCriteria::new().min_global_memory(1 << 30).matches(&gpu()));
        assert!(!DeviceCriteria::new().min_global_memory(8 << 30).matches(&gpu()));
    }
}
