//! Compute/render device descriptions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Shared handle to a device.
pub type DeviceHandle = Arc<Device>;

/// Unique identifier for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Generate a new unique device ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Broad class of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// The host processor.
    Cpu,
    Gpu,
    Accelerator,
}

/// Capabilities a device advertises. Criteria are matched against these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapabilities {
    /// The device can share images with a render context.
    pub gl_interop: bool,

    /// The device can write to 3D images from kernels.
    pub image_3d_writes: bool,

    /// Global memory in bytes.
    pub global_memory: u64,
}

/// A compute or render device.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    name: String,
    platform: String,
    device_type: DeviceType,
    capabilities: DeviceCapabilities,
}

impl Device {
    pub fn new(name: impl Into<String>, platform: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            id: DeviceId::new(),
            name: name.into(),
            platform: platform.into(),
            device_type,
            capabilities: DeviceCapabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Wrap in a shared handle.
    pub fn into_handle(self) -> DeviceHandle {
        Arc::new(self)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn is_host(&self) -> bool {
        self.device_type == DeviceType::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {:?})", self.name, self.platform, self.device_type)
    }
}
