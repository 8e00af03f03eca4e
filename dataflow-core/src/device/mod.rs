//! Devices
//!
//! A node executes on one or more devices, addressed by small integer
//! slots. Slot 0 is the node's main device. Each slot may carry
//! [`DeviceCriteria`]; assigning a device that fails the slot's criteria is
//! a configuration error.

mod criteria;
mod handle;
mod registry;

pub use criteria::DeviceCriteria;
pub use handle::{Device, DeviceCapabilities, DeviceHandle, DeviceId, DeviceType};
pub use registry::{DeviceRegistry, StaticDeviceRegistry};

/// Index of a device slot on a node.
pub type DeviceSlot = u32;

/// The main device slot.
pub const MAIN_DEVICE: DeviceSlot = 0;
