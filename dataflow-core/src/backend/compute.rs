//! Compute Backend
//!
//! The engine does not talk to any compute API directly. Nodes that run
//! kernels go through a [`ComputeBackend`], which exposes exactly the four
//! operations they need: device views of data objects, program builds,
//! kernel launches, and completion waits.

use std::path::PathBuf;

use crate::data::{DataIdentity, DataObject};
use crate::device::{Device, DeviceId};
use crate::error::Result;

use super::render::TextureId;

/// How a device view may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

/// A backend-owned view of a data object on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceView {
    pub data: DataIdentity,
    pub device: DeviceId,
    pub access: Access,
    /// Opaque backend handle.
    pub raw: u64,
}

/// Where a program's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    Inline(String),
    File(PathBuf),
}

/// A program built for one device with one set of build flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHandle {
    pub name: String,
    pub device: DeviceId,
    pub build_flags: String,
    /// Opaque backend handle.
    pub raw: u64,
}

/// A bound kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    View(DeviceView),
    Texture(TextureId),
    Int(i32),
    Float(f32),
}

/// Global work size of a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdRange {
    D1(usize),
    D2(usize, usize),
    D3(usize, usize, usize),
}

impl NdRange {
    pub fn dimensions(&self) -> u8 {
        match self {
            NdRange::D1(..) => 1,
            NdRange::D2(..) => 2,
            NdRange::D3(..) => 3,
        }
    }

    /// Work size padded to three dimensions with ones.
    pub fn global_size(&self) -> [usize; 3] {
        match *self {
            NdRange::D1(x) => [x, 1, 1],
            NdRange::D2(x, y) => [x, y, 1],
            NdRange::D3(x, y, z) => [x, y, z],
        }
    }

    pub fn work_items(&self) -> usize {
        self.global_size().iter().product()
    }
}

/// Consumed contract of a compute API.
pub trait ComputeBackend: Send + Sync {
    /// Make `data` available on `device` and return a view of it.
    fn acquire_view(&self, data: &DataObject, device: &Device, access: Access) -> Result<DeviceView>;

    /// Build a named program. Build failures are `Resource` errors.
    fn build_program(
        &self,
        device: &Device,
        name: &str,
        source: &ProgramSource,
        build_flags: &str,
    ) -> Result<ProgramHandle>;

    fn enqueue_kernel(
        &self,
        device: &Device,
        program: &ProgramHandle,
        kernel: &str,
        args: &[KernelArg],
        range: NdRange,
    ) -> Result<()>;

    /// Block until all work queued on `device` has completed.
    fn finish(&self, device: &Device) -> Result<()>;
}
