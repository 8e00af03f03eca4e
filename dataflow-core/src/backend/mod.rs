//! External Backends
//!
//! Interfaces to the compute and render APIs the engine drives but does not
//! implement. The pipeline holds at most one of each and hands them to
//! executing nodes through the execution context.

mod compute;
mod program;
mod render;

pub use compute::{Access, ComputeBackend, DeviceView, KernelArg, NdRange, ProgramHandle, ProgramSource};
pub use program::ProgramRegistry;
pub use render::{ContextHandle, PixelFormat, RenderBackend, RenderContext, TextureId};
