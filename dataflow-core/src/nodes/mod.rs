//! Built-in Nodes
//!
//! Behaviors shipped with the engine:
//!
//! - [`ConstantSource`]: publishes fixed data, used for raw-data inputs
//! - [`StreamingSource`]: publishes frames from a hardware stream worker
//! - [`SliceRenderer`]: renders the middle slice of a volume

mod constant;
mod slice_renderer;
mod streamer;

pub use constant::ConstantSource;
pub use slice_renderer::{build_flags, SliceRenderer, SLICE_KERNEL, SLICE_PROGRAM};
pub use streamer::{
    FrameCallback, FrameSink, HardwareStream, RawFrame, StreamFault, StreamHandle, StreamingSource,
};
