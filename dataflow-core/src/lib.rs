//! Dataflow Core
//!
//! This crate provides a demand-driven dataflow engine for image processing
//! and visualization pipelines. It implements:
//!
//! - Versioned, identity-stamped data objects exchanged between nodes
//! - Lazy, change-driven re-execution of a processing graph
//! - Per-node device assignment with capability criteria
//! - Runtime measurement hooks around node execution
//! - A background-worker handoff for streaming sources
//!
//! Compute, rendering and streaming hardware are external collaborators
//! reached through the traits in [`backend`], [`device`] and [`nodes`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `data`: data objects, timestamps, identities and images
//! - `device`: devices, criteria and the device registry
//! - `graph`: nodes, ports and the pipeline that updates them
//! - `runtime`: runtime measurements
//! - `backend`: compute and render backend contracts
//! - `nodes`: built-in node behaviors
//! - `config`, `error`, `telemetry`: ambient plumbing
//!
//! # Example
//!
//! ```rust,ignore
//! use dataflow_core::prelude::*;
//!
//! let mut pipeline = Pipeline::new();
//!
//! // A producer holding one data object
//! let data = DataObject::new(41u32);
//! let source = pipeline.add_constant(data.clone())?;
//!
//! // A consumer connected to it
//! let consumer = pipeline.add_node(Increment)?;
//! let port = pipeline.output_port(source, 0)?;
//! pipeline.set_input_connection(consumer, 0, port)?;
//!
//! pipeline.update(consumer)?; // executes
//! pipeline.update(consumer)?; // nothing changed, no execution
//!
//! data.replace(1u32);
//! pipeline.update(consumer)?; // executes again
//! ```

pub mod backend;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod graph;
pub mod nodes;
pub mod runtime;
pub mod telemetry;

pub use config::{EngineConfig, StreamConfig};
pub use error::{EngineError, Result};

/// Commonly used types.
pub mod prelude {
    pub use crate::backend::{ComputeBackend, RenderBackend, RenderContext};
    pub use crate::config::EngineConfig;
    pub use crate::data::{DataHandle, DataObject, DataType, Image, Timestamp};
    pub use crate::device::{
        Device, DeviceCriteria, DeviceHandle, DeviceRegistry, DeviceType, StaticDeviceRegistry,
        MAIN_DEVICE,
    };
    pub use crate::error::{EngineError, Result};
    pub use crate::graph::{ExecutionContext, NodeId, NodeKind, Pipeline, PortId, ProcessBehavior};
    pub use crate::nodes::{ConstantSource, SliceRenderer, StreamingSource};
}
