//! Execution Behavior
//!
//! What a node actually does when it runs is supplied by a
//! [`ProcessBehavior`]. The pipeline owns the update algorithm (change
//! detection, required-input validation, residency bookkeeping, timing);
//! the behavior only sees an [`ExecutionContext`] with its resolved inputs,
//! its output slots, its devices and the pipeline's backends.
//!
//! # Hooks
//!
//! | Hook | When |
//! |------|------|
//! | `configure` | once, when the node is added |
//! | `poll_modified` | every update, before the execute decision |
//! | `pre_execute` / `execute` / `post_execute` | on every execution, in order |
//! | `wait_to_finish` | after `post_execute`, only when timing is enabled |
//! | `draw` | when the driver calls `Pipeline::draw` |

use std::sync::Arc;

use super::node::{Node, NodeId, NodeKind, PortId, ResolvedInputs};
use crate::backend::{ComputeBackend, RenderContext};
use crate::config::EngineConfig;
use crate::data::DataHandle;
use crate::device::{DeviceHandle, DeviceRegistry, DeviceSlot};
use crate::error::{EngineError, Result};
use crate::runtime::RuntimeMeasurements;

/// Node-specific execution behavior.
pub trait ProcessBehavior: Send {
    fn kind(&self) -> NodeKind {
        NodeKind::Process
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Declare port policy and devices on the freshly created node.
    fn configure(&mut self, _node: &mut Node, _devices: &dyn DeviceRegistry) -> Result<()> {
        Ok(())
    }

    /// Report data that arrived outside the graph walk. Returning `true`
    /// marks the node modified.
    fn poll_modified(&mut self) -> bool {
        false
    }

    fn pre_execute(&mut self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()>;

    fn post_execute(&mut self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Block until asynchronous device work queued by `execute` is done.
    fn wait_to_finish(&mut self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    fn draw(&mut self, _render: &RenderContext) -> Result<()> {
        Ok(())
    }
}

/// Collaborators shared by every node in a pipeline.
pub(crate) struct Services {
    pub(crate) registry: Arc<dyn DeviceRegistry>,
    pub(crate) compute: Option<Arc<dyn ComputeBackend>>,
    pub(crate) render: Option<RenderContext>,
    pub(crate) config: EngineConfig,
}

/// What a behavior can see and touch while it executes.
pub struct ExecutionContext<'a> {
    pub(crate) node: &'a mut Node,
    inputs: &'a ResolvedInputs,
    services: &'a Services,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(node: &'a mut Node, inputs: &'a ResolvedInputs, services: &'a Services) -> Self {
        Self {
            node,
            inputs,
            services,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    pub fn has_input(&self, port: PortId) -> bool {
        self.inputs.contains_key(&port)
    }

    /// First object delivered on input `port`.
    pub fn input(&self, port: PortId) -> Result<&DataHandle> {
        self.input_sequence(port)?.first().ok_or_else(|| self.missing_input(port))
    }

    /// All objects delivered on input `port`.
    pub fn input_sequence(&self, port: PortId) -> Result<&[DataHandle]> {
        self.inputs
            .get(&port)
            .map(|seq| seq.as_slice())
            .ok_or_else(|| self.missing_input(port))
    }

    pub fn input_ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inputs.keys().copied()
    }

    pub fn set_output(&mut self, port: PortId, data: DataHandle) {
        self.node.set_output_data(port, data);
    }

    pub fn set_output_sequence(&mut self, port: PortId, data: Vec<DataHandle>) {
        self.node.set_output_sequence(port, data);
    }

    /// This node's current output in `port`, if any.
    pub fn output(&self, port: PortId) -> Option<&DataHandle> {
        self.node.output_sequence(port).ok().and_then(|seq| seq.first())
    }

    pub fn device(&self, slot: DeviceSlot) -> Result<&DeviceHandle> {
        self.node.device(slot)
    }

    pub fn main_device(&self) -> Result<&DeviceHandle> {
        self.node.main_device()
    }

    pub fn compute(&self) -> Result<&dyn ComputeBackend> {
        self.services.compute.as_deref().ok_or_else(|| {
            EngineError::Resource("no compute backend is attached to the pipeline".to_string())
        })
    }

    pub fn render(&self) -> Result<&RenderContext> {
        self.services.render.as_ref().ok_or_else(|| {
            EngineError::Resource("no render context is attached to the pipeline".to_string())
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// This node's timers, for sub-step measurements.
    pub fn measurements(&mut self) -> &mut RuntimeMeasurements {
        &mut self.node.measurements
    }

    fn missing_input(&self, port: PortId) -> EngineError {
        EngineError::Lookup(format!(
            "{} ({}) has no data on input {}",
            self.node.id(),
            self.node.name(),
            port
        ))
    }
}
