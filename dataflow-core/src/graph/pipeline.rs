//! Pipeline
//!
//! The pipeline owns every node by [`NodeId`] and drives their updates.
//!
//! # Algorithm
//!
//! `update(id)` is a demand-driven, post-order walk:
//!
//! 1. For every input port of the node, in connection order:
//!    - update the producer (recursively),
//!    - if the port reports its producer's output as modified, record a
//!      parent change and refresh the port's cached timestamp/identity.
//!
//!    No port is skipped once a parent change is known, and a failing
//!    producer does not stop the walk; every port ends the pass
//!    synchronized with its producer. The first producer error is returned
//!    afterwards, leaving the node modified if any port changed.
//! 2. If the node is marked modified or a parent changed:
//!    - clear the node's modified flag *before* anything runs,
//!    - validate required inputs (nothing else happens if one is missing),
//!    - retain inputs on their devices, run the behavior's
//!      `pre_execute` / `execute` / `post_execute`,
//!    - release inputs flagged release-after-execute, even on failure,
//!    - with timing enabled, wait for device work and record the
//!      `"execute"` timer.
//! 3. Otherwise the call only refreshed port bookkeeping.
//!
//! A failed execution restores the modified flag so the driver's next
//! update retries it. A node reached again while it is already being
//! updated (a cycle) is skipped for that pass.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use super::behavior::{ExecutionContext, ProcessBehavior, Services};
use super::node::{Node, NodeId, PortId, ResolvedInputs};
use super::port::{OutputLookup, Port};
use crate::backend::{ComputeBackend, RenderContext};
use crate::config::EngineConfig;
use crate::data::DataHandle;
use crate::device::{
    DeviceCriteria, DeviceHandle, DeviceRegistry, DeviceSlot, StaticDeviceRegistry, MAIN_DEVICE,
};
use crate::error::{EngineError, Result};
use crate::nodes::ConstantSource;
use crate::runtime::{MeasurementSink, RuntimeMeasurement, EXECUTE_TIMER};

struct NodeEntry {
    node: Node,
    /// Taken out while the behavior executes.
    behavior: Option<Box<dyn ProcessBehavior>>,
}

/// Container and update driver for a processing graph.
pub struct Pipeline {
    nodes: IndexMap<NodeId, NodeEntry>,
    services: Services,
}

impl Pipeline {
    /// A pipeline on the host device with default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default(), Arc::new(StaticDeviceRegistry::host_only()))
    }

    pub fn with_registry(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self::with_config(EngineConfig::default(), registry)
    }

    pub fn with_config(config: EngineConfig, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            nodes: IndexMap::new(),
            services: Services {
                registry,
                compute: None,
                render: None,
                config,
            },
        }
    }

    pub fn set_compute_backend(&mut self, backend: Arc<dyn ComputeBackend>) {
        self.services.compute = Some(backend);
    }

    pub fn set_render_context(&mut self, context: RenderContext) {
        self.services.render = Some(context);
    }

    pub fn registry(&self) -> &dyn DeviceRegistry {
        self.services.registry.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node running `behavior`.
    pub fn add_node<B: ProcessBehavior + 'static>(&mut self, behavior: B) -> Result<NodeId> {
        self.add_boxed(Box::new(behavior))
    }

    pub fn add_boxed(&mut self, mut behavior: Box<dyn ProcessBehavior>) -> Result<NodeId> {
        let registry = Arc::clone(&self.services.registry);
        let mut node = Node::new(behavior.name(), behavior.kind());

        match &self.services.config.main_device {
            Some(criteria) => node.set_main_device_criteria(criteria.clone(), registry.as_ref())?,
            None => node.set_main_device(registry.default_compute_device()?, registry.as_ref())?,
        }
        if self.services.config.runtime_measurements {
            node.enable_runtime_measurements();
        }
        behavior.configure(&mut node, registry.as_ref())?;

        let id = node.id();
        tracing::debug!(node = %id, name = node.name(), kind = ?node.kind(), "node added");
        self.nodes.insert(
            id,
            NodeEntry {
                node,
                behavior: Some(behavior),
            },
        );
        Ok(id)
    }

    /// Add a zero-input node publishing `data` on output 0.
    pub fn add_constant(&mut self, data: DataHandle) -> Result<NodeId> {
        self.add_node(ConstantSource::new(data))
    }

    pub fn add_constant_sequence(&mut self, data: Vec<DataHandle>) -> Result<NodeId> {
        self.add_node(ConstantSource::sequence(data))
    }

    /// Remove a node.
    ///
    /// Downstream connections to it are removed, which invalidates those
    /// consumers as any topology change does. Dropping the node's behavior
    /// stops and joins any worker it owns.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let mut entry = self
            .nodes
            .shift_remove(&id)
            .ok_or_else(|| Self::unknown_node(id))?;

        for consumer in self.nodes.values_mut() {
            let ports: SmallVec<[PortId; 4]> = consumer
                .node
                .input_ports()
                .filter(|(_, port)| port.producer() == id)
                .map(|(port_id, _)| port_id)
                .collect();
            for port_id in ports {
                consumer.node.disconnect(port_id);
                tracing::debug!(node = %consumer.node.id(), input = port_id, removed = %id, "input detached");
            }
        }

        let producers: SmallVec<[NodeId; 4]> =
            entry.node.input_ports().map(|(_, port)| port.producer()).collect();
        entry.node.release_all_holds();
        drop(entry);
        for producer in producers {
            self.drop_implicit_source(producer);
        }

        tracing::debug!(node = %id, "node removed");
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .map(|entry| &entry.node)
            .ok_or_else(|| Self::unknown_node(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .map(|entry| &mut entry.node)
            .ok_or_else(|| Self::unknown_node(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Nodes no other node consumes from.
    pub fn sinks(&self) -> Vec<NodeId> {
        let consumed: IndexSet<NodeId> = self
            .nodes
            .values()
            .flat_map(|entry| entry.node.input_ports().map(|(_, port)| port.producer()))
            .collect();
        self.nodes
            .keys()
            .copied()
            .filter(|id| !consumed.contains(id))
            .collect()
    }

    pub fn mark_modified(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.mark_modified();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// A port bound to output `port` of `id`, for use as another node's input.
    pub fn output_port(&self, id: NodeId, port: PortId) -> Result<Port> {
        self.node(id)?;
        Ok(Port::new(id, port))
    }

    /// Replace (or create) input `input` of `consumer`.
    ///
    /// The consumer's outputs are invalidated and it is marked modified.
    /// Required inputs are not checked here.
    pub fn set_input_connection(&mut self, consumer: NodeId, input: PortId, port: Port) -> Result<()> {
        if !self.nodes.contains_key(&port.producer()) {
            return Err(EngineError::Lookup(format!(
                "cannot connect input {} of {}: producer {} is not in the pipeline",
                input,
                consumer,
                port.producer()
            )));
        }
        let producer = port.producer();
        let previous = self.node_mut(consumer)?.connect(input, port);
        tracing::debug!(node = %consumer, input, producer = %producer, "input connected");

        if let Some(previous) = previous {
            if previous.producer() != producer {
                self.drop_implicit_source(previous.producer());
            }
        }
        Ok(())
    }

    /// Feed raw data into input `input` of `consumer` through an implicit
    /// constant node. Returns the constant node's id.
    pub fn set_input_data(&mut self, consumer: NodeId, input: PortId, data: DataHandle) -> Result<NodeId> {
        self.set_input_source(consumer, input, ConstantSource::new(data))
    }

    pub fn set_input_data_sequence(
        &mut self,
        consumer: NodeId,
        input: PortId,
        data: Vec<DataHandle>,
    ) -> Result<NodeId> {
        self.set_input_source(consumer, input, ConstantSource::sequence(data))
    }

    fn set_input_source(&mut self, consumer: NodeId, input: PortId, source: ConstantSource) -> Result<NodeId> {
        self.node(consumer)?;
        let source_id = self.add_node(source)?;
        self.node_mut(source_id)?.implicit = true;
        let port = self.output_port(source_id, 0)?;
        self.set_input_connection(consumer, input, port)?;
        Ok(source_id)
    }

    /// Remove input `input` of `consumer`.
    pub fn disconnect_input(&mut self, consumer: NodeId, input: PortId) -> Result<()> {
        let previous = self.node_mut(consumer)?.disconnect(input).ok_or_else(|| {
            EngineError::Lookup(format!("{} has no input connection on port {}", consumer, input))
        })?;
        tracing::debug!(node = %consumer, input, "input disconnected");
        self.drop_implicit_source(previous.producer());
        Ok(())
    }

    /// Remove `id` if it is an implicit constant nothing consumes anymore.
    fn drop_implicit_source(&mut self, id: NodeId) {
        let Some(entry) = self.nodes.get(&id) else {
            return;
        };
        if !entry.node.implicit {
            return;
        }
        let still_used = self
            .nodes
            .values()
            .any(|other| other.node.input_ports().any(|(_, port)| port.producer() == id));
        if !still_used {
            self.nodes.shift_remove(&id);
            tracing::trace!(node = %id, "implicit source dropped");
        }
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    /// All objects in output `port` of `id`.
    ///
    /// An output tied to an input with `set_output_depends_on_input` is only
    /// readable while that input is connected and its producer has data.
    pub fn output_sequence(&self, id: NodeId, port: PortId) -> Result<&[DataHandle]> {
        let node = self.node(id)?;
        if let Some(input) = node.output_dependency(port) {
            let connection = node.input_port(input).map_err(|_| {
                EngineError::Lookup(format!(
                    "output {} of {} tracks input {}, which is not connected",
                    port, id, input
                ))
            })?;
            let upstream_ready = self
                .nodes
                .get(&connection.producer())
                .is_some_and(|entry| entry.node.has_output(connection.port_id()));
            if !upstream_ready {
                return Err(EngineError::Lookup(format!(
                    "output {} of {} tracks input {}, which has no data",
                    port, id, input
                )));
            }
        }
        node.output_sequence(port)
    }

    /// First object in output `port` of `id`.
    pub fn output_data(&self, id: NodeId, port: PortId) -> Result<DataHandle> {
        self.output_sequence(id, port)?
            .first()
            .cloned()
            .ok_or_else(|| EngineError::Lookup(format!("output {} of {} is empty", port, id)))
    }

    /// Store `data` in output `port` of `id`.
    pub fn set_output_data(&mut self, id: NodeId, port: PortId, data: DataHandle) -> Result<()> {
        self.node_mut(id)?.set_output_data(port, data);
        Ok(())
    }

    pub fn set_output_sequence(&mut self, id: NodeId, port: PortId, data: Vec<DataHandle>) -> Result<()> {
        self.node_mut(id)?.set_output_sequence(port, data);
        Ok(())
    }

    /// Current data on input `input` of `id`.
    pub fn input_data(&self, id: NodeId, input: PortId) -> Result<DataHandle> {
        self.node(id)?.input_port(input)?.data(self)
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    pub fn set_device(&mut self, id: NodeId, slot: DeviceSlot, device: DeviceHandle) -> Result<()> {
        let registry = Arc::clone(&self.services.registry);
        self.node_mut(id)?.set_device(slot, device, registry.as_ref())
    }

    pub fn set_main_device(&mut self, id: NodeId, device: DeviceHandle) -> Result<()> {
        self.set_device(id, MAIN_DEVICE, device)
    }

    pub fn set_device_criteria(&mut self, id: NodeId, slot: DeviceSlot, criteria: DeviceCriteria) -> Result<()> {
        let registry = Arc::clone(&self.services.registry);
        self.node_mut(id)?.set_device_criteria(slot, criteria, registry.as_ref())
    }

    pub fn set_main_device_criteria(&mut self, id: NodeId, criteria: DeviceCriteria) -> Result<()> {
        self.set_device_criteria(id, MAIN_DEVICE, criteria)
    }

    // ------------------------------------------------------------------
    // Measurements
    // ------------------------------------------------------------------

    /// `"execute"` timing of `id`.
    pub fn runtime(&self, id: NodeId) -> Result<RuntimeMeasurement> {
        self.node(id)?.runtime()
    }

    pub fn enable_runtime_measurements(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.enable_runtime_measurements();
        Ok(())
    }

    pub fn disable_runtime_measurements(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.disable_runtime_measurements();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Bring `id` up to date, executing it and its ancestors as needed.
    pub fn update(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.updating {
            tracing::trace!(node = %id, "already updating, skipping re-entry");
            return Ok(());
        }
        node.updating = true;

        let result = self.update_node(id);

        if let Some(entry) = self.nodes.get_mut(&id) {
            entry.node.updating = false;
        }
        result
    }

    /// Update every sink node, in insertion order.
    pub fn update_sinks(&mut self) -> Result<()> {
        for id in self.sinks() {
            self.update(id)?;
        }
        Ok(())
    }

    fn update_node(&mut self, id: NodeId) -> Result<()> {
        let parent_modified = self.refresh_inputs(id)?;

        let entry = self.nodes.get_mut(&id).ok_or_else(|| Self::unknown_node(id))?;
        if let Some(behavior) = entry.behavior.as_mut() {
            if behavior.poll_modified() {
                entry.node.modified = true;
            }
        }
        if !entry.node.modified && !parent_modified {
            return Ok(());
        }

        // Cleared before anything runs, so work triggered during execution
        // cannot loop back into another execution of this node.
        entry.node.modified = false;

        let result = self.execute_node(id);
        if result.is_err() {
            if let Some(entry) = self.nodes.get_mut(&id) {
                entry.node.modified = true;
            }
        }
        result
    }

    /// Update every producer and synchronize every port. Returns whether
    /// any port saw a change.
    ///
    /// A failing producer does not stop the pass: the remaining ports are
    /// still synchronized and the first error is returned afterwards. If any
    /// port changed, the node is left modified so the retry executes it.
    fn refresh_inputs(&mut self, id: NodeId) -> Result<bool> {
        let ports: SmallVec<[(PortId, Port); 4]> = self
            .node(id)?
            .input_ports()
            .map(|(input, port)| (input, port.clone()))
            .collect();

        let mut parent_modified = false;
        let mut first_error = None;
        for (input, port) in ports {
            if let Err(err) = self.update(port.producer()) {
                first_error.get_or_insert(err);
            }

            if port.is_modified(&*self) {
                let version = port.observe(&*self)?;
                if let Some(current) = self.node_mut(id)?.inputs.get_mut(&input) {
                    current.update_timestamp(version);
                }
                tracing::trace!(
                    node = %id,
                    input,
                    timestamp = %version.timestamp,
                    "input modified"
                );
                parent_modified = true;
            }
        }

        match first_error {
            Some(err) => {
                if parent_modified {
                    self.node_mut(id)?.modified = true;
                }
                Err(err)
            }
            None => Ok(parent_modified),
        }
    }

    fn resolve_inputs(&self, id: NodeId) -> Result<ResolvedInputs> {
        let mut inputs = ResolvedInputs::new();
        for (port_id, port) in self.node(id)?.input_ports() {
            if let Ok(data) = self.output_sequence(port.producer(), port.port_id()) {
                inputs.insert(port_id, data.iter().cloned().collect());
            }
        }
        Ok(inputs)
    }

    fn execute_node(&mut self, id: NodeId) -> Result<()> {
        let inputs = self.resolve_inputs(id)?;

        let entry = self.nodes.get_mut(&id).ok_or_else(|| Self::unknown_node(id))?;
        entry.node.check_required_inputs(&inputs)?;
        entry.node.check_input_device_slots()?;
        let mut behavior = entry.behavior.take().ok_or_else(|| {
            EngineError::Resource(format!("{} is already executing", id))
        })?;

        tracing::debug!(node = %id, name = entry.node.name(), "executing");
        entry.node.measurements.start_timer(EXECUTE_TIMER);
        let result = run_behavior(&mut entry.node, behavior.as_mut(), &inputs, &self.services);
        entry.node.measurements.stop_timer(EXECUTE_TIMER);
        entry.behavior = Some(behavior);

        if let Err(err) = &result {
            tracing::debug!(node = %id, error = %err, "execution failed");
        }
        result
    }

    /// Draw a renderer node with the pipeline's render context.
    pub fn draw(&mut self, id: NodeId) -> Result<()> {
        let entry = self.nodes.get_mut(&id).ok_or_else(|| Self::unknown_node(id))?;
        let render = self.services.render.as_ref().ok_or_else(|| {
            EngineError::Resource("no render context is attached to the pipeline".to_string())
        })?;
        match entry.behavior.as_mut() {
            Some(behavior) => behavior.draw(render),
            None => Err(EngineError::Resource(format!("{} is executing", id))),
        }
    }

    fn unknown_node(id: NodeId) -> EngineError {
        EngineError::Lookup(format!("{} is not in the pipeline", id))
    }
}

fn run_behavior(
    node: &mut Node,
    behavior: &mut dyn ProcessBehavior,
    inputs: &ResolvedInputs,
    services: &Services,
) -> Result<()> {
    node.retain_inputs(inputs);
    let timed = node.measurements.is_enabled();

    let mut ctx = ExecutionContext::new(node, inputs, services);
    let result = execute_steps(behavior, &mut ctx);
    // Released on failure too.
    ctx.node.release_inputs_after_execute();
    result?;
    if timed {
        behavior.wait_to_finish(&mut ctx)?;
    }
    Ok(())
}

fn execute_steps(behavior: &mut dyn ProcessBehavior, ctx: &mut ExecutionContext<'_>) -> Result<()> {
    behavior.pre_execute(ctx)?;
    behavior.execute(ctx)?;
    behavior.post_execute(ctx)
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputLookup for Pipeline {
    fn output_data(&self, node: NodeId, port: PortId) -> Result<DataHandle> {
        Pipeline::output_data(self, node, port)
    }
}
