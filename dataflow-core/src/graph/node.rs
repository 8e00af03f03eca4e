//! Graph Nodes
//!
//! This module defines the per-node state the pipeline keeps for every
//! vertex: connections, produced outputs, input policy, the device table,
//! and the dirty flag. The node-specific execution behavior lives beside it
//! in the pipeline (see [`super::ProcessBehavior`]).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::port::Port;
use crate::data::{DataHandle, DataIdentity};
use crate::device::{DeviceCriteria, DeviceHandle, DeviceRegistry, DeviceSlot, MAIN_DEVICE};
use crate::error::{EngineError, Result};
use crate::runtime::{MeasurementSink, RuntimeMeasurement, RuntimeMeasurements, EXECUTE_TIMER};

/// Identifier of an input or output port, unique per node and direction.
pub type PortId = u32;

/// Contents of one output slot. Most slots hold exactly one object.
pub type OutputData = SmallVec<[DataHandle; 1]>;

/// Input data resolved for one execution, keyed by input port.
pub type ResolvedInputs = IndexMap<PortId, OutputData>;

/// Unique identifier for a node in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The kind of node in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A zero-input producer of fixed data.
    Constant,

    /// A general processing node: inputs in, outputs out.
    Process,

    /// A source fed by a background worker.
    Stream,

    /// A node that turns its input into something drawable.
    Render,
}

/// Pipeline-owned state of one node.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,

    /// Connections, in the order they were made.
    pub(crate) inputs: IndexMap<PortId, Port>,

    outputs: IndexMap<PortId, OutputData>,

    required_inputs: IndexMap<PortId, bool>,

    release_after_execute: IndexMap<PortId, bool>,

    /// Device slots each input is used on.
    input_devices: IndexMap<PortId, SmallVec<[DeviceSlot; 2]>>,

    output_depends_on_input: IndexMap<PortId, PortId>,

    devices: IndexMap<DeviceSlot, DeviceHandle>,

    criteria: IndexMap<DeviceSlot, DeviceCriteria>,

    /// Input data this node currently keeps resident, per (input, slot).
    holds: IndexMap<(PortId, DeviceSlot), DataHandle>,

    pub(crate) modified: bool,

    /// Set while the pipeline is updating this node.
    pub(crate) updating: bool,

    /// Created by `Pipeline::set_input_data` and owned by that connection.
    pub(crate) implicit: bool,

    pub(crate) measurements: RuntimeMeasurements,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            required_inputs: IndexMap::new(),
            release_after_execute: IndexMap::new(),
            input_devices: IndexMap::new(),
            output_depends_on_input: IndexMap::new(),
            devices: IndexMap::new(),
            criteria: IndexMap::new(),
            holds: IndexMap::new(),
            modified: true,
            updating: false,
            implicit: false,
            measurements: RuntimeMeasurements::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Force re-execution on the next update.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    pub fn input_port(&self, port: PortId) -> Result<&Port> {
        self.inputs.get(&port).ok_or_else(|| {
            EngineError::Lookup(format!("{} has no input connection on port {}", self.label(), port))
        })
    }

    pub fn input_ports(&self) -> impl Iterator<Item = (PortId, &Port)> {
        self.inputs.iter().map(|(id, port)| (*id, port))
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Replace (or create) the connection at `port`.
    ///
    /// Cached outputs are invalidated and the node is marked modified.
    /// Returns the connection that was replaced, if any.
    pub(crate) fn connect(&mut self, port: PortId, connection: Port) -> Option<Port> {
        self.release_holds_for_input(port);
        let previous = self.inputs.insert(port, connection);
        self.invalidate();
        previous
    }

    /// Remove the connection at `port` with the same invalidation as
    /// [`Node::connect`].
    pub(crate) fn disconnect(&mut self, port: PortId) -> Option<Port> {
        self.release_holds_for_input(port);
        let previous = self.inputs.shift_remove(&port);
        if previous.is_some() {
            self.invalidate();
        }
        previous
    }

    fn invalidate(&mut self) {
        self.outputs.clear();
        self.modified = true;
    }

    pub fn set_input_required(&mut self, port: PortId, required: bool) {
        self.required_inputs.insert(port, required);
    }

    pub fn is_input_required(&self, port: PortId) -> bool {
        self.required_inputs.get(&port).copied().unwrap_or(false)
    }

    /// Release this node's hold on `port`'s device-resident data once each
    /// execution completes.
    pub fn release_input_after_execute(&mut self, port: PortId, release: bool) {
        self.release_after_execute.insert(port, release);
    }

    /// Declare the device slots `port`'s data is used on.
    pub fn set_input_devices(&mut self, port: PortId, slots: &[DeviceSlot]) {
        self.input_devices.insert(port, slots.iter().copied().collect());
    }

    pub fn input_devices(&self, port: PortId) -> &[DeviceSlot] {
        self.input_devices
            .get(&port)
            .map(|slots| slots.as_slice())
            .unwrap_or(&[])
    }

    /// Check every required input is present in `inputs`.
    pub(crate) fn check_required_inputs(&self, inputs: &ResolvedInputs) -> Result<()> {
        for (port, required) in &self.required_inputs {
            if !*required || inputs.contains_key(port) {
                continue;
            }
            let reason = if self.inputs.contains_key(port) {
                "its producer has no data"
            } else {
                "it is not connected"
            };
            return Err(EngineError::Precondition(format!(
                "{} is missing required input {}: {}",
                self.label(),
                port,
                reason
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    /// Store a single result in `port`, replacing whatever was there.
    pub fn set_output_data(&mut self, port: PortId, data: DataHandle) {
        let mut slot = OutputData::new();
        slot.push(data);
        self.outputs.insert(port, slot);
    }

    /// Store several results in `port`, replacing whatever was there.
    pub fn set_output_sequence(&mut self, port: PortId, data: Vec<DataHandle>) {
        self.outputs.insert(port, OutputData::from_vec(data));
    }

    /// Raw contents of an output slot.
    ///
    /// This does not apply dynamic input dependencies; use
    /// `Pipeline::output_sequence` for the consumer view.
    pub fn output_sequence(&self, port: PortId) -> Result<&[DataHandle]> {
        match self.outputs.get(&port) {
            Some(slot) if !slot.is_empty() => Ok(slot.as_slice()),
            _ => Err(EngineError::Lookup(format!(
                "could not find output data for port {} in {}",
                port,
                self.label()
            ))),
        }
    }

    pub fn has_output(&self, port: PortId) -> bool {
        self.outputs.get(&port).is_some_and(|slot| !slot.is_empty())
    }

    pub fn output_port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.outputs.keys().copied()
    }

    /// Tie the validity of `output` to `input`: the output is only readable
    /// while that input is connected and its producer has data.
    pub fn set_output_depends_on_input(&mut self, output: PortId, input: PortId) {
        self.output_depends_on_input.insert(output, input);
    }

    pub fn output_dependency(&self, output: PortId) -> Option<PortId> {
        self.output_depends_on_input.get(&output).copied()
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    pub fn device(&self, slot: DeviceSlot) -> Result<&DeviceHandle> {
        self.devices.get(&slot).ok_or_else(|| {
            EngineError::Configuration(format!("{} has no device in slot {}", self.label(), slot))
        })
    }

    pub fn main_device(&self) -> Result<&DeviceHandle> {
        self.device(MAIN_DEVICE)
    }

    pub fn device_criteria(&self, slot: DeviceSlot) -> Option<&DeviceCriteria> {
        self.criteria.get(&slot)
    }

    pub fn device_slots(&self) -> impl Iterator<Item = DeviceSlot> + '_ {
        self.devices.keys().copied()
    }

    /// Assign `device` to `slot`.
    ///
    /// Fails without touching the table if the slot has criteria the device
    /// does not satisfy. Replacing a device moves every input held on the
    /// slot from the old device to the new one.
    pub fn set_device(
        &mut self,
        slot: DeviceSlot,
        device: DeviceHandle,
        registry: &dyn DeviceRegistry,
    ) -> Result<()> {
        if let Some(criteria) = self.criteria.get(&slot) {
            if !registry.satisfies(&device, criteria) {
                return Err(EngineError::Configuration(format!(
                    "device {} does not satisfy the criteria of slot {} on {}",
                    device,
                    slot,
                    self.label()
                )));
            }
        }
        self.assign_device(slot, device);
        Ok(())
    }

    pub fn set_main_device(&mut self, device: DeviceHandle, registry: &dyn DeviceRegistry) -> Result<()> {
        self.set_device(MAIN_DEVICE, device, registry)
    }

    /// Record `criteria` for `slot` and assign the device the registry picks
    /// for it. If no device qualifies, nothing changes.
    pub fn set_device_criteria(
        &mut self,
        slot: DeviceSlot,
        criteria: DeviceCriteria,
        registry: &dyn DeviceRegistry,
    ) -> Result<()> {
        let device = registry.device_for(&criteria)?;
        self.criteria.insert(slot, criteria);
        self.assign_device(slot, device);
        Ok(())
    }

    pub fn set_main_device_criteria(
        &mut self,
        criteria: DeviceCriteria,
        registry: &dyn DeviceRegistry,
    ) -> Result<()> {
        self.set_device_criteria(MAIN_DEVICE, criteria, registry)
    }

    fn assign_device(&mut self, slot: DeviceSlot, device: DeviceHandle) {
        if let Some(old) = self.devices.get(&slot) {
            if !Arc::ptr_eq(old, &device) {
                for ((port, held_slot), data) in &self.holds {
                    if *held_slot == slot {
                        data.release(old);
                        data.retain(&device);
                        tracing::trace!(node = %self.id, input = port, slot, "moved input residency");
                    }
                }
                tracing::debug!(node = %self.id, slot, from = %old, to = %device, "device reassigned");
            }
        }
        self.devices.insert(slot, device);
    }

    // ------------------------------------------------------------------
    // Residency
    // ------------------------------------------------------------------

    /// Check every declared input device slot has a device.
    pub(crate) fn check_input_device_slots(&self) -> Result<()> {
        for (port, slots) in &self.input_devices {
            for slot in slots {
                if !self.devices.contains_key(slot) {
                    return Err(EngineError::Configuration(format!(
                        "input {} of {} is declared on device slot {} which has no device",
                        port,
                        self.label(),
                        slot
                    )));
                }
            }
        }
        Ok(())
    }

    /// Keep each input resident on the devices it is declared on.
    ///
    /// A hold on data that is no longer the input is released first.
    pub(crate) fn retain_inputs(&mut self, inputs: &ResolvedInputs) {
        for (port, slots) in &self.input_devices {
            let Some(data) = inputs.get(port).and_then(|seq| seq.first()) else {
                continue;
            };
            for slot in slots {
                let Some(device) = self.devices.get(slot) else {
                    continue;
                };
                let key = (*port, *slot);
                if let Some(held) = self.holds.get(&key) {
                    if held.identity() == data.identity() {
                        continue;
                    }
                    held.release(device);
                }
                data.retain(device);
                self.holds.insert(key, Arc::clone(data));
            }
        }
    }

    /// Release holds on inputs flagged release-after-execute.
    pub(crate) fn release_inputs_after_execute(&mut self) {
        let ports: SmallVec<[PortId; 4]> = self
            .release_after_execute
            .iter()
            .filter(|(_, release)| **release)
            .map(|(port, _)| *port)
            .collect();
        for port in ports {
            self.release_holds_for_input(port);
        }
    }

    fn release_holds_for_input(&mut self, port: PortId) {
        let devices = &self.devices;
        self.holds.retain(|(held_port, slot), data| {
            if *held_port != port {
                return true;
            }
            if let Some(device) = devices.get(slot) {
                if !data.release(device) {
                    tracing::warn!(input = port, slot, "released input that was not resident");
                }
            }
            false
        });
    }

    /// Drop every residency hold this node has.
    pub(crate) fn release_all_holds(&mut self) {
        let devices = &self.devices;
        for ((_, slot), data) in self.holds.drain(..) {
            if let Some(device) = devices.get(&slot) {
                data.release(device);
            }
        }
    }

    /// Identity of the data held for `port` on `slot`.
    pub fn held_input(&self, port: PortId, slot: DeviceSlot) -> Option<DataIdentity> {
        self.holds.get(&(port, slot)).map(|data| data.identity())
    }

    // ------------------------------------------------------------------
    // Runtime measurements
    // ------------------------------------------------------------------

    pub fn enable_runtime_measurements(&mut self) {
        self.measurements.enable();
    }

    pub fn disable_runtime_measurements(&mut self) {
        self.measurements.disable();
    }

    /// Timing of the `"execute"` step.
    pub fn runtime(&self) -> Result<RuntimeMeasurement> {
        self.measurements.timing(EXECUTE_TIMER)
    }

    pub fn runtime_named(&self, name: &str) -> Result<RuntimeMeasurement> {
        self.measurements.timing(name)
    }

    pub fn measurements(&self) -> &RuntimeMeasurements {
        &self.measurements
    }

    fn label(&self) -> String {
        format!("{} ({})", self.id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataObject;
    use crate::device::{Device, DeviceType, StaticDeviceRegistry};

    fn registry() -> StaticDeviceRegistry {
        StaticDeviceRegistry::new(vec![
            Device::new("cpu", "host", DeviceType::Cpu).into_handle(),
            Device::new("gpu", "vendor", DeviceType::Gpu).into_handle(),
        ])
        .unwrap()
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn new_node_starts_modified() {
        let node = Node::new("test", NodeKind::Process);
        assert!(node.is_modified());
        assert_eq!(node.kind(), NodeKind::Process);
    }

    #[test]
    fn set_output_overwrites_slot() {
        let mut node = Node::new("test", NodeKind::Process);
        node.set_output_sequence(0, vec![DataObject::new(1u8), DataObject::new(2u8)]);
        assert_eq!(node.output_sequence(0).unwrap().len(), 2);

        let replacement = DataObject::new(3u8);
        node.set_output_data(0, replacement.clone());
        let slot = node.output_sequence(0).unwrap();
        assert_eq!(slot.len(), 1);
        assert_eq!(slot[0].identity(), replacement.identity());
    }

    #[test]
    fn unknown_output_is_a_lookup_error() {
        let node = Node::new("test", NodeKind::Process);
        assert!(node.output_sequence(4).unwrap_err().is_lookup());
        assert!(!node.has_output(4));
    }

    #[test]
    fn connecting_clears_outputs_and_marks_modified() {
        let mut node = Node::new("test", NodeKind::Process);
        node.set_output_data(0, DataObject::new(1u8));
        node.modified = false;

        node.connect(0, Port::new(NodeId::new(), 0));

        assert!(node.is_modified());
        assert!(!node.has_output(0));
    }

    #[test]
    fn required_inputs_are_checked_against_resolved_data() {
        let mut node = Node::new("test", NodeKind::Process);
        node.set_input_required(0, true);
        node.set_input_required(1, false);

        let err = node.check_required_inputs(&ResolvedInputs::new()).unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("not connected"));

        let mut inputs = ResolvedInputs::new();
        inputs.insert(0, OutputData::from_vec(vec![DataObject::new(0u8)]));
        assert!(node.check_required_inputs(&inputs).is_ok());
    }

    #[test]
    fn criteria_rejects_device_and_keeps_table() {
        let registry = registry();
        let mut node = Node::new("test", NodeKind::Process);
        node.set_device_criteria(0, DeviceCriteria::new().device_type(DeviceType::Cpu), &registry)
            .unwrap();
        let before = node.main_device().unwrap().id();

        let gpu = registry.devices()[1].clone();
        let err = node.set_main_device(gpu, &registry).unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(node.main_device().unwrap().id(), before);
    }

    #[test]
    fn unresolvable_criteria_leaves_slot_untouched() {
        let registry = registry();
        let mut node = Node::new("test", NodeKind::Process);
        let err = node
            .set_device_criteria(2, DeviceCriteria::new().device_type(DeviceType::Accelerator), &registry)
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(node.device(2).is_err());
        assert!(node.device_criteria(2).is_none());
    }

    #[test]
    fn reassigning_a_device_moves_holds() {
        let registry = registry();
        let cpu = registry.devices()[0].clone();
        let gpu = registry.devices()[1].clone();

        let mut node = Node::new("test", NodeKind::Process);
        node.set_main_device(cpu.clone(), &registry).unwrap();
        node.set_input_devices(0, &[MAIN_DEVICE]);

        let data = DataObject::new(0u8);
        let mut inputs = ResolvedInputs::new();
        inputs.insert(0, OutputData::from_vec(vec![data.clone()]));
        node.retain_inputs(&inputs);
        assert_eq!(data.residency_count(cpu.id()), 1);

        node.set_main_device(gpu.clone(), &registry).unwrap();
        assert_eq!(data.residency_count(cpu.id()), 0);
        assert_eq!(data.residency_count(gpu.id()), 1);
    }

    #[test]
    fn retaining_the_same_input_twice_keeps_one_hold() {
        let registry = registry();
        let mut node = Node::new("test", NodeKind::Process);
        node.set_main_device(registry.devices()[0].clone(), &registry).unwrap();
        node.set_input_devices(0, &[MAIN_DEVICE]);

        let data = DataObject::new(0u8);
        let mut inputs = ResolvedInputs::new();
        inputs.insert(0, OutputData::from_vec(vec![data.clone()]));
        node.retain_inputs(&inputs);
        node.retain_inputs(&inputs);

        let device = node.main_device().unwrap().id();
        assert_eq!(data.residency_count(device), 1);
        assert_eq!(node.held_input(0, MAIN_DEVICE), Some(data.identity()));

        node.release_input_after_execute(0, true);
        node.release_inputs_after_execute();
        assert_eq!(data.residency_count(device), 0);
        assert_eq!(node.held_input(0, MAIN_DEVICE), None);
    }

    #[test]
    fn missing_input_device_slot_is_a_configuration_error() {
        let mut node = Node::new("test", NodeKind::Process);
        node.set_input_devices(0, &[3]);
        assert!(node.check_input_device_slots().unwrap_err().is_configuration());
    }
}
