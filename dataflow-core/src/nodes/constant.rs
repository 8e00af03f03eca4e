use crate::data::DataHandle;
use crate::device::DeviceRegistry;
use crate::error::Result;
use crate::graph::{ExecutionContext, Node, NodeKind, ProcessBehavior};

/// Zero-input node publishing fixed data on output 0.
///
/// The data is published when the node is added, so consumers can read it
/// before the constant has ever been updated. Mutating the object in place
/// (`DataObject::replace`, `DataObject::touch`) is what downstream nodes see
/// as a change.
pub struct ConstantSource {
    data: Vec<DataHandle>,
}

impl ConstantSource {
    pub fn new(data: DataHandle) -> Self {
        Self { data: vec![data] }
    }

    pub fn sequence(data: Vec<DataHandle>) -> Self {
        Self { data }
    }
}

impl ProcessBehavior for ConstantSource {
    fn kind(&self) -> NodeKind {
        NodeKind::Constant
    }

    fn name(&self) -> &str {
        "constant"
    }

    fn configure(&mut self, node: &mut Node, _devices: &dyn DeviceRegistry) -> Result<()> {
        node.set_output_sequence(0, self.data.clone());
        Ok(())
    }

    fn execute(&mut self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
}
