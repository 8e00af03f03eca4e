//! Ports
//!
//! A [`Port`] is the consumer's end of an edge: it names one output slot of
//! a producing node and remembers the version of that output it last
//! observed. The producer is referenced by [`NodeId`] only, so a port never
//! keeps its producer alive.
//!
//! # Change Detection
//!
//! A port is modified when the producer's current output differs from the
//! cached observation in **either** timestamp **or** identity. The identity
//! check catches a producer that swaps in a different object without
//! bumping a version. A producer that has not produced anything yet is
//! reported as unmodified rather than as an error.

use std::hash::{Hash, Hasher};

use super::node::{NodeId, PortId};
use crate::data::{DataHandle, DataIdentity, DataVersion, Timestamp};
use crate::error::Result;

/// Read access to producer outputs, as seen by a consumer.
pub trait OutputLookup {
    /// First object in `port` of `node`.
    fn output_data(&self, node: NodeId, port: PortId) -> Result<DataHandle>;
}

/// A consumer's reference to one producer output.
#[derive(Debug, Clone)]
pub struct Port {
    port_id: PortId,
    producer: NodeId,
    timestamp: Timestamp,
    identity: Option<DataIdentity>,
}

impl Port {
    pub(crate) fn new(producer: NodeId, port_id: PortId) -> Self {
        Self {
            port_id,
            producer,
            timestamp: Timestamp::ZERO,
            identity: None,
        }
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    pub fn producer(&self) -> NodeId {
        self.producer
    }

    /// Timestamp recorded at the last observation.
    pub fn last_timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Identity recorded at the last observation, `None` before the first.
    pub fn last_identity(&self) -> Option<DataIdentity> {
        self.identity
    }

    /// Check whether the producer's output changed since the last
    /// observation.
    pub fn is_modified(&self, outputs: &dyn OutputLookup) -> bool {
        match outputs.output_data(self.producer, self.port_id) {
            Ok(data) => {
                let current = data.version();
                current.timestamp != self.timestamp || Some(current.identity) != self.identity
            }
            Err(_) => false,
        }
    }

    /// Read the producer's current output version.
    pub fn observe(&self, outputs: &dyn OutputLookup) -> Result<DataVersion> {
        Ok(outputs.output_data(self.producer, self.port_id)?.version())
    }

    /// Record `version` as observed.
    pub fn update_timestamp(&mut self, version: DataVersion) {
        self.timestamp = version.timestamp;
        self.identity = Some(version.identity);
    }

    /// The producer's current output.
    pub fn data(&self, outputs: &dyn OutputLookup) -> Result<DataHandle> {
        outputs.output_data(self.producer, self.port_id)
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.producer == other.producer && self.port_id == other.port_id
    }
}

impl Eq for Port {}

impl Hash for Port {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.producer.hash(state);
        self.port_id.hash(state);
    }
}
