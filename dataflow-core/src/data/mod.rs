//! Data exchanged between nodes.
//!
//! Nodes never hand each other raw values. They publish [`DataObject`]s:
//! versioned, identity-stamped containers that consumers can cheaply test
//! for change. [`Image`] is the payload the built-in nodes produce and
//! consume; any other `Send + Sync` type works as well.

mod image;
mod object;

pub use image::{DataType, Image};
pub use object::{
    DataHandle, DataIdentity, DataObject, DataSnapshot, DataVersion, Payload, Timestamp,
};
