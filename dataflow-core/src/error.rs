//! Engine Errors
//!
//! Every fallible operation in the engine returns [`EngineError`]. The four
//! domain variants map onto the failure classes a pipeline driver has to
//! distinguish:
//!
//! - `Configuration`: a device fails its slot's criteria, an unknown device
//!   slot is requested, or a configuration file is malformed.
//! - `Precondition`: a node is asked to execute without the inputs it
//!   declared as required (or with input it cannot process).
//! - `Resource`: a render context could not be bound, a program failed to
//!   build, or a hardware stream failed to connect/disconnect.
//! - `Lookup`: an unknown node or port id, or a producer that has not yet
//!   produced anything for the requested slot.
//!
//! Errors are always surfaced synchronously out of `update`. The engine
//! never retries on its own.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EngineError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Parse(_))
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(EngineError::Configuration("x".into()).is_configuration());
        assert!(EngineError::Precondition("x".into()).is_precondition());
        assert!(EngineError::Resource("x".into()).is_resource());
        assert!(EngineError::Lookup("x".into()).is_lookup());
        assert!(!EngineError::Lookup("x".into()).is_resource());
    }

    #[test]
    fn display_includes_message() {
        let err = EngineError::Lookup("no output data for port 3".into());
        assert_eq!(err.to_string(), "lookup failed: no output data for port 3");
    }
}
