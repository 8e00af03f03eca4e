//! Engine Configuration
//!
//! Configuration is a plain serde document. Every field has a default, so an
//! empty JSON object (`{}`) is a valid configuration.
//!
//! ```json
//! {
//!   "runtime_measurements": true,
//!   "log_filter": "dataflow_core=debug",
//!   "main_device": { "device_type": "gpu", "require_gl_interop": true },
//!   "stream": { "address": "10.0.0.7", "port": 14111 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceCriteria;
use crate::error::Result;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable runtime measurements on every node the pipeline creates.
    pub runtime_measurements: bool,

    /// Default filter directive for [`crate::telemetry::init_tracing`].
    pub log_filter: String,

    /// Criteria used to pick slot 0 for new nodes instead of the registry's
    /// default compute device.
    pub main_device: Option<DeviceCriteria>,

    /// Settings for streaming source nodes.
    pub stream: StreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime_measurements: false,
            log_filter: "info".to_string(),
            main_device: None,
            stream: StreamConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

/// Connection and pacing settings for a hardware stream worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Address of the streaming device.
    pub address: String,

    /// Port of the streaming device.
    pub port: u16,

    /// How often the worker checks its termination flag.
    pub poll_interval_ms: u64,

    /// Upper bound on the first-frame wait. `None` waits until a frame or a
    /// fault arrives.
    pub first_frame_timeout_ms: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            address: "192.168.1.1".to_string(),
            port: 14111,
            poll_interval_ms: 50,
            first_frame_timeout_ms: None,
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn first_frame_timeout(&self) -> Option<Duration> {
        self.first_frame_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.stream.port, 14111);
        assert!(config.stream.first_frame_timeout().is_none());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = EngineConfig::from_json_str(
            r#"{
                "runtime_measurements": true,
                "main_device": { "device_type": "gpu" },
                "stream": { "address": "10.0.0.7", "first_frame_timeout_ms": 250 }
            }"#,
        )
        .unwrap();

        assert!(config.runtime_measurements);
        assert_eq!(
            config.main_device.unwrap().device_type,
            Some(DeviceType::Gpu)
        );
        assert_eq!(config.stream.address, "10.0.0.7");
        assert_eq!(config.stream.port, 14111);
        assert_eq!(
            config.stream.first_frame_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn malformed_document_is_a_configuration_error() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let stream = StreamConfig {
            poll_interval_ms: 0,
            ..StreamConfig::default()
        };
        assert_eq!(stream.poll_interval(), Duration::from_millis(1));
    }
}
