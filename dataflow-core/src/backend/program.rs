//! Named compute programs with per-device build caching.

use indexmap::IndexMap;

use super::compute::{ComputeBackend, ProgramHandle, ProgramSource};
use crate::device::{Device, DeviceId};
use crate::error::{EngineError, Result};

/// Programs a node registers by name and builds on demand.
///
/// A build is cached per (name, device, build flags); asking for the same
/// combination again returns the cached handle without touching the backend.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    sources: IndexMap<String, ProgramSource>,
    builds: IndexMap<(String, DeviceId, String), ProgramHandle>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the source for `name`. Cached builds of a
    /// replaced program are dropped.
    pub fn register(&mut self, name: impl Into<String>, source: ProgramSource) {
        let name = name.into();
        self.builds.retain(|(program, _, _), _| *program != name);
        self.sources.insert(name, source);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Get a build of `name` for `device` with `build_flags`.
    pub fn build(
        &mut self,
        backend: &dyn ComputeBackend,
        device: &Device,
        name: &str,
        build_flags: &str,
    ) -> Result<ProgramHandle> {
        let source = self.sources.get(name).ok_or_else(|| {
            EngineError::Lookup(format!("no program named '{}' has been registered", name))
        })?;

        let key = (name.to_string(), device.id(), build_flags.to_string());
        if let Some(handle) = self.builds.get(&key) {
            return Ok(handle.clone());
        }

        tracing::debug!(program = name, device = %device, flags = build_flags, "building program");
        let handle = backend.build_program(device, name, source, build_flags)?;
        self.builds.insert(key, handle.clone());
        Ok(handle)
    }

    pub fn cached_builds(&self) -> usize {
        self.builds.len()
    }
}
