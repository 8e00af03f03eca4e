//! Runtime Measurements
//!
//! Named wall-clock timers with aggregated statistics. Every node owns a
//! [`RuntimeMeasurements`] and wraps its execution in the `"execute"`
//! timer. Measurements are disabled by default; a disabled manager ignores
//! `start_timer`/`stop_timer` entirely, so it has no effect on execution.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::error::{EngineError, Result};

/// Name of the timer wrapped around every node execution.
pub const EXECUTE_TIMER: &str = "execute";

/// Consumed contract of a measurement sink.
pub trait MeasurementSink {
    fn start_timer(&mut self, name: &str);

    fn stop_timer(&mut self, name: &str);

    fn timing(&self, name: &str) -> Result<RuntimeMeasurement>;
}

/// Aggregated statistics for one named timer.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeMeasurement {
    name: String,
    samples: u64,
    total: Duration,
    min: Duration,
    max: Duration,
    last: Duration,
    /// Sum of squared sample lengths in milliseconds, for the deviation.
    sum_of_squares_ms: f64,
}

impl RuntimeMeasurement {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            samples: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            last: Duration::ZERO,
            sum_of_squares_ms: 0.0,
        }
    }

    fn add_sample(&mut self, sample: Duration) {
        self.samples += 1;
        self.total += sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.last = sample;
        let ms = sample.as_secs_f64() * 1000.0;
        self.sum_of_squares_ms += ms * ms;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// Shortest sample, zero if there are none.
    pub fn min(&self) -> Duration {
        if self.samples == 0 {
            Duration::ZERO
        } else {
            self.min
        }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn last(&self) -> Duration {
        self.last
    }

    pub fn mean(&self) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        self.total / self.samples as u32
    }

    /// Standard deviation in milliseconds.
    pub fn std_dev_ms(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        let n = self.samples as f64;
        let mean = self.total.as_secs_f64() * 1000.0 / n;
        (self.sum_of_squares_ms / n - mean * mean).max(0.0).sqrt()
    }
}

impl fmt::Display for RuntimeMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} samples, mean {:.3} ms (min {:.3}, max {:.3}, sd {:.3})",
            self.name,
            self.samples,
            self.mean().as_secs_f64() * 1000.0,
            self.min().as_secs_f64() * 1000.0,
            self.max.as_secs_f64() * 1000.0,
            self.std_dev_ms()
        )
    }
}

/// A set of named timers that can be switched on and off.
#[derive(Debug, Default)]
pub struct RuntimeMeasurements {
    enabled: bool,
    running: HashMap<String, Instant>,
    timings: IndexMap<String, RuntimeMeasurement>,
}

impl RuntimeMeasurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Disable measurement. Timers still running are discarded.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.running.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// All recorded timings, in the order they were first recorded.
    pub fn timings(&self) -> impl Iterator<Item = &RuntimeMeasurement> {
        self.timings.values()
    }

    pub fn clear(&mut self) {
        self.running.clear();
        self.timings.clear();
    }
}

impl MeasurementSink for RuntimeMeasurements {
    fn start_timer(&mut self, name: &str) {
        if self.enabled {
            self.running.insert(name.to_string(), Instant::now());
        }
    }

    fn stop_timer(&mut self, name: &str) {
        if !self.enabled {
            return;
        }
        let Some(started) = self.running.remove(name) else {
            tracing::warn!(timer = name, "stop_timer called without a matching start");
            return;
        };
        self.timings
            .entry(name.to_string())
            .or_insert_with(|| RuntimeMeasurement::new(name))
            .add_sample(started.elapsed());
    }

    fn timing(&self, name: &str) -> Result<RuntimeMeasurement> {
        self.timings
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Lookup(format!("no runtime measurement named '{}'", name)))
    }
}
