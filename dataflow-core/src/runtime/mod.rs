//! Runtime measurement hooks.

mod measurement;

pub use measurement::{MeasurementSink, RuntimeMeasurement, RuntimeMeasurements, EXECUTE_TIMER};
