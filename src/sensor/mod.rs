//! Sensor capability interface
//!
//! Every physical or logical device the agent polls is exposed through the
//! [`Sensor`] trait. Drivers own the bus I/O; the agent only sees a stable id,
//! identity metadata, the supported measurements and the last readings.

pub mod ds18b20;
pub mod measurement;
pub mod registry;
pub mod streaming;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use thiserror::Error;

pub use measurement::Measurement;
pub use registry::{DriverRegistry, SensorDriver};

/// A sensor could not produce a reading this cycle
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Unable to read measurement data from sensor: {message}")]
pub struct MeasurementError {
    pub message: String,
}

impl MeasurementError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Last successful readings of one sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    values: HashMap<&'static str, f64>,
    timestamp: Option<DateTime<Local>>,
}

impl Readings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for a measurement, absent until first read
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Time of the last successful update
    pub fn timestamp(&self) -> Option<DateTime<Local>> {
        self.timestamp
    }

    /// Replace values after a successful read and stamp the update time
    pub fn record<I>(&mut self, values: I, at: DateTime<Local>)
    where
        I: IntoIterator<Item = (&'static str, f64)>,
    {
        for (name, value) in values {
            self.values.insert(name, value);
        }
        self.timestamp = Some(at);
    }
}

/// Capability handle for one device.
///
/// Implementations must report an id that is deterministic across restarts
/// for the same wiring and safe to embed in a topic.
#[async_trait]
pub trait Sensor: Send {
    /// Stable, lower-case unique identifier
    fn id(&self) -> &str;

    fn manufacturer(&self) -> &str;

    fn model(&self) -> &str;

    /// Hardware serial number or wiring address as reported in attributes
    fn serial_number(&self) -> String;

    /// Measurements this device reports, in publish order
    fn supported_measurements(&self) -> &[&'static Measurement];

    /// Refresh readings from the device. On error previous readings are kept.
    async fn update_reading(&mut self) -> Result<(), MeasurementError>;

    fn readings(&self) -> &Readings;
}

/// Immutable identity snapshot of a sensor, safe to share outside the poll loop
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub id: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub measurements: Vec<&'static Measurement>,
}

impl SensorInfo {
    pub fn from_sensor(sensor: &dyn Sensor) -> Self {
        Self {
            id: sensor.id().to_string(),
            manufacturer: sensor.manufacturer().to_string(),
            model: sensor.model().to_string(),
            serial_number: sensor.serial_number(),
            measurements: sensor.supported_measurements().to_vec(),
        }
    }
}

/// Build the canonical `<model>--<suffix>` sensor id
pub fn sensor_id(model: &str, suffix: &str) -> String {
    format!("{model}--{suffix}").to_lowercase()
}
