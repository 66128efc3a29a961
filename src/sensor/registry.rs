//! Sensor driver registry
//!
//! Drivers are looked up by their configured name and asked to probe for
//! devices. The registry aggregates the results into the sensor set the
//! agent polls for the lifetime of the process.

use super::Sensor;
use crate::config::DriversSection;
use crate::error::{AgentError, AgentResult};
use crate::protocol::topics::validate_sensor_id;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// A sensor type that can discover its devices
#[async_trait]
pub trait SensorDriver: Send + Sync {
    /// Name used in `agent.sensor_types`
    fn name(&self) -> &'static str;

    /// Probe all plausible addresses and return the working devices.
    /// Probe failures are logged and skipped, never returned.
    async fn enumerate(&self, settings: &DriversSection) -> Vec<Box<dyn Sensor>>;
}

/// Name -> driver mapping used to resolve configured sensor types
pub struct DriverRegistry {
    drivers: HashMap<&'static str, Box<dyn SensorDriver>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registry with every driver shipped in this crate
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(super::ds18b20::Ds18b20Driver));
        registry.register(Box::new(super::streaming::StreamingDriver));
        registry
    }

    /// Add a driver, replacing any driver registered under the same name
    pub fn register(&mut self, driver: Box<dyn SensorDriver>) {
        self.drivers.insert(driver.name(), driver);
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.drivers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Enumerate sensors for every configured type.
    ///
    /// Sensors whose id cannot be embedded in a topic are skipped, and only
    /// the first sensor reporting a given id is kept. An empty result is fatal.
    pub async fn enumerate(
        &self,
        sensor_types: &[String],
        settings: &DriversSection,
    ) -> AgentResult<Vec<Box<dyn Sensor>>> {
        if sensor_types.is_empty() {
            return Err(AgentError::NoSensorTypesConfigured);
        }

        // Resolve every name before probing any hardware
        let drivers = sensor_types
            .iter()
            .map(|name| {
                self.drivers
                    .get(name.as_str())
                    .ok_or_else(|| AgentError::UnknownSensorType(name.clone()))
            })
            .collect::<AgentResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut sensors: Vec<Box<dyn Sensor>> = Vec::new();

        for driver in drivers {
            let found = driver.enumerate(settings).await;
            info!(driver = driver.name(), count = found.len(), "Enumerated sensors");

            for sensor in found {
                let id = sensor.id().to_string();
                if let Err(e) = validate_sensor_id(&id) {
                    warn!(sensor_id = %id, error = %e, "Skipping sensor with unusable id");
                    continue;
                }
                if !seen.insert(id.clone()) {
                    warn!(sensor_id = %id, "Skipping duplicate sensor");
                    continue;
                }
                sensors.push(sensor);
            }
        }

        if sensors.is_empty() {
            return Err(AgentError::NoSensorsFound {
                types: sensor_types.to_vec(),
            });
        }

        Ok(sensors)
    }
}
