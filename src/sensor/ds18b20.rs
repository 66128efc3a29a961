//! DS18B20 1-Wire temperature sensor
//!
//! Reads the kernel w1-therm driver's sysfs files. Each device appears as a
//! `28-<serial>` directory whose `w1_slave` file holds the last conversion:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```

use super::measurement::{Measurement, TEMPERATURE};
use super::registry::SensorDriver;
use super::{sensor_id, MeasurementError, Readings, Sensor};
use crate::config::DriversSection;
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const FAMILY_PREFIX: &str = "28-";
const SLAVE_FILE: &str = "w1_slave";
const MODEL: &str = "DS18B20";
/// Power-on value of the scratchpad, reported when no conversion happened
const RESET_VALUE_MILLIDEGREES: i64 = 85_000;

static MEASUREMENTS: [&Measurement; 1] = [&TEMPERATURE];

/// Parse the content of a `w1_slave` file into degrees Celsius
pub fn parse_w1_slave(content: &str) -> Result<f64, MeasurementError> {
    let mut lines = content.lines();
    let crc_line = lines
        .next()
        .ok_or_else(|| MeasurementError::new("empty w1_slave file"))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(MeasurementError::new("sensor not ready (CRC check failed)"));
    }

    let raw = lines
        .next()
        .and_then(|line| line.split("t=").nth(1))
        .ok_or_else(|| MeasurementError::new("temperature value missing"))?;
    let millidegrees: i64 = raw
        .trim()
        .parse()
        .map_err(|_| MeasurementError::new(format!("invalid temperature value '{}'", raw.trim())))?;

    if millidegrees == RESET_VALUE_MILLIDEGREES {
        return Err(MeasurementError::new(
            "sensor reported its power-on reset value",
        ));
    }

    Ok(millidegrees as f64 / 1000.0)
}

/// One DS18B20 on the 1-Wire bus
#[derive(Debug)]
pub struct Ds18b20Sensor {
    id: String,
    serial: u64,
    device_dir: PathBuf,
    readings: Readings,
}

impl Ds18b20Sensor {
    /// Build a sensor from its `28-<serial>` device directory
    pub fn from_device_dir(device_dir: &Path) -> Result<Self, MeasurementError> {
        let name = device_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MeasurementError::new("device directory has no name"))?;
        let hex = name
            .strip_prefix(FAMILY_PREFIX)
            .ok_or_else(|| MeasurementError::new(format!("'{name}' is not a DS18B20")))?;
        let serial = u64::from_str_radix(hex, 16)
            .map_err(|_| MeasurementError::new(format!("invalid serial in '{name}'")))?;

        Ok(Self {
            id: sensor_id(MODEL, &format!("{serial:012x}")),
            serial,
            device_dir: device_dir.to_path_buf(),
            readings: Readings::new(),
        })
    }
}

#[async_trait]
impl Sensor for Ds18b20Sensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn manufacturer(&self) -> &str {
        "MAXIM"
    }

    fn model(&self) -> &str {
        MODEL
    }

    fn serial_number(&self) -> String {
        format!("{:012x}", self.serial)
    }

    fn supported_measurements(&self) -> &[&'static Measurement] {
        &MEASUREMENTS
    }

    async fn update_reading(&mut self) -> Result<(), MeasurementError> {
        let path = self.device_dir.join(SLAVE_FILE);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MeasurementError::new(format!("{}: {e}", path.display())))?;
        let celsius = parse_w1_slave(&content)?;
        self.readings.record([(TEMPERATURE.name, celsius)], Local::now());
        Ok(())
    }

    fn readings(&self) -> &Readings {
        &self.readings
    }
}

/// Driver enumerating DS18B20 devices from sysfs
pub struct Ds18b20Driver;

impl Ds18b20Driver {
    async fn device_dirs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(root).await?;
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_ds18b20 = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(FAMILY_PREFIX));
            if is_ds18b20 {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

#[async_trait]
impl SensorDriver for Ds18b20Driver {
    fn name(&self) -> &'static str {
        "ds18b20"
    }

    async fn enumerate(&self, settings: &DriversSection) -> Vec<Box<dyn Sensor>> {
        let root = &settings.ds18b20.sysfs_root;
        let dirs = match Self::device_dirs(root).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "Unable to list 1-Wire devices");
                return Vec::new();
            }
        };

        let mut sensors: Vec<Box<dyn Sensor>> = Vec::new();
        for dir in dirs {
            if tokio::fs::metadata(dir.join(SLAVE_FILE)).await.is_err() {
                warn!(path = %dir.display(), "Skipping 1-Wire device without {}", SLAVE_FILE);
                continue;
            }
            match Ds18b20Sensor::from_device_dir(&dir) {
                Ok(sensor) => {
                    info!(sensor_id = %sensor.id(), "Found DS18B20 sensor");
                    sensors.push(Box::new(sensor));
                }
                Err(e) => warn!(path = %dir.display(), error = %e, "Error initialising DS18B20 sensor"),
            }
        }
        sensors
    }
}
