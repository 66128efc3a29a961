//! Sensors fed by a helper process streaming line-delimited JSON
//!
//! Some devices (the BME680 with Bosch's BSEC library) are only readable
//! through a vendor binary that prints one JSON object per sample. A
//! background task reads those lines into a shared slot; `update_reading`
//! takes the latest sample from the slot and never blocks on the process.

use super::measurement::{self, Measurement};
use super::registry::SensorDriver;
use super::{sensor_id, MeasurementError, Readings, Sensor};
use crate::config::{DriversSection, StreamingDevice};
use async_trait::async_trait;
use chrono::Local;
use serde_json::{Map, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay before a helper process that exited is started again
const RESPAWN_DELAY: Duration = Duration::from_secs(2);

/// One line of helper output
#[derive(Debug, Clone)]
pub struct Sample {
    pub values: Map<String, Value>,
    pub received: Instant,
}

impl Sample {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            received: Instant::now(),
        }
    }
}

/// Latest sample, written by the reader task and read by the poll loop
pub type SampleSlot = Arc<RwLock<Option<Sample>>>;

/// Read JSON lines until EOF, storing every object in `slot`
pub async fn read_samples<R>(reader: R, slot: &SampleSlot)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(Value::Object(values)) => {
                        *slot.write().await = Some(Sample::new(values));
                    }
                    Ok(_) => warn!("Ignoring helper output that is not a JSON object"),
                    Err(e) => warn!(error = %e, "Ignoring malformed helper output"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read helper output");
                break;
            }
        }
    }
}

/// Keep the helper process running, restarting it after it exits
async fn supervise_process(command: String, args: Vec<String>, slot: SampleSlot) {
    loop {
        let spawned = Command::new(&command)
            .args(&args)
            .stdout(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(mut child) => {
                info!(command = %command, "Started sensor helper process");
                if let Some(stdout) = child.stdout.take() {
                    read_samples(BufReader::new(stdout), &slot).await;
                }
                match child.wait().await {
                    Ok(status) => warn!(command = %command, status = %status, "Sensor helper process exited"),
                    Err(e) => warn!(command = %command, error = %e, "Sensor helper process failed"),
                }
            }
            Err(e) => warn!(command = %command, error = %e, "Unable to start sensor helper process"),
        }

        tokio::time::sleep(RESPAWN_DELAY).await;
    }
}

/// A sensor whose readings come from a [`SampleSlot`]
#[derive(Debug)]
pub struct StreamingSensor {
    id: String,
    manufacturer: String,
    model: String,
    serial: String,
    measurements: Vec<&'static Measurement>,
    max_age: Duration,
    slot: SampleSlot,
    readings: Readings,
    reader: Option<JoinHandle<()>>,
}

impl StreamingSensor {
    /// Sensor reading from an existing slot; no background task is started
    pub fn with_slot(device: &StreamingDevice, slot: SampleSlot) -> Result<Self, MeasurementError> {
        let measurements = device
            .measurements
            .iter()
            .map(|name| {
                measurement::lookup(name)
                    .ok_or_else(|| MeasurementError::new(format!("unknown measurement '{name}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let serial = device.serial.clone().unwrap_or_else(|| device.address.clone());

        Ok(Self {
            id: sensor_id(&device.model, &serial),
            manufacturer: device.manufacturer.clone(),
            model: device.model.clone(),
            serial,
            measurements,
            max_age: Duration::from_secs(device.max_age_secs),
            slot,
            readings: Readings::new(),
            reader: None,
        })
    }

    /// Start the helper process for `device` and read its output in the background
    pub fn spawn(device: &StreamingDevice) -> Result<Self, MeasurementError> {
        let slot = SampleSlot::default();
        let mut sensor = Self::with_slot(device, slot.clone())?;
        sensor.reader = Some(tokio::spawn(supervise_process(
            device.command.clone(),
            device.args.clone(),
            slot,
        )));
        Ok(sensor)
    }

    /// Feed the sensor from an arbitrary line source
    pub fn from_reader<R>(device: &StreamingDevice, reader: R) -> Result<Self, MeasurementError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let slot = SampleSlot::default();
        let mut sensor = Self::with_slot(device, slot.clone())?;
        sensor.reader = Some(tokio::spawn(async move {
            read_samples(reader, &slot).await;
        }));
        Ok(sensor)
    }
}

impl Drop for StreamingSensor {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl Sensor for StreamingSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn serial_number(&self) -> String {
        self.serial.clone()
    }

    fn supported_measurements(&self) -> &[&'static Measurement] {
        &self.measurements
    }

    async fn update_reading(&mut self) -> Result<(), MeasurementError> {
        let values = {
            let slot = self.slot.read().await;
            let sample = slot
                .as_ref()
                .ok_or_else(|| MeasurementError::new("no data from helper process (sensor not ready?)"))?;

            let age = sample.received.elapsed();
            if age > self.max_age {
                return Err(MeasurementError::new(format!(
                    "latest sample is {}s old",
                    age.as_secs()
                )));
            }

            self.measurements
                .iter()
                .map(|m| {
                    sample
                        .values
                        .get(m.name)
                        .and_then(Value::as_f64)
                        .map(|value| (m.name, value))
                        .ok_or_else(|| {
                            MeasurementError::new(format!("reading '{}' not found in sample", m.name))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        debug!(sensor_id = %self.id, "Read latest helper sample");
        self.readings.record(values, Local::now());
        Ok(())
    }

    fn readings(&self) -> &Readings {
        &self.readings
    }
}

/// Driver for the `[[drivers.streaming.devices]]` entries
pub struct StreamingDriver;

#[async_trait]
impl SensorDriver for StreamingDriver {
    fn name(&self) -> &'static str {
        "streaming"
    }

    async fn enumerate(&self, settings: &DriversSection) -> Vec<Box<dyn Sensor>> {
        let mut sensors: Vec<Box<dyn Sensor>> = Vec::new();
        for device in &settings.streaming.devices {
            match StreamingSensor::spawn(device) {
                Ok(sensor) => {
                    info!(sensor_id = %sensor.id(), address = %device.address, "Found streaming sensor");
                    sensors.push(Box::new(sensor));
                }
                Err(e) => warn!(model = %device.model, address = %device.address, error = %e, "Error initialising streaming sensor"),
            }
        }
        sensors
    }
}
