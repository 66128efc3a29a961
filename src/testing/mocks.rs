//! Mock implementations for testing
//!
//! Provides a recording Transport, a controllable Sensor and a Driver that
//! hands out prepared sensors, so the agent core can be tested without a
//! broker or hardware.

use crate::config::DriversSection;
use crate::sensor::measurement::Measurement;
use crate::sensor::registry::SensorDriver;
use crate::sensor::{MeasurementError, Readings, Sensor};
use crate::transport::{ConnectionState, PublishOutcome, QoS, Transport};
use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A message handed to the mock transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn payload_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Mock transport recording every publish
#[derive(Debug)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub dropped_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    connected: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Connected transport
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            dropped_messages: Arc::new(Mutex::new(Vec::new())),
            connected: AtomicBool::new(true),
        }
    }

    /// Transport that drops everything until `set_connected(true)`
    pub fn disconnected() -> Self {
        let transport = Self::new();
        transport.set_connected(false);
        transport
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn get_dropped_messages(&self) -> Vec<PublishedMessage> {
        self.dropped_messages.lock().await.clone()
    }

    /// Published messages whose topic equals `topic`
    pub async fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
        self.dropped_messages.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> PublishOutcome {
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        };

        if self.is_connected() {
            self.published_messages.lock().await.push(message);
            PublishOutcome::Queued
        } else {
            self.dropped_messages.lock().await.push(message);
            PublishOutcome::Dropped
        }
    }

    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

/// Shared control over a [`MockSensor`] after it was moved into the agent
#[derive(Debug, Clone, Default)]
pub struct MockSensorHandle {
    fail: Arc<AtomicBool>,
    values: Arc<Mutex<HashMap<&'static str, f64>>>,
    updates: Arc<AtomicUsize>,
}

impl MockSensorHandle {
    /// Make the next reads fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub async fn set_value(&self, name: &'static str, value: f64) {
        self.values.lock().await.insert(name, value);
    }

    pub async fn remove_value(&self, name: &str) {
        self.values.lock().await.remove(name);
    }

    /// Number of `update_reading` calls so far
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

/// Mock sensor with values controlled through a [`MockSensorHandle`]
#[derive(Debug)]
pub struct MockSensor {
    id: String,
    measurements: Vec<&'static Measurement>,
    readings: Readings,
    handle: MockSensorHandle,
}

impl MockSensor {
    /// Sensor reporting 21.5 for every supported measurement
    pub fn new(id: &str, measurements: &[&'static Measurement]) -> Self {
        let values = measurements.iter().map(|m| (m.name, 21.5)).collect();
        let handle = MockSensorHandle {
            values: Arc::new(Mutex::new(values)),
            ..Default::default()
        };

        Self {
            id: id.to_string(),
            measurements: measurements.to_vec(),
            readings: Readings::new(),
            handle,
        }
    }

    pub fn handle(&self) -> MockSensorHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Sensor for MockSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn manufacturer(&self) -> &str {
        "Acme"
    }

    fn model(&self) -> &str {
        "MOCK1"
    }

    fn serial_number(&self) -> String {
        format!("serial-{}", self.id)
    }

    fn supported_measurements(&self) -> &[&'static Measurement] {
        &self.measurements
    }

    async fn update_reading(&mut self) -> Result<(), MeasurementError> {
        self.handle.updates.fetch_add(1, Ordering::SeqCst);
        if self.handle.fail.load(Ordering::SeqCst) {
            return Err(MeasurementError::new("mock sensor failure"));
        }

        let values: Vec<_> = self
            .handle
            .values
            .lock()
            .await
            .iter()
            .map(|(name, value)| (*name, *value))
            .collect();
        self.readings.record(values, Local::now());
        Ok(())
    }

    fn readings(&self) -> &Readings {
        &self.readings
    }
}

/// Driver returning prepared sensors once
pub struct MockDriver {
    name: &'static str,
    sensors: Mutex<Vec<Box<dyn Sensor>>>,
}

impl MockDriver {
    pub fn new(name: &'static str, sensors: Vec<MockSensor>) -> Self {
        Self {
            name,
            sensors: Mutex::new(
                sensors
                    .into_iter()
                    .map(|s| Box::new(s) as Box<dyn Sensor>)
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SensorDriver for MockDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn enumerate(&self, _settings: &DriversSection) -> Vec<Box<dyn Sensor>> {
        std::mem::take(&mut *self.sensors.lock().await)
    }
}
