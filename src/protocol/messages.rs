//! Message types published by the sensor agent
//!
//! Defines the discovery document consumed by the home-automation hub, the
//! retained attributes message, availability payloads and the flat state
//! payload, together with the delivery settings of each message kind.

use rumqttc::v5::mqttbytes::QoS;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat `measurement name -> rounded value` map plus `timestamp`
pub type StatePayload = Map<String, Value>;

/// Timestamp format of state payloads: local time, second precision
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The kinds of message the agent publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Status,
    State,
    Attributes,
    Discovery,
}

impl MessageKind {
    /// Metadata is retained so the broker serves it to late subscribers
    pub fn retain(self) -> bool {
        matches!(self, MessageKind::Attributes | MessageKind::Discovery)
    }

    pub fn qos(self) -> QoS {
        if self.retain() {
            QoS::AtLeastOnce
        } else {
            QoS::AtMostOnce
        }
    }
}

/// Sensor availability published on the status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_str(self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device block of a discovery document
///
/// # Examples
/// ```
/// use sensor_agent::protocol::DeviceDescriptor;
///
/// let device = DeviceDescriptor {
///     identifiers: vec!["bme280--1a2b3c4d".to_string()],
///     manufacturer: "Bosch".to_string(),
///     model: "BME280".to_string(),
///     via_device: None,
///     name: "BME280 Environmental Sensor".to_string(),
/// };
/// let json = serde_json::to_value(&device).unwrap();
/// assert!(json.get("via_device").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
    /// Host bridge id, only when configured
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub via_device: Option<String>,
    pub name: String,
}

/// Discovery document for one sensor measurement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub json_attributes_topic: String,
    pub device: DeviceDescriptor,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unit_of_measurement: Option<String>,
    pub name: String,
    pub value_template: String,
    pub force_update: bool,
    /// Seconds without an update before the hub marks the entity unavailable
    pub expire_after: u64,
}

/// Retained per-sensor attributes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributesMessage {
    pub serial_number: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,
}
