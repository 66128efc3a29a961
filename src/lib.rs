//! Sensor Agent - environmental sensor telemetry over MQTT
//!
//! Polls environmental sensors attached to a host device and publishes their
//! readings to an MQTT broker, together with Home Assistant discovery
//! metadata.
//!
//! # Overview
//!
//! - [`sensor`] - the sensor capability trait, measurement registry and drivers
//! - [`transport`] - the publish abstraction and the MQTT messaging link
//! - [`agent`] - the poll/publish loop and per-session discovery registration
//! - [`protocol`] - topic scheme and payload types
//!
//! # Quick Start
//!
//! ```rust
//! use sensor_agent::agent::build_state_payload;
//! use sensor_agent::config::{AgentConfig, MqttSection};
//! use sensor_agent::sensor::measurement::TEMPERATURE;
//! use sensor_agent::sensor::Sensor;
//! use sensor_agent::testing::MockSensor;
//!
//! # tokio_test::block_on(async {
//! let config = AgentConfig::new(MqttSection::new("localhost"));
//! let mut sensor = MockSensor::new("mock--1", &[&TEMPERATURE]);
//! sensor.update_reading().await.unwrap();
//!
//! let payload = build_state_payload(&sensor, &config);
//! assert_eq!(payload["temperature"], 21.5);
//! # });
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod sensor;
pub mod testing;
pub mod transport;

pub use agent::SensorAgent;
pub use config::{AgentConfig, ConfigError, MqttSection};
pub use error::{AgentError, AgentResult};
pub use sensor::{DriverRegistry, Measurement, MeasurementError, Sensor, SensorDriver, SensorInfo};
pub use transport::mqtt::{MqttLink, SessionStarted};
pub use transport::{PublishOutcome, Transport};
