//! Topic naming and sensor id validation
//!
//! The topic scheme is fixed and case-sensitive:
//!
//! - `sensors/{id}/status`
//! - `sensors/{id}/state`
//! - `sensors/{id}/attributes`
//! - `{prefix}/sensor/{id}/{id}-{measurement}/config`

use thiserror::Error;

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Availability topic: `sensors/{sensor_id}/status`
    pub fn status_topic(sensor_id: &str) -> String {
        format!("sensors/{sensor_id}/status")
    }

    /// Readings topic: `sensors/{sensor_id}/state`
    pub fn state_topic(sensor_id: &str) -> String {
        format!("sensors/{sensor_id}/state")
    }

    /// Attributes topic: `sensors/{sensor_id}/attributes`
    pub fn attributes_topic(sensor_id: &str) -> String {
        format!("sensors/{sensor_id}/attributes")
    }

    /// Entity unique id: `{sensor_id}-{measurement}`
    pub fn unique_id(sensor_id: &str, measurement: &str) -> String {
        format!("{sensor_id}-{measurement}")
    }

    /// Discovery topic: `{prefix}/sensor/{sensor_id}/{sensor_id}-{measurement}/config`
    pub fn discovery_topic(prefix: &str, sensor_id: &str, measurement: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        let unique_id = Self::unique_id(sensor_id, measurement);
        format!("{prefix}/sensor/{sensor_id}/{unique_id}/config")
    }
}

/// Check that a sensor id can be embedded as a single topic level
pub fn validate_sensor_id(sensor_id: &str) -> Result<(), ValidationError> {
    if sensor_id.is_empty() {
        return Err(ValidationError::EmptySensorId);
    }

    for ch in sensor_id.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_whitespace() || ch.is_control() {
            return Err(ValidationError::InvalidSensorIdChar(ch));
        }
    }

    if sensor_id.chars().any(|c| c.is_uppercase()) {
        return Err(ValidationError::NotLowerCase(sensor_id.to_string()));
    }

    Ok(())
}

/// Sensor id validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Sensor ID cannot be empty")]
    EmptySensorId,
    #[error("Sensor ID contains invalid character: '{0}'")]
    InvalidSensorIdChar(char),
    #[error("Sensor ID must be lower case: {0}")]
    NotLowerCase(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sensor_topics() {
        assert_eq!(
            TopicBuilder::status_topic("bme280--1a2b3c4d"),
            "sensors/bme280--1a2b3c4d/status"
        );
        assert_eq!(
            TopicBuilder::state_topic("bme280--1a2b3c4d"),
            "sensors/bme280--1a2b3c4d/state"
        );
        assert_eq!(
            TopicBuilder::attributes_topic("bme280--1a2b3c4d"),
            "sensors/bme280--1a2b3c4d/attributes"
        );
    }

    #[test]
    fn test_discovery_topic() {
        assert_eq!(
            TopicBuilder::discovery_topic("homeassistant", "ds18b20--0000055a3f2b", "temperature"),
            "homeassistant/sensor/ds18b20--0000055a3f2b/ds18b20--0000055a3f2b-temperature/config"
        );
        assert_eq!(
            TopicBuilder::discovery_topic("ha/", "s1", "humidity"),
            "ha/sensor/s1/s1-humidity/config"
        );
    }

    #[test]
    fn test_validate_sensor_id() {
        assert!(validate_sensor_id("ds18b20--0000055a3f2b").is_ok());
        assert!(validate_sensor_id("bme680--0x77").is_ok());
        assert_eq!(validate_sensor_id(""), Err(ValidationError::EmptySensorId));
        assert_eq!(
            validate_sensor_id("a/b"),
            Err(ValidationError::InvalidSensorIdChar('/'))
        );
        assert_eq!(
            validate_sensor_id("a+b"),
            Err(ValidationError::InvalidSensorIdChar('+'))
        );
        assert_eq!(
            validate_sensor_id("a b"),
            Err(ValidationError::InvalidSensorIdChar(' '))
        );
        assert!(matches!(
            validate_sensor_id("BME280--01"),
            Err(ValidationError::NotLowerCase(_))
        ));
    }

    proptest! {
        #[test]
        fn valid_ids_stay_one_topic_level(id in "[a-z0-9._-]{1,32}") {
            prop_assert!(validate_sensor_id(&id).is_ok());
            let topic = TopicBuilder::state_topic(&id);
            prop_assert_eq!(topic.split('/').count(), 3);
        }
    }
}
