//! Agent configuration
//!
//! The configuration is loaded once from TOML before the agent starts and is
//! never mutated afterwards. Defaults are applied field by field through serde
//! default functions, so a minimal file only needs the broker address.

use crate::sensor::measurement;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub precision: PrecisionSection,
    #[serde(default)]
    pub drivers: DriversSection,
}

/// Agent section - polling behaviour and presentation of sensors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Seconds to sleep after each complete pass over all sensors
    #[serde(default = "default_update_period")]
    pub update_period_secs: u64,
    /// Log every published reading at info level
    #[serde(default = "default_verbose")]
    pub verbose: bool,
    /// Identifier of the host bridge device, published as `via_device`
    #[serde(default)]
    pub host_device: Option<String>,
    /// Driver names to enumerate at startup
    #[serde(default = "default_sensor_types")]
    pub sensor_types: Vec<String>,
    /// Friendly device name, global or per sensor id
    #[serde(default)]
    pub sensor_name: Option<SensorSetting>,
    /// Installation location, global or per sensor id
    #[serde(default)]
    pub sensor_location: Option<SensorSetting>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            update_period_secs: default_update_period(),
            verbose: default_verbose(),
            host_device: None,
            sensor_types: default_sensor_types(),
            sensor_name: None,
            sensor_location: None,
        }
    }
}

fn default_update_period() -> u64 {
    30
}

fn default_verbose() -> bool {
    true
}

fn default_sensor_types() -> Vec<String> {
    vec!["ds18b20".to_string()]
}

/// A string setting that is either global or resolved per sensor id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SensorSetting {
    Global(String),
    PerSensor(HashMap<String, String>),
}

impl SensorSetting {
    /// Resolve the value for a sensor; a per-sensor map without an entry is absent
    pub fn resolve(&self, sensor_id: &str) -> Option<&str> {
        match self {
            SensorSetting::Global(value) => Some(value.as_str()),
            SensorSetting::PerSensor(values) => values.get(sensor_id).map(String::as_str),
        }
    }
}

/// MQTT section - broker connection and discovery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker host name or IP address
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable consulted when `password` is not set
    #[serde(default)]
    pub password_env: Option<String>,
    /// Topic prefix the home-automation hub listens on for discovery
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub tls: bool,
    /// Size of the client request queue between publishers and the protocol loop
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl MqttSection {
    /// Section with defaults for everything but the broker host
    pub fn new<S: Into<String>>(broker: S) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            username: None,
            password: None,
            password_env: None,
            discovery_prefix: default_discovery_prefix(),
            keep_alive_secs: default_keep_alive(),
            tls: false,
            request_capacity: default_request_capacity(),
            reconnect: ReconnectSection::default(),
        }
    }

    /// `host:port` form used in logs and errors
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }

    /// Username and password, only when both halves are available
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self.username.clone()?;
        let password = self.password.clone().or_else(|| {
            self.password_env
                .as_ref()
                .and_then(|name| std::env::var(name).ok())
        })?;
        Some((username, password))
    }

    /// Discovery prefix without trailing slashes
    pub fn discovery_prefix(&self) -> &str {
        self.discovery_prefix.trim_end_matches('/')
    }
}

fn default_port() -> u16 {
    1883
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_request_capacity() -> usize {
    256
}

/// Reachability probing and recovery timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Wait before the first reachability probe after an unexpected disconnect
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// Interval between reachability probes while the broker is down
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// TCP connect timeout of a single probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// How long to wait for the broker to acknowledge a connection
    #[serde(default = "default_connack_timeout")]
    pub connack_timeout_secs: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            connack_timeout_secs: default_connack_timeout(),
        }
    }
}

fn default_initial_delay() -> u64 {
    5
}

fn default_probe_interval() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_connack_timeout() -> u64 {
    10
}

/// Per-measurement precision overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrecisionSection {
    /// Decimal places used in published state payloads
    #[serde(default)]
    pub state: HashMap<String, u32>,
    /// Decimal places applied by the hub's value template
    #[serde(default)]
    pub discovery: HashMap<String, u32>,
}

/// Settings handed to sensor drivers during enumeration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DriversSection {
    #[serde(default)]
    pub ds18b20: Ds18b20Settings,
    #[serde(default)]
    pub streaming: StreamingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ds18b20Settings {
    /// Root of the kernel 1-Wire device tree
    #[serde(default = "default_w1_root")]
    pub sysfs_root: PathBuf,
}

impl Default for Ds18b20Settings {
    fn default() -> Self {
        Self {
            sysfs_root: default_w1_root(),
        }
    }
}

fn default_w1_root() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamingSettings {
    #[serde(default)]
    pub devices: Vec<StreamingDevice>,
}

/// A device whose readings arrive as line-delimited JSON from a helper process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingDevice {
    pub manufacturer: String,
    pub model: String,
    /// Bus address or pin the device is wired to
    pub address: String,
    /// Hardware serial, preferred over the address for the sensor id
    #[serde(default)]
    pub serial: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Measurement names, resolved against the measurement registry
    pub measurements: Vec<String>,
    /// Oldest sample accepted as a current reading
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

fn default_max_age() -> u64 {
    60
}

/// Largest decimal precision a reading can be rounded to
pub const MAX_PRECISION: u32 = 15;

const REDACTED: &str = "********";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Configuration with defaults for everything but the MQTT section
    pub fn new(mqtt: MqttSection) -> Self {
        Self {
            agent: AgentSection::default(),
            mqtt,
            precision: PrecisionSection::default(),
            drivers: DriversSection::default(),
        }
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.update_period_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "agent.update_period_secs must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.broker.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.broker must be set".to_string(),
            ));
        }

        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.discovery_prefix().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.discovery_prefix must not be empty".to_string(),
            ));
        }

        let precision_keys = self
            .precision
            .state
            .keys()
            .chain(self.precision.discovery.keys());
        for name in precision_keys {
            validate_measurement_name(name, "precision")?;
        }

        let precision_values = self
            .precision
            .state
            .iter()
            .chain(self.precision.discovery.iter());
        for (name, digits) in precision_values {
            if *digits > MAX_PRECISION {
                return Err(ConfigError::InvalidConfig(format!(
                    "precision for '{name}' is {digits}, maximum is {MAX_PRECISION}"
                )));
            }
        }

        for device in &self.drivers.streaming.devices {
            for name in &device.measurements {
                validate_measurement_name(name, &format!("streaming device {}", device.model))?;
            }
        }

        Ok(())
    }

    pub fn update_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.agent.update_period_secs)
    }

    /// Entity expiry on the hub: two missed update cycles
    pub fn expire_after_secs(&self) -> u64 {
        self.agent.update_period_secs.saturating_mul(2)
    }

    /// Copy safe to print, with the MQTT password masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.mqtt.password.is_some() {
            config.mqtt.password = Some(REDACTED.to_string());
        }
        config
    }

    /// Precision used for a measurement in state payloads
    pub fn state_precision(&self, measurement: &measurement::Measurement) -> u32 {
        self.precision
            .state
            .get(measurement.name)
            .copied()
            .unwrap_or(measurement.precision)
    }

    /// Precision applied by the hub's value template
    pub fn discovery_precision(&self, measurement: &measurement::Measurement) -> u32 {
        self.precision
            .discovery
            .get(measurement.name)
            .copied()
            .unwrap_or(measurement.precision)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[agent]
update_period_secs = 30
host_device = "test-bridge"
sensor_types = ["mock"]

[mqtt]
broker = "localhost"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_measurement_name(name: &str, context: &str) -> Result<(), ConfigError> {
    if measurement::lookup(name).is_none() {
        return Err(ConfigError::InvalidConfig(format!(
            "{context}: unknown measurement '{name}'"
        )));
    }
    Ok(())
}
