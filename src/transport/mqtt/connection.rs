//! Connection state, options and reachability probing for the MQTT link
//!
//! This module contains the connection state type, recovery timing,
//! link errors, client option construction and the TCP reachability probe.

use crate::config::{MqttSection, ReconnectSection};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// Connection state for the messaging link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection; publishes are dropped
    Disconnected,
    /// Handshake or reconnection in progress
    Connecting,
    /// Broker acknowledged the connection
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Recovery timing used after an unexpected disconnect
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Wait before the first reachability probe
    pub initial_delay: Duration,
    /// Wait between reachability probes while the broker stays down
    pub probe_interval: Duration,
    /// Timeout of a single TCP probe
    pub probe_timeout: Duration,
    /// How long `connect` waits for the broker's acknowledgement
    pub connack_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_section(&ReconnectSection::default())
    }
}

impl ReconnectConfig {
    pub fn from_section(section: &ReconnectSection) -> Self {
        Self {
            initial_delay: Duration::from_secs(section.initial_delay_secs),
            probe_interval: Duration::from_secs(section.probe_interval_secs),
            probe_timeout: Duration::from_secs(section.probe_timeout_secs),
            connack_timeout: Duration::from_secs(section.connack_timeout_secs),
        }
    }

    /// Delay before reachability probe `attempt` (0-based) of a recovery
    pub fn probe_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            self.initial_delay
        } else {
            self.probe_interval
        }
    }
}

/// Messaging link errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("MQTT broker at {address} is unreachable: {reason}")]
    BrokerUnreachable { address: String, reason: String },
    #[error("MQTT handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("Messaging link already started")]
    AlreadyStarted,
}

/// Build client options from config.
///
/// Each call generates a fresh client id so a full reconnect never collides
/// with a half-closed previous session on the broker.
pub fn configure_mqtt_options(
    client_prefix: &str,
    config: &MqttSection,
) -> Result<MqttOptions, LinkError> {
    if config.broker.trim().is_empty() {
        return Err(LinkError::InvalidBrokerAddress(config.broker_address()));
    }
    if config.port == 0 {
        return Err(LinkError::InvalidBrokerAddress(config.broker_address()));
    }

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let client_id = format!("{client_prefix}-{}", &suffix[..8]);
    let mut mqtt_options = MqttOptions::new(client_id, config.broker.clone(), config.port);

    if config.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    // Recovery resumes the broker session; full reconnects use a new client id
    mqtt_options.set_clean_start(false);

    Ok(mqtt_options)
}

/// TCP-level reachability probe of the broker, bounded by `timeout`
pub async fn probe_broker(host: &str, port: u16, timeout: Duration) -> Result<(), LinkError> {
    let address = format!("{host}:{port}");
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(LinkError::BrokerUnreachable {
            address,
            reason: e.to_string(),
        }),
        Err(_) => Err(LinkError::BrokerUnreachable {
            address,
            reason: format!("no response within {}ms", timeout.as_millis()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.probe_interval, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.connack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_probe_delay_schedule() {
        let config = ReconnectConfig::default();

        // 5s before the first probe, then every 10s
        assert_eq!(config.probe_delay(0), Duration::from_secs(5));
        assert_eq!(config.probe_delay(1), Duration::from_secs(10));
        assert_eq!(config.probe_delay(2), Duration::from_secs(10));
        assert_eq!(config.probe_delay(100), Duration::from_secs(10));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_configure_mqtt_options() {
        let mut config = MqttSection::new("localhost");
        config.username = Some("agent".to_string());
        config.password = Some("secret".to_string());

        let options = configure_mqtt_options("sensor-agent", &config).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert!(options.client_id().starts_with("sensor-agent-"));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(!options.clean_start());
    }

    #[test]
    fn test_client_ids_are_unique_per_call() {
        let config = MqttSection::new("localhost");
        let a = configure_mqtt_options("sensor-agent", &config).unwrap();
        let b = configure_mqtt_options("sensor-agent", &config).unwrap();
        assert_ne!(a.client_id(), b.client_id());
    }

    #[test]
    fn test_invalid_broker_address() {
        let config = MqttSection::new("");
        let result = configure_mqtt_options("sensor-agent", &config);
        assert!(matches!(result, Err(LinkError::InvalidBrokerAddress(_))));
    }

    #[tokio::test]
    async fn test_probe_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe_broker("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_probe_closed_port_is_unreachable() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = probe_broker("127.0.0.1", port, Duration::from_secs(1)).await;
        match result {
            Err(LinkError::BrokerUnreachable { address, .. }) => {
                assert_eq!(address, format!("127.0.0.1:{port}"));
            }
            other => panic!("expected BrokerUnreachable, got {other:?}"),
        }
    }

    #[test]
    fn test_link_error_display() {
        let errors = vec![
            LinkError::BrokerUnreachable {
                address: "localhost:1883".to_string(),
                reason: "refused".to_string(),
            },
            LinkError::HandshakeFailed("timeout".to_string()),
            LinkError::InvalidBrokerAddress("".to_string()),
            LinkError::AlreadyStarted,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
