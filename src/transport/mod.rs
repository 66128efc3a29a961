//! Transport layer for sensor telemetry
//!
//! This module provides the publish abstraction the agent core depends on and
//! the MQTT implementation of it.

pub mod mqtt;

pub use mqtt::ConnectionState;
pub use rumqttc::v5::mqttbytes::QoS;

/// Result of handing a message to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted by the client for delivery
    Queued,
    /// Discarded because the link is not connected or the queue is full
    Dropped,
}

/// Publish primitive shared by the poll loop and the registration task.
///
/// `publish` never blocks on the connection and never fails the caller:
/// while the link is down messages are dropped, not queued.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload with the given delivery quality and retain flag
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool)
        -> PublishOutcome;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}
