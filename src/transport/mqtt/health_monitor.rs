//! Pure connection-state and recovery decisions for the MQTT link
//!
//! This module contains pure functions for state transitions, disconnect
//! classification, session detection and connection health metrics.

use super::connection::ConnectionState;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Pure state transition and recovery decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine next state after a connection event (pure function)
    pub fn determine_next_state(
        _current_state: ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::ConnAckRefused(_) => ConnectionState::Disconnected,
            ConnectionEvent::Disconnected(_) => ConnectionState::Disconnected,
        }
    }

    /// A new session starts only on a transition into `Connected`
    pub fn is_new_session(previous: ConnectionState, next: ConnectionState) -> bool {
        previous != ConnectionState::Connected && next == ConnectionState::Connected
    }

    /// Decide how to recover from a disconnect.
    ///
    /// A clean disconnect (reason code 0) reconnects immediately with a fresh
    /// client; everything else waits for the broker to become reachable and
    /// resumes the existing session.
    // TODO: confirm whether a clean disconnect should reconnect at all; code 0
    // usually means a deliberate disconnect.
    pub fn classify_disconnect(reason: &DisconnectReason) -> DisconnectAction {
        match reason {
            DisconnectReason::Clean => DisconnectAction::ImmediateReconnect,
            DisconnectReason::BrokerInitiated(_) | DisconnectReason::NetworkError(_) => {
                DisconnectAction::DelayedRecovery
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Calculate health metrics for connection (pure function)
    pub fn calculate_health_metrics(
        connect_time: Option<Instant>,
        reconnect_count: u32,
        session_count: u64,
    ) -> HealthMetrics {
        HealthMetrics {
            uptime: connect_time.map(|t| Instant::now().duration_since(t)),
            reconnect_count,
            session_count,
        }
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT broker connected");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!("MQTT broker disconnected, will reconnect");
            }
            (ConnectionState::Connecting, ConnectionState::Disconnected) => {
                error!("MQTT connection attempt failed");
            }
            (from, to) if from == to => {}
            (from, to) => {
                info!("MQTT connection state: {} -> {}", from, to);
            }
        }
    }
}

/// Why the link went down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Broker sent DISCONNECT with the normal reason code (0)
    Clean,
    /// Broker sent DISCONNECT with any other reason code
    BrokerInitiated(String),
    /// Network or protocol error surfaced by the event loop
    NetworkError(String),
}

/// Recovery path chosen for a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Probe and reconnect right away with a new client
    ImmediateReconnect,
    /// Wait, poll reachability, then resume the existing event loop
    DelayedRecovery,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectStarted,
    ConnAckReceived,
    ConnAckRefused(String),
    Disconnected(DisconnectReason),
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    /// Time since the current session was established
    pub uptime: Option<Duration>,
    /// Number of recoveries since startup
    pub reconnect_count: u32,
    /// Number of sessions established since startup
    pub session_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Disconnected,
                &ConnectionEvent::ConnectStarted
            ),
            ConnectionState::Connecting
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Connecting,
                &ConnectionEvent::ConnAckReceived
            ),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Connecting,
                &ConnectionEvent::ConnAckRefused("NotAuthorized".to_string())
            ),
            ConnectionState::Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Connected,
                &ConnectionEvent::Disconnected(DisconnectReason::Clean)
            ),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_new_session_only_on_transition_into_connected() {
        assert!(HealthMonitor::is_new_session(
            ConnectionState::Connecting,
            ConnectionState::Connected
        ));
        assert!(HealthMonitor::is_new_session(
            ConnectionState::Disconnected,
            ConnectionState::Connected
        ));
        assert!(!HealthMonitor::is_new_session(
            ConnectionState::Connected,
            ConnectionState::Connected
        ));
        assert!(!HealthMonitor::is_new_session(
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ));
    }

    #[test]
    fn test_classify_disconnect() {
        assert_eq!(
            HealthMonitor::classify_disconnect(&DisconnectReason::Clean),
            DisconnectAction::ImmediateReconnect
        );
        assert_eq!(
            HealthMonitor::classify_disconnect(&DisconnectReason::BrokerInitiated(
                "ServerShuttingDown".to_string()
            )),
            DisconnectAction::DelayedRecovery
        );
        assert_eq!(
            HealthMonitor::classify_disconnect(&DisconnectReason::NetworkError(
                "connection reset".to_string()
            )),
            DisconnectAction::DelayedRecovery
        );
    }

    #[test]
    fn test_can_publish() {
        assert!(HealthMonitor::can_publish(ConnectionState::Connected));
        assert!(!HealthMonitor::can_publish(ConnectionState::Connecting));
        assert!(!HealthMonitor::can_publish(ConnectionState::Disconnected));
    }

    #[test]
    fn test_health_metrics() {
        let metrics = HealthMonitor::calculate_health_metrics(None, 0, 0);
        assert_eq!(metrics.uptime, None);

        let connected_at = Instant::now() - Duration::from_secs(2);
        let metrics = HealthMonitor::calculate_health_metrics(Some(connected_at), 3, 4);
        assert!(metrics.uptime.unwrap() >= Duration::from_secs(2));
        assert_eq!(metrics.reconnect_count, 3);
        assert_eq!(metrics.session_count, 4);
    }
}
