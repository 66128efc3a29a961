//! Impure I/O operations for the MQTT messaging link
//!
//! This module owns the rumqttc client, runs the protocol loop on its own
//! task and implements connect, recovery and the non-blocking publish path.

use super::connection::{
    configure_mqtt_options, probe_broker, ConnectionState, LinkError, ReconnectConfig,
};
use super::health_monitor::{
    ConnectionEvent, DisconnectAction, DisconnectReason, HealthMetrics, HealthMonitor,
};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::observability::metrics::metrics;
use crate::transport::{PublishOutcome, Transport};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CLIENT_ID_PREFIX: &str = "sensor-agent";

/// Emitted once for every transition of the link into `Connected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStarted {
    /// 1-based session counter since process start
    pub session: u64,
}

#[derive(Debug, Default)]
struct LinkStats {
    connect_time: Option<Instant>,
    reconnect_count: u32,
    session_count: u64,
}

/// MQTT messaging link
pub struct MqttLink {
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    client: Arc<Mutex<Option<AsyncClient>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    session_tx: Arc<Mutex<Option<mpsc::UnboundedSender<SessionStarted>>>>,
    stats: Arc<Mutex<LinkStats>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttLink {
    pub fn new(config: MqttSection) -> Result<Self, LinkError> {
        let reconnect_config = ReconnectConfig::from_section(&config.reconnect);
        Self::with_reconnect_config(config, reconnect_config)
    }

    /// Create a link with explicit recovery timing
    pub fn with_reconnect_config(
        config: MqttSection,
        reconnect_config: ReconnectConfig,
    ) -> Result<Self, LinkError> {
        // Fail on a bad address now rather than inside the protocol loop
        configure_mqtt_options(CLIENT_ID_PREFIX, &config)?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            reconnect_config,
            client: Arc::new(Mutex::new(None)),
            state_tx,
            state_rx,
            shutdown_tx,
            session_tx: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(LinkStats::default())),
            event_loop_handle: Mutex::new(None),
        })
    }

    /// Set the channel that receives one event per new session (the on-connect hook)
    pub async fn set_session_sender(&self, sender: mpsc::UnboundedSender<SessionStarted>) {
        *self.session_tx.lock().await = Some(sender);
    }

    /// Watch connection state transitions
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect_config
    }

    /// Create a new client and event loop for the configured broker
    fn create_connection(config: &MqttSection) -> Result<(AsyncClient, EventLoop), LinkError> {
        let mqtt_options = configure_mqtt_options(CLIENT_ID_PREFIX, config)?;
        Ok(AsyncClient::new(mqtt_options, config.request_capacity.max(1)))
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected => {
                        return Err(LinkError::HandshakeFailed(
                            "broker closed the connection during handshake".to_string(),
                        ));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(LinkError::HandshakeFailed(
                        "state channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(LinkError::HandshakeFailed(format!(
                "no ConnAck within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Connect to the broker.
    ///
    /// Probes TCP reachability first and fails with `BrokerUnreachable`
    /// without attempting the handshake. On success the protocol loop keeps
    /// running in the background and handles every later disconnect.
    pub async fn connect(&self) -> Result<(), LinkError> {
        {
            let handle = self.event_loop_handle.lock().await;
            if handle.as_ref().is_some_and(|h| !h.is_finished()) {
                if self.is_connected() {
                    debug!("connect() called while already connected");
                    return Ok(());
                }
                return Err(LinkError::AlreadyStarted);
            }
        }

        let address = self.config.broker_address();
        info!(address = %address, "Connecting to MQTT broker");
        probe_broker(
            &self.config.broker,
            self.config.port,
            self.reconnect_config.probe_timeout,
        )
        .await?;

        let (client, event_loop) = Self::create_connection(&self.config)?;
        *self.client.lock().await = Some(client);

        self.shutdown_tx.send_replace(false);
        let previous = self.state_tx.send_replace(ConnectionState::Connecting);
        HealthMonitor::log_state_transition(previous, ConnectionState::Connecting);

        let supervisor = LinkSupervisor {
            config: self.config.clone(),
            reconnect_config: self.reconnect_config.clone(),
            client: self.client.clone(),
            state_tx: self.state_tx.clone(),
            session_tx: self.session_tx.clone(),
            stats: self.stats.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        let handle = tokio::spawn(supervisor.run(event_loop));
        *self.event_loop_handle.lock().await = Some(handle);

        Self::wait_for_connection_confirmation(
            self.state_rx.clone(),
            self.reconnect_config.connack_timeout,
        )
        .await
    }

    /// Startup connect that keeps retrying an unreachable broker.
    ///
    /// Waits the initial delay, then probes every probe interval until the
    /// broker answers, then connects. Returns early only on shutdown or on a
    /// non-reachability error.
    pub async fn connect_with_recovery(&self) -> Result<(), LinkError> {
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(LinkError::BrokerUnreachable { address, reason }) => {
                    error!(address = %address, reason = %reason, "Unable to reach MQTT broker");
                    metrics().record_recovery();
                    let reachable = wait_until_reachable(
                        &self.config,
                        &self.reconnect_config,
                        self.shutdown_tx.subscribe(),
                    )
                    .await;
                    if !reachable {
                        return Err(LinkError::BrokerUnreachable { address, reason });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Disconnect from the broker and stop the protocol loop
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.try_disconnect() {
                debug!("Disconnect request not queued: {}", e);
            }
        }

        self.shutdown_tx.send_replace(true);

        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        HealthMonitor::log_state_transition(previous, ConnectionState::Disconnected);
        self.stats.lock().await.connect_time = None;

        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("MQTT protocol loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT protocol loop ended with error: {}", e),
                Err(_) => warn!("MQTT protocol loop didn't shut down in time"),
                _ => {}
            }
        }

        info!("MQTT link disconnected");
        Ok(())
    }

    /// Get health metrics for the connection
    pub async fn health_metrics(&self) -> HealthMetrics {
        let stats = self.stats.lock().await;
        HealthMonitor::calculate_health_metrics(
            stats.connect_time,
            stats.reconnect_count,
            stats.session_count,
        )
    }
}

#[async_trait]
impl Transport for MqttLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> PublishOutcome {
        let state = *self.state_rx.borrow();
        if !HealthMonitor::can_publish(state) {
            debug!(
                topic = %topic,
                state = %state,
                "Message publishing is unavailable while the MQTT broker is not connected"
            );
            metrics().record_dropped();
            return PublishOutcome::Dropped;
        }

        let client = self.client.lock().await;
        let Some(client) = client.as_ref() else {
            metrics().record_dropped();
            return PublishOutcome::Dropped;
        };

        match client.try_publish(topic, qos, retain, payload) {
            Ok(()) => {
                metrics().record_published();
                PublishOutcome::Queued
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to queue MQTT publish");
                metrics().record_dropped();
                PublishOutcome::Dropped
            }
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// Sleep that returns early with `false` when shutdown is requested
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown requested during reconnection delay");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Wait the initial delay, then probe every probe interval until reachable.
/// Returns `false` if shutdown was requested first.
async fn wait_until_reachable(
    config: &MqttSection,
    reconnect_config: &ReconnectConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> bool {
    let mut attempt = 0u32;
    loop {
        let delay = reconnect_config.probe_delay(attempt);
        if !interruptible_sleep(&mut shutdown_rx, delay).await {
            return false;
        }

        match probe_broker(&config.broker, config.port, reconnect_config.probe_timeout).await {
            Ok(()) => {
                info!(address = %config.broker_address(), "MQTT broker reachable again");
                return true;
            }
            Err(e) => debug!(attempt = attempt, error = %e, "MQTT broker still unreachable"),
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Protocol loop state, moved onto its own task by `MqttLink::connect`
struct LinkSupervisor {
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    client: Arc<Mutex<Option<AsyncClient>>>,
    state_tx: watch::Sender<ConnectionState>,
    session_tx: Arc<Mutex<Option<mpsc::UnboundedSender<SessionStarted>>>>,
    stats: Arc<Mutex<LinkStats>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LinkSupervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!(address = %self.config.broker_address(), "Starting MQTT protocol loop");

        loop {
            let event = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                event = event_loop.poll() => event,
            };

            let route = match event {
                Ok(event) => MessageHandler::route_mqtt_event(&event),
                Err(e) => {
                    debug!(error = %e, "MQTT event loop error");
                    MessageHandler::route_connection_error(&e)
                }
            };
            let keep_running = self.process_event_route(route, &mut event_loop).await;

            if !keep_running {
                break;
            }
        }

        info!("MQTT protocol loop stopped");
    }

    /// Returns true to continue the loop, false to stop it
    async fn process_event_route(&mut self, route: EventRoute, event_loop: &mut EventLoop) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.transition(ConnectionEvent::ConnAckReceived).await;
                true
            }
            EventRoute::ConnectionRefused(code) => {
                error!(code = %code, "MQTT broker refused the connection");
                self.transition(ConnectionEvent::ConnAckRefused(code.clone()))
                    .await;
                self.recover().await
            }
            EventRoute::Disconnected(reason) => self.handle_disconnect(reason, event_loop).await,
            EventRoute::PublishAcknowledged(pkid) => {
                debug!(target: "mqtt_transport", "Publish acknowledged: {}", pkid);
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn transition(&self, event: ConnectionEvent) {
        let current = *self.state_tx.borrow();
        let next = HealthMonitor::determine_next_state(current, &event);
        let previous = self.state_tx.send_replace(next);
        HealthMonitor::log_state_transition(previous, next);

        if HealthMonitor::is_new_session(previous, next) {
            self.start_session().await;
        } else if next != ConnectionState::Connected {
            self.stats.lock().await.connect_time = None;
        }
    }

    async fn start_session(&self) {
        let session = {
            let mut stats = self.stats.lock().await;
            stats.session_count += 1;
            stats.connect_time = Some(Instant::now());
            stats.session_count
        };
        metrics().record_connection();
        info!(session = session, "MQTT session established");

        if let Some(sender) = self.session_tx.lock().await.as_ref() {
            if sender.send(SessionStarted { session }).is_err() {
                warn!(session = session, "No listener for session start");
            }
        }
    }

    async fn handle_disconnect(&mut self, reason: DisconnectReason, event_loop: &mut EventLoop) -> bool {
        warn!(reason = ?reason, "MQTT broker disconnected, will reconnect");
        self.transition(ConnectionEvent::Disconnected(reason.clone()))
            .await;

        match HealthMonitor::classify_disconnect(&reason) {
            DisconnectAction::ImmediateReconnect => self.full_reconnect(event_loop).await,
            DisconnectAction::DelayedRecovery => self.recover().await,
        }
    }

    /// Wait for the broker, then let the existing event loop resume its session
    async fn recover(&mut self) -> bool {
        self.stats.lock().await.reconnect_count += 1;
        metrics().record_recovery();

        let reachable = wait_until_reachable(
            &self.config,
            &self.reconnect_config,
            self.shutdown_rx.clone(),
        )
        .await;
        if !reachable {
            return false;
        }

        self.transition(ConnectionEvent::ConnectStarted).await;
        true
    }

    /// Replace client and event loop with a fresh connection
    async fn full_reconnect(&mut self, event_loop: &mut EventLoop) -> bool {
        self.stats.lock().await.reconnect_count += 1;

        let probe = probe_broker(
            &self.config.broker,
            self.config.port,
            self.reconnect_config.probe_timeout,
        )
        .await;
        if let Err(e) = probe {
            error!(error = %e, "Immediate reconnect impossible, waiting for broker");
            let reachable = wait_until_reachable(
                &self.config,
                &self.reconnect_config,
                self.shutdown_rx.clone(),
            )
            .await;
            if !reachable {
                return false;
            }
        }

        match MqttLink::create_connection(&self.config) {
            Ok((client, new_event_loop)) => {
                *event_loop = new_event_loop;
                *self.client.lock().await = Some(client);
                info!("Created new MQTT connection");
                self.transition(ConnectionEvent::ConnectStarted).await;
                true
            }
            Err(e) => {
                error!("Failed to create new MQTT connection: {}", e);
                self.recover().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            probe_interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(200),
            connack_timeout: Duration::from_millis(200),
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn link_for_port(port: u16) -> MqttLink {
        let mut config = MqttSection::new("127.0.0.1");
        config.port = port;
        MqttLink::with_reconnect_config(config, fast_reconnect()).unwrap()
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttLink::wait_for_connection_confirmation(state_rx, Duration::from_millis(200)).await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let result =
            MqttLink::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;

        match result {
            Err(LinkError::HandshakeFailed(msg)) => assert!(msg.contains("ConnAck")),
            other => panic!("expected handshake timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected);
        });

        let result =
            MqttLink::wait_for_connection_confirmation(state_rx, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(LinkError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(&mut shutdown_rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!interruptible_sleep(&mut shutdown_rx, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let link = link_for_port(1883);
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
        assert!(!link.is_connected());

        let metrics = link.health_metrics().await;
        assert_eq!(metrics.uptime, None);
        assert_eq!(metrics.session_count, 0);
        assert_eq!(metrics.reconnect_count, 0);
    }

    #[tokio::test]
    async fn test_publish_is_dropped_without_connection() {
        let link = link_for_port(1883);

        let outcome = link
            .publish("sensors/s1/status", b"online".to_vec(), QoS::AtMostOnce, false)
            .await;

        assert_eq!(outcome, PublishOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_connect_fails_fast_when_unreachable() {
        let link = link_for_port(closed_port().await);

        let result = link.connect().await;

        assert!(matches!(result, Err(LinkError::BrokerUnreachable { .. })));
        // No handshake was attempted
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
        assert!(link.event_loop_handle.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let link = link_for_port(port);
        let result = link.connect().await;

        assert!(matches!(result, Err(LinkError::HandshakeFailed(_))));
        assert!(!link.is_connected());
        let _ = link.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let link = link_for_port(1883);
        assert!(link.disconnect().await.is_ok());
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
    }
}
