//! Agent lifecycle management
//!
//! `SensorAgent` owns the enumerated sensors and the configuration. Starting
//! it spawns two tasks: the poll loop, which takes exclusive ownership of the
//! sensors, and the registration task, which reacts to session events from
//! the messaging link.

use super::poller::Poller;
use super::registration::{register_sensors, SessionTracker};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::observability::metrics::metrics;
use crate::registration_span;
use crate::sensor::{Sensor, SensorInfo};
use crate::transport::mqtt::SessionStarted;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

/// Agent core with dependency-injected transport
pub struct SensorAgent<T>
where
    T: Transport + ?Sized + 'static,
{
    config: Arc<AgentConfig>,
    transport: Arc<T>,
    sensors: Option<Vec<Box<dyn Sensor>>>,
    sensor_infos: Arc<Vec<SensorInfo>>,
    shutdown_tx: watch::Sender<bool>,
    poll_handle: Option<JoinHandle<()>>,
    registration_handle: Option<JoinHandle<()>>,
}

impl<T> SensorAgent<T>
where
    T: Transport + ?Sized + 'static,
{
    /// Create an agent for an enumerated sensor set. An empty set is fatal.
    pub fn new(
        config: Arc<AgentConfig>,
        transport: Arc<T>,
        sensors: Vec<Box<dyn Sensor>>,
    ) -> AgentResult<Self> {
        if sensors.is_empty() {
            return Err(AgentError::NoSensorsFound {
                types: config.agent.sensor_types.clone(),
            });
        }

        let sensor_infos = sensors
            .iter()
            .map(|sensor| SensorInfo::from_sensor(sensor.as_ref()))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            transport,
            sensors: Some(sensors),
            sensor_infos: Arc::new(sensor_infos),
            shutdown_tx,
            poll_handle: None,
            registration_handle: None,
        })
    }

    pub fn sensor_infos(&self) -> &[SensorInfo] {
        &self.sensor_infos
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn is_running(&self) -> bool {
        self.poll_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the poll loop and the registration task.
    ///
    /// `session_rx` receives one event per link session; each new session
    /// triggers a full discovery and attribute registration.
    pub fn start(&mut self, session_rx: mpsc::UnboundedReceiver<SessionStarted>) -> AgentResult<()> {
        let sensors = self
            .sensors
            .take()
            .ok_or_else(|| AgentError::internal_error("agent already started"))?;

        info!(sensors = sensors.len(), "Starting sensor agent");
        self.shutdown_tx.send_replace(false);

        let poller = Poller::new(sensors, self.transport.clone(), self.config.clone());
        self.poll_handle = Some(tokio::spawn(poller.run(self.shutdown_tx.subscribe())));

        self.registration_handle = Some(tokio::spawn(run_registration(
            session_rx,
            self.sensor_infos.clone(),
            self.transport.clone(),
            self.config.clone(),
        )));

        Ok(())
    }

    /// Stop both tasks; the poll loop gets a moment to finish its pass
    pub async fn shutdown(&mut self) -> AgentResult<()> {
        info!("Shutting down sensor agent");
        self.shutdown_tx.send_replace(true);

        if let Some(mut handle) = self.poll_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), &mut handle).await {
                Ok(Err(e)) if !e.is_cancelled() => error!("Poll loop shutdown error: {}", e),
                Err(_) => {
                    error!("Poll loop didn't stop in time, aborting");
                    handle.abort();
                }
                _ => {}
            }
        }

        if let Some(handle) = self.registration_handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Registration task shutdown error: {}", e);
                }
            }
        }

        info!("Sensor agent shutdown complete");
        Ok(())
    }
}

/// Register all sensors once for every new session
async fn run_registration<T>(
    mut session_rx: mpsc::UnboundedReceiver<SessionStarted>,
    sensors: Arc<Vec<SensorInfo>>,
    transport: Arc<T>,
    config: Arc<AgentConfig>,
) where
    T: Transport + ?Sized,
{
    let mut tracker = SessionTracker::new();

    while let Some(SessionStarted { session }) = session_rx.recv().await {
        if !tracker.should_register(session) {
            debug!(session = session, "Session already registered");
            continue;
        }

        let result = register_sensors(&sensors, transport.as_ref(), &config)
            .instrument(registration_span!(session = session))
            .await;
        match result {
            Ok(report) => {
                metrics().record_registration();
                info!(
                    session = session,
                    queued = report.queued,
                    dropped = report.dropped,
                    "Published discovery and attributes"
                );
            }
            Err(e) => error!(session = session, error = %e, "Registration failed"),
        }
    }

    debug!("Session channel closed, registration task stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::measurement::TEMPERATURE;
    use crate::testing::mocks::{MockSensor, MockTransport};

    fn agent(transport: Arc<MockTransport>) -> SensorAgent<MockTransport> {
        let sensors: Vec<Box<dyn Sensor>> =
            vec![Box::new(MockSensor::new("mock--1", &[&TEMPERATURE]))];
        SensorAgent::new(Arc::new(AgentConfig::test_config()), transport, sensors).unwrap()
    }

    #[test]
    fn test_new_without_sensors_is_fatal() {
        let result = SensorAgent::new(
            Arc::new(AgentConfig::test_config()),
            Arc::new(MockTransport::new()),
            Vec::new(),
        );

        match result {
            Err(error @ AgentError::NoSensorsFound { .. }) => {
                assert!(error.is_fatal_configuration())
            }
            _ => panic!("expected NoSensorsFound"),
        }
    }

    #[test]
    fn test_sensor_infos_snapshot() {
        let agent = agent(Arc::new(MockTransport::new()));
        let infos = agent.sensor_infos();

        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "mock--1");
        assert_eq!(infos[0].measurements, vec![&TEMPERATURE]);
        assert!(!agent.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut agent = agent(Arc::new(MockTransport::new()));
        let (_tx, rx) = mpsc::unbounded_channel();
        agent.start(rx).unwrap();
        assert!(agent.is_running());

        let (_tx2, rx2) = mpsc::unbounded_channel();
        assert!(agent.start(rx2).is_err());

        agent.shutdown().await.unwrap();
        assert!(!agent.is_running());
    }

    #[tokio::test]
    async fn test_session_event_triggers_registration_once() {
        let transport = Arc::new(MockTransport::new());
        let mut agent = agent(transport.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        agent.start(rx).unwrap();

        tx.send(SessionStarted { session: 1 }).unwrap();
        tx.send(SessionStarted { session: 1 }).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let topic = "homeassistant/sensor/mock--1/mock--1-temperature/config";
        assert_eq!(transport.published_to(topic).await.len(), 1);

        tx.send(SessionStarted { session: 2 }).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.published_to(topic).await.len(), 2);

        agent.shutdown().await.unwrap();
    }
}
