//! Poll/publish loop
//!
//! The poller is the only owner of the sensor handles. Each pass reads every
//! sensor in order, publishes availability and readings, then sleeps the full
//! update period. A failing sensor is reported offline and never stops the pass.

use super::publish_kind;
use crate::config::AgentConfig;
use crate::observability::metrics::metrics;
use crate::poll_span;
use crate::protocol::{Availability, MessageKind, StatePayload, TopicBuilder, TIMESTAMP_FORMAT};
use crate::sensor::measurement::round_reading;
use crate::sensor::Sensor;
use crate::transport::mqtt::MessageHandler;
use crate::transport::Transport;
use chrono::Local;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Result of one pass over all sensors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub online: usize,
    pub offline: usize,
}

/// Build the flat state payload from a sensor's current readings.
///
/// Absent and non-finite values are omitted; every present value is rounded
/// to its configured state precision.
pub fn build_state_payload(sensor: &dyn Sensor, config: &AgentConfig) -> StatePayload {
    let readings = sensor.readings();
    let timestamp = readings.timestamp().unwrap_or_else(Local::now);

    let mut payload = StatePayload::new();
    payload.insert(
        "timestamp".to_string(),
        Value::String(timestamp.format(TIMESTAMP_FORMAT).to_string()),
    );

    for measurement in sensor.supported_measurements() {
        let rounded = readings
            .value(measurement.name)
            .and_then(|value| round_reading(value, config.state_precision(measurement)));
        if let Some(value) = rounded {
            payload.insert(measurement.name.to_string(), value);
        }
    }

    payload
}

/// Drives the periodic update of all sensors
pub struct Poller<T: Transport + ?Sized> {
    sensors: Vec<Box<dyn Sensor>>,
    transport: Arc<T>,
    config: Arc<AgentConfig>,
}

impl<T> Poller<T>
where
    T: Transport + ?Sized + 'static,
{
    pub fn new(sensors: Vec<Box<dyn Sensor>>, transport: Arc<T>, config: Arc<AgentConfig>) -> Self {
        Self {
            sensors,
            transport,
            config,
        }
    }

    pub fn sensors(&self) -> &[Box<dyn Sensor>] {
        &self.sensors
    }

    /// Read and publish every sensor once, in order
    pub async fn poll_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        for sensor in self.sensors.iter_mut() {
            match poll_sensor(sensor.as_mut(), self.transport.as_ref(), &self.config).await {
                Availability::Online => report.online += 1,
                Availability::Offline => report.offline += 1,
            }
        }

        metrics().record_poll_cycle();
        report
    }

    /// Poll forever, sleeping the full update period after each pass
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let period = self.config.update_period();
        info!(
            sensors = self.sensors.len(),
            period_secs = period.as_secs(),
            "Starting poll loop"
        );

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let report = self
                .poll_cycle()
                .instrument(poll_span!(cycle = cycle))
                .await;
            debug!(
                cycle = cycle,
                online = report.online,
                offline = report.offline,
                "Poll cycle complete"
            );

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(period) => {}
            }
        }

        info!("Poll loop stopped");
    }
}

async fn poll_sensor<T>(sensor: &mut dyn Sensor, transport: &T, config: &AgentConfig) -> Availability
where
    T: Transport + ?Sized,
{
    let sensor_id = sensor.id().to_string();
    let status_topic = TopicBuilder::status_topic(&sensor_id);

    if let Err(e) = sensor.update_reading().await {
        metrics().record_measurement_error();
        error!(sensor_id = %sensor_id, error = %e, "Sensor read failed");
        publish_kind(
            transport,
            &status_topic,
            MessageKind::Status,
            Availability::Offline.as_str().as_bytes().to_vec(),
        )
        .await;
        return Availability::Offline;
    }

    publish_kind(
        transport,
        &status_topic,
        MessageKind::Status,
        Availability::Online.as_str().as_bytes().to_vec(),
    )
    .await;

    let payload = build_state_payload(sensor, config);
    match MessageHandler::format_json_payload(&payload) {
        Ok(bytes) => {
            if config.agent.verbose {
                let readings = Value::Object(payload);
                info!(sensor_id = %sensor_id, readings = %readings, "Publishing readings");
            } else {
                debug!(sensor_id = %sensor_id, "Publishing readings");
            }
            let topic = TopicBuilder::state_topic(&sensor_id);
            publish_kind(transport, &topic, MessageKind::State, bytes).await;
            metrics().record_reading();
        }
        Err(e) => warn!(sensor_id = %sensor_id, error = %e, "Unable to serialize readings"),
    }

    Availability::Online
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::measurement::{PROXIMITY, TEMPERATURE};
    use crate::testing::mocks::{MockSensor, MockTransport};
    use crate::transport::QoS;
    use serde_json::json;

    fn config() -> Arc<AgentConfig> {
        Arc::new(AgentConfig::test_config())
    }

    #[tokio::test]
    async fn test_state_payload_rounding_and_timestamp() {
        let mut sensor = MockSensor::new("mock--1", &[&TEMPERATURE, &PROXIMITY]);
        let handle = sensor.handle();
        handle.set_value("temperature", 21.23456).await;
        handle.set_value("proximity", 41.6).await;
        sensor.update_reading().await.unwrap();

        let payload = build_state_payload(&sensor, &AgentConfig::test_config());

        assert_eq!(payload["temperature"], json!(21.235));
        assert_eq!(payload["proximity"], json!(42));
        let timestamp = payload["timestamp"].as_str().unwrap();
        // Local time, second precision: YYYY-MM-DDTHH:MM:SS
        assert_eq!(timestamp.len(), 19);
        assert_eq!(&timestamp[10..11], "T");
    }

    #[tokio::test]
    async fn test_state_payload_omits_absent_values() {
        let mut sensor = MockSensor::new("mock--1", &[&TEMPERATURE, &PROXIMITY]);
        let handle = sensor.handle();
        handle.remove_value("proximity").await;
        handle.set_value("temperature", f64::NAN).await;
        sensor.update_reading().await.unwrap();

        let payload = build_state_payload(&sensor, &AgentConfig::test_config());

        assert_eq!(payload.len(), 1);
        assert!(payload.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn test_state_precision_override() {
        let mut sensor = MockSensor::new("mock--1", &[&TEMPERATURE]);
        sensor.handle().set_value("temperature", 21.26).await;
        sensor.update_reading().await.unwrap();

        let mut config = AgentConfig::test_config();
        config.precision.state.insert("temperature".to_string(), 1);

        let payload = build_state_payload(&sensor, &config);
        assert_eq!(payload["temperature"], json!(21.3));
    }

    #[tokio::test]
    async fn test_poll_cycle_publishes_status_then_state() {
        let transport = Arc::new(MockTransport::new());
        let sensor = MockSensor::new("mock--1", &[&TEMPERATURE]);
        let mut poller = Poller::new(vec![Box::new(sensor)], transport.clone(), config());

        let report = poller.poll_cycle().await;

        assert_eq!(report, CycleReport { online: 1, offline: 0 });
        let messages = transport.get_published_messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "sensors/mock--1/status");
        assert_eq!(messages[0].payload_str(), "online");
        assert_eq!(messages[0].qos, QoS::AtMostOnce);
        assert!(!messages[0].retain);
        assert_eq!(messages[1].topic, "sensors/mock--1/state");
        assert_eq!(messages[1].payload_json().unwrap()["temperature"], json!(21.5));
        assert!(!messages[1].retain);
    }

    #[tokio::test]
    async fn test_readings_published_with_and_without_verbose_logging() {
        for verbose in [true, false] {
            let transport = Arc::new(MockTransport::new());
            let mut config = AgentConfig::test_config();
            config.agent.verbose = verbose;
            let sensor = MockSensor::new("mock--1", &[&TEMPERATURE]);
            let mut poller = Poller::new(vec![Box::new(sensor)], transport.clone(), Arc::new(config));

            poller.poll_cycle().await;

            let states = transport.published_to("sensors/mock--1/state").await;
            assert_eq!(states.len(), 1, "verbose = {verbose}");
            assert_eq!(states[0].payload_json().unwrap()["temperature"], json!(21.5));
        }
    }

    #[tokio::test]
    async fn test_failed_sensor_publishes_offline_only() {
        let transport = Arc::new(MockTransport::new());
        let failing = MockSensor::new("mock--1", &[&TEMPERATURE]);
        failing.handle().set_failing(true);
        let healthy = MockSensor::new("mock--2", &[&TEMPERATURE]);
        let mut poller = Poller::new(
            vec![Box::new(failing), Box::new(healthy)],
            transport.clone(),
            config(),
        );

        let report = poller.poll_cycle().await;

        assert_eq!(report, CycleReport { online: 1, offline: 1 });
        let status = transport.published_to("sensors/mock--1/status").await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].payload_str(), "offline");
        assert!(transport.published_to("sensors/mock--1/state").await.is_empty());
        // The failure did not stop the pass
        assert_eq!(transport.published_to("sensors/mock--2/state").await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let transport = Arc::new(MockTransport::new());
        let sensor = MockSensor::new("mock--1", &[&TEMPERATURE]);
        let handle = sensor.handle();
        let poller = Poller::new(vec![Box::new(sensor)], transport, config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(poller.run(shutdown_rx));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("poll loop should stop")
            .unwrap();
        // Period is 30s, so exactly one pass ran
        assert_eq!(handle.update_count(), 1);
    }
}
