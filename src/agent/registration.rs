//! Discovery and attribute registration
//!
//! For every sensor the agent publishes one retained discovery document per
//! measurement plus a retained attributes message. Registration runs once per
//! connection session; a reconnect starts a new session and registers again so
//! retained state survives a broker restart.

use super::publish_kind;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::protocol::{
    AttributesMessage, DeviceDescriptor, DiscoveryConfig, MessageKind, TopicBuilder,
};
use crate::sensor::{Measurement, SensorInfo};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{PublishOutcome, Transport};
use tracing::debug;

/// Device name shown by the hub: configured name or `"<model> Environmental Sensor"`
pub fn device_name(info: &SensorInfo, config: &AgentConfig) -> String {
    config
        .agent
        .sensor_name
        .as_ref()
        .and_then(|setting| setting.resolve(&info.id))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} Environmental Sensor", info.model))
}

pub fn device_descriptor(info: &SensorInfo, config: &AgentConfig) -> DeviceDescriptor {
    DeviceDescriptor {
        identifiers: vec![info.id.clone()],
        manufacturer: info.manufacturer.clone(),
        model: info.model.clone(),
        via_device: config.agent.host_device.clone(),
        name: device_name(info, config),
    }
}

/// Hub template extracting `name` from the state payload
pub fn value_template(name: &str, precision: u32) -> String {
    if precision == 0 {
        format!("{{{{ value_json.{name} | int }}}}")
    } else {
        format!("{{{{ value_json.{name} | round({precision}) }}}}")
    }
}

pub fn discovery_config(
    info: &SensorInfo,
    measurement: &Measurement,
    config: &AgentConfig,
) -> DiscoveryConfig {
    let device = device_descriptor(info, config);
    let name = format!("{} {}", device.name, measurement.title);

    DiscoveryConfig {
        unique_id: TopicBuilder::unique_id(&info.id, measurement.name),
        state_topic: TopicBuilder::state_topic(&info.id),
        availability_topic: TopicBuilder::status_topic(&info.id),
        json_attributes_topic: TopicBuilder::attributes_topic(&info.id),
        device,
        device_class: measurement.device_class.map(str::to_string),
        unit_of_measurement: measurement.unit.map(str::to_string),
        name,
        value_template: value_template(measurement.name, config.discovery_precision(measurement)),
        force_update: true,
        expire_after: config.expire_after_secs(),
    }
}

pub fn attributes_message(info: &SensorInfo, config: &AgentConfig) -> AttributesMessage {
    AttributesMessage {
        serial_number: info.serial_number.clone(),
        sensor_type: info.model.clone(),
        location: config
            .agent
            .sensor_location
            .as_ref()
            .and_then(|setting| setting.resolve(&info.id))
            .map(str::to_string),
    }
}

/// Remembers which session has been registered
#[derive(Debug, Default)]
pub struct SessionTracker {
    registered_session: Option<u64>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once per session id; late events for older sessions are ignored
    pub fn should_register(&mut self, session: u64) -> bool {
        match self.registered_session {
            Some(registered) if registered >= session => false,
            _ => {
                self.registered_session = Some(session);
                true
            }
        }
    }

    pub fn registered_session(&self) -> Option<u64> {
        self.registered_session
    }
}

/// Outcome of one registration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub queued: usize,
    pub dropped: usize,
}

impl RegistrationReport {
    fn count(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Queued => self.queued += 1,
            PublishOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// Publish discovery documents and attributes for every sensor
pub async fn register_sensors<T>(
    sensors: &[SensorInfo],
    transport: &T,
    config: &AgentConfig,
) -> AgentResult<RegistrationReport>
where
    T: Transport + ?Sized,
{
    let prefix = config.mqtt.discovery_prefix();
    let mut report = RegistrationReport::default();

    for info in sensors {
        for measurement in &info.measurements {
            let topic = TopicBuilder::discovery_topic(prefix, &info.id, measurement.name);
            let document = discovery_config(info, measurement, config);
            let payload = MessageHandler::format_pretty_payload(&document)?;
            debug!(sensor_id = %info.id, topic = %topic, "Publishing discovery config");
            report.count(publish_kind(transport, &topic, MessageKind::Discovery, payload).await);
        }

        let topic = TopicBuilder::attributes_topic(&info.id);
        let payload = MessageHandler::format_json_payload(&attributes_message(info, config))?;
        report.count(publish_kind(transport, &topic, MessageKind::Attributes, payload).await);
    }

    Ok(report)
}
