//! Agent core
//!
//! Owns the sensor set, drives the poll/publish loop and registers discovery
//! metadata once per messaging session.

pub mod lifecycle;
pub mod poller;
pub mod registration;

pub use lifecycle::SensorAgent;
pub use poller::{build_state_payload, CycleReport, Poller};
pub use registration::{register_sensors, RegistrationReport, SessionTracker};

use crate::protocol::MessageKind;
use crate::transport::{PublishOutcome, Transport};

/// Publish with the delivery settings of `kind`
pub(crate) async fn publish_kind<T>(
    transport: &T,
    topic: &str,
    kind: MessageKind,
    payload: Vec<u8>,
) -> PublishOutcome
where
    T: Transport + ?Sized,
{
    transport
        .publish(topic, payload, kind.qos(), kind.retain())
        .await
}
