//! Pure routing of MQTT events and payload formatting
//!
//! This module maps raw rumqttc events onto the small set of routes the
//! link's protocol loop acts on, and serializes outgoing payloads.

use super::health_monitor::DisconnectReason;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, DisconnectReasonCode, Packet};
use rumqttc::v5::{ConnectionError, Event, StateError};
use serde::Serialize;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(ack) => {
                    if ack.code == ConnectReturnCode::Success {
                        EventRoute::ConnectionAcknowledged
                    } else {
                        EventRoute::ConnectionRefused(format!("{:?}", ack.code))
                    }
                }
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(Self::classify_reason_code(&disconnect.reason_code))
                }
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged(ack.pkid),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Route an error returned by the event loop.
    ///
    /// rumqttc reports a broker DISCONNECT and a refused CONNACK as errors,
    /// not as incoming packets.
    pub fn route_connection_error(error: &ConnectionError) -> EventRoute {
        match error {
            ConnectionError::MqttState(StateError::ServerDisconnect { reason_code, .. }) => {
                EventRoute::Disconnected(Self::classify_reason_code(reason_code))
            }
            ConnectionError::ConnectionRefused(code) => {
                EventRoute::ConnectionRefused(format!("{code:?}"))
            }
            other => EventRoute::Disconnected(DisconnectReason::NetworkError(other.to_string())),
        }
    }

    /// Map a broker DISCONNECT reason code onto a disconnect reason (pure function)
    pub fn classify_reason_code(code: &DisconnectReasonCode) -> DisconnectReason {
        match code {
            DisconnectReasonCode::NormalDisconnection => DisconnectReason::Clean,
            other => DisconnectReason::BrokerInitiated(format!("{other:?}")),
        }
    }

    /// Serialize a payload to compact JSON (pure function)
    pub fn format_json_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(value)
    }

    /// Serialize a payload to indented JSON for human-inspected retained topics
    pub fn format_pretty_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(value)
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker rejected the connection with the given code
    ConnectionRefused(String),
    /// Broker closed the session
    Disconnected(DisconnectReason),
    /// Delivery confirmed for a QoS 1 publish
    PublishAcknowledged(u16),
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect};
    use serde_json::json;

    fn conn_ack(code: ConnectReturnCode) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code,
            properties: None,
        }))
    }

    #[test]
    fn test_route_conn_ack() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&conn_ack(ConnectReturnCode::Success)),
            EventRoute::ConnectionAcknowledged
        );
        assert!(matches!(
            MessageHandler::route_mqtt_event(&conn_ack(ConnectReturnCode::NotAuthorized)),
            EventRoute::ConnectionRefused(code) if code == "NotAuthorized"
        ));
    }

    #[test]
    fn test_route_disconnect_reasons() {
        let clean = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&clean),
            EventRoute::Disconnected(DisconnectReason::Clean)
        );

        let shutdown = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&shutdown),
            EventRoute::Disconnected(DisconnectReason::BrokerInitiated(
                "ServerShuttingDown".to_string()
            ))
        );
    }

    #[test]
    fn test_route_server_disconnect_error() {
        let clean = ConnectionError::MqttState(StateError::ServerDisconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            reason_string: None,
        });
        assert_eq!(
            MessageHandler::route_connection_error(&clean),
            EventRoute::Disconnected(DisconnectReason::Clean)
        );

        let takeover = ConnectionError::MqttState(StateError::ServerDisconnect {
            reason_code: DisconnectReasonCode::SessionTakenOver,
            reason_string: Some("taken over".to_string()),
        });
        assert_eq!(
            MessageHandler::route_connection_error(&takeover),
            EventRoute::Disconnected(DisconnectReason::BrokerInitiated(
                "SessionTakenOver".to_string()
            ))
        );
    }

    #[test]
    fn test_route_other_connection_errors() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(
            MessageHandler::route_connection_error(&refused),
            EventRoute::ConnectionRefused("NotAuthorized".to_string())
        );

        let reset = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(matches!(
            MessageHandler::route_connection_error(&reset),
            EventRoute::Disconnected(DisconnectReason::NetworkError(_))
        ));
    }

    #[test]
    fn test_classify_reason_code() {
        assert_eq!(
            MessageHandler::classify_reason_code(&DisconnectReasonCode::NormalDisconnection),
            DisconnectReason::Clean
        );
        assert!(matches!(
            MessageHandler::classify_reason_code(&DisconnectReasonCode::KeepAliveTimeout),
            DisconnectReason::BrokerInitiated(_)
        ));
    }

    #[test]
    fn test_format_payloads() {
        let value = json!({"temperature": 21.5});
        assert_eq!(
            MessageHandler::format_json_payload(&value).unwrap(),
            br#"{"temperature":21.5}"#.to_vec()
        );
        let pretty = MessageHandler::format_pretty_payload(&value).unwrap();
        assert!(String::from_utf8(pretty).unwrap().contains('\n'));
    }
}
