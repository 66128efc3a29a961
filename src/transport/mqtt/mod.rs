//! MQTT messaging link for the sensor agent
//!
//! Pure decisions are split from I/O so they can be tested without a broker:
//!
//! - [`connection`] - Connection state, options and reachability probing
//! - [`message_handler`] - Event routing and payload formatting
//! - [`health_monitor`] - State transitions and recovery decisions
//! - [`client`] - The link itself: connect, protocol loop, recovery, publish
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensor_agent::config::MqttSection;
//! use sensor_agent::transport::mqtt::MqttLink;
//!
//! # tokio_test::block_on(async {
//! let link = MqttLink::new(MqttSection::new("localhost"))?;
//! link.connect_with_recovery().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::{MqttLink, SessionStarted};
pub use connection::{
    configure_mqtt_options, probe_broker, ConnectionState, LinkError, ReconnectConfig,
};
pub use health_monitor::{
    ConnectionEvent, DisconnectAction, DisconnectReason, HealthMetrics, HealthMonitor,
};
pub use message_handler::{EventRoute, MessageHandler};
