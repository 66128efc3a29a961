//! Observability for the sensor agent
//!
//! Structured logging through `tracing` and process-wide counters.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

pub use logging::{poll_span, registration_span};
