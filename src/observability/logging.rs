//! Structured logging system using tracing crate
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE). Defaults to
//!   INFO for verbose agents and WARN otherwise
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=INFO sensor-agent run
//! LOG_FORMAT=compact LOG_LEVEL=DEBUG sensor-agent -c sensor-agent.toml run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a `LOG_LEVEL` value, falling back to `default` for unknown input
pub fn parse_level(value: Option<&str>, default: Level) -> Level {
    match value.map(str::to_uppercase).as_deref() {
        Some("ERROR") => Level::ERROR,
        Some("WARN") => Level::WARN,
        Some("INFO") => Level::INFO,
        Some("DEBUG") => Level::DEBUG,
        Some("TRACE") => Level::TRACE,
        _ => default,
    }
}

/// Level used when `LOG_LEVEL` is not set
pub fn default_level(verbose: bool) -> Level {
    if verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

fn quiet_directive(target: &str) -> Option<Directive> {
    format!("{target}=warn").parse().ok()
}

/// Build the filter: `RUST_LOG` wins, otherwise `level` with noisy deps capped
pub fn build_filter(level: Level, rust_log: Option<&str>) -> EnvFilter {
    if let Some(rust_log) = rust_log {
        return EnvFilter::new(rust_log);
    }

    ["rumqttc", "tokio"]
        .into_iter()
        .filter_map(quiet_directive)
        .fold(EnvFilter::new(level.to_string()), |filter, directive| {
            filter.add_directive(directive)
        })
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Initialize logging with manual configuration
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let filter = build_filter(level, env::var("RUST_LOG").ok().as_deref());
    let subscriber = tracing_subscriber::registry().with(filter);

    // try_init: a second initialization (tests, embedding) is not an error
    let _ = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events(include_spans)))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };
}

/// Initialize logging from environment variables
pub fn init_default_logging(verbose: bool) {
    let level = parse_level(
        env::var("LOG_LEVEL").ok().as_deref(),
        default_level(verbose),
    );

    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let log_format = LogFormat::parse(&format);

    let include_spans = env::var("LOG_SPANS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    init_logging(level, log_format, include_spans);
}

/// Create a poll cycle span
#[macro_export]
macro_rules! poll_span {
    ($($field:tt)*) => {
        tracing::info_span!("poll_cycle", $($field)*)
    };
}

/// Create a discovery registration span
#[macro_export]
macro_rules! registration_span {
    ($($field:tt)*) => {
        tracing::info_span!("registration", $($field)*)
    };
}

pub use {poll_span, registration_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("CoMpAcT"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_json() {
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Json);
    }

    #[test]
    fn test_parse_level() {
        let test_cases = vec![
            (Some("ERROR"), Level::ERROR),
            (Some("warn"), Level::WARN),
            (Some("Info"), Level::INFO),
            (Some("DEBUG"), Level::DEBUG),
            (Some("trace"), Level::TRACE),
            (Some("invalid"), Level::WARN),
            (None, Level::WARN),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_level(input, Level::WARN), expected, "Failed for input: {input:?}");
        }
    }

    #[test]
    fn test_default_level_follows_verbosity() {
        assert_eq!(default_level(true), Level::INFO);
        assert_eq!(default_level(false), Level::WARN);
    }

    #[test]
    fn test_build_filter() {
        let filter = build_filter(Level::INFO, None).to_string();
        assert!(filter.contains("rumqttc=warn"));
        assert!(filter.contains("info"));

        let overridden = build_filter(Level::INFO, Some("sensor_agent=trace")).to_string();
        assert!(overridden.contains("sensor_agent=trace"));
        assert!(!overridden.contains("rumqttc"));
    }
}
