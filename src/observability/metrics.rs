//! Thread-safe metrics collection system
//!
//! Provides atomic counters for tracking poll cycles, sensor readings and
//! MQTT traffic across the poll loop and the messaging link.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Poll loop
    poll_cycles: AtomicU64,
    readings_published: AtomicU64,
    measurement_errors: AtomicU64,

    // MQTT
    messages_published: AtomicU64,
    messages_dropped: AtomicU64,
    connections_established: AtomicU64,
    recoveries: AtomicU64,
    registrations: AtomicU64,

    uptime_start: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            poll_cycles: AtomicU64::new(0),
            readings_published: AtomicU64::new(0),
            measurement_errors: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn record_poll_cycle(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reading(&self) {
        self.readings_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_measurement_error(&self) {
        self.measurement_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.poll_cycles,
            &self.readings_published,
            &self.measurement_errors,
            &self.messages_published,
            &self.messages_dropped,
            &self.connections_established,
            &self.recoveries,
            &self.registrations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let uptime_start = self.uptime_start.load(Ordering::Relaxed);

        MetricsSnapshot {
            poll: PollMetrics {
                poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
                readings_published: self.readings_published.load(Ordering::Relaxed),
                measurement_errors: self.measurement_errors.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                messages_published: self.messages_published.load(Ordering::Relaxed),
                messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                recoveries: self.recoveries.load(Ordering::Relaxed),
                registrations: self.registrations.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(uptime_start),
            timestamp: now,
        }
    }
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub poll: PollMetrics,
    pub mqtt: MqttMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollMetrics {
    pub poll_cycles: u64,
    pub readings_published: u64,
    pub measurement_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub messages_published: u64,
    pub messages_dropped: u64,
    pub connections_established: u64,
    pub recoveries: u64,
    /// Completed discovery registrations, one per session
    pub registrations: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
