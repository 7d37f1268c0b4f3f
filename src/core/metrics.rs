// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, TextEncoder, register_counter, register_gauge};

lazy_static! {
    // --- Gauges ---
    /// The number of connections currently open.
    pub static ref ACTIVE_CONNECTIONS: Gauge =
        register_gauge!("linewire_active_connections", "Number of currently open connections.").unwrap();

    // --- Counters ---
    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("linewire_connections_accepted_total", "Total number of connections accepted.").unwrap();
    /// The total number of bytes read from all connections.
    pub static ref BYTES_RECEIVED_TOTAL: Counter =
        register_counter!("linewire_bytes_received_total", "Total number of bytes received.").unwrap();
    /// The total number of bytes written to all connections.
    pub static ref BYTES_SENT_TOTAL: Counter =
        register_counter!("linewire_bytes_sent_total", "Total number of bytes sent.").unwrap();
    /// The total number of read and write errors.
    pub static ref ERRORS_TOTAL: Counter =
        register_counter!("linewire_errors_total", "Total number of connection errors.").unwrap();
    /// Closed connections dropped from the pool after their retention window.
    pub static ref CONNECTIONS_EVICTED_TOTAL: Counter =
        register_counter!("linewire_connections_evicted_total", "Total number of closed connections evicted from the pool.").unwrap();
    /// Open connections force-closed for inactivity.
    pub static ref CONNECTIONS_REAPED_TOTAL: Counter =
        register_counter!("linewire_connections_reaped_total", "Total number of connections closed for inactivity.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
