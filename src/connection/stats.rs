// src/connection/stats.rs

//! Per-connection traffic counters.

use parking_lot::Mutex;
use serde::Serialize;

/// A snapshot of traffic counters: bytes sent, bytes received and errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    pub sent: u64,
    pub received: u64,
    pub errors: u64,
}

/// Thread-safe counters owned by a connection (or shared across re-dials by a client).
///
/// Each connection has its own lock, so updates on different connections never contend.
#[derive(Debug, Default)]
pub struct StatCounters {
    inner: Mutex<TrafficStats>,
}

impl StatCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to the sent-bytes counter. Negative values are ignored.
    pub fn add_sent(&self, n: i64) {
        if let Ok(n) = u64::try_from(n) {
            self.inner.lock().sent += n;
        }
    }

    /// Adds to the received-bytes counter. Negative values are ignored.
    pub fn add_received(&self, n: i64) {
        if let Ok(n) = u64::try_from(n) {
            self.inner.lock().received += n;
        }
    }

    /// Adds to the error counter. Negative values are ignored.
    pub fn add_errors(&self, n: i64) {
        if let Ok(n) = u64::try_from(n) {
            self.inner.lock().errors += n;
        }
    }

    pub fn snapshot(&self) -> TrafficStats {
        *self.inner.lock()
    }

    /// Zeroes all three counters at once.
    pub fn reset(&self) {
        *self.inner.lock() = TrafficStats::default();
    }
}
