// src/core/tasks/lifecycle.rs

//! The background task that evicts long-closed connections from the pool and
//! force-closes long-inactive ones.

use crate::config::LifecycleConfig;
use crate::core::metrics;
use crate::core::pool::ConnectionPool;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Closed connections removed from the pool.
    pub evicted: usize,
    /// Open connections force-closed for inactivity.
    pub reaped: usize,
}

/// Periodically sweeps the connection pool.
pub struct LifecycleManager {
    pool: Arc<ConnectionPool>,
    retention: TimeDelta,
    inactivity: Option<TimeDelta>,
    interval: Duration,
}

impl LifecycleManager {
    pub fn new(pool: Arc<ConnectionPool>, config: &LifecycleConfig) -> Self {
        let inactivity = (config.inactivity_window_minutes > 0)
            .then(|| minutes(config.inactivity_window_minutes));
        Self {
            pool,
            retention: minutes(config.retention_window_minutes),
            inactivity,
            interval: config.sweep_interval,
        }
    }

    /// Runs one sweep as of `now`.
    ///
    /// A closed connection whose retention window has elapsed is removed from the
    /// pool. An open connection idle for longer than the inactivity window is
    /// closed, and stays pooled until a later sweep evicts it.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for conn in self.pool.snapshot() {
            if let Some(closed_at) = conn.closed_at() {
                if elapsed(now, closed_at, self.retention) {
                    self.pool.remove(&conn.id());
                    report.evicted += 1;
                    debug!(
                        "Evicted connection {} ({}) closed at {}.",
                        conn.id(),
                        conn.address(),
                        closed_at
                    );
                }
                continue;
            }

            if let Some(inactivity) = self.inactivity
                && elapsed(now, conn.last_activity(), inactivity)
                && conn.close()
            {
                report.reaped += 1;
                info!(
                    "Closed connection {} ({}) after inactivity since {}.",
                    conn.id(),
                    conn.address(),
                    conn.last_activity()
                );
            }
        }

        metrics::CONNECTIONS_EVICTED_TOTAL.inc_by(report.evicted as f64);
        metrics::CONNECTIONS_REAPED_TOTAL.inc_by(report.reaped as f64);
        report
    }

    /// Runs the main loop of the lifecycle manager until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Lifecycle manager started. Sweep interval: {:?}, retention: {} min, inactivity: {}.",
            self.interval,
            self.retention.num_minutes(),
            self.inactivity
                .map(|d| format!("{} min", d.num_minutes()))
                .unwrap_or_else(|| "disabled".to_string())
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; the first sweep belongs one interval later.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep(Utc::now());
                    if report.evicted > 0 || report.reaped > 0 {
                        info!(
                            "Lifecycle sweep: {} evicted, {} closed for inactivity, {} pooled.",
                            report.evicted,
                            report.reaped,
                            self.pool.len()
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Lifecycle manager shutting down.");
                    return;
                }
            }
        }
    }
}

/// True once `now` is at or past `since + window`. A window too large to add never elapses.
fn elapsed(now: DateTime<Utc>, since: DateTime<Utc>, window: TimeDelta) -> bool {
    since
        .checked_add_signed(window)
        .is_some_and(|deadline| now >= deadline)
}

fn minutes(m: u64) -> TimeDelta {
    i64::try_from(m)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .unwrap_or(TimeDelta::MAX)
}
