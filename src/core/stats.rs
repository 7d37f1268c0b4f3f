// src/core/stats.rs

//! Day-bucketed and all-time traffic statistics.

use crate::connection::TrafficStats;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Which of the three counters an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Sent,
    Received,
    Errors,
}

#[derive(Debug, Default)]
struct StatsInner {
    days: HashMap<NaiveDate, TrafficStats>,
    overall: TrafficStats,
}

/// Aggregates traffic per calendar day (local time) and over the whole lifetime.
///
/// Day buckets are created on first write and never removed. Every update takes the
/// lock once and touches both the day bucket and the overall total.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<StatsInner>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sent(&self, n: i64) {
        self.add_on(today(), StatKind::Sent, n);
    }

    pub fn add_received(&self, n: i64) {
        self.add_on(today(), StatKind::Received, n);
    }

    pub fn add_errors(&self, n: i64) {
        self.add_on(today(), StatKind::Errors, n);
    }

    /// Adds `n` to the given counter of `day`'s bucket and to the overall total.
    /// Negative values are ignored.
    pub fn add_on(&self, day: NaiveDate, kind: StatKind, n: i64) {
        let Ok(n) = u64::try_from(n) else {
            return;
        };

        let mut inner = self.inner.lock();
        let bucket = inner.days.entry(day).or_default();
        bump(bucket, kind, n);
        bump(&mut inner.overall, kind, n);
    }

    /// Returns the stats of a calendar day, or `None` if nothing was recorded
    /// that day (or the date does not exist).
    pub fn query_day(&self, year: i32, month: u32, day: u32) -> Option<TrafficStats> {
        NaiveDate::from_ymd_opt(year, month, day).and_then(|date| self.query_date(date))
    }

    pub fn query_date(&self, date: NaiveDate) -> Option<TrafficStats> {
        self.inner.lock().days.get(&date).copied()
    }

    pub fn query_overall(&self) -> TrafficStats {
        self.inner.lock().overall
    }

    /// Number of day buckets recorded so far.
    pub fn days_recorded(&self) -> usize {
        self.inner.lock().days.len()
    }
}

fn bump(stats: &mut TrafficStats, kind: StatKind, n: u64) {
    match kind {
        StatKind::Sent => stats.sent += n,
        StatKind::Received => stats.received += n,
        StatKind::Errors => stats.errors += n,
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
