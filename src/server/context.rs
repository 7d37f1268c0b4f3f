// src/server/context.rs

use crate::config::Config;
use crate::core::{ConnectionPool, EventBus, StatsAggregator};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Holds all the initialized state shared by the server's tasks.
pub struct ServerContext {
    pub config: Config,
    pub pool: Arc<ConnectionPool>,
    pub stats: Arc<StatsAggregator>,
    pub events: Arc<EventBus>,
    pub acceptor: Option<TlsAcceptor>,
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}
