// src/server/mod.rs

//! The listening side: accepts TLS (or plain TCP) connections, frames their
//! traffic and exposes connections, errors and statistics to the application.

use crate::config::Config;
use crate::connection::{Connection, TrafficStats};
use crate::core::{ConnectionPool, EventBus, LifecycleManager, LineWireError, StatsAggregator, metrics};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod connection_loop;
mod context;
mod initialization;
mod stats_server;
mod stream;

pub(crate) use initialization::load_certs;
pub use stream::AnyStream;

use context::ServerContext;

/// How long `stop` waits for the server's tasks before aborting them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A framed-message server.
///
/// Create it with [`Server::new`], start it with [`Server::listen`], then consume
/// [`Server::accept_connection`] and [`Server::next_error`] until [`Server::stop`].
pub struct Server {
    ctx: Arc<ServerContext>,
    connection_rx: AsyncMutex<mpsc::Receiver<Arc<Connection>>>,
    error_rx: AsyncMutex<mpsc::Receiver<LineWireError>>,
    tasks: AsyncMutex<JoinSet<()>>,
    local_addr: Mutex<Option<SocketAddr>>,
    stats_addr: Mutex<Option<SocketAddr>>,
    active: AtomicBool,
    stopped: AtomicBool,
}

impl Server {
    /// Validates the configuration and loads the TLS material. Nothing is bound yet.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        initialization::log_startup_info(&config);
        let acceptor =
            initialization::setup_tls(&config).context("Failed to set up TLS for the server")?;

        let shutdown = CancellationToken::new();
        let (events, receivers) = EventBus::new(
            config.event_channel_capacity,
            config.connection.suppress_errors,
            config.error_prefix.clone(),
            shutdown.clone(),
        );

        let ctx = Arc::new(ServerContext {
            config,
            pool: Arc::new(ConnectionPool::new()),
            stats: Arc::new(StatsAggregator::new()),
            events: Arc::new(events),
            acceptor,
            shutdown,
            started_at: Utc::now(),
        });

        Ok(Arc::new(Self {
            ctx,
            connection_rx: AsyncMutex::new(receivers.connections),
            error_rx: AsyncMutex::new(receivers.errors),
            tasks: AsyncMutex::new(JoinSet::new()),
            local_addr: Mutex::new(None),
            stats_addr: Mutex::new(None),
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Binds the listener and starts the accept loop, the lifecycle sweep and,
    /// when enabled, the statistics endpoint. Returns the bound address.
    pub async fn listen(&self) -> Result<SocketAddr> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(anyhow!(LineWireError::ServerClosed));
        }
        if self.active.load(Ordering::Acquire) {
            return Err(anyhow!("Server is already listening"));
        }

        let config = &self.ctx.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
        let addr = listener.local_addr()?;

        let stats_listener = if config.stats_http.enabled {
            let l = TcpListener::bind((config.stats_http.host.as_str(), config.stats_http.port))
                .await
                .with_context(|| {
                    format!(
                        "Failed to bind stats server on {}:{}",
                        config.stats_http.host, config.stats_http.port
                    )
                })?;
            *self.stats_addr.lock() = Some(l.local_addr()?);
            Some(l)
        } else {
            None
        };

        let mut tasks = self.tasks.lock().await;
        tasks.spawn(connection_loop::run(self.ctx.clone(), listener));
        tasks.spawn(
            LifecycleManager::new(self.ctx.pool.clone(), &config.lifecycle)
                .run(self.ctx.shutdown.clone()),
        );
        if let Some(l) = stats_listener {
            tasks.spawn(stats_server::run_stats_server(self.ctx.clone(), l));
        }
        drop(tasks);

        *self.local_addr.lock() = Some(addr);
        self.active.store(true, Ordering::Release);
        info!(
            "LineWire server listening on {} ({}).",
            addr,
            if self.ctx.acceptor.is_some() { "TLS" } else { "plain TCP" }
        );
        Ok(addr)
    }

    /// Waits for the next accepted connection. Fails with `ServerClosed` once
    /// the server has stopped.
    pub async fn accept_connection(&self) -> Result<Arc<Connection>, LineWireError> {
        self.connection_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(LineWireError::ServerClosed)
    }

    /// Waits for the next error event. Returns `None` once the server has stopped.
    pub async fn next_error(&self) -> Option<LineWireError> {
        self.error_rx.lock().await.recv().await
    }

    /// Sends one framed message on `conn` and records the traffic in the daily statistics.
    pub async fn send(&self, conn: &Connection, payload: &[u8]) -> Result<usize, LineWireError> {
        match conn.send_frame(payload).await {
            Ok(n) => {
                self.ctx.stats.add_sent(n as i64);
                metrics::BYTES_SENT_TOTAL.inc_by(n as f64);
                Ok(n)
            }
            Err(failure) => {
                self.ctx.stats.add_sent(failure.bytes as i64);
                self.ctx.stats.add_errors(1);
                metrics::BYTES_SENT_TOTAL.inc_by(failure.bytes as f64);
                metrics::ERRORS_TOTAL.inc();
                Err(self.ctx.events.format_error(failure.error))
            }
        }
    }

    pub async fn send_string(&self, conn: &Connection, s: &str) -> Result<usize, LineWireError> {
        self.send(conn, s.as_bytes()).await
    }

    /// Closes a connection. Returns `false` if it was already closed.
    pub fn close_connection(&self, conn: &Connection) -> bool {
        conn.close()
    }

    /// Stops accepting, closes every connection, waits for the server's tasks and
    /// ends the connection and error streams. Calling it again is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down. Sending signal to all tasks.");
        self.active.store(false, Ordering::Release);
        self.ctx.shutdown.cancel();

        let closed = self.ctx.pool.close_all();
        info!("Closed {} open connections.", closed);

        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            warn!("Timed out waiting for server tasks to finish cleanly. Aborting them.");
            tasks.shutdown().await;
        }

        self.ctx.pool.clear();
        self.ctx.events.close();
        info!("Server shutdown complete.");
    }

    /// True between a successful `listen` and `stop`.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Address of the statistics endpoint, when it is enabled and listening.
    pub fn stats_addr(&self) -> Option<SocketAddr> {
        *self.stats_addr.lock()
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Traffic totals since the server was created.
    pub fn stats_overall(&self) -> TrafficStats {
        self.ctx.stats.query_overall()
    }

    /// Traffic recorded on one local calendar day, if any.
    pub fn stats_day(&self, year: i32, month: u32, day: u32) -> Option<TrafficStats> {
        self.ctx.stats.query_day(year, month, day)
    }

    /// Number of pooled connections, closed ones awaiting eviction included.
    pub fn stats_connections(&self) -> usize {
        self.ctx.pool.len()
    }

    /// Number of pooled connections that are still open.
    pub fn active_connections(&self) -> usize {
        self.ctx.pool.active_count()
    }

    pub fn connection(&self, id: &uuid::Uuid) -> Option<Arc<Connection>> {
        self.ctx.pool.get(id)
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.ctx.pool
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.ctx.stats
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.ctx.started_at
    }

    pub fn online(&self) -> TimeDelta {
        Utc::now() - self.ctx.started_at
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("active", &self.is_active())
            .field("connections", &self.stats_connections())
            .finish()
    }
}
