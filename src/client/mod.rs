// src/client/mod.rs

//! The dialing side: one connection at a time, with statistics that survive re-dials.

use crate::config::ClientConfig;
use crate::connection::{
    Connection, ConnectionOptions, Message, ReceiveObserver, StatCounters, TrafficStats,
    run_receive_loop,
};
use crate::core::{EventBus, LineWireError};
use crate::server::{AnyStream, load_certs};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_rustls::{TlsConnector, TlsStream, rustls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reports read failures of the client's connection to its error stream.
struct ClientObserver {
    events: Arc<EventBus>,
    host: String,
}

#[async_trait]
impl ReceiveObserver for ClientObserver {
    async fn on_read_error(&self, conn: &Connection, error: LineWireError) {
        let error = error.context(format!("[reader] error reading from {}", self.host));
        // Closing the connection unblocks a report stuck on a full error stream.
        tokio::select! {
            biased;
            _ = conn.closed() => {
                debug!("Connection {} closed before its read error was reported.", conn.id());
            }
            _ = self.events.report(error) => {}
        }
    }
}

/// The connection currently owned by the client.
struct Session {
    conn: Arc<Connection>,
    host: String,
}

/// A framed-message client managing one connection.
///
/// Unlike the server, traffic counters belong to the client itself and carry
/// over from one dial to the next unless `drop_old_stats` is set.
pub struct Client {
    config: ClientConfig,
    connector: Option<TlsConnector>,
    counters: Arc<StatCounters>,
    events: Arc<EventBus>,
    error_rx: AsyncMutex<mpsc::Receiver<LineWireError>>,
    session: Mutex<Option<Session>>,
    stop: Mutex<CancellationToken>,
    connection_count: AtomicUsize,
}

impl Client {
    /// Validates the configuration and prepares the TLS connector. Nothing is dialed yet.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connector = if config.tls.enabled {
            Some(build_connector(&config).context("Failed to set up TLS for the client")?)
        } else {
            None
        };

        // Sends on the client's bus are never cancelled by a shutdown; a closed
        // connection unblocks them instead.
        let (events, receivers) = EventBus::new(
            config.error_channel_capacity,
            config.suppress_errors,
            config.error_prefix.clone(),
            CancellationToken::new(),
        );

        Ok(Self {
            config,
            connector,
            counters: Arc::new(StatCounters::default()),
            events: Arc::new(events),
            error_rx: AsyncMutex::new(receivers.errors),
            session: Mutex::new(None),
            stop: Mutex::new(CancellationToken::new()),
            connection_count: AtomicUsize::new(0),
        })
    }

    /// Connects to `host:port` and starts reading messages. A connection left
    /// open by a previous dial is closed first.
    pub async fn dial(&self, host: &str, port: u16) -> Result<(), LineWireError> {
        let stream = tokio::time::timeout(self.config.dial_timeout, self.connect(host, port))
            .await
            .map_err(|_| {
                LineWireError::Io(Arc::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("dial timed out after {:?}", self.config.dial_timeout),
                )))
            })
            .and_then(|res| res)
            .map_err(|e| {
                self.events
                    .format_error(e.context(format!("[dial] unable to dial to {host}:{port}")))
            })?;

        let addr = stream
            .peer_addr()
            .map_err(|e| self.events.format_error(LineWireError::from(e).context("[dial]")))?;

        if let Some(previous) = self.session.lock().take() {
            previous.conn.close();
        }
        if self.config.drop_old_stats && self.connection_count.load(Ordering::Acquire) > 0 {
            self.counters.reset();
        }

        let conn = Connection::with_options(
            stream,
            addr,
            ConnectionOptions {
                terminator: self.config.message_terminator,
                message_capacity: self.config.message_channel_capacity,
                counters: Some(self.counters.clone()),
            },
        );
        let count = self.connection_count.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Connected to {} ({}), connection #{}.", host, addr, count);

        let stop = {
            let mut stop = self.stop.lock();
            if stop.is_cancelled() {
                *stop = CancellationToken::new();
            }
            stop.clone()
        };
        spawn_controller(conn.clone(), stop);

        let observer = ClientObserver {
            events: self.events.clone(),
            host: host.to_string(),
        };
        let limits = self.config.frame_limits();
        let reader_conn = conn.clone();
        tokio::spawn(async move {
            run_receive_loop(reader_conn, limits, &observer).await;
        });

        *self.session.lock() = Some(Session {
            conn,
            host: host.to_string(),
        });
        Ok(())
    }

    async fn connect(&self, host: &str, port: u16) -> Result<AnyStream, LineWireError> {
        let tcp = TcpStream::connect((host, port)).await?;
        let Some(connector) = &self.connector else {
            return Ok(AnyStream::Tcp(tcp));
        };

        let domain = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| LineWireError::Tls(format!("invalid TLS domain name '{host}'")))?;
        let tls_stream = connector
            .connect(domain, tcp)
            .await
            .map_err(|e| LineWireError::Tls(format!("TLS handshake failed: {e}")))?;
        Ok(AnyStream::Tls(Box::new(TlsStream::Client(tls_stream))))
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.session.lock().as_ref().map(|s| s.conn.clone())
    }

    /// Sends one framed message on the current connection.
    pub async fn send(&self, payload: &[u8]) -> Result<usize, LineWireError> {
        let Some(conn) = self.current() else {
            return Err(self.events.format_error(LineWireError::AlreadyClosed));
        };
        conn.send_frame(payload)
            .await
            .map_err(|failure| self.events.format_error(failure.error))
    }

    pub async fn send_string(&self, s: &str) -> Result<usize, LineWireError> {
        self.send(s.as_bytes()).await
    }

    /// Waits for the next message. Fails with `ConnectionClosed` once the
    /// connection's message stream has ended, or if nothing was dialed.
    pub async fn next_message(&self) -> Result<Message, LineWireError> {
        match self.current() {
            Some(conn) => conn.next_message().await,
            None => Err(LineWireError::ConnectionClosed),
        }
    }

    /// Waits for the next error event.
    pub async fn next_error(&self) -> Option<LineWireError> {
        self.error_rx.lock().await.recv().await
    }

    /// Bytes sent, bytes received and errors across the client's connections.
    pub fn stats(&self) -> TrafficStats {
        self.counters.snapshot()
    }

    /// Number of successful dials.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Acquire)
    }

    /// The current connection, if one was dialed.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.current()
    }

    pub fn host(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.host.clone())
    }

    /// Closes the current connection. Returns `false` if there was nothing open to close.
    pub fn close(&self) -> bool {
        self.current().is_some_and(|conn| conn.close())
    }

    pub fn close_with_error(&self) -> bool {
        self.current().is_some_and(|conn| conn.close_with_error())
    }

    /// True when no connection was dialed or the current one is closed.
    pub fn is_closed(&self) -> bool {
        self.current().is_none_or(|conn| conn.is_closed())
    }

    pub fn closed_with_error(&self) -> bool {
        self.current().is_some_and(|conn| conn.closed_with_error())
    }

    /// A token that closes the client's current connection when cancelled.
    ///
    /// The next `dial` after a cancellation installs a fresh token.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.lock().clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.conn.close();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host())
            .field("closed", &self.is_closed())
            .field("connection_count", &self.connection_count())
            .finish()
    }
}

/// Closes `conn` when `stop` fires, for as long as the connection is open.
fn spawn_controller(conn: Arc<Connection>, stop: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = stop.cancelled() => {
                if conn.close() {
                    info!("Client stopped; connection {} closed.", conn.id());
                }
            }
            _ = conn.closed() => {}
        }
    });
}

/// Trusts the configured CA file, or the public web roots when none is set.
fn build_connector(config: &ClientConfig) -> Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    match &config.tls.ca_cert_path {
        Some(path) => {
            for cert in load_certs(path)? {
                root_cert_store
                    .add(cert)
                    .with_context(|| format!("Unable to parse certificate from '{path}'"))?;
            }
        }
        None => root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(tls_config)))
}
