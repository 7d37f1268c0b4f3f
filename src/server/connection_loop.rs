// src/server/connection_loop.rs

//! Contains the accept loop and the per-connection task it spawns.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::{Connection, ConnectionOptions, ReceiveObserver, run_receive_loop};
use crate::core::{LineWireError, metrics};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsStream;
use tracing::{debug, error, info};

/// Feeds a server connection's read traffic into the daily statistics and the error stream.
struct ServerObserver {
    ctx: Arc<ServerContext>,
}

#[async_trait]
impl ReceiveObserver for ServerObserver {
    fn on_bytes_read(&self, _conn: &Connection, bytes: usize) {
        if bytes > 0 {
            self.ctx.stats.add_received(bytes as i64);
            metrics::BYTES_RECEIVED_TOTAL.inc_by(bytes as f64);
        }
    }

    async fn on_read_error(&self, conn: &Connection, error: LineWireError) {
        // A peer hanging up is reported but is not a traffic error.
        if !error.is_stream_closed() {
            self.ctx.stats.add_errors(1);
        }
        self.ctx
            .events
            .report(error.context(format!("[receive] connection {}", conn.id())))
            .await;
    }
}

/// Accepts connections until the shutdown token fires, then waits for every
/// connection task to finish.
pub(crate) async fn run(ctx: Arc<ServerContext>, listener: TcpListener) {
    let mut connection_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown.cancelled() => {
                info!("Listener shutting down.");
                break;
            }

            res = listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        debug!("Accepted new connection from: {}", addr);
                        metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();
                        connection_tasks.spawn(serve_connection(ctx.clone(), socket, addr));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        ctx.events
                            .report(LineWireError::from(e).context("[listen] error accepting connection"))
                            .await;
                    }
                }
            },

            Some(res) = connection_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A connection task panicked: {e:?}");
                }
            },
        }
    }

    drop(listener);
    info!("Listener closed. Waiting for connection tasks to finish...");
    while let Some(res) = connection_tasks.join_next().await {
        if let Err(e) = res
            && e.is_panic()
        {
            error!("A connection task panicked: {e:?}");
        }
    }
    info!("All connection tasks finished.");
}

/// Completes the handshake, registers the connection, announces it and runs its receive loop.
async fn serve_connection(ctx: Arc<ServerContext>, socket: TcpStream, addr: SocketAddr) {
    let stream = match &ctx.acceptor {
        Some(acceptor) => {
            let handshake = tokio::select! {
                biased;
                _ = ctx.shutdown.cancelled() => return,
                res = acceptor.accept(socket) => res,
            };
            match handshake {
                Ok(tls_stream) => {
                    debug!("TLS handshake successful for {addr}");
                    AnyStream::Tls(Box::new(TlsStream::Server(tls_stream)))
                }
                Err(e) => {
                    ctx.events
                        .report(
                            LineWireError::Tls(e.to_string())
                                .context(format!("[listen] TLS handshake with {addr} failed")),
                        )
                        .await;
                    return;
                }
            }
        }
        None => AnyStream::Tcp(socket),
    };

    let transport = if stream.is_tls() { "TLS" } else { "plain TCP" };
    let conn = Connection::with_options(
        stream,
        addr,
        ConnectionOptions {
            terminator: ctx.config.connection.message_terminator,
            message_capacity: ctx.config.connection.message_channel_capacity,
            counters: None,
        },
    );
    ctx.pool.add(conn.clone());
    // A connection registered after shutdown began was missed by `close_all`.
    if ctx.shutdown.is_cancelled() {
        conn.close();
    }
    metrics::ACTIVE_CONNECTIONS.inc();
    info!("New {} connection {} from {}.", transport, conn.id(), addr);

    if !ctx.events.announce(conn.clone()).await {
        debug!("Connection {} was not announced; closing it.", conn.id());
        conn.close();
    }

    let observer = ServerObserver { ctx: ctx.clone() };
    run_receive_loop(conn.clone(), ctx.config.connection.frame_limits(), &observer).await;

    metrics::ACTIVE_CONNECTIONS.dec();
    info!(
        "Connection {} from {} closed. Sent {} bytes, received {} bytes.",
        conn.id(),
        addr,
        conn.stats().sent,
        conn.stats().received
    );
}
