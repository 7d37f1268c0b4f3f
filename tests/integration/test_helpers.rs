// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use linewire::config::{ClientConfig, Config};
use linewire::{Client, Server};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    // Initialize tracing (ignore error if already initialized)
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A plain-TCP server configuration bound to an ephemeral loopback port.
pub fn plain_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Config::default()
    };
    config.tls.enabled = false;
    config
}

pub fn plain_client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.tls.enabled = false;
    config.dial_timeout = Duration::from_secs(2);
    config
}

/// Starts a server and returns it with the address it listens on.
pub async fn start_server(config: Config) -> (Arc<Server>, SocketAddr) {
    init_tracing();
    let server = Server::new(config).expect("Failed to create server");
    let addr = server.listen().await.expect("Failed to listen");
    (server, addr)
}

/// Creates a plain-TCP client and dials `addr`.
pub async fn dial(addr: SocketAddr, config: ClientConfig) -> Client {
    let client = Client::new(config).expect("Failed to create client");
    client
        .dial(&addr.ip().to_string(), addr.port())
        .await
        .expect("Failed to dial");
    client
}

/// Awaits `fut`, failing the test if it takes longer than [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

/// Polls `cond` until it holds, failing the test after [`WAIT`].
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    within(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Issues a bare HTTP/1.1 GET and returns the status code and body.
pub async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    within(stream.read_to_end(&mut raw)).await.unwrap();
    let raw = String::from_utf8_lossy(&raw).into_owned();

    let (head, body) = raw.split_once("\r\n\r\n").expect("malformed HTTP response");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("missing status code");
    (status, body.to_string())
}
