// tests/integration/client_test.rs

use super::test_helpers::{
    dial, eventually, init_tracing, plain_client_config, plain_config, start_server, within,
};
use linewire::config::ClientConfig;
use linewire::{Client, LineWireError};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_dial_refused() {
    init_tracing();
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = Client::new(plain_client_config()).unwrap();
    let err = client.dial("127.0.0.1", port).await.unwrap_err();

    assert!(err.to_string().starts_with("TLS_CLIENT: [dial] unable to dial to 127.0.0.1:"));
    assert!(matches!(err.root(), LineWireError::Io(_)));
    assert_eq!(client.connection_count(), 0);
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_use_before_dial() {
    init_tracing();
    let client = Client::new(plain_client_config()).unwrap();

    assert!(client.send_string("hi").await.unwrap_err().is_already_closed());
    assert_eq!(
        client.next_message().await.unwrap_err(),
        LineWireError::ConnectionClosed
    );
    assert!(!client.close());
    assert!(client.connection().is_none());
}

#[tokio::test]
async fn test_redial_drops_old_stats() {
    let (server, addr) = start_server(plain_config()).await;
    let client = dial(addr, plain_client_config()).await;
    within(server.accept_connection()).await.unwrap();

    client.send_string("abc").await.unwrap();
    assert_eq!(client.stats().sent, 4);
    let first = client.connection().unwrap();

    client
        .dial(&addr.ip().to_string(), addr.port())
        .await
        .unwrap();
    assert!(first.is_closed());
    assert_eq!(client.connection_count(), 2);
    assert_eq!(client.stats(), Default::default());

    server.stop().await;
}

#[tokio::test]
async fn test_redial_keeps_stats_when_configured() {
    let (server, addr) = start_server(plain_config()).await;
    let config = ClientConfig {
        drop_old_stats: false,
        ..plain_client_config()
    };
    let client = dial(addr, config).await;
    client.send_string("abc").await.unwrap();

    client
        .dial(&addr.ip().to_string(), addr.port())
        .await
        .unwrap();
    client.send_string("abc").await.unwrap();

    assert_eq!(client.stats().sent, 8);
    assert_eq!(client.host().as_deref(), Some("127.0.0.1"));

    server.stop().await;
}

#[tokio::test]
async fn test_stop_handle_closes_client() {
    let (server, addr) = start_server(plain_config()).await;
    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();

    client.stop_handle().cancel();
    eventually(|| client.is_closed()).await;
    assert!(!client.closed_with_error());

    // The server sees the hang-up.
    assert!(within(conn.next_message()).await.is_err());

    // A fresh dial installs a fresh handle.
    client
        .dial(&addr.ip().to_string(), addr.port())
        .await
        .unwrap();
    assert!(!client.stop_handle().is_cancelled());
    assert!(!client.is_closed());

    server.stop().await;
}

#[tokio::test]
async fn test_client_message_limit() {
    let (server, addr) = start_server(plain_config()).await;
    let config = ClientConfig {
        buffer_size: 4,
        max_message_size: 4,
        ..plain_client_config()
    };
    let client = dial(addr, config).await;
    let conn = within(server.accept_connection()).await.unwrap();

    server
        .send_string(&conn, "Hello there, General Kenobi!")
        .await
        .unwrap();

    let err = within(client.next_error()).await.unwrap();
    assert!(err.is_message_too_large());
    assert!(err.to_string().starts_with("TLS_CLIENT: [reader] error reading from 127.0.0.1"));

    eventually(|| client.is_closed()).await;
    assert!(client.closed_with_error());
    assert_eq!(client.stats().errors, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_close_with_error() {
    let (server, addr) = start_server(plain_config()).await;
    let client = dial(addr, plain_client_config()).await;

    assert!(client.close_with_error());
    assert!(client.is_closed());
    assert!(client.closed_with_error());
    assert!(!client.close());

    server.stop().await;
}

#[tokio::test]
async fn test_tls_client_with_missing_ca_fails() {
    init_tracing();
    let mut config = ClientConfig::default();
    config.tls.ca_cert_path = Some("/definitely/not/here/ca.pem".to_string());

    assert!(Client::new(config).is_err());
    assert!(Client::new(ClientConfig::default()).is_ok());
}

#[tokio::test]
async fn test_plain_stream_reports_peer_address() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
    let stream = linewire::server::AnyStream::Tcp(tcp);

    assert!(!stream.is_tls());
    assert_eq!(stream.peer_addr().unwrap(), addr);
}
