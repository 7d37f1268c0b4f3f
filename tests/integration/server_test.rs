// tests/integration/server_test.rs

use super::test_helpers::{
    dial, eventually, plain_client_config, plain_config, start_server, within,
};
use chrono::{Datelike, Local};
use linewire::{LineWireError, Server};

const GREETING: &str = "Hello there, General Kenobi!";
const REPLY: &str = "Got ya!";

#[tokio::test]
async fn test_echo_roundtrip() {
    let (server, addr) = start_server(plain_config()).await;
    assert!(server.is_active());
    assert_eq!(server.local_addr(), Some(addr));

    let client = dial(addr, plain_client_config()).await;
    assert_eq!(client.send_string(GREETING).await.unwrap(), 29);

    let conn = within(server.accept_connection()).await.unwrap();
    let message = within(conn.next_message()).await.unwrap();
    assert_eq!(message.as_string(), GREETING);
    assert_eq!(message.wire_len(), 29);

    assert_eq!(server.send_string(&conn, REPLY).await.unwrap(), 8);
    let reply = within(client.next_message()).await.unwrap();
    assert_eq!(reply.as_string(), REPLY);

    let overall = server.stats_overall();
    assert_eq!(overall.received, 29);
    assert_eq!(overall.sent, 8);
    assert_eq!(overall.errors, 0);
    assert_eq!(conn.stats().received, 29);
    assert_eq!(conn.stats().sent, 8);

    let client_stats = client.stats();
    assert_eq!(client_stats.sent, 29);
    assert_eq!(client_stats.received, 8);

    assert_eq!(server.stats_connections(), 1);
    assert_eq!(server.active_connections(), 1);
    assert!(server.connection(&conn.id()).is_some());

    server.stop().await;
}

#[tokio::test]
async fn test_messages_arrive_in_order() {
    let (server, addr) = start_server(plain_config()).await;
    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();

    for i in 0..20 {
        client.send_string(&format!("message {i}")).await.unwrap();
    }
    for i in 0..20 {
        let message = within(conn.next_message()).await.unwrap();
        assert_eq!(message.as_string(), format!("message {i}"));
    }

    server.stop().await;
}

#[tokio::test]
async fn test_daily_stats_match_overall() {
    let (server, addr) = start_server(plain_config()).await;
    let today = Local::now().date_naive();
    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();

    client.send_string(GREETING).await.unwrap();
    within(conn.next_message()).await.unwrap();

    if Local::now().date_naive() == today {
        let day = server
            .stats_day(today.year(), today.month(), today.day())
            .unwrap();
        assert_eq!(day, server.stats_overall());
    }
    assert_eq!(server.stats_day(1999, 1, 1), None);

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_message_closes_connection_with_error() {
    let mut config = plain_config();
    config.connection.buffer_size = 4;
    config.connection.max_message_size = 8;
    let (server, addr) = start_server(config).await;

    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();
    client.send_string(GREETING).await.unwrap();

    let err = within(server.next_error()).await.unwrap();
    assert!(err.is_message_too_large());
    assert!(err.to_string().starts_with("TLS_SERVER: "));

    assert_eq!(
        within(conn.next_message()).await.unwrap_err(),
        LineWireError::ConnectionClosed
    );
    assert!(conn.closed_with_error());

    let overall = server.stats_overall();
    assert_eq!(overall.errors, 1);
    // The limit is checked per chunk, so at most one extra chunk is read past it.
    assert!(overall.received > 8 && overall.received <= 12);

    server.stop().await;
}

#[tokio::test]
async fn test_client_hangup_is_reported_but_not_counted() {
    let (server, addr) = start_server(plain_config()).await;
    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();

    assert!(client.close());
    assert!(client.is_closed());

    let err = within(server.next_error()).await.unwrap();
    assert!(err.is_stream_closed());
    assert!(within(conn.next_message()).await.is_err());
    assert!(conn.is_closed());
    assert!(!conn.closed_with_error());
    assert_eq!(server.stats_overall().errors, 0);

    // Closed connections stay pooled until the lifecycle sweep evicts them.
    assert_eq!(server.stats_connections(), 1);
    assert_eq!(server.active_connections(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_server_closes_connection() {
    let (server, addr) = start_server(plain_config()).await;
    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();

    assert!(server.close_connection(&conn));
    assert!(!server.close_connection(&conn));

    assert_eq!(
        within(client.next_message()).await.unwrap_err(),
        LineWireError::ConnectionClosed
    );
    eventually(|| client.is_closed()).await;

    let err = server.send_string(&conn, REPLY).await.unwrap_err();
    assert!(err.is_already_closed());

    server.stop().await;
}

#[tokio::test]
async fn test_stop_ends_all_streams() {
    let (server, addr) = start_server(plain_config()).await;
    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();

    within(server.stop()).await;
    assert!(!server.is_active());
    assert!(conn.is_closed());
    assert_eq!(server.stats_connections(), 0);

    assert_eq!(
        within(server.accept_connection()).await.unwrap_err(),
        LineWireError::ServerClosed
    );
    assert!(within(server.next_error()).await.is_none());
    assert!(within(client.next_message()).await.is_err());

    // Stopping twice is harmless; listening again is not allowed.
    within(server.stop()).await;
    assert!(server.listen().await.is_err());
}

#[tokio::test]
async fn test_stop_without_listen() {
    let server = Server::new(plain_config()).unwrap();
    within(server.stop()).await;
    assert_eq!(
        within(server.accept_connection()).await.unwrap_err(),
        LineWireError::ServerClosed
    );
}

#[tokio::test]
async fn test_tls_with_missing_certificate_fails_at_startup() {
    let mut config = plain_config();
    config.tls.enabled = true;
    config.tls.cert_path = "/definitely/not/here/cert.pem".to_string();
    config.tls.key_path = "/definitely/not/here/key.pem".to_string();

    let err = Server::new(config).unwrap_err();
    assert!(format!("{err:#}").contains("certificate"));
}

#[tokio::test]
async fn test_suppressed_errors_still_close_connection() {
    let mut config = plain_config();
    config.connection.suppress_errors = true;
    config.connection.buffer_size = 4;
    config.connection.max_message_size = 4;
    let (server, addr) = start_server(config).await;

    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();
    client.send_string(GREETING).await.unwrap();

    eventually(|| conn.is_closed()).await;
    assert!(conn.closed_with_error());
    assert_eq!(server.stats_overall().errors, 1);

    server.stop().await;
    assert!(within(server.next_error()).await.is_none());
}
