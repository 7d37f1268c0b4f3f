// tests/integration/stats_http_test.rs

use super::test_helpers::{dial, http_get, plain_client_config, plain_config, start_server, within};
use serde_json::Value;

#[tokio::test]
async fn test_stats_endpoints() {
    let mut config = plain_config();
    config.stats_http.enabled = true;
    config.stats_http.host = "127.0.0.1".to_string();
    config.stats_http.port = 0;
    let (server, addr) = start_server(config).await;
    let stats_addr = server.stats_addr().expect("stats endpoint not bound");

    let client = dial(addr, plain_client_config()).await;
    let conn = within(server.accept_connection()).await.unwrap();
    client.send_string("Hello there, General Kenobi!").await.unwrap();
    within(conn.next_message()).await.unwrap();
    server.send_string(&conn, "Got ya!").await.unwrap();

    let (status, body) = http_get(stats_addr, "/api_version").await;
    assert_eq!(status, 200);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["result"], env!("CARGO_PKG_VERSION"));

    let (status, body) = http_get(stats_addr, "/stats").await;
    assert_eq!(status, 200);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], true);
    let result = &json["result"];
    assert_eq!(result["bytes_received"], 29);
    assert_eq!(result["bytes_sent"], 8);
    assert_eq!(result["total_errors"], 0);
    assert_eq!(result["connections"], 1);
    let started = result["server_started"].as_str().unwrap();
    assert_eq!(
        chrono::DateTime::parse_from_rfc3339(started).unwrap(),
        server.started_at()
    );

    let (status, body) = http_get(stats_addr, "/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("linewire_bytes_received_total"));
    assert!(body.contains("linewire_connections_accepted_total"));

    let (status, _) = http_get(stats_addr, "/nope").await;
    assert_eq!(status, 404);

    server.stop().await;
}

#[tokio::test]
async fn test_stats_endpoint_disabled_by_default() {
    let (server, _addr) = start_server(plain_config()).await;
    assert!(server.stats_addr().is_none());
    server.stop().await;
}
