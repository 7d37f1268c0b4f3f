// src/main.rs

//! A LineWire echo server: every message received is answered with "Got ya!".

use anyhow::{Result, anyhow};
use linewire::config::Config;
use linewire::{Connection, Server};
use std::env;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const REPLY: &str = "Got ya!";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("LineWire version {VERSION}");
        return Ok(());
    }

    // It can be provided via a --config flag; otherwise, it defaults to "config.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    if let Err(e) = run(config).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let server = Server::new(config)?;
    server.listen().await?;

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;

    let errors = tokio::spawn(log_errors(server.clone()));

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            res = server.accept_connection() => match res {
                Ok(conn) => {
                    tokio::spawn(echo(server.clone(), conn));
                }
                Err(e) => {
                    warn!("Stopped accepting connections: {}", e);
                    break;
                }
            },
        }
    }

    server.stop().await;
    let _ = errors.await;

    let overall = server.stats_overall();
    info!(
        "Served {} bytes in, {} bytes out, {} errors.",
        overall.received, overall.sent, overall.errors
    );
    Ok(())
}

async fn log_errors(server: Arc<Server>) {
    while let Some(e) = server.next_error().await {
        warn!("{}", e);
    }
}

async fn echo(server: Arc<Server>, conn: Arc<Connection>) {
    while let Ok(message) = conn.next_message().await {
        info!(
            "Message from {} ({} bytes): {}",
            conn.address(),
            message.wire_len(),
            message.as_string()
        );
        if let Err(e) = server.send_string(&conn, REPLY).await {
            warn!("Failed to answer {}: {}", conn.address(), e);
            break;
        }
    }
}
