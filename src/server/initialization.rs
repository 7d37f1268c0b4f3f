// src/server/initialization.rs

//! Handles the server's startup checks: configuration logging and TLS material loading.

use crate::config::Config;
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::{info, warn};

/// Builds the TLS acceptor from the configured certificate and key, or `None`
/// when TLS is disabled.
pub(crate) fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.tls.enabled {
        info!("TLS is enabled. Loading certificate and key.");
        let certs = load_certs(&config.tls.cert_path)?;
        let key = load_key(&config.tls.key_path)?;
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    } else {
        Ok(None)
    }
}

/// Loads TLS certificates from a PEM file.
pub(crate) fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

/// Logs key configuration parameters at startup.
pub(crate) fn log_startup_info(config: &Config) {
    let conn = &config.connection;
    info!(
        "Framing: terminator 0x{:02x}, read buffer {} bytes.",
        conn.message_terminator, conn.buffer_size
    );
    match conn.max_message_size {
        0 => warn!("No 'max_message_size' limit is active. Message size is unbounded."),
        limit => info!("Messages are limited to {} bytes.", limit),
    }
    if conn.suppress_errors {
        info!("Error events are suppressed and only logged.");
    }
    info!(
        "Closed connections are kept for {} min; idle connections are closed after {}.",
        config.lifecycle.retention_window_minutes,
        match config.lifecycle.inactivity_window_minutes {
            0 => "never".to_string(),
            m => format!("{m} min"),
        }
    );
}
