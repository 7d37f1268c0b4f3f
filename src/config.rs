// src/config.rs

//! Manages server and client configuration: loading from TOML, defaults and validation.

use crate::connection::{DEFAULT_TERMINATOR, FrameLimits};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

/// TLS settings for the listening side.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    #[serde(default = "default_tls_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: default_tls_enabled(),
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

fn default_tls_enabled() -> bool {
    true
}
fn default_cert_path() -> String {
    "certs/cert.pem".to_string()
}
fn default_key_path() -> String {
    "certs/key.pem".to_string()
}

/// Framing and per-connection behaviour.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionConfig {
    /// Max length of one message in bytes. `0` disables the limit.
    ///
    /// The limit is checked after each buffer-sized read, so a message may overshoot
    /// it by up to `buffer_size` bytes before the error fires.
    #[serde(default)]
    pub max_message_size: usize,
    /// Byte value that marks the end of a message, for both directions.
    #[serde(default = "default_terminator")]
    pub message_terminator: u8,
    /// Size of each read from the stream.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Drop error events instead of forwarding them. Startup errors are never suppressed.
    #[serde(default)]
    pub suppress_errors: bool,
    /// Capacity of each connection's message channel.
    #[serde(default = "default_message_channel_capacity")]
    pub message_channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: 0,
            message_terminator: default_terminator(),
            buffer_size: default_buffer_size(),
            suppress_errors: false,
            message_channel_capacity: default_message_channel_capacity(),
        }
    }
}

impl ConnectionConfig {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            buffer_size: self.buffer_size,
            max_message_size: self.max_message_size,
        }
    }
}

fn default_terminator() -> u8 {
    DEFAULT_TERMINATOR
}
fn default_buffer_size() -> usize {
    128
}
fn default_message_channel_capacity() -> usize {
    1
}

/// Pool maintenance windows.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a closed connection stays in the pool before eviction.
    #[serde(default = "default_retention_window")]
    pub retention_window_minutes: u64,
    /// Idle time after which an open connection is closed. `0` keeps idle connections forever.
    #[serde(default = "default_inactivity_window")]
    pub inactivity_window_minutes: u64,
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retention_window_minutes: default_retention_window(),
            inactivity_window_minutes: default_inactivity_window(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_retention_window() -> u64 {
    1440 // 24 hours
}
fn default_inactivity_window() -> u64 {
    4320 // 72 hours
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(3600)
}

/// The read-only HTTP statistics endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatsHttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_stats_host")]
    pub host: String,
    #[serde(default = "default_stats_port")]
    pub port: u16,
}

impl Default for StatsHttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_stats_host(),
            port: default_stats_port(),
        }
    }
}

fn default_stats_host() -> String {
    "127.0.0.1".to_string()
}
fn default_stats_port() -> u16 {
    8879
}

/// The complete server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prefix added to every error the server emits.
    #[serde(default = "default_server_error_prefix")]
    pub error_prefix: String,
    /// Capacity of the error and connection-announcement channels.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub stats_http: StatsHttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            error_prefix: default_server_error_prefix(),
            event_channel_capacity: default_event_channel_capacity(),
            tls: TlsConfig::default(),
            connection: ConnectionConfig::default(),
            lifecycle: LifecycleConfig::default(),
            stats_http: StatsHttpConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5555
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_server_error_prefix() -> String {
    "TLS_SERVER".to_string()
}
fn default_event_channel_capacity() -> usize {
    16
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))?;
        info!("Configuration loaded from '{}'.", path);
        Ok(config)
    }

    /// Parses and validates a configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connection.buffer_size == 0 {
            return Err(anyhow!("connection.buffer_size must be greater than 0"));
        }
        if self.connection.message_channel_capacity == 0 {
            return Err(anyhow!(
                "connection.message_channel_capacity must be greater than 0"
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(anyhow!("event_channel_capacity must be greater than 0"));
        }
        if self.lifecycle.sweep_interval.is_zero() {
            return Err(anyhow!("lifecycle.sweep_interval must be greater than 0"));
        }
        if self.tls.enabled && (self.tls.cert_path.is_empty() || self.tls.key_path.is_empty()) {
            return Err(anyhow!(
                "tls.cert_path and tls.key_path must be set when TLS is enabled"
            ));
        }
        if !self.tls.enabled {
            warn!("TLS is disabled. Connections will be accepted as plain TCP.");
        }
        if self.connection.max_message_size > 0
            && self.connection.max_message_size < self.connection.buffer_size
        {
            warn!(
                "connection.max_message_size ({}) is smaller than connection.buffer_size ({}); oversized messages are detected only after a full buffer is read.",
                self.connection.max_message_size, self.connection.buffer_size
            );
        }
        Ok(())
    }
}

/// TLS settings for the dialing side.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientTlsConfig {
    #[serde(default = "default_tls_enabled")]
    pub enabled: bool,
    /// PEM file with the CA (or self-signed certificate) to trust. Without it the
    /// public web roots are used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

impl Default for ClientTlsConfig {
    fn default() -> Self {
        Self {
            enabled: default_tls_enabled(),
            ca_cert_path: None,
        }
    }
}

/// The complete client configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientConfig {
    #[serde(default)]
    pub suppress_errors: bool,
    #[serde(default)]
    pub max_message_size: usize,
    #[serde(default = "default_terminator")]
    pub message_terminator: u8,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Zero the sent/received/error counters before every re-dial.
    #[serde(default = "default_drop_old_stats")]
    pub drop_old_stats: bool,
    #[serde(default = "default_client_error_prefix")]
    pub error_prefix: String,
    #[serde(default = "default_client_message_capacity")]
    pub message_channel_capacity: usize,
    #[serde(default = "default_client_error_capacity")]
    pub error_channel_capacity: usize,
    #[serde(with = "humantime_serde", default = "default_dial_timeout")]
    pub dial_timeout: Duration,
    #[serde(default)]
    pub tls: ClientTlsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            suppress_errors: false,
            max_message_size: 0,
            message_terminator: default_terminator(),
            buffer_size: default_buffer_size(),
            drop_old_stats: default_drop_old_stats(),
            error_prefix: default_client_error_prefix(),
            message_channel_capacity: default_client_message_capacity(),
            error_channel_capacity: default_client_error_capacity(),
            dial_timeout: default_dial_timeout(),
            tls: ClientTlsConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            buffer_size: self.buffer_size,
            max_message_size: self.max_message_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(anyhow!("buffer_size must be greater than 0"));
        }
        if self.message_channel_capacity == 0 || self.error_channel_capacity == 0 {
            return Err(anyhow!("channel capacities must be greater than 0"));
        }
        Ok(())
    }
}

fn default_drop_old_stats() -> bool {
    true
}
fn default_client_error_prefix() -> String {
    "TLS_CLIENT".to_string()
}
fn default_client_message_capacity() -> usize {
    10
}
fn default_client_error_capacity() -> usize {
    3
}
fn default_dial_timeout() -> Duration {
    Duration::from_secs(3)
}
