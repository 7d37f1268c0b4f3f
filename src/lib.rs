// src/lib.rs

//! Terminator-framed messaging over TLS streams.

pub mod client;
pub mod config;
pub mod connection;
pub mod core;
pub mod server;

// Re-export
pub use crate::client::Client;
pub use crate::config::{ClientConfig, Config};
pub use crate::connection::{Connection, Message, TrafficStats};
pub use crate::core::{LineWireError, TransferError};
pub use crate::server::Server;
