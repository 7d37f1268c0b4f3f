// src/core/errors.rs

//! Defines the primary error type for the entire crate.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within a connection,
/// the server, or the client.
#[derive(Error, Debug)]
pub enum LineWireError {
    /// An operation was attempted on a connection that is already marked closed.
    /// Always returned before the underlying stream is touched.
    #[error("reader already closed")]
    AlreadyClosed,

    /// The peer closed the stream (EOF).
    #[error("stream closed")]
    StreamClosed,

    /// The accumulated unterminated read went past the configured maximum.
    #[error("message size limits reached (read {read} of max {max})")]
    MessageTooLarge { read: usize, max: usize },

    /// Any other read or write failure. The connection stays open.
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("TLS Error: {0}")]
    Tls(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server was stopped and will not produce new connections.
    #[error("server is closed")]
    ServerClosed,

    /// The connection's message stream has ended.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("Internal Error: {0}")]
    Internal(String),

    /// Another error wrapped with a component-identifying prefix.
    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<LineWireError>,
    },
}

impl LineWireError {
    /// Wraps the error with a component prefix, e.g. `[read_frame]` or `TLS_SERVER`.
    pub fn context(self, context: impl Into<String>) -> Self {
        LineWireError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error beneath any number of `Context` layers.
    pub fn root(&self) -> &LineWireError {
        let mut current = self;
        while let LineWireError::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// True if the root cause is the peer closing the stream.
    pub fn is_stream_closed(&self) -> bool {
        matches!(self.root(), LineWireError::StreamClosed)
    }

    /// True if the root cause is an operation on an already closed connection.
    pub fn is_already_closed(&self) -> bool {
        matches!(self.root(), LineWireError::AlreadyClosed)
    }

    /// True if the root cause is an exceeded message size limit.
    pub fn is_message_too_large(&self) -> bool {
        matches!(self.root(), LineWireError::MessageTooLarge { .. })
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for LineWireError {
    fn clone(&self) -> Self {
        match self {
            LineWireError::AlreadyClosed => LineWireError::AlreadyClosed,
            LineWireError::StreamClosed => LineWireError::StreamClosed,
            LineWireError::MessageTooLarge { read, max } => LineWireError::MessageTooLarge {
                read: *read,
                max: *max,
            },
            LineWireError::Io(e) => LineWireError::Io(Arc::clone(e)),
            LineWireError::Tls(s) => LineWireError::Tls(s.clone()),
            LineWireError::InvalidConfig(s) => LineWireError::InvalidConfig(s.clone()),
            LineWireError::ServerClosed => LineWireError::ServerClosed,
            LineWireError::ConnectionClosed => LineWireError::ConnectionClosed,
            LineWireError::Internal(s) => LineWireError::Internal(s.clone()),
            LineWireError::Context { context, source } => LineWireError::Context {
                context: context.clone(),
                source: source.clone(),
            },
        }
    }
}

impl PartialEq for LineWireError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LineWireError::Io(e1), LineWireError::Io(e2)) => e1.to_string() == e2.to_string(),
            (
                LineWireError::MessageTooLarge { read: r1, max: m1 },
                LineWireError::MessageTooLarge { read: r2, max: m2 },
            ) => r1 == r2 && m1 == m2,
            (LineWireError::Tls(s1), LineWireError::Tls(s2)) => s1 == s2,
            (LineWireError::InvalidConfig(s1), LineWireError::InvalidConfig(s2)) => s1 == s2,
            (LineWireError::Internal(s1), LineWireError::Internal(s2)) => s1 == s2,
            (
                LineWireError::Context {
                    context: c1,
                    source: s1,
                },
                LineWireError::Context {
                    context: c2,
                    source: s2,
                },
            ) => c1 == c2 && s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

/// A failed read or write, carrying the number of bytes moved before the failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct TransferError {
    /// Bytes read or written during the failed call.
    pub bytes: usize,
    #[source]
    pub error: LineWireError,
}

impl TransferError {
    pub fn new(bytes: usize, error: LineWireError) -> Self {
        Self { bytes, error }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for LineWireError {
    fn from(e: std::io::Error) -> Self {
        LineWireError::Io(Arc::new(e))
    }
}

impl From<rustls::Error> for LineWireError {
    fn from(e: rustls::Error) -> Self {
        LineWireError::Tls(e.to_string())
    }
}

impl From<String> for LineWireError {
    fn from(s: String) -> Self {
        LineWireError::Internal(s)
    }
}
