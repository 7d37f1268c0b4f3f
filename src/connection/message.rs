// src/connection/message.rs

use super::Connection;
use bytes::Bytes;
use std::sync::{Arc, Weak};

/// One decoded frame, immutable once created.
///
/// Holds a non-owning reference to the connection that produced it so the
/// application can reply without keeping the connection alive on its own.
#[derive(Debug, Clone)]
pub struct Message {
    payload: Bytes,
    wire_len: usize,
    conn: Weak<Connection>,
}

impl Message {
    pub fn new(conn: &Arc<Connection>, payload: Bytes, wire_len: usize) -> Self {
        Self {
            payload,
            wire_len,
            conn: Arc::downgrade(conn),
        }
    }

    /// The payload with the terminator stripped.
    pub fn bytes(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Bytes pulled from the stream by the read that produced this frame.
    /// Zero when the frame was already sitting in the carry-over.
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// The producing connection, if it is still alive.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.conn.upgrade()
    }

    /// Lossy UTF-8 view of the payload.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
