// src/connection/receiver.rs

//! The per-connection receive loop shared by the server and the client.

use super::conn::{Connection, ReadOutcome};
use super::message::Message;
use crate::core::LineWireError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Read limits applied to every `read_frame` call of a receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub buffer_size: usize,
    /// 0 means unlimited.
    pub max_message_size: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            buffer_size: 128,
            max_message_size: 0,
        }
    }
}

/// Hooks through which a receive loop reports traffic and failures to its owner.
#[async_trait]
pub trait ReceiveObserver: Send + Sync {
    /// Called after every read with the bytes it pulled from the stream, whatever the outcome.
    fn on_bytes_read(&self, _conn: &Connection, _bytes: usize) {}

    /// Called when a read fails for a reason other than the connection being closed.
    /// The loop closes the connection right after this returns.
    async fn on_read_error(&self, conn: &Connection, error: LineWireError);
}

/// Reads frames until the connection is closed, delivering each one to the
/// connection's message channel in decode order.
///
/// A failed read closes the connection: a plain close on peer EOF, a close with
/// error otherwise. The next iteration then observes the closed state, which lets
/// `read_frame` release the stream. The message stream is finished on exit.
pub async fn run_receive_loop<O>(conn: Arc<Connection>, limits: FrameLimits, observer: &O)
where
    O: ReceiveObserver + ?Sized,
{
    loop {
        match conn
            .read_frame(limits.buffer_size, limits.max_message_size)
            .await
        {
            Ok(ReadOutcome::Frame {
                payload,
                bytes_read,
            }) => {
                observer.on_bytes_read(&conn, bytes_read);
                let message = Message::new(&conn, payload, bytes_read);
                if let Err(e) = conn.deliver(message).await {
                    debug!("Connection {}: message dropped: {}", conn.id(), e);
                }
            }
            Ok(ReadOutcome::Cancelled { bytes_read }) => {
                observer.on_bytes_read(&conn, bytes_read);
                break;
            }
            Err(failure) => {
                observer.on_bytes_read(&conn, failure.bytes);
                if failure.error.is_already_closed() {
                    break;
                }

                let peer_closed = failure.error.is_stream_closed();
                observer.on_read_error(&conn, failure.error).await;
                if peer_closed {
                    conn.close();
                } else {
                    conn.close_with_error();
                }
            }
        }
    }

    conn.finish_delivery();
    debug!(
        "Receive loop for connection {} ({}) finished.",
        conn.id(),
        conn.address()
    );
}
