// src/connection/conn.rs

//! Defines `Connection`, the framed wrapper around one duplex stream.
//!
//! Closing is split in two. `close()` only flips the state and raises the
//! cancellation token; the stream itself is shut down by whoever owns the read side
//! (the receive loop) once it observes the token. No other task ever calls the
//! stream's shutdown, so a close can never race an in-flight read.

use super::message::Message;
use super::reader::ByteTerminatedReader;
use super::stats::{StatCounters, TrafficStats};
use super::transport::{BoxedTransport, Transport};
use crate::core::{LineWireError, TransferError};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// The default frame terminator: a newline.
pub const DEFAULT_TERMINATOR: u8 = b'\n';

/// The default capacity of a connection's message channel. A capacity of one makes
/// delivery a near-synchronous hand-off, so a slow consumer throttles the reader.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 1;

/// How long the read side waits for the transport's shutdown (a TLS close_notify
/// flush) before dropping the stream anyway.
const STREAM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Options used when wrapping a stream into a `Connection`.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub terminator: u8,
    pub message_capacity: usize,
    /// Counters to reuse instead of starting from zero (a client re-dialing).
    pub counters: Option<Arc<StatCounters>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            counters: None,
        }
    }
}

/// The successful result of `Connection::read_frame`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// A complete frame, terminator stripped.
    Frame { payload: Bytes, bytes_read: usize },
    /// The read was stopped by a close request. Not a failure; any partial frame is discarded.
    Cancelled { bytes_read: usize },
}

impl ReadOutcome {
    /// Bytes pulled from the stream during the call.
    pub fn bytes_read(&self) -> usize {
        match self {
            ReadOutcome::Frame { bytes_read, .. } | ReadOutcome::Cancelled { bytes_read } => {
                *bytes_read
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReadOutcome::Cancelled { .. })
    }

    /// The payload, if a frame was decoded.
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            ReadOutcome::Frame { payload, .. } => Some(payload),
            ReadOutcome::Cancelled { .. } => None,
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    closed: bool,
    closed_with_error: bool,
    closed_at: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
}

/// Everything only the reader may touch: the read half and the frame assembler.
struct ReadSide {
    half: Option<ReadHalf<BoxedTransport>>,
    framer: ByteTerminatedReader,
}

/// One framed duplex connection.
pub struct Connection {
    id: Uuid,
    addr: SocketAddr,
    terminator: u8,
    connected_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
    counters: Arc<StatCounters>,
    cancel: CancellationToken,
    read_side: AsyncMutex<ReadSide>,
    write_side: AsyncMutex<Option<WriteHalf<BoxedTransport>>>,
    message_tx: Mutex<Option<mpsc::Sender<Message>>>,
    message_rx: AsyncMutex<mpsc::Receiver<Message>>,
}

impl Connection {
    /// Wraps `stream` with the given terminator and default options.
    pub fn new<S: Transport>(stream: S, addr: SocketAddr, terminator: u8) -> Arc<Self> {
        Self::with_options(
            stream,
            addr,
            ConnectionOptions {
                terminator,
                ..ConnectionOptions::default()
            },
        )
    }

    pub fn with_options<S: Transport>(
        stream: S,
        addr: SocketAddr,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let boxed: BoxedTransport = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);
        let (message_tx, message_rx) = mpsc::channel(options.message_capacity.max(1));
        let now = Utc::now();

        Arc::new(Self {
            id: Uuid::new_v4(),
            addr,
            terminator: options.terminator,
            connected_at: now,
            lifecycle: Mutex::new(Lifecycle {
                closed: false,
                closed_with_error: false,
                closed_at: None,
                last_activity: now,
            }),
            counters: options.counters.unwrap_or_default(),
            cancel: CancellationToken::new(),
            read_side: AsyncMutex::new(ReadSide {
                half: Some(read_half),
                framer: ByteTerminatedReader::new(options.terminator),
            }),
            write_side: AsyncMutex::new(Some(write_half)),
            message_tx: Mutex::new(Some(message_tx)),
            message_rx: AsyncMutex::new(message_rx),
        })
    }

    /// Reads the next terminator-delimited frame.
    ///
    /// Reads happen in chunks of `buffer_size` bytes, each raced against the
    /// cancellation token. `max_message_size` (0 = unlimited) is checked after every
    /// chunk against the bytes read during this call, so the call may consume up to
    /// one extra chunk past the limit before failing.
    ///
    /// On a closed connection this fails with `AlreadyClosed` without reading. If the
    /// stream has not been released yet, it is shut down first, since this is the
    /// read side and the only place allowed to do so.
    pub async fn read_frame(
        &self,
        buffer_size: usize,
        max_message_size: usize,
    ) -> Result<ReadOutcome, TransferError> {
        if self.is_closed() {
            let mut side = self.read_side.lock().await;
            self.release_stream(&mut side).await;
            return Err(TransferError::new(
                0,
                LineWireError::AlreadyClosed.context("[read_frame]"),
            ));
        }
        if buffer_size == 0 {
            return Err(TransferError::new(
                0,
                LineWireError::InvalidConfig("buffer size must be greater than zero".into()),
            ));
        }

        let mut side = self.read_side.lock().await;
        let ReadSide { half, framer } = &mut *side;
        let Some(stream) = half.as_mut() else {
            return Err(TransferError::new(
                0,
                LineWireError::AlreadyClosed.context("[read_frame]"),
            ));
        };

        // A previous chunk may already hold the next complete frame.
        if let Some(payload) = framer.take_buffered_frame() {
            return Ok(ReadOutcome::Frame {
                payload,
                bytes_read: 0,
            });
        }

        let mut acc = framer.begin_frame();
        let mut chunk = vec![0u8; buffer_size];
        let mut read = 0usize;

        let result = loop {
            let res = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(None),
                res = stream.read(&mut chunk) => res,
            };

            match res {
                Ok(0) => break Err(LineWireError::StreamClosed),
                Ok(n) => {
                    read += n;
                    self.touch();

                    if max_message_size > 0 && read > max_message_size {
                        self.counters.add_errors(1);
                        break Err(LineWireError::MessageTooLarge {
                            read,
                            max: max_message_size,
                        });
                    }

                    if let Some(payload) = framer.feed(&mut acc, &chunk[..n]) {
                        break Ok(Some(payload));
                    }
                }
                Err(e) => {
                    // A read aborted by a concurrent close is still a cancellation.
                    if self.cancel.is_cancelled() {
                        break Ok(None);
                    }
                    self.counters.add_errors(1);
                    break Err(LineWireError::from(e).context("reading error"));
                }
            }
        };

        self.counters.add_received(read as i64);

        match result {
            Ok(Some(payload)) => Ok(ReadOutcome::Frame {
                payload,
                bytes_read: read,
            }),
            Ok(None) => {
                self.release_stream(&mut side).await;
                Ok(ReadOutcome::Cancelled { bytes_read: read })
            }
            Err(e) => Err(TransferError::new(read, e.context("[read_frame]"))),
        }
    }

    /// Writes `payload` followed by the terminator as a single frame.
    ///
    /// Sent bytes and the activity timestamp are updated whatever the outcome; on
    /// failure the error counter is incremented and the partial byte count returned.
    /// A close while the write is pending stops it with `AlreadyClosed`, which is
    /// not counted as an error.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<usize, TransferError> {
        if self.is_closed() {
            return Err(TransferError::new(
                0,
                LineWireError::AlreadyClosed.context("[send_frame]"),
            ));
        }

        let mut frame = BytesMut::with_capacity(payload.len() + 1);
        frame.put_slice(payload);
        frame.put_u8(self.terminator);

        let mut guard = self.write_side.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TransferError::new(
                0,
                LineWireError::AlreadyClosed.context("[send_frame]"),
            ));
        };

        // Writes and flushes yield to a close, so the read side can always take the write lock.
        let mut written = 0usize;
        let mut failure: Option<LineWireError> = None;
        while written < frame.len() {
            let res = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    failure = Some(LineWireError::AlreadyClosed);
                    break;
                }
                res = writer.write(&frame[written..]) => res,
            };
            match res {
                Ok(0) => {
                    failure = Some(io::Error::from(io::ErrorKind::WriteZero).into());
                    break;
                }
                Ok(n) => written += n,
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }
        }
        if failure.is_none() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => failure = Some(LineWireError::AlreadyClosed),
                res = writer.flush() => {
                    if let Err(e) = res {
                        failure = Some(e.into());
                    }
                }
            }
        }
        drop(guard);

        self.counters.add_sent(written as i64);
        self.touch();

        match failure {
            None => Ok(written),
            Some(LineWireError::AlreadyClosed) => Err(TransferError::new(
                written,
                LineWireError::AlreadyClosed.context("[send_frame] closed while writing"),
            )),
            Some(e) => {
                self.counters.add_errors(1);
                Err(TransferError::new(
                    written,
                    e.context("[send_frame] error writing response"),
                ))
            }
        }
    }

    /// Convenience wrapper around [`Connection::send_frame`].
    pub async fn send_string(&self, s: &str) -> Result<usize, TransferError> {
        self.send_frame(s.as_bytes()).await
    }

    /// Marks the connection closed and raises the cancellation token.
    ///
    /// Idempotent: returns `false` if the connection was already closed. The stream
    /// is shut down later by the read side.
    pub fn close(&self) -> bool {
        self.mark_closed(false)
    }

    /// Same as [`Connection::close`], but also records that the close was caused by an error.
    pub fn close_with_error(&self) -> bool {
        self.mark_closed(true)
    }

    fn mark_closed(&self, with_error: bool) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.closed {
                return false;
            }
            lifecycle.closed = true;
            lifecycle.closed_with_error = with_error;
            lifecycle.closed_at = Some(Utc::now());
        }
        self.cancel.cancel();
        debug!(
            "Connection {} ({}) marked as closed (with error: {}).",
            self.id, self.addr, with_error
        );
        true
    }

    /// Shuts the stream down and drops it. Only ever called from the read side.
    async fn release_stream(&self, side: &mut ReadSide) {
        let Some(read_half) = side.half.take() else {
            return;
        };
        side.framer.clear();

        // A pending send gives the write lock back as soon as the token fires.
        if let Some(mut write_half) = self.write_side.lock().await.take() {
            match tokio::time::timeout(STREAM_SHUTDOWN_TIMEOUT, write_half.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("Connection {}: error shutting down stream: {}", self.id, e)
                }
                Err(_) => debug!(
                    "Connection {}: stream shutdown timed out, dropping it.",
                    self.id
                ),
            }
        }
        drop(read_half);
        debug!("Connection {} ({}) released its stream.", self.id, self.addr);
    }

    /// Pushes a decoded message to the delivery channel, waiting while the channel is full.
    ///
    /// Fails without sending once the connection is closed.
    pub async fn deliver(&self, message: Message) -> Result<(), LineWireError> {
        let Some(tx) = self.message_tx.lock().clone() else {
            return Err(LineWireError::ConnectionClosed);
        };
        if self.cancel.is_cancelled() {
            return Err(LineWireError::AlreadyClosed);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LineWireError::AlreadyClosed),
            res = tx.send(message) => res.map_err(|_| LineWireError::ConnectionClosed),
        }
    }

    /// Ends the message stream. Pending messages can still be drained, after which
    /// [`Connection::next_message`] fails with `ConnectionClosed`.
    pub fn finish_delivery(&self) {
        self.message_tx.lock().take();
    }

    /// Waits for the next decoded message.
    pub async fn next_message(&self) -> Result<Message, LineWireError> {
        let mut rx = self.message_rx.lock().await;
        rx.recv().await.ok_or(LineWireError::ConnectionClosed)
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    fn touch(&self) {
        self.lifecycle.lock().last_activity = Utc::now();
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.lock().closed
    }

    /// True while the connection can still produce messages.
    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    pub fn closed_with_error(&self) -> bool {
        self.lifecycle.lock().closed_with_error
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// When the connection was marked closed, `None` while open.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.lock().closed_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.lifecycle.lock().last_activity
    }

    /// How long the connection has been (or was) open.
    pub fn online(&self) -> TimeDelta {
        let closed_at = self.lifecycle.lock().closed_at;
        closed_at.unwrap_or_else(Utc::now) - self.connected_at
    }

    pub fn stats(&self) -> TrafficStats {
        self.counters.snapshot()
    }

    pub fn counters(&self) -> &Arc<StatCounters> {
        &self.counters
    }

    /// Zeroes sent, received and error counters.
    pub fn drop_old_stats(&self) {
        self.counters.reset();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &lifecycle.closed)
            .field("closed_with_error", &lifecycle.closed_with_error)
            .field("connected_at", &self.connected_at)
            .field("last_activity", &lifecycle.last_activity)
            .finish_non_exhaustive()
    }
}
