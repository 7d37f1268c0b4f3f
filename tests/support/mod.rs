// tests/support/mod.rs

//! Shared helpers for the unit tests: tracing setup and a scripted in-memory stream.

#![allow(dead_code)]

use linewire::Connection;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// The greeting every framing test sends: 28 payload bytes plus the newline.
pub const GREETING: &str = "Hello there, General Kenobi!\n";

pub fn init_tracing() {
    // Initialize tracing (ignore error if already initialized)
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn test_addr() -> SocketAddr {
    "127.0.0.1:4000".parse().unwrap()
}

/// A connection over an in-memory pipe. The returned stream is the peer's end.
pub fn duplex_connection(terminator: u8) -> (Arc<Connection>, DuplexStream) {
    init_tracing();
    let (local, peer) = tokio::io::duplex(1024);
    (Connection::new(local, test_addr(), terminator), peer)
}

/// Observable side of a [`ScriptedStream`].
#[derive(Clone, Default)]
pub struct StreamProbe {
    pub written: Arc<Mutex<Vec<u8>>>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl StreamProbe {
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }
}

/// A stream that yields scripted chunks, then either EOF or nothing at all.
pub struct ScriptedStream {
    reads: VecDeque<Vec<u8>>,
    eof_after_script: bool,
    fail_writes: bool,
    probe: StreamProbe,
}

impl ScriptedStream {
    /// Yields `chunks` one read at a time, then stays pending forever.
    pub fn hanging(chunks: &[&[u8]]) -> (Self, StreamProbe) {
        Self::build(chunks, false, false)
    }

    /// Yields `chunks` one read at a time, then reports EOF.
    pub fn ending(chunks: &[&[u8]]) -> (Self, StreamProbe) {
        Self::build(chunks, true, false)
    }

    /// Stays pending on reads and fails every write.
    pub fn broken_writes() -> (Self, StreamProbe) {
        Self::build(&[], false, true)
    }

    fn build(chunks: &[&[u8]], eof_after_script: bool, fail_writes: bool) -> (Self, StreamProbe) {
        let probe = StreamProbe::default();
        let stream = Self {
            reads: chunks.iter().map(|c| c.to_vec()).collect(),
            eof_after_script,
            fail_writes,
            probe: probe.clone(),
        };
        (stream, probe)
    }

    pub fn into_connection(self, terminator: u8) -> Arc<Connection> {
        init_tracing();
        Connection::new(self, test_addr(), terminator)
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.reads.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    this.reads.push_front(chunk.split_off(n));
                }
                Poll::Ready(Ok(()))
            }
            None if this.eof_after_script => Poll::Ready(Ok(())),
            // Only a cancellation can end the wait.
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.probe.written.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
