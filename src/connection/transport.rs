// src/connection/transport.rs

//! The stream contract a `Connection` is built on.

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex, ordered, reliable byte stream.
///
/// Reading and writing come from `AsyncRead`/`AsyncWrite`; closing is
/// `AsyncWriteExt::shutdown` followed by dropping the stream. The remote address is
/// captured separately when the connection is created. TLS handshakes happen before
/// a stream is handed over, so any post-handshake TLS stream, a plain `TcpStream` or
/// an in-memory duplex all qualify.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// The type-erased stream stored inside a connection.
pub type BoxedTransport = Box<dyn Transport>;
