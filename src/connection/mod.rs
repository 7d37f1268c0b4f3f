// src/connection/mod.rs

//! Manages a single framed connection: terminator framing, sending, statistics,
//! the close protocol and the receive loop that feeds its message channel.

mod conn;
mod message;
mod reader;
mod receiver;
mod stats;
mod transport;

pub use conn::{
    Connection, ConnectionOptions, DEFAULT_MESSAGE_CAPACITY, DEFAULT_TERMINATOR, ReadOutcome,
};
pub use message::Message;
pub use reader::ByteTerminatedReader;
pub use receiver::{FrameLimits, ReceiveObserver, run_receive_loop};
pub use stats::{StatCounters, TrafficStats};
pub use transport::{BoxedTransport, Transport};
