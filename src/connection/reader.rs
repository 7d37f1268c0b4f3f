// src/connection/reader.rs

//! The framing half of a connection: turns raw chunks into terminator-delimited frames.
//!
//! The reader never touches a stream itself. `Connection::read_frame` performs the
//! chunked reads and feeds every chunk through [`ByteTerminatedReader::feed`], which
//! finds the first terminator, splits off the frame and keeps whatever followed the
//! terminator as carry-over for the next call.
//!
//! Wire format is `<payload><terminator>` with no escaping. A payload that contains
//! the terminator byte is split into two frames on the receiving side.

use bytes::{Bytes, BytesMut};

/// Frame assembler owning the partial-message carry-over buffer.
#[derive(Debug)]
pub struct ByteTerminatedReader {
    terminator: u8,
    carry_over: BytesMut,
}

impl ByteTerminatedReader {
    pub fn new(terminator: u8) -> Self {
        Self {
            terminator,
            carry_over: BytesMut::new(),
        }
    }

    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    /// Number of carried-over bytes waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.carry_over.len()
    }

    /// Returns a complete frame if the carry-over already holds a terminator.
    ///
    /// Bytes after that terminator stay in the carry-over.
    pub fn take_buffered_frame(&mut self) -> Option<Bytes> {
        let pos = self.carry_over.iter().position(|&b| b == self.terminator)?;
        let mut frame = self.carry_over.split_to(pos + 1);
        frame.truncate(pos);
        Some(frame.freeze())
    }

    /// Moves the carry-over out as the start of a new frame, leaving it empty.
    pub fn begin_frame(&mut self) -> BytesMut {
        self.carry_over.split()
    }

    /// Scans a freshly read chunk for the terminator.
    ///
    /// On a match, the bytes before the terminator complete `acc` into a frame and
    /// everything strictly after it becomes the carry-over. Without a match the whole
    /// chunk is appended to `acc` and `None` is returned.
    pub fn feed(&mut self, acc: &mut BytesMut, chunk: &[u8]) -> Option<Bytes> {
        match chunk.iter().position(|&b| b == self.terminator) {
            Some(pos) => {
                acc.extend_from_slice(&chunk[..pos]);
                let rest = &chunk[pos + 1..];
                if !rest.is_empty() {
                    self.carry_over.extend_from_slice(rest);
                }
                Some(acc.split().freeze())
            }
            None => {
                acc.extend_from_slice(chunk);
                None
            }
        }
    }

    /// Drops any carried-over bytes.
    pub fn clear(&mut self) {
        self.carry_over.clear();
    }
}
