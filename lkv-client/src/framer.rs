//! # Line Framer
//!
//! Purpose: Turn the raw byte stream of a socket into complete protocol lines.
//!
//! ## Design Principles
//! 1. **Accumulate, Then Split**: Reads append to one `BytesMut`; complete
//!    lines are split off the front, partial tails wait for the next read.
//! 2. **Byte-Level Framing**: Lines are found on `\n` before any UTF-8 decode,
//!    so a multi-byte character split across reads is reassembled intact.
//! 3. **Chunk-Size Independence**: The emitted sequence depends only on the
//!    bytes fed, never on how they were chunked.

use std::io;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::DEFAULT_READ_BUFFER_CAPACITY;

/// Incremental newline framer.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_READ_BUFFER_CAPACITY)
    }
}

impl LineFramer {
    pub fn with_capacity(capacity: usize) -> Self {
        LineFramer {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends a chunk and returns the lines it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.buffer.extend_from_slice(chunk);
        Lines { framer: self }
    }

    /// Reads once from `reader` straight into the accumulator.
    ///
    /// Returns the number of bytes read; zero means end-of-stream.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        if self.buffer.capacity() == self.buffer.len() {
            self.buffer.reserve(DEFAULT_READ_BUFFER_CAPACITY);
        }
        reader.read_buf(&mut self.buffer).await
    }

    /// Lines completed by the bytes accumulated so far.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    /// Bytes held for a line that has not been terminated yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.iter().position(|&b| b == b'\n')?;
            let mut line = self.buffer.split_to(end);
            self.buffer.advance(1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

/// Lazy iterator over the complete lines currently buffered.
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}
