//! Chunk and ChunkQueue
//!
//! Input and output bytes move through the engine as owned chunks.
//! A chunk is created once by its producer and moved from queue to
//! consumer without being copied.
//!
//! The queue itself is not synchronised; the engine keeps both of its
//! queues behind its own mutex.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;

/// An immutable owned byte buffer
#[derive(PartialEq, Eq, Default)]
pub struct Chunk(Vec<u8>);

impl Chunk {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Zero-length chunk, the in-band end-of-input marker
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Chunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Chunk {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({} bytes)", self.0.len())
    }
}

/// FIFO of chunks with a monotonic end-of-input flag
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,
    bytes: usize,
    ended: bool,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Oldest chunk, if any
    pub fn pop(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        self.bytes -= chunk.len();
        Some(chunk)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of queued chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes across queued chunks
    pub fn byte_len(&self) -> usize {
        self.bytes
    }

    /// Mark that no more input follows. Never unset.
    pub fn mark_end(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Remove every queued chunk in order, keeping the end flag
    pub fn drain(&mut self) -> impl Iterator<Item = Chunk> + '_ {
        self.bytes = 0;
        self.chunks.drain(..)
    }
}

/// A chunk being fed to the backend, with the offset of its unread bytes
#[derive(Debug)]
pub(crate) struct Cursor {
    chunk: Chunk,
    offset: usize,
}

impl Cursor {
    pub(crate) fn new(chunk: Chunk) -> Self {
        Self { chunk, offset: 0 }
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.chunk[self.offset..]
    }

    /// Move past `consumed` bytes; true once the chunk is used up
    pub(crate) fn advance(&mut self, consumed: usize) -> bool {
        self.offset = (self.offset + consumed).min(self.chunk.len());
        self.offset == self.chunk.len()
    }
}
