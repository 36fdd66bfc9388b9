//! Incremental frame reassembly.
//!
//! [`ReadBuffer`] owns a growable byte region fed with raw TCP chunks and
//! hands back whole length-prefixed frames as they become available. It
//! has no protocol knowledge beyond the 4-byte big-endian length prefix.

use bytes::Bytes;
use tracing::trace;

use crate::WireError;

/// Maximum frame size accepted from the peer (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Initial storage capacity
const INITIAL_CAPACITY: usize = 8 * 1024;

/// Length prefix size in bytes
const PREFIX_SIZE: usize = 4;

/// Reassembly buffer for length-prefixed frames.
///
/// Invariant: `read_offset + len <= storage.len()`. Growth doubles the
/// storage (repeatedly, until the incoming data fits) and repacks the
/// unread span to offset 0, so amortized copy cost stays O(1) per byte.
/// The buffer never shrinks; peak capacity is retained for the life of
/// the connection.
#[derive(Debug)]
pub struct ReadBuffer {
    storage: Vec<u8>,
    read_offset: usize,
    len: usize,
    max_frame_size: usize,
}

impl ReadBuffer {
    /// Create a buffer with the default initial capacity and frame limit
    pub fn new() -> Self {
        Self {
            storage: vec![0; INITIAL_CAPACITY],
            read_offset: 0,
            len: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Number of unread bytes currently buffered
    pub fn unread(&self) -> usize {
        self.len
    }

    /// Current storage capacity in bytes
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Drop all buffered bytes, keeping the allocated storage
    pub fn clear(&mut self) {
        self.read_offset = 0;
        self.len = 0;
    }

    /// Copy `data` into the buffer, growing storage as needed without
    /// losing unread bytes.
    pub fn append(&mut self, data: &[u8]) {
        if self.read_offset + self.len + data.len() > self.storage.len() {
            self.grow_for(data.len());
        }
        let start = self.read_offset + self.len;
        self.storage[start..start + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    /// Extract one complete frame if at least the 4-byte length prefix
    /// plus the declared payload length have arrived. The returned bytes
    /// exclude the prefix. Returns `Ok(None)` when more bytes are needed.
    pub fn try_take_frame(&mut self) -> Result<Option<Bytes>, WireError> {
        if self.len < PREFIX_SIZE {
            return Ok(None);
        }
        let p = self.read_offset;
        let frame_len = u32::from_be_bytes([
            self.storage[p],
            self.storage[p + 1],
            self.storage[p + 2],
            self.storage[p + 3],
        ]) as usize;

        if frame_len > self.max_frame_size {
            return Err(WireError::Size(frame_len));
        }
        if self.len < PREFIX_SIZE + frame_len {
            return Ok(None);
        }

        let body_start = p + PREFIX_SIZE;
        let frame = Bytes::copy_from_slice(&self.storage[body_start..body_start + frame_len]);
        self.read_offset += PREFIX_SIZE + frame_len;
        self.len -= PREFIX_SIZE + frame_len;
        if self.len == 0 {
            self.read_offset = 0;
        }
        Ok(Some(frame))
    }

    /// Double the storage until the unread span plus `incoming` bytes
    /// fit, repacking unread bytes to offset 0.
    fn grow_for(&mut self, incoming: usize) {
        let needed = self.len + incoming;
        let mut new_capacity = self.storage.len() * 2;
        while new_capacity < needed {
            new_capacity *= 2;
        }
        trace!(
            old = self.storage.len(),
            new = new_capacity,
            unread = self.len,
            "growing reassembly buffer"
        );
        let mut new_storage = vec![0; new_capacity];
        new_storage[..self.len]
            .copy_from_slice(&self.storage[self.read_offset..self.read_offset + self.len]);
        self.storage = new_storage;
        self.read_offset = 0;
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}
