//! Bounded, append-only byte capture.

use bytes::Bytes;

/// A byte sink that keeps at most `capacity` bytes and silently drops the rest.
///
/// [`append`](BoundedCapture::append) always reports the full input length as
/// accepted, so a caller mirroring a stream into a capture never observes a
/// short write. A capacity of `0` keeps nothing, ever.
#[derive(Debug, Default)]
pub struct BoundedCapture {
    capacity: usize,
    stored: Vec<u8>,
}

impl BoundedCapture {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, stored: Vec::new() }
    }

    /// Stores as much of `bytes` as still fits and returns `bytes.len()`.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.stored.len());
        let take = room.min(bytes.len());
        if take > 0 {
            self.stored.extend_from_slice(&bytes[..take]);
        }
        bytes.len()
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn len(&self) -> usize { self.stored.len() }
    pub fn is_empty(&self) -> bool { self.stored.is_empty() }
    pub fn is_full(&self) -> bool { self.stored.len() >= self.capacity }
    pub fn as_bytes(&self) -> &[u8] { &self.stored }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.stored)
    }
}
