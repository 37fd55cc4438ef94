//! Packet buffer management.
//!
//! `PktBuf` is an owned, fixed-capacity buffer holding one packet (header
//! plus payload). Buffers come from a pre-allocated `BufPool` and are
//! recycled to it when a message is freed; a message owns its buffers
//! exclusively until then.

use crate::packet::{BUF_CAPACITY, HDR_SIZE};

/// One packet worth of network-ready memory.
#[derive(Debug)]
pub struct PktBuf {
    data: Box<[u8]>,
    len: usize,
}

impl PktBuf {
    pub(crate) fn new() -> Self {
        Self {
            data: vec![0u8; BUF_CAPACITY].into_boxed_slice(),
            len: 0,
        }
    }

    /// Total capacity of the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Length of valid data (header plus payload).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the length of valid data.
    ///
    /// # Panics
    /// Panics if `len` exceeds the capacity.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.data.len());
        self.len = len;
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The valid packet bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole capacity, for writing.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The payload bytes after the wire header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[HDR_SIZE.min(self.len)..self.len]
    }

    /// Payload length excluding the wire header.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.len.saturating_sub(HDR_SIZE)
    }

    /// Copy a whole inbound datagram into the buffer.
    ///
    /// # Panics
    /// Panics if `pkt` exceeds the capacity.
    pub fn copy_from(&mut self, pkt: &[u8]) {
        self.data[..pkt.len()].copy_from_slice(pkt);
        self.len = pkt.len();
    }
}

/// A pool of pre-allocated packet buffers.
pub struct BufPool {
    free: Vec<PktBuf>,
    total: usize,
}

impl BufPool {
    /// Create a pool with `count` pre-allocated buffers.
    pub fn new(count: usize) -> Self {
        Self {
            free: (0..count).map(|_| PktBuf::new()).collect(),
            total: count,
        }
    }

    /// Take a cleared buffer from the pool, if one is available.
    pub fn alloc(&mut self) -> Option<PktBuf> {
        let mut buf = self.free.pop()?;
        buf.clear();
        Some(buf)
    }

    /// Return a buffer to the pool.
    pub fn free(&mut self, buf: PktBuf) {
        debug_assert!(self.free.len() < self.total);
        self.free.push(buf);
    }

    /// Number of buffers currently available.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total number of buffers owned by the pool.
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }
}
