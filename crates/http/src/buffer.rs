//! Contiguous I/O buffer with read and write cursors.
//!
//! One instance backs each direction of a connection: the read buffer
//! receives bytes from the socket and feeds the parser, the write buffer
//! holds the serialized response while it drains. The invariant
//! `read_pos <= write_pos <= storage.len()` holds at all times.

/// Byte buffer with a consume cursor (`read_pos`) and a fill cursor
/// (`write_pos`).
///
/// `writable(min)` hands out spare room for a `read(2)` call, `commit(n)`
/// acknowledges the bytes actually received, `readable()` exposes what is
/// pending, and `consume(n)` discards a parsed or written prefix. The
/// consumed prefix is reclaimed by compaction once it dominates the buffer,
/// so long keep-alive sessions do not creep toward the capacity limit.
pub struct IoBuffer {
    storage: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

const DEFAULT_CAPACITY: usize = 8 * 1024;

impl IoBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { storage: vec![0u8; capacity.max(64)], read_pos: 0, write_pos: 0 }
    }

    /// Bytes pending between the cursors.
    #[inline]
    pub fn readable(&self) -> &[u8] {
        &self.storage[self.read_pos..self.write_pos]
    }

    /// Spare room of at least `min` bytes after the fill cursor.
    ///
    /// Compacts the consumed prefix first and grows the backing storage only
    /// if compaction is not enough.
    pub fn writable(&mut self, min: usize) -> &mut [u8] {
        let min = min.max(1);
        if self.storage.len() - self.write_pos < min {
            self.compact();
        }
        if self.storage.len() - self.write_pos < min {
            let needed = self.write_pos + min;
            let new_len = needed.next_power_of_two();
            self.storage.resize(new_len, 0);
        }
        &mut self.storage[self.write_pos..]
    }

    /// Acknowledges `n` bytes written into the span returned by `writable`.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        self.write_pos += n;
        debug_assert!(self.write_pos <= self.storage.len());
    }

    /// Discards `n` bytes from the front of the readable span.
    #[inline]
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n;
        debug_assert!(self.read_pos <= self.write_pos);
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Appends `bytes`, growing as needed. Used by the response serializer.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let span = self.writable(bytes.len());
        span[..bytes.len()].copy_from_slice(bytes);
        self.commit(bytes.len());
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.storage.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }
}

impl Default for IoBuffer {
    fn default() -> Self {
        Self::new()
    }
}
