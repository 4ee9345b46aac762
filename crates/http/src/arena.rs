//! Monotonic request-scoped arena.
//!
//! Every connection owns one [`MonotonicArena`]; handlers and the dispatcher
//! allocate request-derived strings and response bodies into it, and the
//! connection driver resets it between keep-alive requests. Allocation is a
//! bump-pointer move inside a block; `reset` returns every block to the free
//! list without running destructors, so a view allocated from the arena is
//! valid exactly until the next `reset`.

use bumpalo::Bump;

/// Default block size for arena chunks.
const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

/// A monotonic bump-pointer region, reused across keep-alive requests.
///
/// Allocation goes through `&self`, which lets the request context hand out
/// arena references while the parsed request is still borrowed. `reset`
/// requires `&mut self` and therefore cannot run while any view into the
/// arena is alive.
pub struct MonotonicArena {
    bump: Bump,
    block_size: usize,
}

impl MonotonicArena {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        Self { bump: Bump::with_capacity(block_size), block_size }
    }

    /// Copies `bytes` into the arena and returns the arena-backed view.
    pub fn alloc_bytes<'a>(&'a self, bytes: &[u8]) -> &'a [u8] {
        self.bump.alloc_slice_copy(bytes)
    }

    /// Copies `s` into the arena and returns the arena-backed view.
    pub fn alloc_str<'a>(&'a self, s: &str) -> &'a str {
        self.bump.alloc_str(s)
    }

    /// Allocates `len` bytes filled with `byte`.
    pub fn alloc_slice_fill<'a>(&'a self, len: usize, byte: u8) -> &'a mut [u8] {
        self.bump.alloc_slice_fill_copy(len, byte)
    }

    /// Returns all blocks to the free list, invalidating every view handed
    /// out since the previous reset. The largest block is retained, so a
    /// steady-state connection allocates from the same block on every
    /// request.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Total bytes currently backing the arena, including unused capacity.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for MonotonicArena {
    fn default() -> Self {
        Self::new()
    }
}
