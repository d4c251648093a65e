//! Block-growing bump arena.
//!
//! An [`Arena`] hands out memory by bumping a cursor through its current
//! block. When the block is exhausted it either moves on to a block kept
//! from before a soft reset, or acquires a new block of
//! `max(block_size, request) + alignment` bytes and splices it in after
//! the current one. Individual allocations are never freed; memory comes
//! back only through [`Arena::reset`].
//!
//! ```text
//!   head                 current               (kept after soft reset)
//! ┌───────┐   ┌───────┐   ┌───────────────┐   ┌───────┐
//! │ blk 0 │ ⇄ │ blk 2 │ ⇄ │ blk 1 ▓▓▓▓░░░ │ ⇄ │ blk 3 │
//! └───────┘   └───────┘   └───────────────┘   └───────┘
//!                               cursor ┘   └ end
//! ```

use std::fmt;

use tracing::{debug, trace};

use crate::block::{Block, BLOCK_OVERHEAD};
use crate::config::ArenaConfig;
use crate::error::AllocError;
use crate::handle::{BlockId, Span};

/// Size of the scratch buffer used by [`Arena::format`]. Output longer
/// than this minus one byte is truncated.
pub const FORMAT_BUFFER_SIZE: usize = 512;

/// Whether the arena has ever allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArenaState {
    /// No block has been acquired (fresh arena, or after a releasing reset).
    Empty,
    /// Allocation is bumping through `current`.
    Active {
        /// The block the cursor points into.
        current: BlockId,
    },
}

/// Counters describing an arena's block usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Blocks currently held.
    pub blocks: usize,
    /// Bytes currently held across all blocks.
    pub reserved_bytes: usize,
    /// Blocks ever obtained from the system allocator.
    pub system_allocations: u64,
    /// Times the slow path switched to a block kept from before a soft
    /// reset instead of allocating.
    pub block_reuses: u64,
}

/// A region that grows by appending blocks and serves allocations by
/// bumping a cursor.
pub struct Arena {
    config: ArenaConfig,
    alignment_shift: u32,
    /// Block table. Chain order lives in the blocks' `prev`/`next` links.
    blocks: Vec<Block>,
    state: ArenaState,
    /// Next free byte in the current block.
    cursor: usize,
    /// One past the last usable byte in the current block.
    end: usize,
    reserved_bytes: usize,
    system_allocations: u64,
    block_reuses: u64,
}

impl Arena {
    /// Create an empty arena. No memory is acquired until the first
    /// allocation.
    pub fn new(config: ArenaConfig) -> Result<Self, AllocError> {
        config.validate()?;
        Ok(Self {
            alignment_shift: config.alignment_shift(),
            config,
            blocks: Vec::new(),
            state: ArenaState::Empty,
            cursor: 0,
            end: 0,
            reserved_bytes: 0,
            system_allocations: 0,
            block_reuses: 0,
        })
    }

    /// The configuration this arena was built with.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Alignment of every span this arena hands out.
    pub fn alignment(&self) -> usize {
        1 << self.alignment_shift
    }

    /// Current state.
    pub fn state(&self) -> ArenaState {
        self.state
    }

    /// Whether the arena holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.state == ArenaState::Empty
    }

    /// Bytes left between the cursor and the end of the current block.
    pub fn remaining(&self) -> usize {
        self.end - self.cursor
    }

    /// Number of blocks held.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes held across all blocks.
    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            blocks: self.blocks.len(),
            reserved_bytes: self.reserved_bytes,
            system_allocations: self.system_allocations,
            block_reuses: self.block_reuses,
        }
    }

    /// Allocate `size` bytes aligned to the arena's alignment.
    ///
    /// The contents are unspecified: a block reused after a soft reset
    /// still holds whatever was written before.
    pub fn allocate(&mut self, size: usize) -> Result<Span, AllocError> {
        self.allocate_aligned(size, self.alignment())
    }

    /// Allocate `size` zeroed bytes.
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<Span, AllocError> {
        let span = self.allocate(size)?;
        self.bytes_mut(span).fill(0);
        Ok(span)
    }

    /// Copy `bytes` into a fresh allocation, optionally followed by a NUL
    /// byte. The returned span includes the terminator.
    pub fn duplicate(&mut self, bytes: &[u8], nul_terminate: bool) -> Result<Span, AllocError> {
        if bytes.is_empty() {
            return Err(AllocError::InvalidArgument {
                reason: "cannot duplicate an empty byte slice",
            });
        }
        let total = bytes
            .len()
            .checked_add(usize::from(nul_terminate))
            .ok_or(AllocError::Overflow {
                requested: bytes.len(),
            })?;

        let span = self.allocate(total)?;
        let dst = self.bytes_mut(span);
        dst[..bytes.len()].copy_from_slice(bytes);
        if nul_terminate {
            dst[bytes.len()] = 0;
        }
        Ok(span)
    }

    /// Format `args` into a fresh NUL-terminated allocation.
    ///
    /// Output is truncated to `FORMAT_BUFFER_SIZE - 1` bytes. Empty output
    /// still yields a one-byte span holding the terminator. A `Display`
    /// implementation that reports an error fails the whole call.
    pub fn format(&mut self, args: fmt::Arguments<'_>) -> Result<Span, AllocError> {
        let mut buf = FormatBuffer::default();
        fmt::write(&mut buf, args).map_err(|_| AllocError::InvalidArgument {
            reason: "formatting trait implementation returned an error",
        })?;
        // The buffer always reserves its last byte, which is still zero.
        self.duplicate(buf.with_terminator(), false)
    }

    /// Rewind or release.
    ///
    /// With `release_memory == false` the cursor moves back to the head of
    /// the block chain and every block stays available for reuse. With
    /// `release_memory == true` every block goes back to the system
    /// allocator and the arena returns to [`ArenaState::Empty`]; all
    /// outstanding spans become stale.
    pub fn reset(&mut self, release_memory: bool) {
        let ArenaState::Active { current } = self.state else {
            return;
        };

        if release_memory {
            // `current` may sit in the middle of the chain: walk backwards
            // from it, then forwards from its successor.
            let mut released_blocks = 0usize;
            let mut released_bytes = 0usize;
            let after = self.blocks[current.index()].next;

            let mut walk = Some(current);
            while let Some(id) = walk {
                let block = &mut self.blocks[id.index()];
                walk = block.prev;
                released_bytes += block.release();
                released_blocks += 1;
            }
            walk = after;
            while let Some(id) = walk {
                let block = &mut self.blocks[id.index()];
                walk = block.next;
                released_bytes += block.release();
                released_blocks += 1;
            }
            debug_assert_eq!(released_blocks, self.blocks.len(), "block chain is broken");

            self.blocks.clear();
            self.state = ArenaState::Empty;
            self.cursor = 0;
            self.end = 0;
            self.reserved_bytes = 0;
            debug!(
                blocks = released_blocks,
                bytes = released_bytes,
                "arena released all blocks"
            );
        } else {
            let mut head = current;
            while let Some(prev) = self.blocks[head.index()].prev {
                head = prev;
            }
            self.state = ArenaState::Active { current: head };
            self.cursor = 0;
            self.end = self.blocks[head.index()].size();
            trace!(head = %head, "arena rewound");
        }
    }

    /// Bytes of a span.
    ///
    /// # Panics
    ///
    /// Panics if the span does not belong to this arena (for example, one
    /// retained across a releasing reset).
    pub fn bytes(&self, span: Span) -> &[u8] {
        &self.blocks[span.block.index()].bytes()[span.offset..span.end()]
    }

    /// Mutable bytes of a span.
    ///
    /// # Panics
    ///
    /// Panics if the span does not belong to this arena.
    pub fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        &mut self.blocks[span.block.index()].bytes_mut()[span.offset..span.end()]
    }

    /// Copy the first `len` bytes of `src` into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds either span.
    pub fn copy(&mut self, src: Span, dst: Span, len: usize) {
        assert!(len <= src.len && len <= dst.len, "copy length exceeds span");
        let (s, d) = (src.block.index(), dst.block.index());
        if s == d {
            self.blocks[s]
                .bytes_mut()
                .copy_within(src.offset..src.offset + len, dst.offset);
            return;
        }
        let (from, to) = if s < d {
            let (lo, hi) = self.blocks.split_at_mut(d);
            (&lo[s], &mut hi[0])
        } else {
            let (lo, hi) = self.blocks.split_at_mut(s);
            (&hi[0], &mut lo[d])
        };
        to.bytes_mut()[dst.offset..dst.offset + len]
            .copy_from_slice(&from.bytes()[src.offset..src.offset + len]);
    }

    /// Bump-allocate from the current block only. Never acquires or
    /// switches blocks.
    pub(crate) fn bump(&mut self, size: usize, align: usize) -> Option<Span> {
        let ArenaState::Active { current } = self.state else {
            return None;
        };
        let start = self.blocks[current.index()].align_offset(self.cursor, align)?;
        if start > self.end || self.end - start < size {
            return None;
        }
        self.cursor = start + size;
        Some(Span::new(current, start, size))
    }

    /// The unused tail of the current block, starting at the cursor
    /// aligned to `align`.
    pub(crate) fn tail(&self, align: usize) -> Option<Span> {
        let ArenaState::Active { current } = self.state else {
            return None;
        };
        let start = self.blocks[current.index()].align_offset(self.cursor, align)?;
        (start < self.end).then(|| Span::new(current, start, self.end - start))
    }

    /// Move the cursor forward within the current block.
    pub(crate) fn advance_to(&mut self, offset: usize) {
        debug_assert!(offset >= self.cursor && offset <= self.end);
        self.cursor = offset;
    }

    /// Allocate with an explicit alignment (at least the arena's own).
    pub(crate) fn allocate_aligned(&mut self, size: usize, align: usize) -> Result<Span, AllocError> {
        if let Some(span) = self.bump(size, align) {
            return Ok(span);
        }
        self.allocate_slow(size, align)
    }

    /// Only reached when the current block cannot satisfy the request.
    fn allocate_slow(&mut self, size: usize, align: usize) -> Result<Span, AllocError> {
        // After a soft reset the chain past the current block is unused
        // capacity; take the next block if the request fits in it.
        let next = match self.state {
            ArenaState::Active { current } => self.blocks[current.index()].next,
            ArenaState::Empty => None,
        };
        if let Some(next) = next {
            let block = &self.blocks[next.index()];
            if let Some(start) = block.align_offset(0, align) {
                if block.size() - start >= size {
                    self.state = ArenaState::Active { current: next };
                    self.cursor = start + size;
                    self.end = block.size();
                    self.block_reuses += 1;
                    trace!(block = %next, size, "arena reused kept block");
                    return Ok(Span::new(next, start, size));
                }
            }
        }

        let block_size = self.config.block_size.max(size);
        if block_size > usize::MAX - BLOCK_OVERHEAD - align {
            return Err(AllocError::Overflow { requested: size });
        }
        let total = block_size + align;

        if let Some(limit) = self.config.memory_limit {
            if self.reserved_bytes.saturating_add(total) > limit {
                return Err(AllocError::OutOfMemory { requested: total });
            }
        }
        let id = u32::try_from(self.blocks.len())
            .map(BlockId)
            .map_err(|_| AllocError::OutOfMemory { requested: total })?;

        let mut block = Block::try_new(total)?;
        if let ArenaState::Active { current } = self.state {
            // Splice between `current` and whatever followed it.
            block.prev = Some(current);
            block.next = next;
            if let Some(next) = next {
                self.blocks[next.index()].prev = Some(id);
            }
            self.blocks[current.index()].next = Some(id);
        }

        // `total` includes `align` bytes of padding, so this cannot fail.
        let start = block.align_offset(0, align).unwrap_or(0);
        self.blocks.push(block);
        self.state = ArenaState::Active { current: id };
        self.cursor = start + size;
        self.end = total;
        self.reserved_bytes += total;
        self.system_allocations += 1;
        debug!(block = %id, bytes = total, request = size, "arena acquired block");

        Ok(Span::new(id, start, size))
    }

    /// Chain order, head first. Used to check link integrity.
    #[cfg(test)]
    pub(crate) fn chain(&self) -> Vec<BlockId> {
        let ArenaState::Active { current } = self.state else {
            return Vec::new();
        };
        let mut head = current;
        while let Some(prev) = self.blocks[head.index()].prev {
            head = prev;
        }
        let mut out = vec![head];
        while let Some(next) = self.blocks[out[out.len() - 1].index()].next {
            out.push(next);
        }
        out
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("end", &self.end)
            .field("blocks", &self.blocks.len())
            .field("reserved_bytes", &self.reserved_bytes)
            .finish()
    }
}

/// Fixed-size formatting target that truncates instead of failing.
struct FormatBuffer {
    buf: [u8; FORMAT_BUFFER_SIZE],
    len: usize,
}

impl Default for FormatBuffer {
    fn default() -> Self {
        Self {
            buf: [0; FORMAT_BUFFER_SIZE],
            len: 0,
        }
    }
}

impl FormatBuffer {
    fn with_terminator(&self) -> &[u8] {
        &self.buf[..=self.len]
    }
}

impl fmt::Write for FormatBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = FORMAT_BUFFER_SIZE - 1 - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}
