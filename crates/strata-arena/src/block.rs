//! Arena blocks: contiguous buffers obtained from the system allocator.

use crate::error::AllocError;
use crate::handle::BlockId;

/// Bookkeeping bytes charged per block when checking for size overflow.
pub(crate) const BLOCK_OVERHEAD: usize = std::mem::size_of::<Block>();

/// One contiguous memory segment owned by an arena.
///
/// Blocks form a doubly linked chain through `prev`/`next`. The chain
/// order is the allocation order, which is independent of the block's
/// position in the arena's block table.
pub(crate) struct Block {
    /// Backing storage. Sized once at creation and never grown, so the
    /// address of every byte is stable for the block's lifetime.
    data: Vec<u8>,
    pub(crate) prev: Option<BlockId>,
    pub(crate) next: Option<BlockId>,
}

impl Block {
    /// Obtain a zero-initialised block of exactly `size` bytes.
    pub(crate) fn try_new(size: usize) -> Result<Self, AllocError> {
        Ok(Self {
            data: try_alloc_bytes(size)?,
            prev: None,
            next: None,
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.data.len()
    }

    /// First offset at or after `offset` whose address is aligned to
    /// `align`, or `None` if that lies past the end of the block.
    pub(crate) fn align_offset(&self, offset: usize, align: usize) -> Option<usize> {
        aligned_offset(&self.data, offset, align).filter(|&o| o <= self.data.len())
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Return the backing storage to the system allocator. Returns the
    /// number of bytes released.
    pub(crate) fn release(&mut self) -> usize {
        let released = self.data.len();
        self.data = Vec::new();
        released
    }
}

/// Allocate a zeroed byte buffer, reporting allocator failure instead of
/// aborting.
pub(crate) fn try_alloc_bytes(size: usize) -> Result<Vec<u8>, AllocError> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|_| AllocError::OutOfMemory { requested: size })?;
    data.resize(size, 0);
    Ok(data)
}

/// Offset within `data` of the first address at or after `data[offset]`
/// that is a multiple of `align`.
pub(crate) fn aligned_offset(data: &[u8], offset: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    let base = data.as_ptr() as usize;
    let addr = base.checked_add(offset)?;
    let aligned = align_up(addr, align)?;
    Some(aligned - base)
}

/// Round `value` up to a multiple of `align` (a power of two).
pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}
