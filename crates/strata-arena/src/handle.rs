//! Handles to arena and heap memory.
//!
//! Memory is never handed out as a raw pointer. A [`Span`] names a byte
//! range inside one arena block, a [`DynamicId`] names an oversized block
//! owned by the heap, and an [`Allocation`] pairs either of them with the
//! size that must be presented back on release.

use std::fmt;

/// Stable index of a block in an arena's block table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// A byte range handed out by an [`Arena`](crate::Arena).
///
/// `offset` is already aligned to the alignment the allocation was made
/// with. Spans are only meaningful for the arena that produced them and
/// become stale on a releasing reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub struct Span {
    pub(crate) block: BlockId,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl Span {
    pub(crate) fn new(block: BlockId, offset: usize, len: usize) -> Self {
        Self { block, offset, len }
    }

    /// The block this span lives in.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Byte offset of the span within its block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether this is a zero-length span.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the span.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{}]", self.block, self.offset, self.end())
    }
}

/// Generation-checked index of a dynamic block owned by a
/// [`SlabHeap`](crate::SlabHeap).
///
/// The generation lets the heap detect a stale or foreign id in O(1)
/// without walking its dynamic-block list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DynamicId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for DynamicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn#{}@{}", self.index, self.generation)
    }
}

/// Where a heap allocation lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    /// Carved from the heap's arena (a size-class slot).
    Arena(Span),
    /// A dedicated block from the system allocator.
    Dynamic(DynamicId),
}

/// A live heap allocation: where it is and how big it really is.
///
/// `size` is the size actually reserved, which for small requests is the
/// rounded-up size class. Containers keep the whole `Allocation` and hand
/// it back to [`SlabHeap::release`](crate::SlabHeap::release) unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub struct Allocation {
    pub(crate) region: Region,
    pub(crate) size: usize,
}

impl Allocation {
    pub(crate) fn new(region: Region, size: usize) -> Self {
        Self { region, size }
    }

    /// Where the allocation lives.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Usable size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the allocation was served by the system allocator.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.region, Region::Dynamic(_))
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.region {
            Region::Arena(span) => write!(f, "Allocation({span}, {} bytes)", self.size),
            Region::Dynamic(id) => write!(f, "Allocation({id}, {} bytes)", self.size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_accessors() {
        let span = Span::new(BlockId(3), 64, 32);
        assert_eq!(span.block(), BlockId(3));
        assert_eq!(span.offset(), 64);
        assert_eq!(span.len(), 32);
        assert_eq!(span.end(), 96);
        assert!(!span.is_empty());
        assert_eq!(span.to_string(), "block#3[64..96]");
    }

    #[test]
    fn allocation_reports_region_kind() {
        let slab = Allocation::new(Region::Arena(Span::new(BlockId(0), 0, 32)), 32);
        let dynamic = Allocation::new(
            Region::Dynamic(DynamicId {
                index: 1,
                generation: 0,
            }),
            4096,
        );
        assert!(!slab.is_dynamic());
        assert!(dynamic.is_dynamic());
        assert_eq!(dynamic.size(), 4096);
    }
}
