//! Size-classed slab heap on top of an [`Arena`].
//!
//! [`SlabHeap`] rounds small requests up to a size class and serves them
//! from that class's free list, falling back to bump allocation in the
//! arena. Requests larger than the biggest class become dynamic blocks
//! obtained from the system allocator and freed individually.
//!
//! Reuse is exact-class: a released slot only ever comes back for a
//! request that rounds up to the same class. There is no splitting and no
//! coalescing.
//!
//! Free lists are intrusive. The first [`HeapConfig::FREE_SLOT_HEADER`]
//! bytes of a released slot hold the link to the next slot of its class:
//!
//! ```text
//! free_heads[c] ─► ┌────────────┬───────────┬─────┐
//!                  │ block + 1  │ offset    │ ... │ ─► next slot of class c
//!                  │ (u64 LE)   │ (u64 LE)  │     │    (block + 1 == 0: end)
//!                  └────────────┴───────────┴─────┘
//! ```
//!
//! The link encoding never leaves this module.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::arena::Arena;
use crate::config::HeapConfig;
use crate::dynamic::DynamicBlocks;
use crate::error::AllocError;
use crate::handle::{Allocation, BlockId, DynamicId, Region, Span};
use crate::size_class::{SizeClass, SizeClasses};

/// Per-class storage sized for the default table without spilling.
type PerClass<T> = SmallVec<[T; 8]>;

/// Counters describing a heap's recycling state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live dynamic blocks.
    pub dynamic_blocks: usize,
    /// Bytes held by live dynamic blocks, including overhead.
    pub dynamic_bytes: usize,
    /// Slots waiting on each class's free list, smallest class first.
    pub free_slots: SmallVec<[usize; 8]>,
}

/// A recycling allocator over an arena.
pub struct SlabHeap {
    arena: Arena,
    config: HeapConfig,
    classes: SizeClasses,
    /// Head of each class's free list.
    free_heads: PerClass<Option<Span>>,
    /// Length of each class's free list.
    free_counts: PerClass<usize>,
    dynamic: DynamicBlocks,
}

impl SlabHeap {
    /// Create a heap over `arena` with the default size-class table.
    pub fn new(arena: Arena) -> Self {
        let config = HeapConfig::default();
        let classes = config.size_classes();
        Self::build(arena, config, classes)
    }

    /// Create a heap with an explicit size-class table.
    pub fn with_config(arena: Arena, config: HeapConfig) -> Result<Self, AllocError> {
        config.validate()?;
        let classes = config.size_classes();
        Ok(Self::build(arena, config, classes))
    }

    fn build(arena: Arena, config: HeapConfig, classes: SizeClasses) -> Self {
        Self {
            arena,
            free_heads: std::iter::repeat_n(None, classes.count()).collect(),
            free_counts: std::iter::repeat_n(0, classes.count()).collect(),
            config,
            classes,
            dynamic: DynamicBlocks::default(),
        }
    }

    /// The configuration this heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The size-class table.
    pub fn size_classes(&self) -> &SizeClasses {
        &self.classes
    }

    /// Classify a request size.
    pub fn size_class(&self, size: usize) -> SizeClass {
        self.classes.classify(size)
    }

    /// The arena slab memory is carved from.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Mutable access to the arena, for allocations that never come back
    /// through the heap.
    ///
    /// Resetting the arena through this reference leaves stale slots on the
    /// free lists; use [`SlabHeap::rewind`] instead.
    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Snapshot of the recycling counters.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            dynamic_blocks: self.dynamic.len(),
            dynamic_bytes: self.dynamic.bytes_held(),
            free_slots: self.free_counts.clone(),
        }
    }

    /// Allocate at least `size` bytes.
    ///
    /// The returned allocation's `size` is what was actually reserved (the
    /// class size for small requests) and is what
    /// [`release`](SlabHeap::release) expects back. Contents are
    /// unspecified.
    pub fn allocate(&mut self, size: usize) -> Result<Allocation, AllocError> {
        match self.classes.classify(size) {
            SizeClass::Slab { index, size } => self.allocate_slab(index, size),
            SizeClass::Dynamic => {
                let id = self.dynamic.allocate(
                    size,
                    self.config.slot_alignment,
                    self.config.dynamic_limit,
                )?;
                Ok(Allocation::new(Region::Dynamic(id), size))
            }
        }
    }

    /// Allocate at least `size` bytes, all zeroed.
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<Allocation, AllocError> {
        let allocation = self.allocate(size)?;
        self.bytes_mut(&allocation).fill(0);
        Ok(allocation)
    }

    /// Give an allocation back.
    ///
    /// Slab allocations go onto their class's free list; dynamic blocks
    /// are unlinked and freed. The allocation must come from this heap
    /// and must not be used afterwards.
    pub fn release(&mut self, allocation: Allocation) {
        match allocation.region {
            Region::Arena(span) => match self.classes.classify(allocation.size) {
                SizeClass::Slab { index, size } => {
                    debug_assert_eq!(size, allocation.size, "released size is not a class size");
                    debug_assert!(span.len >= size);
                    self.push_free(index, Span::new(span.block, span.offset, size));
                }
                SizeClass::Dynamic => {
                    debug_assert!(false, "arena allocation released with a dynamic size");
                }
            },
            Region::Dynamic(id) => self.dynamic.release(id),
        }
    }

    /// Bytes of a live allocation.
    pub fn bytes(&self, allocation: &Allocation) -> &[u8] {
        match allocation.region {
            Region::Arena(span) => self.arena.bytes(span),
            Region::Dynamic(id) => self.dynamic.bytes(id),
        }
    }

    /// Mutable bytes of a live allocation.
    pub fn bytes_mut(&mut self, allocation: &Allocation) -> &mut [u8] {
        match allocation.region {
            Region::Arena(span) => self.arena.bytes_mut(span),
            Region::Dynamic(id) => self.dynamic.bytes_mut(id),
        }
    }

    /// Copy the first `len` bytes of `src` into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds either allocation or either is stale.
    pub fn copy(&mut self, src: &Allocation, dst: &Allocation, len: usize) {
        assert!(
            len <= src.size && len <= dst.size,
            "copy length exceeds allocation"
        );
        match (src.region, dst.region) {
            (Region::Arena(s), Region::Arena(d)) => self.arena.copy(s, d, len),
            (Region::Arena(s), Region::Dynamic(d)) => {
                self.dynamic.bytes_mut(d)[..len].copy_from_slice(&self.arena.bytes(s)[..len]);
            }
            (Region::Dynamic(s), Region::Arena(d)) => {
                self.arena.bytes_mut(d)[..len].copy_from_slice(&self.dynamic.bytes(s)[..len]);
            }
            (Region::Dynamic(s), Region::Dynamic(d)) => self.dynamic.copy(s, d, len),
        }
    }

    /// Free every dynamic block, empty every free list and switch to
    /// `arena`. Returns the arena the heap was using.
    ///
    /// Every allocation made before the call is stale afterwards.
    pub fn reset(&mut self, arena: Arena) -> Arena {
        self.forget_all();
        std::mem::replace(&mut self.arena, arena)
    }

    /// Reset the owned arena (see [`Arena::reset`]) together with the
    /// heap's own state.
    pub fn rewind(&mut self, release_memory: bool) {
        self.forget_all();
        self.arena.reset(release_memory);
    }

    /// Whether `id` names a live dynamic block of this heap.
    pub fn contains_dynamic(&self, id: DynamicId) -> bool {
        self.dynamic.contains(id)
    }

    /// Live dynamic blocks, most recently allocated first.
    pub fn dynamic_blocks(&self) -> impl Iterator<Item = DynamicId> + '_ {
        self.dynamic.iter()
    }

    fn forget_all(&mut self) {
        self.dynamic.clear();
        self.free_heads.iter_mut().for_each(|h| *h = None);
        self.free_counts.iter_mut().for_each(|c| *c = 0);
        debug!("heap reset");
    }

    fn allocate_slab(&mut self, index: usize, size: usize) -> Result<Allocation, AllocError> {
        if let Some(span) = self.pop_free(index) {
            return Ok(Allocation::new(Region::Arena(span), size));
        }

        // Bump straight out of the current block when it has room, so a
        // small request never makes the arena grow early.
        let align = self.config.slot_alignment;
        if let Some(span) = self.arena.bump(size, align) {
            return Ok(Allocation::new(Region::Arena(span), size));
        }

        self.distribute_tail();
        let span = self.arena.allocate_aligned(size, align)?;
        Ok(Allocation::new(Region::Arena(span), size))
    }

    /// Turn the unused tail of the arena's current block into free-list
    /// slots so it is not wasted when the arena moves on.
    fn distribute_tail(&mut self) {
        let Some(tail) = self.arena.tail(self.config.slot_alignment) else {
            return;
        };
        let granularity = self.classes.lo_granularity();

        // Chunks are whole low-band classes, so every slot start stays a
        // multiple of the granularity past the aligned tail start.
        let mut offset = tail.offset;
        let mut remain = tail.len;
        let mut slots = 0usize;
        while let Some(index) = self.classes.leftover_class(remain) {
            let chunk = self.classes.class_size(index);
            self.push_free(index, Span::new(tail.block, offset, chunk));
            offset += chunk;
            remain -= chunk;
            slots += 1;
        }
        if slots > 0 {
            self.arena.advance_to(offset);
            trace!(
                block = %tail.block,
                slots,
                wasted = remain,
                granularity,
                "heap distributed arena leftover"
            );
        }
    }

    fn push_free(&mut self, index: usize, span: Span) {
        let link = encode_link(self.free_heads[index]);
        self.arena.bytes_mut(span)[..HeapConfig::FREE_SLOT_HEADER].copy_from_slice(&link);
        self.free_heads[index] = Some(span);
        self.free_counts[index] += 1;
    }

    fn pop_free(&mut self, index: usize) -> Option<Span> {
        let span = self.free_heads[index]?;
        let link = &self.arena.bytes(span)[..HeapConfig::FREE_SLOT_HEADER];
        let size = self.classes.class_size(index);
        self.free_heads[index] = decode_link(link, size);
        self.free_counts[index] -= 1;
        Some(span)
    }
}

impl std::fmt::Debug for SlabHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabHeap")
            .field("arena", &self.arena)
            .field("free_slots", &self.free_counts)
            .field("dynamic_blocks", &self.dynamic.len())
            .finish()
    }
}

fn encode_link(next: Option<Span>) -> [u8; HeapConfig::FREE_SLOT_HEADER] {
    let mut out = [0u8; HeapConfig::FREE_SLOT_HEADER];
    if let Some(span) = next {
        out[..8].copy_from_slice(&(u64::from(span.block.0) + 1).to_le_bytes());
        out[8..].copy_from_slice(&(span.offset as u64).to_le_bytes());
    }
    out
}

fn decode_link(bytes: &[u8], size: usize) -> Option<Span> {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    let block = u64::from_le_bytes(word);
    if block == 0 {
        return None;
    }
    word.copy_from_slice(&bytes[8..16]);
    let offset = u64::from_le_bytes(word) as usize;
    Some(Span::new(BlockId((block - 1) as u32), offset, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;

    fn heap(block_size: usize) -> SlabHeap {
        SlabHeap::new(Arena::new(ArenaConfig::new(block_size)).unwrap())
    }

    #[test]
    fn small_request_is_rounded_to_class() {
        let mut h = heap(4096);
        let a = h.allocate(20).unwrap();
        assert_eq!(a.size(), 32);
        assert!(!a.is_dynamic());
        let b = h.allocate(200).unwrap();
        assert_eq!(b.size(), 256);
    }

    #[test]
    fn slab_allocations_are_aligned() {
        let mut h = heap(4096);
        let align = h.config().slot_alignment;
        for size in [1, 17, 33, 100, 129, 700] {
            let a = h.allocate(size).unwrap();
            assert_eq!(h.bytes(&a).as_ptr() as usize % align, 0);
        }
    }

    #[test]
    fn released_slot_is_reused_for_same_class() {
        let mut h = heap(4096);
        let a = h.allocate(50).unwrap();
        h.release(a);
        assert_eq!(h.stats().free_slots[1], 1);
        let b = h.allocate(60).unwrap();
        assert_eq!(a, b);
        assert_eq!(h.stats().free_slots[1], 0);
    }

    #[test]
    fn released_slot_is_not_reused_for_other_class() {
        let mut h = heap(4096);
        let a = h.allocate(50).unwrap();
        h.release(a);
        let b = h.allocate(20).unwrap();
        assert_ne!(a.region(), b.region());
        let c = h.allocate(100).unwrap();
        assert_ne!(a.region(), c.region());
        assert_eq!(h.stats().free_slots[1], 1);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut h = heap(4096);
        let a = h.allocate(32).unwrap();
        let b = h.allocate(32).unwrap();
        let c = h.allocate(32).unwrap();
        h.release(a);
        h.release(b);
        h.release(c);
        assert_eq!(h.allocate(32).unwrap(), c);
        assert_eq!(h.allocate(32).unwrap(), b);
        assert_eq!(h.allocate(32).unwrap(), a);
    }

    #[test]
    fn small_requests_do_not_grow_arena_early() {
        let mut h = heap(1024);
        for _ in 0..8 {
            let _ = h.allocate(100).unwrap();
        }
        assert_eq!(h.arena().block_count(), 1);
    }

    /// Leaves the first block (1024 + 16 bytes) with a 257..=272 byte tail
    /// and forces a second block with a 512-byte request.
    fn heap_with_distributed_tail() -> SlabHeap {
        let mut h = heap(1024);
        for _ in 0..3 {
            let _ = h.allocate(256).unwrap();
        }
        let tail = h.arena().remaining();
        assert!((257..=272).contains(&tail), "unexpected tail {tail}");
        let _ = h.allocate(512).unwrap();
        h
    }

    #[test]
    fn block_leftover_is_distributed() {
        let h = heap_with_distributed_tail();
        assert_eq!(h.arena().block_count(), 2);
        // Two 128-byte slots; the leftover is capped at the low band.
        assert_eq!(h.stats().free_slots.as_slice(), &[0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn distributed_slot_serves_small_request() {
        let mut h = heap_with_distributed_tail();
        let slot = h.allocate(128).unwrap();
        let Region::Arena(span) = slot.region() else {
            panic!("expected a slab slot");
        };
        assert_eq!(span.block(), BlockId(0));
        assert_eq!(h.bytes(&slot).as_ptr() as usize % h.config().slot_alignment, 0);
        assert_eq!(h.stats().free_slots[3], 1);
    }

    #[test]
    fn large_request_is_dynamic() {
        let mut h = heap(4096);
        let a = h.allocate(10_000).unwrap();
        assert!(a.is_dynamic());
        assert_eq!(a.size(), 10_000);
        assert_eq!(h.bytes(&a).len(), 10_000);
        assert_eq!(h.stats().dynamic_blocks, 1);
        assert_eq!(h.arena().block_count(), 0);
    }

    #[test]
    fn dynamic_release_unlinks_from_middle() {
        let mut h = heap(4096);
        let a = h.allocate(5000).unwrap();
        let b = h.allocate(6000).unwrap();
        let c = h.allocate(7000).unwrap();
        h.release(b);
        let ids: Vec<_> = h.dynamic_blocks().collect();
        let id = |x: &Allocation| match x.region() {
            Region::Dynamic(id) => id,
            Region::Arena(_) => unreachable!(),
        };
        assert_eq!(ids, vec![id(&c), id(&a)]);
        assert!(!h.contains_dynamic(id(&b)));
        h.release(a);
        h.release(c);
        assert_eq!(h.stats().dynamic_blocks, 0);
        assert_eq!(h.stats().dynamic_bytes, 0);
    }

    #[test]
    fn allocate_zeroed_clears_recycled_slot() {
        let mut h = heap(4096);
        let a = h.allocate(64).unwrap();
        h.bytes_mut(&a).fill(0xEE);
        h.release(a);
        let b = h.allocate_zeroed(64).unwrap();
        assert_eq!(a, b);
        assert!(h.bytes(&b).iter().all(|&x| x == 0));
    }

    #[test]
    fn copy_across_regions() {
        let mut h = heap(4096);
        let small = h.allocate(16).unwrap();
        let big = h.allocate(4000).unwrap();
        h.bytes_mut(&small)[..5].copy_from_slice(b"slabs");
        h.copy(&small, &big, 5);
        assert_eq!(&h.bytes(&big)[..5], b"slabs");
        h.bytes_mut(&big)[..3].copy_from_slice(b"DYN");
        h.copy(&big, &small, 3);
        assert_eq!(&h.bytes(&small)[..5], b"DYNbs");
    }

    #[test]
    fn reset_swaps_arena_and_clears_state() {
        let mut h = heap(4096);
        let a = h.allocate(64).unwrap();
        h.release(a);
        let _ = h.allocate(9000).unwrap();

        let old = h.reset(Arena::new(ArenaConfig::new(512)).unwrap());
        assert_eq!(old.block_count(), 1);
        assert_eq!(h.arena().block_count(), 0);
        let stats = h.stats();
        assert_eq!(stats.dynamic_blocks, 0);
        assert!(stats.free_slots.iter().all(|&n| n == 0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released untracked dynamic block")]
    fn double_release_of_dynamic_block_asserts() {
        let mut h = heap(1024);
        let a = h.allocate(4000).unwrap();
        h.release(a);
        h.release(a);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released untracked dynamic block")]
    fn release_after_reset_asserts() {
        let mut h = heap(1024);
        let a = h.allocate(4000).unwrap();
        let _old = h.reset(Arena::new(ArenaConfig::new(1024)).unwrap());
        h.release(a);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released size is not a class size")]
    fn release_with_foreign_size_asserts() {
        let mut h = heap(1024);
        let span = h.arena_mut().allocate(40).unwrap();
        h.release(Allocation::new(Region::Arena(span), 40));
    }

    #[test]
    fn rewind_keeps_blocks_for_reuse() {
        let mut h = heap(1024);
        for _ in 0..20 {
            let _ = h.allocate(128).unwrap();
        }
        let blocks = h.arena().block_count();
        let system = h.arena().stats().system_allocations;
        h.rewind(false);
        for _ in 0..20 {
            let _ = h.allocate(128).unwrap();
        }
        assert_eq!(h.arena().block_count(), blocks);
        assert_eq!(h.arena().stats().system_allocations, system);

        h.rewind(true);
        assert!(h.arena().is_empty());
    }

    #[test]
    fn dynamic_limit_reports_out_of_memory() {
        let config = HeapConfig {
            dynamic_limit: Some(8192),
            ..HeapConfig::default()
        };
        let mut h = SlabHeap::with_config(Arena::new(ArenaConfig::default()).unwrap(), config)
            .unwrap();
        let _ = h.allocate(5000).unwrap();
        let result = h.allocate(5000);
        assert!(matches!(result, Err(AllocError::OutOfMemory { .. })));
    }

    #[test]
    fn arena_failure_propagates() {
        let arena = Arena::new(ArenaConfig::new(256).with_memory_limit(300)).unwrap();
        let mut h = SlabHeap::new(arena);
        let _ = h.allocate(256).unwrap();
        let result = h.allocate(256);
        assert!(matches!(result, Err(AllocError::OutOfMemory { .. })));
    }

    #[test]
    fn link_encoding_round_trips_end_marker() {
        assert_eq!(decode_link(&encode_link(None), 32), None);
        let span = Span::new(BlockId(7), 4096, 64);
        assert_eq!(decode_link(&encode_link(Some(span)), 64), Some(span));
    }

    mod proptests {
        use super::*;
        use indexmap::IndexMap;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn live_allocations_never_overlap(
                ops in proptest::collection::vec((any::<bool>(), 1usize..1500), 1..120),
            ) {
                let mut h = heap(2048);
                let mut live: IndexMap<usize, Allocation> = IndexMap::new();
                for (step, (release, size)) in ops.into_iter().enumerate() {
                    if release && !live.is_empty() {
                        let (_, a) = live.swap_remove_index(size % live.len()).unwrap();
                        h.release(a);
                    } else {
                        let a = h.allocate(size).unwrap();
                        prop_assert!(a.size() >= size);
                        h.bytes_mut(&a).fill(step as u8);
                        live.insert(step, a);
                    }
                }
                // Every live allocation still holds its own fill byte.
                for (&step, a) in &live {
                    prop_assert!(h.bytes(a).iter().all(|&b| b == step as u8));
                }
            }
        }
    }
}
