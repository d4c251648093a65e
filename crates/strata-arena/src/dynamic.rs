//! Oversized allocations served straight from the system allocator.
//!
//! Each dynamic block lives in a slot of an index-addressed table and is
//! threaded onto a doubly linked list whose head is the most recent
//! allocation. A [`DynamicId`] resolves to its block in O(1); the slot's
//! generation rejects ids whose block has already been released.

use tracing::{debug, trace};

use crate::block::{aligned_offset, try_alloc_bytes};
use crate::error::AllocError;
use crate::handle::DynamicId;

/// Bookkeeping bytes charged per dynamic block when checking for size
/// overflow.
pub(crate) const DYNAMIC_OVERHEAD: usize = std::mem::size_of::<DynamicBlock>();

pub(crate) struct DynamicBlock {
    /// Backing storage, `size + DYNAMIC_OVERHEAD + align` bytes.
    data: Vec<u8>,
    /// Aligned start of the usable region within `data`.
    start: usize,
    /// Usable bytes.
    size: usize,
    prev: Option<DynamicId>,
    next: Option<DynamicId>,
}

struct DynamicSlot {
    generation: u32,
    block: Option<DynamicBlock>,
}

/// Table of live dynamic blocks.
#[derive(Default)]
pub(crate) struct DynamicBlocks {
    slots: Vec<DynamicSlot>,
    /// Indices of empty slots.
    vacant: Vec<u32>,
    head: Option<DynamicId>,
    live: usize,
    /// Bytes obtained from the system for live blocks.
    bytes: usize,
}

impl DynamicBlocks {
    /// Allocate a zeroed block with `size` usable bytes aligned to `align`
    /// and link it at the head of the list.
    pub(crate) fn allocate(
        &mut self,
        size: usize,
        align: usize,
        limit: Option<usize>,
    ) -> Result<DynamicId, AllocError> {
        let overhead = DYNAMIC_OVERHEAD + align;
        if overhead >= usize::MAX - size {
            return Err(AllocError::Overflow { requested: size });
        }
        let total = size + overhead;
        if let Some(limit) = limit {
            if self.bytes.saturating_add(total) > limit {
                return Err(AllocError::OutOfMemory { requested: total });
            }
        }

        let data = try_alloc_bytes(total)?;
        let start = aligned_offset(&data, 0, align).unwrap_or(0);
        debug_assert!(start + size <= data.len());

        let id = match self.vacant.pop() {
            Some(index) => DynamicId {
                index,
                generation: self.slots[index as usize].generation,
            },
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| AllocError::OutOfMemory { requested: total })?;
                self.slots.push(DynamicSlot {
                    generation: 0,
                    block: None,
                });
                DynamicId {
                    index,
                    generation: 0,
                }
            }
        };

        let next = self.head;
        if let Some(next) = next {
            if let Some(block) = self.block_mut(next) {
                block.prev = Some(id);
            }
        }
        self.slots[id.index as usize].block = Some(DynamicBlock {
            data,
            start,
            size,
            prev: None,
            next,
        });
        self.head = Some(id);
        self.live += 1;
        self.bytes += total;
        debug!(id = %id, size, bytes = total, "heap allocated dynamic block");
        Ok(id)
    }

    /// Unlink and free a block.
    ///
    /// Releasing an id that is not live is a programmer error: it trips a
    /// debug assertion and is otherwise ignored.
    pub(crate) fn release(&mut self, id: DynamicId) {
        debug_assert!(self.contains(id), "released untracked dynamic block {id}");
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        let Some(block) = slot.block.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index);

        match block.prev {
            Some(prev) => {
                if let Some(p) = self.block_mut(prev) {
                    p.next = block.next;
                }
            }
            None => self.head = block.next,
        }
        if let Some(next) = block.next {
            if let Some(n) = self.block_mut(next) {
                n.prev = block.prev;
            }
        }

        self.live -= 1;
        self.bytes -= block.data.len();
        trace!(id = %id, size = block.size, "heap released dynamic block");
    }

    /// Free every block. Ids handed out before the call become stale.
    pub(crate) fn clear(&mut self) {
        let mut freed = 0usize;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.block.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.vacant.push(index as u32);
                freed += 1;
            }
        }
        debug_assert_eq!(freed, self.live);
        if freed > 0 {
            debug!(blocks = freed, bytes = self.bytes, "heap freed all dynamic blocks");
        }
        self.head = None;
        self.live = 0;
        self.bytes = 0;
    }

    pub(crate) fn contains(&self, id: DynamicId) -> bool {
        self.block(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn bytes_held(&self) -> usize {
        self.bytes
    }

    /// Usable bytes of a live block.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub(crate) fn bytes(&self, id: DynamicId) -> &[u8] {
        match self.block(id) {
            Some(b) => &b.data[b.start..b.start + b.size],
            None => panic!("stale dynamic block {id}"),
        }
    }

    /// Mutable usable bytes of a live block.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub(crate) fn bytes_mut(&mut self, id: DynamicId) -> &mut [u8] {
        match self.block_mut(id) {
            Some(b) => &mut b.data[b.start..b.start + b.size],
            None => panic!("stale dynamic block {id}"),
        }
    }

    /// Copy the first `len` bytes of one live block into another.
    pub(crate) fn copy(&mut self, src: DynamicId, dst: DynamicId, len: usize) {
        if src == dst {
            return;
        }
        let (s, d) = (src.index as usize, dst.index as usize);
        let (from, to) = if s < d {
            let (lo, hi) = self.slots.split_at_mut(d);
            (&lo[s], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(s);
            (&hi[0], &mut lo[d])
        };
        let live = from.generation == src.generation && to.generation == dst.generation;
        match (&from.block, &mut to.block) {
            (Some(f), Some(t)) if live => {
                t.data[t.start..t.start + len].copy_from_slice(&f.data[f.start..f.start + len]);
            }
            _ => panic!("stale dynamic block in copy {src} -> {dst}"),
        }
    }

    /// Ids in list order, most recent first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = DynamicId> + '_ {
        std::iter::successors(self.head, move |&id| self.block(id).and_then(|b| b.next))
    }

    fn block(&self, id: DynamicId) -> Option<&DynamicBlock> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.block.as_ref())
    }

    fn block_mut(&mut self, id: DynamicId) -> Option<&mut DynamicBlock> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.block.as_mut())
    }
}
