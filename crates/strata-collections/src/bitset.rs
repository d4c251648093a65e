//! Heap-backed packed bit array.
//!
//! Bits are packed into 64-bit words, least significant bit first. Bits
//! at positions `>= len()` inside the last used word are always zero, so
//! word-level operations such as [`BitSet::count_ones`] need no masking.

use strata_arena::{AllocError, Allocation, SlabHeap};
use tracing::trace;

use crate::error::CollectionError;
use crate::vector::ALLOC_THRESHOLD;

/// Bits per storage word.
pub const BITS_PER_WORD: usize = u64::BITS as usize;

const WORD_BYTES: usize = std::mem::size_of::<u64>();

/// Smallest capacity, in bits, that [`BitSet::append`] grows to.
const APPEND_MIN_CAPACITY: usize = 128;

/// Packed array of bits stored in a [`SlabHeap`].
#[derive(Debug, Default)]
pub struct BitSet {
    allocation: Option<Allocation>,
    len: usize,
    /// Capacity in bits.
    capacity: usize,
}

impl BitSet {
    /// An empty bit-set with no storage.
    pub const fn new() -> Self {
        Self {
            allocation: None,
            len: 0,
            capacity: 0,
        }
    }

    /// Number of bits in use.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bits are in use.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits the current storage can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The heap allocation backing the bit-set, if any.
    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    /// Bit at `index`.
    pub fn get(&self, heap: &SlabHeap, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        let word = load(self.storage(heap), index / BITS_PER_WORD);
        Some((word >> (index % BITS_PER_WORD)) & 1 == 1)
    }

    /// Set the bit at `index` to `value`.
    pub fn set(&mut self, heap: &mut SlabHeap, index: usize, value: bool) -> Result<(), CollectionError> {
        self.check_index(index)?;
        let mask = 1u64 << (index % BITS_PER_WORD);
        self.update(heap, index / BITS_PER_WORD, |w| if value { w | mask } else { w & !mask });
        Ok(())
    }

    /// Flip the bit at `index`, returning its new value.
    pub fn toggle(&mut self, heap: &mut SlabHeap, index: usize) -> Result<bool, CollectionError> {
        self.check_index(index)?;
        let mask = 1u64 << (index % BITS_PER_WORD);
        let word = self.update(heap, index / BITS_PER_WORD, |w| w ^ mask);
        Ok(word & mask != 0)
    }

    /// Drop every bit, keeping the storage.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Number of set bits.
    pub fn count_ones(&self, heap: &SlabHeap) -> usize {
        self.words(heap).map(|w| w.count_ones() as usize).sum()
    }

    /// The words in use, lowest bits first. Bits past `len()` in the last
    /// word are zero.
    pub fn words<'h>(&self, heap: &'h SlabHeap) -> impl Iterator<Item = u64> + 'h {
        let used = words_for(self.len) * WORD_BYTES;
        self.storage(heap)[..used]
            .chunks_exact(WORD_BYTES)
            .map(|chunk| load(chunk, 0))
    }

    /// Append one bit.
    ///
    /// Capacity grows to at least 128 bits, then doubles until it passes
    /// [`ALLOC_THRESHOLD`] bytes' worth of bits, then grows linearly by
    /// that amount.
    pub fn append(&mut self, heap: &mut SlabHeap, value: bool) -> Result<(), CollectionError> {
        let threshold = ALLOC_THRESHOLD * 8;
        let new_len = self
            .len
            .checked_add(1)
            .ok_or(AllocError::Overflow { requested: self.len })?;

        let ideal = if self.capacity < APPEND_MIN_CAPACITY {
            Some(APPEND_MIN_CAPACITY)
        } else if self.capacity <= threshold {
            self.capacity.checked_mul(2)
        } else {
            self.capacity.checked_add(threshold)
        };
        self.resize(heap, new_len, ideal.unwrap_or(new_len), value)
    }

    /// Resize to `new_len` bits, setting any new bits to `fill`.
    ///
    /// Shrinking never reallocates; it only zeroes the bits past the new
    /// length in the last word. Growing past the capacity allocates
    /// `ideal_capacity` bits (rounded up to whole words, and never less than
    /// `new_len`), copies the words in use and releases the old storage.
    /// On failure the bit-set is unchanged.
    pub fn resize(
        &mut self,
        heap: &mut SlabHeap,
        new_len: usize,
        ideal_capacity: usize,
        fill: bool,
    ) -> Result<(), CollectionError> {
        if new_len <= self.len {
            let bit = new_len % BITS_PER_WORD;
            if bit != 0 {
                self.update(heap, new_len / BITS_PER_WORD, |w| w & low_mask(bit));
            }
            self.len = new_len;
            return Ok(());
        }

        if new_len > self.capacity {
            self.reallocate(heap, ideal_capacity.max(new_len))?;
        }

        let old_len = self.len;
        let pattern = pattern(fill);
        let bytes = self.storage_mut(heap);

        let mut index = old_len / BITS_PER_WORD;
        let start_bit = old_len % BITS_PER_WORD;
        if start_bit != 0 {
            let keep = low_mask(start_bit);
            let word = load(bytes, index);
            store(bytes, index, (word & keep) | (pattern & !keep));
            index += 1;
        }

        let end = words_for(new_len);
        while index < end {
            store(bytes, index, pattern);
            index += 1;
        }

        let end_bit = new_len % BITS_PER_WORD;
        if end_bit != 0 {
            let word = load(bytes, end - 1);
            store(bytes, end - 1, word & low_mask(end_bit));
        }

        self.len = new_len;
        Ok(())
    }

    /// [`resize`](BitSet::resize) with the ideal capacity equal to the new
    /// length.
    pub fn resize_filled(&mut self, heap: &mut SlabHeap, new_len: usize, fill: bool) -> Result<(), CollectionError> {
        self.resize(heap, new_len, new_len, fill)
    }

    /// Set every bit in `from..to` to `value`.
    ///
    /// An empty range (`from == to`) is accepted and does nothing. Bits
    /// outside the range are left untouched.
    pub fn fill(&mut self, heap: &mut SlabHeap, from: usize, to: usize, value: bool) -> Result<(), CollectionError> {
        if from >= to {
            if from > to {
                return Err(CollectionError::InvalidRange { from, to });
            }
            return Ok(());
        }
        if to > self.len {
            return Err(CollectionError::IndexOutOfBounds {
                index: to,
                len: self.len,
            });
        }

        let apply = |word: u64, mask: u64| if value { word | mask } else { word & !mask };
        let bytes = self.storage_mut(heap);

        let mut index = from / BITS_PER_WORD;
        let start_bit = from % BITS_PER_WORD;
        let end_index = to / BITS_PER_WORD;
        let end_bit = to % BITS_PER_WORD;

        if start_bit != 0 {
            if index == end_index {
                let mask = low_mask(end_bit) & !low_mask(start_bit);
                store(bytes, index, apply(load(bytes, index), mask));
                return Ok(());
            }
            store(bytes, index, apply(load(bytes, index), !low_mask(start_bit)));
            index += 1;
        }

        let pattern = pattern(value);
        while index < end_index {
            store(bytes, index, pattern);
            index += 1;
        }

        if end_bit != 0 {
            store(bytes, end_index, apply(load(bytes, end_index), low_mask(end_bit)));
        }
        Ok(())
    }

    /// Return the storage to the heap and become empty.
    pub fn release(&mut self, heap: &mut SlabHeap) {
        if let Some(allocation) = self.allocation.take() {
            heap.release(allocation);
        }
        self.len = 0;
        self.capacity = 0;
    }

    fn reallocate(&mut self, heap: &mut SlabHeap, ideal_bits: usize) -> Result<(), CollectionError> {
        let bits = ideal_bits
            .checked_next_multiple_of(BITS_PER_WORD)
            .ok_or(AllocError::Overflow {
                requested: ideal_bits,
            })?;

        let allocation = heap.allocate(bits / 8)?;
        if let Some(old) = self.allocation.take() {
            let used = words_for(self.len) * WORD_BYTES;
            if used > 0 {
                heap.copy(&old, &allocation, used);
            }
            heap.release(old);
        }

        let old_capacity = self.capacity;
        self.capacity = allocation.size().checked_mul(8).unwrap_or(bits);
        self.allocation = Some(allocation);
        trace!(from = old_capacity, to = self.capacity, "bitset reallocated");
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), CollectionError> {
        if index < self.len {
            Ok(())
        } else {
            Err(CollectionError::IndexOutOfBounds {
                index,
                len: self.len,
            })
        }
    }

    /// Apply `f` to the word at `index`, returning the new word.
    fn update(&self, heap: &mut SlabHeap, index: usize, f: impl FnOnce(u64) -> u64) -> u64 {
        let bytes = self.storage_mut(heap);
        let word = f(load(bytes, index));
        store(bytes, index, word);
        word
    }

    fn storage<'h>(&self, heap: &'h SlabHeap) -> &'h [u8] {
        match &self.allocation {
            Some(allocation) => heap.bytes(allocation),
            None => &[],
        }
    }

    fn storage_mut<'h>(&self, heap: &'h mut SlabHeap) -> &'h mut [u8] {
        match &self.allocation {
            Some(allocation) => heap.bytes_mut(allocation),
            None => &mut [],
        }
    }
}

fn words_for(bits: usize) -> usize {
    bits.div_ceil(BITS_PER_WORD)
}

/// Mask of the `bits` lowest bits; `bits` must be below 64.
fn low_mask(bits: usize) -> u64 {
    (1u64 << bits) - 1
}

fn pattern(value: bool) -> u64 {
    if value {
        u64::MAX
    } else {
        0
    }
}

fn load(bytes: &[u8], index: usize) -> u64 {
    let mut raw = [0u8; WORD_BYTES];
    raw.copy_from_slice(&bytes[index * WORD_BYTES..(index + 1) * WORD_BYTES]);
    u64::from_ne_bytes(raw)
}

fn store(bytes: &mut [u8], index: usize, word: u64) {
    bytes[index * WORD_BYTES..(index + 1) * WORD_BYTES].copy_from_slice(&word.to_ne_bytes());
}
