//! Heap-backed growable array.
//!
//! [`GrowableVector`] stores its elements in a single heap allocation and
//! takes the heap as an explicit argument on every call that touches the
//! storage. It never frees on drop: call
//! [`release`](GrowableVector::release), or let a heap reset reclaim the
//! memory in bulk.

use std::marker::PhantomData;

use strata_arena::{AllocError, Allocation, SlabHeap};
use tracing::trace;

use crate::element::Element;
use crate::error::CollectionError;

/// Allocation size past which containers stop doubling and grow linearly:
/// 8 MiB.
pub const ALLOC_THRESHOLD: usize = 8 * 1024 * 1024;

/// Dynamic array of `T` stored in a [`SlabHeap`].
#[derive(Debug)]
pub struct GrowableVector<T: Element> {
    allocation: Option<Allocation>,
    len: usize,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> Default for GrowableVector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> GrowableVector<T> {
    /// An empty vector with no storage.
    pub const fn new() -> Self {
        Self {
            allocation: None,
            len: 0,
            capacity: 0,
            _marker: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements the current storage can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The heap allocation backing the vector, if any.
    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    /// Element at `index`.
    pub fn get(&self, heap: &SlabHeap, index: usize) -> Option<T> {
        (index < self.len).then(|| T::read_from(self.slot(heap, index)))
    }

    /// Overwrite the element at `index`.
    pub fn set(&mut self, heap: &mut SlabHeap, index: usize, value: T) -> Result<(), CollectionError> {
        self.check_index(index)?;
        value.write_to(self.slot_mut(heap, index));
        Ok(())
    }

    /// First element.
    pub fn first(&self, heap: &SlabHeap) -> Option<T> {
        self.get(heap, 0)
    }

    /// Last element.
    pub fn last(&self, heap: &SlabHeap) -> Option<T> {
        self.len.checked_sub(1).and_then(|i| self.get(heap, i))
    }

    /// Iterate over the elements by value.
    pub fn iter<'h>(&self, heap: &'h SlabHeap) -> impl Iterator<Item = T> + 'h
    where
        T: 'h,
    {
        self.used_bytes(heap).chunks_exact(T::SIZE).map(T::read_from)
    }

    /// Append `value` at the end.
    pub fn append(&mut self, heap: &mut SlabHeap, value: T) -> Result<(), CollectionError> {
        if self.len == self.capacity {
            self.grow(heap, 1)?;
        }
        let index = self.len;
        self.len += 1;
        value.write_to(self.slot_mut(heap, index));
        Ok(())
    }

    /// Insert `value` at the front, shifting every element up by one.
    pub fn prepend(&mut self, heap: &mut SlabHeap, value: T) -> Result<(), CollectionError> {
        self.insert(heap, 0, value)
    }

    /// Insert `value` at `index`, shifting later elements up by one.
    ///
    /// `index == len()` appends.
    pub fn insert(&mut self, heap: &mut SlabHeap, index: usize, value: T) -> Result<(), CollectionError> {
        if index > self.len {
            return Err(CollectionError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }
        if self.len == self.capacity {
            self.grow(heap, 1)?;
        }
        let stride = T::SIZE;
        if let Some(allocation) = &self.allocation {
            heap.bytes_mut(allocation)
                .copy_within(index * stride..self.len * stride, (index + 1) * stride);
        }
        self.len += 1;
        value.write_to(self.slot_mut(heap, index));
        Ok(())
    }

    /// Remove and return the element at `index`, shifting later elements
    /// down by one.
    pub fn remove(&mut self, heap: &mut SlabHeap, index: usize) -> Result<T, CollectionError> {
        self.check_index(index)?;
        let value = T::read_from(self.slot(heap, index));
        let stride = T::SIZE;
        if let Some(allocation) = &self.allocation {
            heap.bytes_mut(allocation)
                .copy_within((index + 1) * stride..self.len * stride, index * stride);
        }
        self.len -= 1;
        Ok(value)
    }

    /// Remove and return the last element.
    pub fn pop(&mut self, heap: &SlabHeap) -> Option<T> {
        let value = self.last(heap)?;
        self.len -= 1;
        Some(value)
    }

    /// Exchange the elements at `a` and `b`.
    pub fn swap(&mut self, heap: &mut SlabHeap, a: usize, b: usize) -> Result<(), CollectionError> {
        self.check_index(a)?;
        self.check_index(b)?;
        if a != b {
            let x = T::read_from(self.slot(heap, a));
            let y = T::read_from(self.slot(heap, b));
            x.write_to(self.slot_mut(heap, b));
            y.write_to(self.slot_mut(heap, a));
        }
        Ok(())
    }

    /// Shorten to `len` elements. No effect if already shorter.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Drop every element, keeping the storage.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Ensure the storage holds at least `n` elements.
    ///
    /// Allocates a new buffer, copies the elements across and releases the
    /// old buffer. The resulting capacity is whatever the allocation
    /// actually provides, which may exceed `n`. On failure the vector is
    /// unchanged.
    pub fn reserve(&mut self, heap: &mut SlabHeap, n: usize) -> Result<(), CollectionError> {
        if n <= self.capacity {
            return Ok(());
        }
        let stride = T::SIZE;
        let bytes = n
            .checked_mul(stride)
            .ok_or(AllocError::Overflow { requested: n })?;

        let allocation = heap.allocate(bytes)?;
        if let Some(old) = self.allocation.take() {
            if self.len > 0 {
                heap.copy(&old, &allocation, self.len * stride);
            }
            heap.release(old);
        }

        let old_capacity = self.capacity;
        self.capacity = allocation.size() / stride;
        self.allocation = Some(allocation);
        debug_assert!(self.capacity >= n);
        trace!(from = old_capacity, to = self.capacity, stride, "vector reallocated");
        Ok(())
    }

    /// Ensure room for `n` more elements, growing by the tiered policy.
    pub fn grow(&mut self, heap: &mut SlabHeap, n: usize) -> Result<(), CollectionError> {
        let after = self
            .len
            .checked_add(n)
            .ok_or(AllocError::Overflow { requested: n })?;
        if self.capacity >= after {
            return Ok(());
        }
        self.reserve(heap, grown_capacity(self.capacity, after, T::SIZE))
    }

    /// Set the length to `n`, zero-filling newly exposed elements.
    pub fn resize(&mut self, heap: &mut SlabHeap, n: usize) -> Result<(), CollectionError> {
        if self.capacity < n {
            self.grow(heap, n - self.len)?;
        }
        if self.len < n {
            let stride = T::SIZE;
            if let Some(allocation) = &self.allocation {
                heap.bytes_mut(allocation)[self.len * stride..n * stride].fill(0);
            }
        }
        self.len = n;
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

    fn used_bytes<'h>(&self, heap: &'h SlabHeap) -> &'h [u8] {
        match &self.allocation {
            Some(allocation) => &heap.bytes(allocation)[..self.len * T::SIZE],
            None => &[],
        }
    }

    fn slot<'h>(&self, heap: &'h SlabHeap, index: usize) -> &'h [u8] {
        &self.used_bytes(heap)[index * T::SIZE..(index + 1) * T::SIZE]
    }

    fn slot_mut<'h>(&self, heap: &'h mut SlabHeap, index: usize) -> &'h mut [u8] {
        let stride = T::SIZE;
        match &self.allocation {
            Some(allocation) => &mut heap.bytes_mut(allocation)[index * stride..(index + 1) * stride],
            None => &mut [],
        }
    }
}

impl<T: Element + PartialEq> GrowableVector<T> {
    /// Position of the first element equal to `value`.
    pub fn index_of(&self, heap: &SlabHeap, value: T) -> Option<usize> {
        self.iter(heap).position(|x| x == value)
    }

    /// Whether any element equals `value`.
    pub fn contains(&self, heap: &SlabHeap, value: T) -> bool {
        self.index_of(heap, value).is_some()
    }
}

/// Capacity to grow to so that at least `after` elements of `stride`
/// bytes fit, starting from `capacity`.
///
/// Small vectors step through fixed tiers; past those the capacity
/// doubles until it reaches [`ALLOC_THRESHOLD`] bytes and then grows by
/// that many bytes at a time.
pub fn grown_capacity(capacity: usize, after: usize, stride: usize) -> usize {
    let threshold = (ALLOC_THRESHOLD / stride).max(1);
    let mut capacity = match capacity {
        0..4 => 4,
        4..8 => 8,
        8..16 => 16,
        16..64 => 64,
        64..256 => 256,
        c => c,
    };
    while capacity < after {
        capacity = if capacity < threshold {
            capacity.saturating_mul(2)
        } else {
            capacity.saturating_add(threshold)
        };
    }
    capacity
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_arena::{Arena, ArenaConfig, HeapConfig};

    fn heap() -> SlabHeap {
        SlabHeap::new(Arena::new(ArenaConfig::new(8192)).unwrap())
    }

    fn filled(heap: &mut SlabHeap, values: &[i32]) -> GrowableVector<i32> {
        let mut v = GrowableVector::new();
        for &x in values {
            v.append(heap, x).unwrap();
        }
        v
    }

    #[test]
    fn byte_array_elements_grow_and_read_back() {
        let mut heap = heap();
        let mut v = GrowableVector::<[u8; 3]>::new();
        for i in 0..100u8 {
            v.append(&mut heap, [i, i, i]).unwrap();
        }
        assert_eq!(v.len(), 100);
        assert!(v.capacity() >= 100);
        assert_eq!(v.get(&heap, 42), Some([42, 42, 42]));
        assert!(v.iter(&heap).enumerate().all(|(i, x)| x == [i as u8; 3]));
    }

    fn contents(v: &GrowableVector<i32>, heap: &SlabHeap) -> Vec<i32> {
        v.iter(heap).collect()
    }

    #[test]
    fn growth_tiers() {
        assert_eq!(grown_capacity(0, 1, 4), 4);
        assert_eq!(grown_capacity(4, 5, 4), 8);
        assert_eq!(grown_capacity(8, 9, 4), 16);
        assert_eq!(grown_capacity(16, 17, 4), 64);
        assert_eq!(grown_capacity(64, 65, 4), 256);
        assert_eq!(grown_capacity(256, 257, 4), 512);
        assert_eq!(grown_capacity(0, 1000, 4), 1024);
    }

    #[test]
    fn growth_turns_linear_past_threshold() {
        let stride = 1024;
        let threshold = ALLOC_THRESHOLD / stride;
        assert_eq!(grown_capacity(threshold, threshold + 1, stride), 2 * threshold);
        assert_eq!(
            grown_capacity(2 * threshold, 2 * threshold + 1, stride),
            3 * threshold
        );
        // A stride as large as the threshold adds one element per step.
        assert_eq!(grown_capacity(4, 10, ALLOC_THRESHOLD), 10);
    }

    #[test]
    fn append_and_read_back() {
        let mut h = heap();
        let v = filled(&mut h, &[0, 1, 2]);
        assert_eq!(v.len(), 3);
        assert!(v.capacity() >= 3);
        assert_eq!(v.first(&h), Some(0));
        assert_eq!(v.last(&h), Some(2));
        assert_eq!(v.get(&h, 3), None);
        assert_eq!(contents(&v, &h), vec![0, 1, 2]);
    }

    #[test]
    fn capacity_reflects_class_rounding() {
        let mut h = heap();
        let v = filled(&mut h, &[7]);
        // Four i32s request 16 bytes; the smallest class is 32.
        assert_eq!(v.capacity(), 8);
    }

    #[test]
    fn insert_remove_shift() {
        let mut h = heap();
        let mut v = filled(&mut h, &[1, 2, 4]);
        v.insert(&mut h, 2, 3).unwrap();
        v.prepend(&mut h, 0).unwrap();
        assert_eq!(contents(&v, &h), vec![0, 1, 2, 3, 4]);
        assert_eq!(v.remove(&mut h, 1).unwrap(), 1);
        assert_eq!(contents(&v, &h), vec![0, 2, 3, 4]);
        assert_eq!(v.pop(&h), Some(4));
        assert_eq!(contents(&v, &h), vec![0, 2, 3]);
    }

    #[test]
    fn insert_at_len_appends() {
        let mut h = heap();
        let mut v = filled(&mut h, &[1]);
        v.insert(&mut h, 1, 2).unwrap();
        assert_eq!(contents(&v, &h), vec![1, 2]);
        assert!(matches!(
            v.insert(&mut h, 5, 0),
            Err(CollectionError::IndexOutOfBounds { index: 5, len: 2 })
        ));
    }

    #[test]
    fn prepend_across_growth() {
        let mut h = heap();
        let mut v = GrowableVector::new();
        for i in 0..100 {
            v.prepend(&mut h, i).unwrap();
        }
        let expected: Vec<i32> = (0..100).rev().collect();
        assert_eq!(contents(&v, &h), expected);
    }

    #[test]
    fn set_swap_and_bounds() {
        let mut h = heap();
        let mut v = filled(&mut h, &[10, 20, 30]);
        v.set(&mut h, 0, 11).unwrap();
        v.swap(&mut h, 0, 2).unwrap();
        assert_eq!(contents(&v, &h), vec![30, 20, 11]);
        assert!(v.set(&mut h, 3, 0).is_err());
        assert!(v.swap(&mut h, 0, 3).is_err());
        assert!(v.remove(&mut h, 3).is_err());
    }

    #[test]
    fn index_of_and_contains() {
        let mut h = heap();
        let mut v = filled(&mut h, &[0]);
        assert_eq!(v.index_of(&h, 0), Some(0));
        assert_eq!(v.index_of(&h, -11), None);
        v.clear();
        assert!(v.is_empty());
        assert_eq!(v.index_of(&h, 0), None);
        assert!(!v.contains(&h, 0));
    }

    #[test]
    fn resize_zero_fills_new_elements() {
        let mut h = heap();
        let mut v = filled(&mut h, &[5, 6, 7, 8]);
        v.truncate(1);
        v.resize(&mut h, 4).unwrap();
        assert_eq!(contents(&v, &h), vec![5, 0, 0, 0]);
        v.resize(&mut h, 300).unwrap();
        assert_eq!(v.len(), 300);
        assert!(v.iter(&h).skip(1).all(|x| x == 0));
        v.resize(&mut h, 2).unwrap();
        assert_eq!(contents(&v, &h), vec![5, 0]);
    }

    #[test]
    fn reserve_keeps_contents() {
        let mut h = heap();
        let mut v = filled(&mut h, &[1, 2, 3]);
        v.reserve(&mut h, 5000).unwrap();
        assert!(v.capacity() >= 5000);
        assert!(v.allocation().unwrap().is_dynamic());
        assert_eq!(contents(&v, &h), vec![1, 2, 3]);
    }

    #[test]
    fn old_storage_goes_back_to_heap() {
        let mut h = heap();
        // Eight i32s fill the 32-byte class exactly.
        let mut v = filled(&mut h, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(v.capacity(), 8);
        let first = *v.allocation().unwrap();
        v.append(&mut h, 9).unwrap();
        assert_ne!(*v.allocation().unwrap(), first);
        // The 32-byte slot is on its free list and comes back next.
        let again = h.allocate(32).unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn release_empties() {
        let mut h = heap();
        let mut v = filled(&mut h, &[1, 2, 3]);
        v.release(&mut h);
        assert!(v.is_empty());
        assert_eq!(v.capacity(), 0);
        assert!(v.allocation().is_none());
        v.release(&mut h);
    }

    #[test]
    fn out_of_memory_leaves_vector_unchanged() {
        let config = HeapConfig {
            dynamic_limit: Some(4096),
            ..HeapConfig::default()
        };
        let mut h =
            SlabHeap::with_config(Arena::new(ArenaConfig::default()).unwrap(), config).unwrap();
        let mut v = GrowableVector::<u64>::new();
        let mut failure = None;
        for i in 0..10_000u64 {
            if let Err(e) = v.append(&mut h, i) {
                failure = Some(e);
                break;
            }
        }
        let Some(CollectionError::Alloc(e)) = failure else {
            panic!("expected an allocation failure, got {failure:?}");
        };
        assert!(e.is_out_of_memory());
        assert_eq!(v.len(), 256);
        assert_eq!(v.capacity(), 256);
        assert!(v.iter(&h).eq(0..256u64));
    }

    #[test]
    fn overflowing_reserve_is_rejected() {
        let mut h = heap();
        let mut v = filled(&mut h, &[1]);
        let result = v.reserve(&mut h, usize::MAX / 2);
        assert!(matches!(
            result,
            Err(CollectionError::Alloc(AllocError::Overflow { .. }))
        ));
        assert_eq!(contents(&v, &h), vec![1]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Append(i64),
            Prepend(i64),
            Insert(usize, i64),
            Remove(usize),
            Pop,
            Truncate(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => any::<i64>().prop_map(Op::Append),
                1 => any::<i64>().prop_map(Op::Prepend),
                2 => (any::<usize>(), any::<i64>()).prop_map(|(i, x)| Op::Insert(i, x)),
                2 => any::<usize>().prop_map(Op::Remove),
                1 => Just(Op::Pop),
                1 => (0usize..64).prop_map(Op::Truncate),
            ]
        }

        proptest! {
            #[test]
            fn matches_std_vec(ops in proptest::collection::vec(op(), 1..200)) {
                let mut h = heap();
                let mut v = GrowableVector::<i64>::new();
                let mut model: Vec<i64> = Vec::new();
                for op in ops {
                    match op {
                        Op::Append(x) => {
                            v.append(&mut h, x).unwrap();
                            model.push(x);
                        }
                        Op::Prepend(x) => {
                            v.prepend(&mut h, x).unwrap();
                            model.insert(0, x);
                        }
                        Op::Insert(i, x) => {
                            let i = i % (model.len() + 1);
                            v.insert(&mut h, i, x).unwrap();
                            model.insert(i, x);
                        }
                        Op::Remove(i) => {
                            if !model.is_empty() {
                                let i = i % model.len();
                                prop_assert_eq!(v.remove(&mut h, i).unwrap(), model.remove(i));
                            }
                        }
                        Op::Pop => prop_assert_eq!(v.pop(&h), model.pop()),
                        Op::Truncate(n) => {
                            v.truncate(n);
                            model.truncate(n);
                        }
                    }
                    prop_assert!(v.capacity() >= v.len());
                }
                prop_assert_eq!(v.iter(&h).collect::<Vec<_>>(), model);
            }
        }
    }
}
