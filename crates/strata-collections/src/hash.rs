//! Open hashing with intrusive bucket chains.
//!
//! A [`HashTable`] only owns its bucket array. The nodes live in a
//! caller-owned [`HashNodes`] pool and are threaded onto bucket chains
//! through their `hash_next` link, so inserting or removing a node never
//! allocates. The table decides nothing about keys: the caller computes
//! the hash and supplies the equality test in [`HashTable::find`].
//!
//! Bucket counts come from a short prime table. A fresh table has a single
//! bucket stored inline; the first collision moves it onto the heap.

use std::ops::{Index, IndexMut};

use smallvec::SmallVec;
use strata_arena::{Allocation, SlabHeap};
use tracing::debug;

/// Bucket counts a table grows through, in order.
pub const BUCKET_PRIMES: [u32; 10] = [23, 53, 193, 389, 769, 1543, 3079, 6151, 12289, 24593];

const ENTRY_BYTES: usize = std::mem::size_of::<u32>();

/// Index of a node in a [`HashNodes`] pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Position of the node in its pool.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn encode(id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| id.0 + 1)
    }

    fn decode(raw: u32) -> Option<NodeId> {
        raw.checked_sub(1).map(NodeId)
    }
}

/// A value threaded onto a bucket chain.
#[derive(Clone, Debug)]
pub struct HashNode<T> {
    hash: u32,
    hash_next: Option<NodeId>,
    value: T,
}

impl<T> HashNode<T> {
    /// The hash the node was created with.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Next node on the same bucket chain.
    pub fn hash_next(&self) -> Option<NodeId> {
        self.hash_next
    }

    /// The caller's value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The caller's value, mutably. The hash cannot change.
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Caller-owned pool of hash nodes.
///
/// Nodes are never removed from the pool; [`HashTable::del`] only unlinks
/// them from their chain.
#[derive(Clone, Debug)]
pub struct HashNodes<T> {
    nodes: Vec<HashNode<T>>,
}

impl<T> Default for HashNodes<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HashNodes<T> {
    /// An empty pool.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// An empty pool with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Add an unlinked node.
    ///
    /// # Panics
    ///
    /// Panics if the pool already holds `u32::MAX - 1` nodes.
    pub fn push(&mut self, hash: u32, value: T) -> NodeId {
        let index = u32::try_from(self.nodes.len())
            .ok()
            .filter(|&i| i < u32::MAX - 1);
        let Some(index) = index else {
            panic!("hash node pool is full");
        };
        self.nodes.push(HashNode {
            hash,
            hash_next: None,
            value,
        });
        NodeId(index)
    }

    /// Node by id.
    pub fn get(&self, id: NodeId) -> Option<&HashNode<T>> {
        self.nodes.get(id.index())
    }

    /// Node by id, mutably.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut HashNode<T>> {
        self.nodes.get_mut(id.index())
    }

    /// Number of nodes in the pool, linked or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node with its id, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &HashNode<T>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }
}

impl<T> Index<NodeId> for HashNodes<T> {
    type Output = HashNode<T>;

    fn index(&self, id: NodeId) -> &HashNode<T> {
        &self.nodes[id.index()]
    }
}

impl<T> IndexMut<NodeId> for HashNodes<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut HashNode<T> {
        &mut self.nodes[id.index()]
    }
}

#[derive(Clone, Copy, Debug)]
enum Buckets {
    /// The single bucket of a table that has never grown.
    Embedded(Option<NodeId>),
    /// `buckets_count` little `u32` entries: `0` empty, `id + 1` otherwise.
    Heap(Allocation),
}

/// Bucket array of an intrusive hash table.
#[derive(Debug)]
pub struct HashTable {
    buckets: Buckets,
    size: usize,
    buckets_count: u32,
    grow_threshold: u32,
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTable {
    /// An empty table with one inline bucket.
    pub const fn new() -> Self {
        Self {
            buckets: Buckets::Embedded(None),
            size: 0,
            buckets_count: 1,
            grow_threshold: 1,
        }
    }

    /// Number of linked nodes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether no nodes are linked.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of buckets.
    pub fn buckets_count(&self) -> u32 {
        self.buckets_count
    }

    /// Size at which an insert into a non-empty bucket triggers a rehash.
    pub fn grow_threshold(&self) -> u32 {
        self.grow_threshold
    }

    /// Link node `id` at the head of its bucket.
    ///
    /// After the insert, if the table has reached its grow threshold and
    /// the node landed on a non-empty bucket, the table rehashes to the
    /// next prime bucket count. Inserts that land on empty buckets never
    /// trigger growth.
    pub fn put<T>(&mut self, heap: &mut SlabHeap, nodes: &mut HashNodes<T>, id: NodeId) {
        let bucket = nodes[id].hash % self.buckets_count;
        let next = self.bucket(heap, bucket);
        nodes[id].hash_next = next;
        self.set_bucket(heap, bucket, Some(id));
        self.size += 1;

        if self.size >= self.grow_threshold as usize && next.is_some() {
            let count = next_prime(self.buckets_count);
            if count != self.buckets_count {
                self.rehash(heap, nodes, count);
            }
        }
    }

    /// Unlink node `id` from its bucket chain.
    ///
    /// Returns `None` if the node is not linked into this table.
    pub fn del<T>(&mut self, heap: &mut SlabHeap, nodes: &mut HashNodes<T>, id: NodeId) -> Option<NodeId> {
        let bucket = nodes.get(id)?.hash % self.buckets_count;
        let head = self.bucket(heap, bucket);
        if head == Some(id) {
            self.set_bucket(heap, bucket, nodes[id].hash_next);
        } else {
            let mut prev = head?;
            loop {
                let next = nodes[prev].hash_next?;
                if next == id {
                    nodes[prev].hash_next = nodes[id].hash_next;
                    break;
                }
                prev = next;
            }
        }
        nodes[id].hash_next = None;
        self.size -= 1;
        Some(id)
    }

    /// Redistribute every node over `count` buckets.
    ///
    /// If the new bucket array cannot be allocated the table keeps its
    /// current buckets and keeps working, with longer chains.
    pub fn rehash<T>(&mut self, heap: &mut SlabHeap, nodes: &mut HashNodes<T>, count: u32) {
        if count == 0 {
            debug_assert!(false, "rehash to zero buckets");
            return;
        }
        let allocation = match heap.allocate_zeroed(count as usize * ENTRY_BYTES) {
            Ok(allocation) => allocation,
            Err(error) => {
                debug!(%error, buckets = count, size = self.size, "hash table rehash failed");
                return;
            }
        };

        let mut relinked = 0usize;
        for bucket in 0..self.buckets_count {
            let mut walk = self.bucket(heap, bucket);
            while let Some(id) = walk {
                walk = nodes[id].hash_next;
                let target = (nodes[id].hash % count) as usize;
                let bytes = heap.bytes_mut(&allocation);
                nodes[id].hash_next = NodeId::decode(load(bytes, target));
                store(bytes, target, NodeId::encode(Some(id)));
                relinked += 1;
            }
        }
        debug_assert_eq!(relinked, self.size);

        if let Buckets::Heap(old) = self.buckets {
            heap.release(old);
        }
        let old_count = self.buckets_count;
        self.buckets = Buckets::Heap(allocation);
        self.buckets_count = count;
        self.grow_threshold = count * 9 / 10;
        debug!(from = old_count, to = count, size = self.size, "hash table rehashed");
    }

    /// First node on `hash`'s chain whose hash equals `hash` and whose
    /// value satisfies `matches`.
    pub fn find<T>(
        &self,
        heap: &SlabHeap,
        nodes: &HashNodes<T>,
        hash: u32,
        mut matches: impl FnMut(&T) -> bool,
    ) -> Option<NodeId> {
        let mut walk = self.bucket(heap, hash % self.buckets_count);
        while let Some(id) = walk {
            let node = &nodes[id];
            if node.hash == hash && matches(&node.value) {
                return Some(id);
            }
            walk = node.hash_next;
        }
        None
    }

    /// Nodes on bucket `bucket`, most recently inserted first.
    pub fn bucket_chain<T>(&self, heap: &SlabHeap, nodes: &HashNodes<T>, bucket: u32) -> SmallVec<[NodeId; 4]> {
        if bucket >= self.buckets_count {
            return SmallVec::new();
        }
        std::iter::successors(self.bucket(heap, bucket), |&id| nodes[id].hash_next).collect()
    }

    /// Unlink everything and return to a single inline bucket, releasing
    /// the heap bucket array. Node links are left as they were.
    pub fn reset(&mut self, heap: &mut SlabHeap) {
        if let Buckets::Heap(old) = self.buckets {
            heap.release(old);
        }
        *self = Self::new();
    }

    fn bucket(&self, heap: &SlabHeap, index: u32) -> Option<NodeId> {
        match &self.buckets {
            Buckets::Embedded(head) => *head,
            Buckets::Heap(allocation) => NodeId::decode(load(heap.bytes(allocation), index as usize)),
        }
    }

    fn set_bucket(&mut self, heap: &mut SlabHeap, index: u32, id: Option<NodeId>) {
        match &mut self.buckets {
            Buckets::Embedded(head) => *head = id,
            Buckets::Heap(allocation) => {
                store(heap.bytes_mut(allocation), index as usize, NodeId::encode(id));
            }
        }
    }
}

/// Smallest bucket prime strictly greater than `count`, or the largest
/// prime once the table is there.
pub fn next_prime(count: u32) -> u32 {
    BUCKET_PRIMES
        .iter()
        .copied()
        .find(|&p| p > count)
        .unwrap_or(BUCKET_PRIMES[BUCKET_PRIMES.len() - 1])
}

fn load(bytes: &[u8], index: usize) -> u32 {
    let mut raw = [0u8; ENTRY_BYTES];
    raw.copy_from_slice(&bytes[index * ENTRY_BYTES..(index + 1) * ENTRY_BYTES]);
    u32::from_ne_bytes(raw)
}

fn store(bytes: &mut [u8], index: usize, entry: u32) {
    bytes[index * ENTRY_BYTES..(index + 1) * ENTRY_BYTES].copy_from_slice(&entry.to_ne_bytes());
}
