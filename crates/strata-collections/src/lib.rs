//! Containers whose storage lives in a [`SlabHeap`](strata_arena::SlabHeap).
//!
//! None of the containers own their heap. Every call that may touch
//! storage takes the heap explicitly, and a container's memory is
//! reclaimed either by its `release` method or in bulk when the heap is
//! reset. Allocation failures are reported as
//! [`CollectionError::Alloc`] and leave the container unchanged.
//!
//! - [`GrowableVector`]: dynamic array of fixed-size [`Element`]s with a
//!   tiered growth policy.
//! - [`BitSet`]: packed bit array with range fill.
//! - [`HashTable`]: bucket array for intrusive chains of caller-owned
//!   [`HashNode`]s.
//!
//! ```
//! use strata_arena::{Arena, ArenaConfig, SlabHeap};
//! use strata_collections::GrowableVector;
//!
//! let mut heap = SlabHeap::new(Arena::new(ArenaConfig::default()).unwrap());
//! let mut v = GrowableVector::<u32>::new();
//! for i in 0..10 {
//!     v.append(&mut heap, i).unwrap();
//! }
//! assert_eq!(v.index_of(&heap, 7), Some(7));
//! v.release(&mut heap);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod bitset;
pub mod element;
pub mod error;
pub mod hash;
pub mod vector;

pub use bitset::BitSet;
pub use element::Element;
pub use error::CollectionError;
pub use hash::{HashNode, HashNodes, HashTable, NodeId};
pub use vector::{GrowableVector, ALLOC_THRESHOLD};
