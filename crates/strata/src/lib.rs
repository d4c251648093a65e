//! Strata: a block-growing arena, a size-classed slab heap on top of it,
//! and containers that keep their storage in that heap.
//!
//! This is the facade crate that re-exports the public API of the strata
//! sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use strata::prelude::*;
//!
//! let arena = Arena::new(ArenaConfig::default()).unwrap();
//! let mut heap = SlabHeap::new(arena);
//!
//! let mut squares = GrowableVector::<u64>::new();
//! for i in 0..1_000u64 {
//!     squares.append(&mut heap, i * i).unwrap();
//! }
//! assert_eq!(squares.get(&heap, 12), Some(144));
//!
//! let mut flags = BitSet::new();
//! flags.resize_filled(&mut heap, 100, false).unwrap();
//! flags.fill(&mut heap, 10, 20, true).unwrap();
//! assert_eq!(flags.count_ones(&heap), 10);
//!
//! let mut nodes = HashNodes::new();
//! let mut table = HashTable::new();
//! let id = nodes.push(42, "answer");
//! table.put(&mut heap, &mut nodes, id);
//! assert_eq!(table.find(&heap, &nodes, 42, |v| *v == "answer"), Some(id));
//!
//! // Drop everything at once and keep the blocks for the next round.
//! heap.rewind(false);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`arena`] | `strata-arena` | `Arena`, `SlabHeap`, handles, configs, `AllocError` |
//! | [`collections`] | `strata-collections` | `GrowableVector`, `BitSet`, `HashTable`, `Element` |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Arena, slab heap, handles and configuration (`strata-arena`).
///
/// Memory is addressed through [`arena::Span`] and [`arena::Allocation`]
/// handles; both are also available in the [`prelude`].
pub use strata_arena as arena;

/// Heap-backed containers (`strata-collections`).
///
/// Every container takes the [`arena::SlabHeap`] explicitly and reports
/// failures as [`collections::CollectionError`].
pub use strata_collections as collections;

/// Common imports for typical strata usage.
///
/// ```rust
/// use strata::prelude::*;
/// ```
pub mod prelude {
    // Allocators
    pub use strata_arena::{Arena, ArenaConfig, HeapConfig, SlabHeap};

    // Handles
    pub use strata_arena::{Allocation, Region, Span};

    // Containers
    pub use strata_collections::{BitSet, Element, GrowableVector, HashNodes, HashTable, NodeId};

    // Errors
    pub use strata_arena::AllocError;
    pub use strata_collections::CollectionError;
}
