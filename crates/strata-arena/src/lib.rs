//! Block-growing bump arena and size-classed slab heap.
//!
//! Memory is addressed through handles rather than pointers, so this
//! crate contains no `unsafe` code. A [`Span`] names bytes inside an arena
//! block; an [`Allocation`] names a heap allocation and carries the size
//! that must be handed back on release.
//!
//! # Architecture
//!
//! ```text
//! SlabHeap
//! ├── Arena (owned, swappable via SlabHeap::reset)
//! │   └── Block[] (Vec<u8>, chained prev/next, cursor bumps through current)
//! ├── free_heads[class] → intrusive free list threaded through released slots
//! └── DynamicBlocks (requests > largest class, generation-checked ids)
//! ```
//!
//! # Lifetimes of memory
//!
//! - **Arena spans** live until [`Arena::reset`]. A soft reset keeps the
//!   blocks and rewinds; a hard reset returns them to the system.
//! - **Slab slots** are recycled per size class; a released slot only
//!   serves requests that round up to the same class.
//! - **Dynamic blocks** are freed individually on release, or all at once
//!   when the heap is reset.
//!
//! # Example
//!
//! ```
//! use strata_arena::{Arena, ArenaConfig, SlabHeap};
//!
//! let arena = Arena::new(ArenaConfig::default()).unwrap();
//! let mut heap = SlabHeap::new(arena);
//!
//! let a = heap.allocate(40).unwrap();
//! assert_eq!(a.size(), 64);
//! heap.bytes_mut(&a)[..5].copy_from_slice(b"hello");
//! heap.release(a);
//!
//! let b = heap.allocate(50).unwrap();
//! assert_eq!(a, b);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
mod block;
pub mod config;
mod dynamic;
pub mod error;
pub mod handle;
pub mod heap;
pub mod size_class;

pub use arena::{Arena, ArenaState, ArenaStats, FORMAT_BUFFER_SIZE};
pub use config::{ArenaConfig, HeapConfig, MAX_ALIGNMENT};
pub use error::AllocError;
pub use handle::{Allocation, BlockId, DynamicId, Region, Span};
pub use heap::{HeapStats, SlabHeap};
pub use size_class::{SizeClass, SizeClasses};
