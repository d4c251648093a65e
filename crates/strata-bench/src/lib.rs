//! Benchmark workloads for the strata allocators and containers.
//!
//! Every workload is generated from a seed with ChaCha8, so a benchmark
//! sees the same request stream on every run:
//!
//! - [`request_sizes`]: allocation sizes with a configurable share of
//!   oversized (dynamic) requests
//! - [`churn_script`]: interleaved allocate/release steps for the heap
//! - [`hash_keys`]: distinct keys with their 32-bit hashes
//! - [`zone_heap`]: a heap configured like a typical short-lived zone

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata_arena::{Arena, ArenaConfig, SlabHeap};

/// Block size used by [`zone_heap`]: 8 KiB minus room for bookkeeping.
pub const ZONE_BLOCK_SIZE: usize = 8096 - 64;

/// A heap over a fresh arena with [`ZONE_BLOCK_SIZE`] blocks.
pub fn zone_heap() -> SlabHeap {
    // The block size is a non-zero constant, so validation cannot fail.
    match Arena::new(ArenaConfig::new(ZONE_BLOCK_SIZE)) {
        Ok(arena) => SlabHeap::new(arena),
        Err(e) => panic!("zone arena config rejected: {e}"),
    }
}

/// `count` request sizes in `1..=max_small`, with roughly one in
/// `dynamic_every` replaced by a size in `max_small + 1..=4 * max_small`.
///
/// `dynamic_every == 0` disables oversized requests.
pub fn request_sizes(seed: u64, count: usize, max_small: usize, dynamic_every: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let r = rng.next_u64();
            if dynamic_every != 0 && r % dynamic_every == 0 {
                max_small + 1 + (r >> 32) as usize % (3 * max_small)
            } else {
                1 + (r >> 16) as usize % max_small
            }
        })
        .collect()
}

/// One step of a heap churn workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChurnStep {
    /// Allocate this many bytes.
    Allocate(usize),
    /// Release the live allocation at this position (modulo the number
    /// of live allocations).
    Release(usize),
}

/// An allocate/release script: each allocation is followed, with
/// probability `release_percent / 100`, by a release of a random live
/// allocation.
pub fn churn_script(seed: u64, allocations: usize, max_small: usize, release_percent: u64) -> Vec<ChurnStep> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x5EED);
    let mut script = Vec::with_capacity(allocations * 2);
    for size in request_sizes(seed, allocations, max_small, 0) {
        script.push(ChurnStep::Allocate(size));
        let r = rng.next_u64();
        if r % 100 < release_percent {
            script.push(ChurnStep::Release((r >> 32) as usize));
        }
    }
    script
}

/// `count` distinct keys paired with a 32-bit hash of each.
pub fn hash_keys(seed: u64, count: usize) -> Vec<(u64, u32)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut seen = std::collections::HashSet::with_capacity(count);
    let mut keys = Vec::with_capacity(count);
    while keys.len() < count {
        let key = rng.next_u64();
        if seen.insert(key) {
            keys.push((key, mix32(key)));
        }
    }
    keys
}

/// Fold a 64-bit key into a well-mixed 32-bit hash.
pub fn mix32(key: u64) -> u32 {
    let x = (key ^ (key >> 33)).wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    let x = (x ^ (x >> 33)).wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    (x ^ (x >> 33)) as u32
}
