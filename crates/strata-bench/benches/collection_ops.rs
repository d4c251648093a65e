//! Criterion micro-benchmarks for the heap-backed containers.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use strata_bench::{hash_keys, zone_heap};
use strata_collections::{BitSet, GrowableVector, HashNodes, HashTable};

/// Benchmark: append 100K i32s, growing through every tier.
fn bench_vector_append_100k(c: &mut Criterion) {
    let mut heap = zone_heap();
    c.bench_function("vector_append_100k", |b| {
        b.iter(|| {
            let mut v = GrowableVector::<i32>::new();
            for i in 0..100_000 {
                v.append(&mut heap, i).unwrap();
            }
            black_box(v.len());
            v.release(&mut heap);
            heap.rewind(false);
        });
    });
}

/// Benchmark: append 64K bits, then fill and count.
fn bench_bitset_append_fill(c: &mut Criterion) {
    let mut heap = zone_heap();
    c.bench_function("bitset_append_fill_64k", |b| {
        b.iter(|| {
            let mut bits = BitSet::new();
            for i in 0..65_536usize {
                bits.append(&mut heap, i % 3 == 0).unwrap();
            }
            bits.fill(&mut heap, 1_000, 60_000, true).unwrap();
            black_box(bits.count_ones(&heap));
            bits.release(&mut heap);
            heap.rewind(false);
        });
    });
}

/// Benchmark: insert 10K keys, then look each one up.
fn bench_hash_put_find_10k(c: &mut Criterion) {
    let keys = hash_keys(5, 10_000);
    let mut heap = zone_heap();
    c.bench_function("hash_put_find_10k", |b| {
        b.iter(|| {
            let mut nodes = HashNodes::with_capacity(keys.len());
            let mut table = HashTable::new();
            for &(key, hash) in &keys {
                let id = nodes.push(hash, key);
                table.put(&mut heap, &mut nodes, id);
            }
            for &(key, hash) in &keys {
                black_box(table.find(&heap, &nodes, hash, |&v| v == key));
            }
            table.reset(&mut heap);
            heap.rewind(false);
        });
    });
}

criterion_group!(
    benches,
    bench_vector_append_100k,
    bench_bitset_append_fill,
    bench_hash_put_find_10k
);
criterion_main!(benches);
