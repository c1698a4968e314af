//! Micro benchmarks for the B+tree exchange.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata::btree::Exchange;
use strata::key::Key;
use strata::volume::Volume;

const INSERT_COUNT: u64 = 32_768;
const LOOKUP_SAMPLES: usize = 4_096;

fn int_key(v: u64) -> Key {
    let mut k = Key::new();
    k.append_int(v as i64);
    k
}

fn micro_btree(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/btree");
    group.sample_size(20);

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("sequential_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |tree| {
                tree.insert_sequence(0, INSERT_COUNT);
                black_box(tree.exchange().root());
            },
            BatchSize::SmallInput,
        );
    });

    let mut random_keys: Vec<u64> = (0..INSERT_COUNT).collect();
    random_keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0xBEEF_F00D));
    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("random_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |tree| {
                tree.insert_keys(&random_keys);
                black_box(tree.exchange().root());
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("delete_random", |b| {
        b.iter_batched(
            || {
                let tree = FreshTree::new();
                tree.insert_sequence(0, INSERT_COUNT);
                tree
            },
            |tree| {
                tree.delete_keys(&random_keys);
                black_box(tree.exchange().root());
            },
            BatchSize::SmallInput,
        );
    });

    let mut lookup_harness = LoadedTree::new(INSERT_COUNT);
    group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
    group.bench_function(BenchmarkId::new("point_lookup", LOOKUP_SAMPLES), |b| {
        b.iter(|| lookup_harness.point_lookup(LOOKUP_SAMPLES));
    });

    group.finish();
}

struct FreshTree {
    volume: Volume,
}

impl FreshTree {
    fn new() -> Self {
        let volume = Volume::create_temporary(16384, 2048);
        volume.create_tree("bench").expect("create tree");
        Self { volume }
    }

    fn exchange(&self) -> Exchange<'_> {
        Exchange::open(&self.volume, "bench").expect("open")
    }

    fn insert_sequence(&self, start: u64, count: u64) {
        let exchange = self.exchange();
        for key in start..(start + count) {
            exchange.store(&int_key(key), key.to_be_bytes().to_vec()).expect("insert");
        }
    }

    fn insert_keys(&self, keys: &[u64]) {
        let exchange = self.exchange();
        for &key in keys {
            exchange.store(&int_key(key), key.to_be_bytes().to_vec()).expect("insert");
        }
    }

    fn delete_keys(&self, keys: &[u64]) {
        let exchange = self.exchange();
        for &key in keys {
            exchange.remove(&int_key(key)).expect("delete");
        }
    }
}

struct LoadedTree {
    tree: FreshTree,
    max_key: u64,
    rng: ChaCha8Rng,
}

impl LoadedTree {
    fn new(count: u64) -> Self {
        let tree = FreshTree::new();
        tree.insert_sequence(0, count);
        Self {
            tree,
            max_key: count,
            rng: ChaCha8Rng::seed_from_u64(0xFEED_FACE),
        }
    }

    fn point_lookup(&mut self, samples: usize) {
        let exchange = self.tree.exchange();
        for _ in 0..samples {
            let key = self.rng.gen_range(0..self.max_key);
            black_box(exchange.fetch(&int_key(key)).expect("fetch"));
        }
    }
}

criterion_group!(benches, micro_btree);
criterion_main!(benches);
