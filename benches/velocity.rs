//! Update and lookup throughput for the velocity engine and its stores.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::collections::HashMap;
use veltime::{
    dense_key, BackendStore, LongMap, MemoryStore, OrderedBackend, Store, Velocity, VelocityConfig,
};

const NOW: u32 = 25_000_000;

fn generate_keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("card:{:016}", 4_000_000_000_000_000u64 + i as u64)).collect()
}

const KINDS: [&str; 2] = ["memory", "ordered"];

fn store(kind: &str) -> Box<dyn Store> {
    match kind {
        "memory" => Box::new(MemoryStore::new()),
        _ => Box::new(BackendStore::new(OrderedBackend::new())),
    }
}

fn bench_dense_key(c: &mut Criterion) {
    let keys = generate_keys(10_000);
    c.bench_function("dense_key", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for key in keys.iter() {
                acc ^= dense_key(black_box(key));
            }
            black_box(acc)
        });
    });
}

fn bench_vel_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("vel_count");

    for size in [1_000, 10_000].iter() {
        let keys = generate_keys(*size);

        for kind in KINDS {
            let vel = Velocity::new(kind, store(kind), VelocityConfig::default());
            let mut minute = NOW;
            group.bench_with_input(BenchmarkId::new(kind, size), size, |b, _| {
                b.iter(|| {
                    minute += 1;
                    let mut hits = 0i64;
                    for key in keys.iter() {
                        hits += vel.vel_count(key.as_str(), 5, minute);
                    }
                    black_box(hits)
                });
            });
        }
    }

    group.finish();
}

fn bench_get_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_count");

    for size in [1_000, 10_000].iter() {
        let keys = generate_keys(*size);

        for kind in KINDS {
            let vel = Velocity::new(kind, store(kind), VelocityConfig::default());
            for (i, key) in keys.iter().enumerate() {
                for m in 0..(i % 4) as u32 {
                    vel.vel_count(key.as_str(), 10, NOW + m);
                }
            }

            group.bench_with_input(BenchmarkId::new(kind, size), size, |b, _| {
                b.iter(|| {
                    let mut sum = 0usize;
                    for key in keys.iter() {
                        sum += vel.get_count(key.as_str());
                    }
                    black_box(sum)
                });
            });
        }
    }

    group.finish();
}

fn bench_long_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("long_map");

    for size in [1_000, 10_000, 100_000].iter() {
        let keys: Vec<u64> = generate_keys(*size).iter().map(|k| dense_key(k)).collect();

        group.bench_with_input(BenchmarkId::new("HashMap", size), size, |b, _| {
            b.iter(|| {
                let mut map: HashMap<u64, u64> = HashMap::new();
                for &key in keys.iter() {
                    map.insert(key, key);
                }
                let mut sum = 0u64;
                for key in keys.iter() {
                    if let Some(v) = map.get(key) {
                        sum = sum.wrapping_add(*v);
                    }
                }
                black_box(sum)
            });
        });

        group.bench_with_input(BenchmarkId::new("LongMap", size), size, |b, _| {
            b.iter(|| {
                let mut map: LongMap<u64> = LongMap::new();
                for &key in keys.iter() {
                    map.put(key, key);
                }
                let mut sum = 0u64;
                for &key in keys.iter() {
                    if let Some(v) = map.get(key) {
                        sum = sum.wrapping_add(*v);
                    }
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_purge(c: &mut Criterion) {
    let mut group = c.benchmark_group("purge");
    group.sample_size(20);

    let size = 50_000usize;
    let keys = generate_keys(size);

    for kind in KINDS {
        group.bench_function(BenchmarkId::new(kind, size), |b| {
            b.iter_batched(
                || {
                    let vel = Velocity::new(kind, store(kind), VelocityConfig::default());
                    // Half the keys expire before the purge point.
                    for (i, key) in keys.iter().enumerate() {
                        let dur = if i % 2 == 0 { 1 } else { 120 };
                        vel.vel_count(key.as_str(), dur, NOW);
                    }
                    vel
                },
                |vel| black_box(vel.purge(NOW + 60).unwrap()),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dense_key,
    bench_vel_count,
    bench_get_count,
    bench_long_map,
    bench_purge
);
criterion_main!(benches);
