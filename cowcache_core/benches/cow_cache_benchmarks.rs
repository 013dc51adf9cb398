use std::{
    hint::black_box,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use criterion::{criterion_group, criterion_main, Criterion, BenchmarkId, Throughput};
use cowcache_core::CowCache;

// Long enough that no merge fires behind a benchmark's back.
const PARKED_DELAY: Duration = Duration::from_secs(600);

// Test data generation
fn generate_test_keys(count: usize, pattern: &str) -> Vec<u64> {
    match pattern {
        "sequential" => (0..count as u64).collect(),
        "random" => {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            (0..count)
                .map(|i| {
                    let mut hasher = DefaultHasher::new();
                    (i * 17 + 42).hash(&mut hasher);
                    hasher.finish()
                })
                .collect()
        },
        "clustered" => {
            // Keys that will likely hash to similar buckets
            (0..count as u64)
                .map(|i| i * 1024) // Every 1024th number
                .collect()
        },
        _ => (0..count as u64).collect(),
    }
}

fn generate_test_values(count: usize) -> Vec<u64> {
    (0..count as u64).map(|i| i * 2 + 1).collect()
}

// Builds a cache whose entries all live in the published store.
fn published_cache(keys: &[u64], values: &[u64]) -> CowCache<u64, u64> {
    keys.iter().zip(values.iter()).map(|(k, v)| (*k, *v)).collect()
}

// Builds a parked cache with the merge service already running, so thread
// startup stays out of the timed sections.
fn parked_cache() -> CowCache<u64, u64> {
    let cache = CowCache::with_copy_delay(PARKED_DELAY);
    let _ = cache.insert(u64::MAX, 0);
    cache
}

// Lock-free read path against the published store
fn bench_get_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_throughput");

    for size in [1000, 10000, 100000, 1000000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        let keys = generate_test_keys(*size, "sequential");
        let values = generate_test_values(*size);
        let cache = published_cache(&keys, &values);

        group.bench_with_input(
            BenchmarkId::new("100_percent_hit", size),
            size,
            |b, _| {
                b.iter(|| {
                    for key in &keys {
                        black_box(cache.get(black_box(key)));
                    }
                })
            }
        );

        // 50% hit rate test
        let mut mixed_keys = keys[0..*size / 2].to_vec();
        mixed_keys.extend(*size as u64 + 1..*size as u64 + 1 + *size as u64 / 2);

        group.bench_with_input(
            BenchmarkId::new("50_percent_hit", size),
            size,
            |b, _| {
                b.iter(|| {
                    for key in &mixed_keys {
                        black_box(cache.get(black_box(key)));
                    }
                })
            }
        );
    }
    group.finish();
}

// Reads that fall through to the locked pending buffer
fn bench_buffered_get_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_get_throughput");

    for size in [1000, 10000, 100000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        let keys = generate_test_keys(*size, "sequential");
        let values = generate_test_values(*size);

        // First half published, second half parked in the pending buffer.
        let cache = CowCache::builder()
            .copy_delay(PARKED_DELAY)
            .entries(
                keys[0..*size / 2]
                    .iter()
                    .zip(values.iter())
                    .map(|(k, v)| (*k, *v)),
            )
            .build();
        for (key, value) in keys[*size / 2..].iter().zip(values.iter()) {
            let _ = cache.insert(*key, *value);
        }

        group.bench_with_input(
            BenchmarkId::new("half_buffered", size),
            size,
            |b, _| {
                b.iter(|| {
                    for key in &keys {
                        black_box(cache.get(black_box(key)));
                    }
                })
            }
        );
    }
    group.finish();
}

// Buffered insertion throughput, one fresh cache per iteration
fn bench_insert_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_throughput");

    for size in [1000, 10000, 100000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        let keys = generate_test_keys(*size, "sequential");
        let values = generate_test_values(*size);

        group.bench_with_input(
            BenchmarkId::new("sequential", size),
            size,
            |b, _| {
                b.iter_custom(|iters| {
                    let mut total_time = Duration::new(0, 0);
                    for _ in 0..iters {
                        let cache = parked_cache();
                        let start = Instant::now();
                        for (key, value) in keys.iter().zip(values.iter()) {
                            let _ = cache.insert(black_box(*key), black_box(*value));
                        }
                        total_time += start.elapsed();
                    }
                    total_time
                })
            }
        );

        // Random pattern
        let random_keys = generate_test_keys(*size, "random");
        group.bench_with_input(
            BenchmarkId::new("random", size),
            size,
            |b, _| {
                b.iter_custom(|iters| {
                    let mut total_time = Duration::new(0, 0);
                    for _ in 0..iters {
                        let cache = parked_cache();
                        let start = Instant::now();
                        for (key, value) in random_keys.iter().zip(values.iter()) {
                            let _ = cache.insert(black_box(*key), black_box(*value));
                        }
                        total_time += start.elapsed();
                    }
                    total_time
                })
            }
        );
    }
    group.finish();
}

// Cost of folding a pending batch into a new published generation
fn bench_publish_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_throughput");

    for size in [1000, 10000, 100000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        let keys = generate_test_keys(*size, "sequential");
        let values = generate_test_values(*size);

        group.bench_with_input(
            BenchmarkId::new("merge_batch", size),
            size,
            |b, _| {
                b.iter_custom(|iters| {
                    let mut total_time = Duration::new(0, 0);
                    for _ in 0..iters {
                        let cache = parked_cache();
                        for (key, value) in keys.iter().zip(values.iter()) {
                            let _ = cache.insert(*key, *value);
                        }
                        let start = Instant::now();
                        // Dropping the delay merges the whole batch inline.
                        cache.set_copy_delay(Duration::ZERO);
                        total_time += start.elapsed();
                    }
                    total_time
                })
            }
        );
    }
    group.finish();
}

// Concurrent throughput benchmarks
fn bench_concurrent_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_throughput");
    group.measurement_time(Duration::from_secs(10));

    for thread_count in [1, 2, 4, 8, 16].iter() {
        let ops_per_thread = 20000;
        let total_ops = thread_count * ops_per_thread;

        group.throughput(Throughput::Elements(total_ops as u64));

        group.bench_with_input(
            BenchmarkId::new("threads", thread_count),
            thread_count,
            |b, &threads| {
                b.iter_custom(|iters| {
                    let mut total_time = Duration::new(0, 0);
                    for _ in 0..iters {
                        let cache = Arc::new(parked_cache());
                        let start = Instant::now();
                        let handles: Vec<_> = (0..threads).map(|thread_id| {
                            let cache_clone = Arc::clone(&cache);
                            thread::spawn(move || {
                                let start_key = thread_id as u64 * ops_per_thread as u64;

                                for i in 0..ops_per_thread {
                                    let key = start_key + i as u64;

                                    if i % 10 < 7 {
                                        black_box(cache_clone.get(black_box(&key)));
                                    } else {
                                        black_box(cache_clone.try_insert(black_box(key), black_box(key * 2)));
                                    }
                                }
                            })
                        }).collect();

                        for handle in handles {
                            handle.join().unwrap();
                        }
                        total_time += start.elapsed();
                    }
                    total_time
                })
            }
        );
    }
    group.finish();
}

// High-frequency operations throughput
fn bench_hot_key_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("hot_key_throughput");
    group.measurement_time(Duration::from_secs(3));

    // Very high frequency operations on a small published key set
    let hot_keys: Vec<u64> = (0..100).collect(); // 100 hot keys
    let hot_values = generate_test_values(hot_keys.len());
    let cache = Arc::new(published_cache(&hot_keys, &hot_values));

    for thread_count in [1, 2, 4, 8].iter() {
        let ops_per_thread = 100000;
        let total_ops = thread_count * ops_per_thread;

        group.throughput(Throughput::Elements(total_ops as u64));

        group.bench_with_input(
            BenchmarkId::new("hot_keys_contention", thread_count),
            thread_count,
            |b, &threads| {
                b.iter(|| {
                    let handles: Vec<_> = (0..threads).map(|thread_id| {
                        let cache_clone = Arc::clone(&cache);
                        let hot_keys_clone = hot_keys.clone();

                        thread::spawn(move || {
                            for i in 0..ops_per_thread {
                                let key_idx = (thread_id * ops_per_thread + i) % hot_keys_clone.len();
                                let key = hot_keys_clone[key_idx];

                                if i % 3 == 0 {
                                    // Duplicate: rejected off the published store.
                                    black_box(cache_clone.try_insert(black_box(key), black_box(key * 2)));
                                } else {
                                    black_box(cache_clone.get(black_box(&key)));
                                }
                            }
                        })
                    }).collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }
                })
            }
        );
    }

    group.finish();
}

// Snapshot iteration throughput
fn bench_scan_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_throughput");

    for size in [1000, 10000, 100000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        let keys = generate_test_keys(*size, "sequential");
        let values = generate_test_values(*size);
        let cache = published_cache(&keys, &values);

        group.bench_with_input(
            BenchmarkId::new("iter_all", size),
            size,
            |b, _| {
                b.iter(|| {
                    for pair in cache.iter() {
                        black_box(pair);
                    }
                })
            }
        );

        group.bench_with_input(
            BenchmarkId::new("values_only", size),
            size,
            |b, _| {
                b.iter(|| {
                    for value in cache.values() {
                        black_box(value);
                    }
                })
            }
        );
    }
    group.finish();
}

// Custom throughput measurement with a realistic mixed workload
fn bench_mixed_workload_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_workload_throughput");
    group.measurement_time(Duration::from_secs(5));

    let test_size = 50000;
    let keys = generate_test_keys(test_size, "random");
    let values = generate_test_values(test_size);

    group.throughput(Throughput::Elements(test_size as u64));

    group.bench_function("realistic_workload", |b| {
        b.iter_custom(|iters| {
            let mut total_time = Duration::new(0, 0);

            for _ in 0..iters {
                // Half the keys published up front, the rest stay fresh.
                let cache = CowCache::builder()
                    .copy_delay(PARKED_DELAY)
                    .entries(
                        keys.iter()
                            .take(test_size / 2)
                            .zip(values.iter())
                            .map(|(k, v)| (*k, *v)),
                    )
                    .build();

                let start = Instant::now();

                for i in 0..test_size {
                    let key = keys[i];
                    let value = values[i];

                    match i % 100 {
                        0..=69 => {
                            // 70% reads
                            black_box(cache.get(black_box(&key)));
                        },
                        70..=89 => {
                            // 20% writes
                            let _ = cache.insert(black_box(key), black_box(value));
                        },
                        90..=94 => {
                            // 5% read-or-insert on mostly present keys
                            let existing_key = keys[i % (test_size / 2)];
                            black_box(cache.get_or_insert(black_box(existing_key), black_box(value)));
                        },
                        _ => {
                            // 5% size probes
                            black_box(cache.len());
                        }
                    }
                }

                total_time += start.elapsed();
            }

            total_time
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_get_throughput,
    bench_buffered_get_throughput,
    bench_insert_throughput,
    bench_publish_throughput,
    bench_concurrent_throughput,
    bench_hot_key_throughput,
    bench_scan_throughput,
    bench_mixed_workload_throughput
);

criterion_main!(benches);
