use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use cowcache_core::CowCache;
use log::{LevelFilter, info};
use rand::Rng;
use stopwatch::Stopwatch;

#[derive(Parser, Debug)]
#[command(name = "test_stress", version, about = "CowCache stress harness")]
struct Args {
    /// Number of writer threads (default: 4)
    #[arg(long, value_name = "N")]
    writers: Option<usize>,

    /// Number of reader threads (default: 4)
    #[arg(long, value_name = "N")]
    readers: Option<usize>,

    /// Keys inserted per writer thread (default: 50_000)
    #[arg(long = "keys-per-writer", alias = "keys_per_writer", value_name = "N")]
    keys_per_writer: Option<usize>,

    /// Copy delay in milliseconds (default: 30)
    #[arg(long = "copy-delay-ms", alias = "copy_delay_ms", value_name = "MS")]
    copy_delay_ms: Option<u64>,

    /// Percentage of writes that publish immediately, 0-100 (default: 10)
    #[arg(long = "immediate-percent", alias = "immediate_percent", value_name = "PCT")]
    immediate_percent: Option<u32>,

    /// Logging level off, error, warn, info, debug, trace (default: info)
    #[arg(long = "log-level", alias = "log_level", value_name = "LEVEL")]
    log_level: Option<LevelFilter>,
}

fn key(writer_id: usize, i: usize) -> String {
    format!("writer:{}:{}", writer_id, i)
}

fn value(writer_id: usize, keys_per_writer: usize, i: usize) -> u64 {
    (writer_id * keys_per_writer + i) as u64
}

fn main() {
    let args = Args::parse();

    let level = args.log_level.unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).init();

    let writers = args.writers.unwrap_or(4);
    let readers = args.readers.unwrap_or(4);
    let keys_per_writer = args.keys_per_writer.unwrap_or(50_000);
    let copy_delay = Duration::from_millis(args.copy_delay_ms.unwrap_or(30));
    let immediate_percent = args.immediate_percent.unwrap_or(10).min(100);

    info!(
        "starting: {} writers x {} keys, {} readers, copy delay {:?}, {}% immediate",
        writers, keys_per_writer, readers, copy_delay, immediate_percent
    );

    let cache = Arc::new(CowCache::<String, u64>::with_copy_delay(copy_delay));

    let writers_done = Arc::new(AtomicBool::new(false));
    let delayed_writes = Arc::new(AtomicU64::new(0));
    let immediate_writes = Arc::new(AtomicU64::new(0));
    let read_hits = Arc::new(AtomicU64::new(0));
    let read_misses = Arc::new(AtomicU64::new(0));

    let mut stopwatch = Stopwatch::new();
    stopwatch.start();

    let writer_handles: Vec<_> = (0..writers)
        .map(|writer_id| {
            let cache = Arc::clone(&cache);
            let delayed_writes = Arc::clone(&delayed_writes);
            let immediate_writes = Arc::clone(&immediate_writes);

            thread::spawn(move || {
                let mut rng = rand::rng();

                for i in 0..keys_per_writer {
                    let k = key(writer_id, i);
                    let v = value(writer_id, keys_per_writer, i);

                    if rng.random_range(0..100) < immediate_percent {
                        cache.insert_now(k.clone(), v).unwrap();
                        immediate_writes.fetch_add(1, Ordering::Relaxed);
                    } else {
                        cache.insert(k.clone(), v).unwrap();
                        delayed_writes.fetch_add(1, Ordering::Relaxed);
                    }

                    // A write must be readable the moment the call returns.
                    if i % 1000 == 0 {
                        assert_eq!(cache.get(&k), Some(v));
                    }
                }
            })
        })
        .collect();

    let reader_handles: Vec<_> = (0..readers)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let writers_done = Arc::clone(&writers_done);
            let read_hits = Arc::clone(&read_hits);
            let read_misses = Arc::clone(&read_misses);

            thread::spawn(move || {
                let mut rng = rand::rng();
                // Keys this reader has already observed. Re-reading one of
                // them must hit again: published entries never disappear.
                let mut seen: Vec<(usize, usize)> = Vec::with_capacity(128);

                while !writers_done.load(Ordering::Relaxed) {
                    let writer_id = rng.random_range(0..writers);
                    let i = rng.random_range(0..keys_per_writer);

                    match cache.get(&key(writer_id, i)) {
                        Some(found) => {
                            assert_eq!(found, value(writer_id, keys_per_writer, i));
                            read_hits.fetch_add(1, Ordering::Relaxed);
                            if seen.len() < seen.capacity() {
                                seen.push((writer_id, i));
                            }
                        }
                        None => {
                            read_misses.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    if !seen.is_empty() && rng.random_range(0..16) == 0 {
                        let (writer_id, i) = seen[rng.random_range(0..seen.len())];
                        assert!(cache.get(&key(writer_id, i)).is_some());
                    }
                }
            })
        })
        .collect();

    for handle in writer_handles {
        handle.join().unwrap();
    }
    writers_done.store(true, Ordering::Relaxed);
    for handle in reader_handles {
        handle.join().unwrap();
    }

    info!("writers finished, forcing final publication");

    // Zero delay folds whatever is still buffered into the published store.
    cache.set_copy_delay(Duration::ZERO);
    assert!(!cache.is_copy_pending());

    stopwatch.stop();

    let expected = writers * keys_per_writer;
    assert_eq!(cache.len(), expected);

    // Duplicates must still bounce after publication.
    assert!(cache.insert(key(0, 0), 0).is_err());
    assert_eq!(
        cache.get_or_insert(key(0, 0), u64::MAX),
        value(0, keys_per_writer, 0)
    );

    let mut scanned = 0usize;
    for (k, v) in cache.iter() {
        let mut parts = k.split(':').skip(1);
        let writer_id: usize = parts.next().unwrap().parse().unwrap();
        let i: usize = parts.next().unwrap().parse().unwrap();
        assert_eq!(v, value(writer_id, keys_per_writer, i));
        scanned += 1;
    }
    assert_eq!(scanned, expected);

    let elapsed = stopwatch.elapsed();
    let total_writes = immediate_writes.load(Ordering::Relaxed) + delayed_writes.load(Ordering::Relaxed);
    let total_reads = read_hits.load(Ordering::Relaxed) + read_misses.load(Ordering::Relaxed);

    println!("Elapsed {:?}", elapsed);
    println!("Total entries: {}", cache.len());
    println!(
        "Writes: {} ({} delayed, {} immediate)",
        total_writes,
        delayed_writes.load(Ordering::Relaxed),
        immediate_writes.load(Ordering::Relaxed)
    );
    println!(
        "Reads: {} ({} hits, {} misses)",
        total_reads,
        read_hits.load(Ordering::Relaxed),
        read_misses.load(Ordering::Relaxed)
    );
    println!(
        "Write throughput: {:.0} ops/s",
        total_writes as f64 / elapsed.as_secs_f64()
    );

    println!("All checks passed.");
}
