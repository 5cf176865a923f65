//! Thread fan-out demos for `cache-rs`, mirroring the style of the
//! reference `concurrent_usage` example: each section spawns a fixed number
//! of worker threads hammering a shared cache and reports throughput and
//! the resulting hit/miss counters.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cache_rs::backend::memory::MemoryBackend;
use cache_rs::config::EngineConfig;
use cache_rs::serializer::BincodeSerializer;
use cache_rs::Cache;
use clap::Parser;

/// Thread fan-out demos for `cache-rs`.
#[derive(Parser, Debug)]
#[command(about = "Single-flight and throughput demos for cache-rs")]
struct Cli {
    /// Number of threads contending for the same key in the single-flight demo.
    #[arg(long, default_value_t = 32)]
    threads: usize,

    /// Number of keys each thread opens per round in the throughput comparison.
    #[arg(long, default_value_t = 5_000)]
    ops_per_thread: usize,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    println!("cache-rs Concurrent Usage Demos");
    println!("================================\n");

    single_flight_demo(cli.threads);
    println!();
    throughput_comparison(cli.ops_per_thread);
}

/// Demonstrates single-flight coordination: many threads request the same
/// key at once, but the producer (which sleeps to simulate expensive work)
/// runs only once.
fn single_flight_demo(num_threads: usize) {
    println!("1. Single-Flight Coordination");
    println!("   ---------------------------");

    let config = EngineConfig::builder()
        .with_max_entry_count(NonZeroUsize::new(1_000).unwrap())
        .with_max_size(16 * 1024 * 1024)
        .build()
        .unwrap();
    let cache = Arc::new(Cache::new(
        config,
        MemoryBackend::new(),
        BincodeSerializer,
        false,
    ));
    cache.start();
    cache.wait_for_usable(Duration::from_secs(5));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache
                    .open(
                        "shared-key".to_string(),
                        || -> Result<u64, std::convert::Infallible> {
                            thread::sleep(Duration::from_millis(50));
                            Ok(42)
                        },
                    )
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 42);
    }

    println!(
        "   {} threads requested the same key; producer ran {} time(s), {} hit(s)",
        num_threads,
        cache.metrics().producer_calls(),
        cache.metrics().hits()
    );
    cache.stop(Some(Duration::from_secs(5)));
}

/// Compares request throughput across a growing pool of worker threads,
/// each operating on its own slice of keys.
fn throughput_comparison(ops_per_thread: usize) {
    println!("2. Throughput Comparison (distinct keys per thread)");
    println!("   --------------------------------------------------");

    for num_threads in [1, 2, 4, 8] {
        let config = EngineConfig::builder()
            .with_max_entry_count(NonZeroUsize::new(100_000).unwrap())
            .with_max_size(64 * 1024 * 1024)
            .build()
            .unwrap();
        let cache = Arc::new(Cache::new(
            config,
            MemoryBackend::new(),
            BincodeSerializer,
            false,
        ));
        cache.start();
        cache.wait_for_usable(Duration::from_secs(5));

        let start = Instant::now();
        let handles: Vec<_> = (0..num_threads)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..ops_per_thread {
                        let key = t * ops_per_thread + i;
                        cache
                            .open(key, || -> Result<u64, std::convert::Infallible> {
                                Ok(key as u64)
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        let elapsed = start.elapsed();
        let total_ops = num_threads * ops_per_thread;
        let ops_per_sec = (total_ops as f64 / elapsed.as_secs_f64()) as u64;

        println!(
            "   {:2} threads: {:>7.2?} ({:>10} ops/sec)",
            num_threads, elapsed, ops_per_sec
        );
        cache.stop(Some(Duration::from_secs(5)));
    }
}
