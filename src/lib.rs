//! A concurrent, bounded LRU cache engine with single-flight producer
//! coordination and pluggable storage back ends.
//!
//! The core entry point is [`cache::Cache`]: it memoizes a caller-supplied
//! producer closure behind a key, guaranteeing that at most one thread is
//! ever computing a given key's value at a time, while every other caller
//! for that same key either reads the previous value, waits for the
//! in-flight producer, or bypasses the cache entirely depending on policy.
//!
//! ```no_run
//! use cache_rs::backend::memory::MemoryBackend;
//! use cache_rs::config::EngineConfig;
//! use cache_rs::serializer::BincodeSerializer;
//! use cache_rs::Cache;
//! use std::num::NonZeroUsize;
//!
//! let config = EngineConfig::builder()
//!     .with_max_entry_count(NonZeroUsize::new(10_000).unwrap())
//!     .with_max_size(64 * 1024 * 1024)
//!     .build()
//!     .unwrap();
//!
//! let cache = Cache::new(config, MemoryBackend::new(), BincodeSerializer, false);
//! cache.start();
//! cache.wait_for_usable(std::time::Duration::from_secs(5));
//!
//! let value = cache
//!     .open("some-key".to_string(), || -> Result<String, std::convert::Infallible> {
//!         Ok("computed once".to_string())
//!     })
//!     .unwrap();
//! assert_eq!(value, "computed once");
//! ```
//!
//! For workloads that need to spread lock contention and back-end I/O
//! across several independent engines, wrap multiple [`cache::Cache`]s in a
//! [`proxy::Proxy`], which routes each key to a shard deterministically via
//! [`shard::ShardKey`].

/// Pluggable storage back ends ([`backend::Backend`]) and the in-memory and
/// filesystem reference implementations.
pub mod backend;
/// The public cache facade combining an engine, a back end, and a serializer.
pub mod cache;
/// Engine configuration, built and validated via a fluent builder.
pub mod config;
mod engine;
mod entry;
/// Error types and observable return codes.
pub mod error;
mod lifecycle;
mod list;
/// Lightweight, lock-free counters exposed by an engine.
pub mod metrics;
/// The sharding proxy fanning a cache out across multiple independent engines.
pub mod proxy;
/// The byte-encoding contract between a produced value and back-end storage.
pub mod serializer;
/// Stable key-to-engine sharding used by [`proxy::Proxy`].
pub mod shard;
mod skiplist;

pub use cache::Cache;
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{BackendError, CacheError, ConfigError, ReturnCode};
pub use metrics::CoreCacheMetrics;
pub use proxy::Proxy;
pub use serializer::{BincodeSerializer, Serializer};
pub use shard::ShardKey;
