//! A sharding proxy: routes each key to one of several independent
//! [`Cache`] shards via [`ShardKey`], so a single logical cache can spread
//! lock contention and back-end I/O across multiple engines.

use std::time::Duration;

use crate::backend::Backend;
use crate::cache::Cache;
use crate::error::{CacheError, ReturnCode};
use crate::serializer::Serializer;
use crate::shard::ShardKey;

/// Fans a cache out across `N` independent shards, each a full [`Cache`]
/// with its own engine, lock, and back end. Routing is deterministic: the
/// same key always lands on the same shard for the lifetime of the proxy.
pub struct Proxy<K, V, S, B> {
    shards: Vec<Cache<K, V, S, B>>,
}

impl<K, V, S, B> Proxy<K, V, S, B>
where
    K: ShardKey + Ord + Clone + Send + 'static,
    S: Serializer<V>,
    B: Backend<K> + 'static,
{
    /// Wraps a non-empty list of independently constructed shards.
    ///
    /// # Panics
    /// Panics if `shards` is empty, since shard routing requires at least one.
    pub fn new(shards: Vec<Cache<K, V, S, B>>) -> Self {
        assert!(!shards.is_empty(), "a proxy needs at least one shard");
        Proxy { shards }
    }

    fn shard_for(&self, key: &K) -> &Cache<K, V, S, B> {
        let idx = key.shard_index(self.shards.len());
        &self.shards[idx]
    }

    /// Starts every shard's background worker.
    pub fn start_all(&self) {
        for shard in &self.shards {
            shard.start();
        }
    }

    /// Stops every shard's background worker, applying `timeout` to each in turn.
    pub fn stop_all(&self, timeout: Option<Duration>) {
        for shard in &self.shards {
            shard.stop(timeout);
        }
    }

    /// Blocks until every shard reports usable (or `timeout` elapses for any one of them).
    pub fn wait_for_usable(&self, timeout: Duration) -> bool {
        self.shards
            .iter()
            .all(|shard| shard.wait_for_usable(timeout))
    }

    /// Memoized call, routed to the shard owning `key`. See [`Cache::open`].
    pub fn open<F, E>(&self, key: K, producer: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.shard_for(&key).open(key, producer)
    }

    /// Removes `key` from the shard that owns it. See [`Cache::purge`].
    pub fn purge(&self, key: &K) -> ReturnCode {
        self.shard_for(key).purge(key)
    }

    /// Number of shards in this proxy.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::config::EngineConfig;
    use crate::serializer::BincodeSerializer;
    use std::num::NonZeroUsize;

    fn shard() -> Cache<String, u32, BincodeSerializer, MemoryBackend<String>> {
        let config = EngineConfig::builder()
            .with_max_entry_count(NonZeroUsize::new(10).unwrap())
            .with_max_size(4096)
            .build()
            .unwrap();
        Cache::new(config, MemoryBackend::new(), BincodeSerializer, false)
    }

    #[test]
    fn routes_deterministically_and_caches_per_shard() {
        let proxy = Proxy::new(vec![shard(), shard(), shard(), shard(), shard()]);
        proxy.start_all();
        assert!(proxy.wait_for_usable(Duration::from_secs(2)));

        let value = proxy
            .open("foo".to_string(), || {
                Ok::<_, std::convert::Infallible>(7u32)
            })
            .unwrap();
        assert_eq!(value, 7);

        // md5("foo") mod 5 == 3, per the known digest acbd18db4cc2f85cedef654fccc4a4d8.
        let digest = u128::from_str_radix("acbd18db4cc2f85cedef654fccc4a4d8", 16).unwrap();
        let expected_shard = (digest % 5) as usize;
        assert_eq!(proxy.shards[expected_shard].metrics().producer_calls(), 1);

        let value = proxy
            .open(
                "foo".to_string(),
                || -> Result<u32, std::convert::Infallible> {
                    panic!("producer must not run on a hit")
                },
            )
            .unwrap();
        assert_eq!(value, 7);

        proxy.stop_all(Some(Duration::from_secs(2)));
    }

    #[test]
    fn purge_routes_to_the_owning_shard() {
        let proxy = Proxy::new(vec![shard(), shard(), shard()]);
        proxy.start_all();
        assert!(proxy.wait_for_usable(Duration::from_secs(2)));

        proxy
            .open("bar".to_string(), || {
                Ok::<_, std::convert::Infallible>(1u32)
            })
            .unwrap();
        assert_eq!(proxy.purge(&"bar".to_string()), ReturnCode::Ok);
        assert_eq!(
            proxy.purge(&"bar".to_string()),
            ReturnCode::ErrorKeyNotExists
        );

        proxy.stop_all(Some(Duration::from_secs(2)));
    }

    #[test]
    #[should_panic(expected = "at least one shard")]
    fn rejects_empty_shard_list() {
        let _: Proxy<String, u32, BincodeSerializer, MemoryBackend<String>> = Proxy::new(vec![]);
    }
}
