//! The public facade: one [`Cache`] wires an [`Engine`], a [`Backend`], a
//! [`Serializer`], and a [`Lifecycle`] together into the `open`/`purge`/
//! `start`/`stop` surface most callers use directly.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::engine::{Acquired, Engine};
use crate::error::{BackendError, CacheError, ReturnCode};
use crate::lifecycle::Lifecycle;
use crate::metrics::CoreCacheMetrics;
use crate::serializer::Serializer;

/// A concurrent, single-flight, bounded LRU cache over keys `K` and values `V`,
/// persisted through a [`Backend`] and encoded through a [`Serializer`].
///
/// Calls made before the background loader reaches `Loaded` take a fast path:
/// the back end is consulted directly and misses fall through to the
/// producer, uncached (see [`Lifecycle`]).
pub struct Cache<K, V, S, B> {
    engine: Arc<Engine<K>>,
    backend: Arc<B>,
    serializer: S,
    lifecycle: Lifecycle<K, B>,
    call_func_when_failure: bool,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, S, B> Cache<K, V, S, B>
where
    K: Ord + Clone + Send + 'static,
    S: Serializer<V>,
    B: Backend<K> + 'static,
{
    /// Builds a cache. `call_func_when_failure` controls whether a capacity or
    /// wait-count refusal falls through to the producer (`true`) or is
    /// surfaced as a [`CacheError`] (`false`).
    pub fn new(
        config: EngineConfig,
        backend: B,
        serializer: S,
        call_func_when_failure: bool,
    ) -> Self {
        let engine = Arc::new(Engine::new(config.clone()));
        let backend = Arc::new(backend);
        let lifecycle = Lifecycle::new(Arc::clone(&engine), Arc::clone(&backend), config);
        Cache {
            engine,
            backend,
            serializer,
            lifecycle,
            call_func_when_failure,
            _value: PhantomData,
        }
    }

    /// Starts the background loader/manager. See [`Lifecycle::start`].
    pub fn start(&self) {
        self.lifecycle.start();
    }

    /// Stops the background loader/manager. See [`Lifecycle::stop`].
    pub fn stop(&self, timeout: Option<Duration>) {
        self.lifecycle.stop(timeout);
    }

    /// Blocks until the cache is usable (or `timeout` elapses). See
    /// [`Lifecycle::wait_for_usable`].
    pub fn wait_for_usable(&self, timeout: Duration) -> bool {
        self.lifecycle.wait_for_usable(timeout)
    }

    /// Request/hit/eviction counters.
    pub fn metrics(&self) -> &CoreCacheMetrics {
        self.engine.metrics()
    }

    /// Number of entries currently tracked by this shard's engine (any status).
    pub fn len(&self) -> usize {
        self.engine.current_entry_count()
    }

    /// True if this shard's engine currently tracks no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn delete_fn(&self) -> impl Fn(&K) + '_ {
        move |key: &K| {
            if let Err(err) = self.backend.delete(key) {
                log::error!("delete failed: {err}");
            }
        }
    }

    /// Memoized call: returns the cached value for `key`, invoking `producer`
    /// at most once concurrently to compute it.
    pub fn open<F, E>(&self, key: K, producer: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.engine.metrics().record_request();

        if !self.lifecycle.is_usable() {
            return match self.backend.read(&key) {
                Ok(bytes) => self
                    .serializer
                    .loads(&bytes)
                    .map_err(|e| CacheError::Serialize(e.to_string())),
                Err(BackendError::KeyNotFound) => {
                    self.engine.metrics().record_producer_call();
                    producer().map_err(CacheError::Producer)
                }
                Err(err) => Err(CacheError::Backend(err)),
            };
        }

        let delete = self.delete_fn();
        match self.engine.acquire(key, &delete, Instant::now()) {
            Acquired::Read(k) => {
                self.engine.metrics().record_hit();
                match self.backend.read(&k) {
                    Ok(bytes) => {
                        self.engine.finish_read(&k, false, &delete);
                        self.serializer
                            .loads(&bytes)
                            .map_err(|e| CacheError::Serialize(e.to_string()))
                    }
                    Err(BackendError::KeyNotFound) => {
                        self.engine.finish_read(&k, true, &delete);
                        self.engine.metrics().record_producer_call();
                        producer().map_err(CacheError::Producer)
                    }
                    Err(err) => {
                        self.engine.finish_read(&k, false, &delete);
                        Err(CacheError::Backend(err))
                    }
                }
            }
            Acquired::Produce(k) => {
                self.engine.metrics().record_producer_call();
                match producer() {
                    Ok(value) => self.finish_produce(&k, value),
                    Err(err) => {
                        self.engine.finish_update(&k, false, 0);
                        Err(CacheError::Producer(err))
                    }
                }
            }
            Acquired::Done(code) => self.bypass(code, producer),
        }
    }

    fn finish_produce<E>(&self, key: &K, value: V) -> Result<V, CacheError<E>> {
        match self.serializer.dumps(&value) {
            Ok((size, bytes)) => match self.backend.write(key, &bytes) {
                Ok(()) => {
                    self.engine.finish_update(key, true, size);
                    Ok(value)
                }
                Err(err) => {
                    self.engine.finish_update(key, false, 0);
                    Err(CacheError::Backend(err))
                }
            },
            Err(err) => {
                self.engine.finish_update(key, false, 0);
                Err(CacheError::Serialize(err.to_string()))
            }
        }
    }

    fn bypass<F, E>(&self, code: ReturnCode, producer: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        match code {
            ReturnCode::ErrorUnreachMinUses | ReturnCode::ErrorEntryUnusable => {
                self.engine.metrics().record_producer_call();
                producer().map_err(CacheError::Producer)
            }
            ReturnCode::ErrorCacheOverflow if self.call_func_when_failure => {
                self.engine.metrics().record_producer_call();
                producer().map_err(CacheError::Producer)
            }
            ReturnCode::ErrorWaitCountReached if self.call_func_when_failure => {
                self.engine.metrics().record_producer_call();
                producer().map_err(CacheError::Producer)
            }
            ReturnCode::ErrorCacheOverflow => Err(CacheError::CacheOverflow),
            ReturnCode::ErrorWaitCountReached => Err(CacheError::WaitCountReached),
            ReturnCode::ErrorKeyNotExists => Err(CacheError::KeyNotExists),
            ReturnCode::ErrorKeyUpdating => Err(CacheError::KeyUpdating),
            ReturnCode::Ok | ReturnCode::ResponsibleForUpdating => {
                unreachable!("Ok/ResponsibleForUpdating are handled before bypass()")
            }
        }
    }

    /// Removes `key` outright, deleting its back-end artifact if present.
    pub fn purge(&self, key: &K) -> ReturnCode {
        self.engine.metrics().record_purge();
        let delete = self.delete_fn();
        self.engine.purge(key, &delete)
    }
}
