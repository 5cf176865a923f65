//! Lightweight, lock-free counters exposed by an [`crate::engine::Engine`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters tracked by an engine over its lifetime, independent of
/// the point-in-time map/deque state (which is reported by
/// [`crate::engine::Engine::current_size`] and
/// [`crate::engine::Engine::current_entry_count`]).
#[derive(Debug, Default)]
pub struct CoreCacheMetrics {
    requests: AtomicU64,
    hits: AtomicU64,
    producer_calls: AtomicU64,
    evictions: AtomicU64,
    purge_requests: AtomicU64,
}

impl CoreCacheMetrics {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_producer_call(&self) {
        self.producer_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_purge(&self) {
        self.purge_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of calls to `open`.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Number of `open` calls resolved without invoking the producer.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of times a producer was actually invoked.
    pub fn producer_calls(&self) -> u64 {
        self.producer_calls.load(Ordering::Relaxed)
    }

    /// Number of entries unlinked via expiry, force-expiry, or purge.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Number of `purge` calls made.
    pub fn purge_requests(&self) -> u64 {
        self.purge_requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = CoreCacheMetrics::default();
        assert_eq!(m.requests(), 0);
        assert_eq!(m.hits(), 0);
    }

    #[test]
    fn counters_increment() {
        let m = CoreCacheMetrics::default();
        m.record_request();
        m.record_request();
        m.record_hit();
        m.record_producer_call();
        m.record_eviction();
        m.record_purge();
        assert_eq!(m.requests(), 2);
        assert_eq!(m.hits(), 1);
        assert_eq!(m.producer_calls(), 1);
        assert_eq!(m.evictions(), 1);
        assert_eq!(m.purge_requests(), 1);
    }
}
