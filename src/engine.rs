//! The core LRU engine: admission, the hit path, single-flight coordination,
//! capacity enforcement, and background expiry.
//!
//! `Engine<K>` owns only metadata — the ordered map, the intrusive deque, and
//! each entry's state machine and counters — guarded by one mutex. It knows
//! nothing about how values are serialized or stored; callers (the [`crate::Cache`]
//! facade) perform back-end I/O with the engine lock released and report the
//! outcome back via [`Engine::finish_update`]/[`Engine::finish_read`]. Eviction
//! paths that must delete the underlying artifact take a `delete` callback so
//! the engine can still enforce "lock released during I/O" without depending on
//! a concrete back end type.

use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::EngineConfig;
use crate::entry::Entry;
use crate::error::ReturnCode;
use crate::list::{List, NodeRef};
use crate::metrics::CoreCacheMetrics;
use crate::skiplist::SkipListMap;

type Node<K> = NodeRef<Entry<K>>;

struct EngineState<K> {
    map: SkipListMap<K, Node<K>>,
    deque: List<Entry<K>>,
    current_size: u64,
    current_entry_count: usize,
}

// SAFETY: `EngineState<K>` only exposes its raw `Node<K>` pointers through
// methods on `Engine` that require holding `Engine::state`'s mutex, and the
// pointers never escape that lock. It is therefore safe to move the whole
// structure (and hence send it) between threads whenever `K` itself is.
unsafe impl<K: Send> Send for EngineState<K> {}

/// The metadata half of a concurrent LRU cache: map + deque + entry states,
/// behind one mutex, with a shared condition variable for `Updating` waiters.
pub struct Engine<K> {
    state: Mutex<EngineState<K>>,
    update_cv: Condvar,
    config: EngineConfig,
    metrics: CoreCacheMetrics,
}

/// What the caller of [`Engine::acquire`] must do next, once the engine lock
/// has been released.
#[derive(Debug)]
pub enum Acquired<K> {
    /// Read the value from the back end; call [`Engine::finish_read`] afterward.
    Read(K),
    /// Run the producer and write the back end; call [`Engine::finish_update`] afterward.
    Produce(K),
    /// A return code terminal for this call; no further engine interaction needed.
    Done(ReturnCode),
}

impl<K> Engine<K>
where
    K: Ord + Clone + Send + 'static,
{
    /// Creates an empty engine under `config`.
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            state: Mutex::new(EngineState {
                map: SkipListMap::new(),
                deque: List::new(),
                current_size: 0,
                current_entry_count: 0,
            }),
            update_cv: Condvar::new(),
            config,
            metrics: CoreCacheMetrics::default(),
        }
    }

    /// Total bytes currently charged to `Updated` entries.
    pub fn current_size(&self) -> u64 {
        self.state.lock().current_size
    }

    /// Number of entries currently tracked (any status).
    pub fn current_entry_count(&self) -> usize {
        self.state.lock().current_entry_count
    }

    /// Request/hit/eviction counters for this engine.
    pub fn metrics(&self) -> &CoreCacheMetrics {
        &self.metrics
    }

    fn is_full(state: &EngineState<K>, config: &EngineConfig) -> bool {
        state.current_size >= config.max_size()
            || state.current_entry_count >= config.max_entry_count().get()
    }

    /// Registers a pre-existing artifact directly in `Updated` state, as used
    /// by the lifecycle manager's load phase. Returns `false` if admission
    /// would exceed capacity, in which case the caller should discard the
    /// underlying artifact.
    pub fn add_meta(&self, key: K, size: u64, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.current_entry_count >= self.config.max_entry_count().get() {
            return false;
        }
        if state.current_size + size > self.config.max_size() {
            return false;
        }
        let entry = Entry::new_preloaded(key.clone(), size, now + self.config.max_inactive());
        let node = state.deque.push_front(entry);
        state.map.insert(key, node);
        state.current_size += size;
        state.current_entry_count += 1;
        true
    }

    /// The hit path (`open` in the spec). Looks up or admits `key`, updates
    /// recency/use-count bookkeeping, and either hands back a terminal
    /// [`ReturnCode`] or tells the caller to read from / write to the back end.
    pub fn acquire(&self, key: K, delete: &dyn Fn(&K), now: Instant) -> Acquired<K> {
        let mut state = self.state.lock();

        let node = match state.map.get(&key).copied() {
            Some(node) => node,
            None => {
                if Self::is_full(&state, &self.config) {
                    MutexGuard::unlocked(&mut state, || {
                        self.force_expire_impl(Some(20), delete);
                    });
                    if Self::is_full(&state, &self.config) {
                        return Acquired::Done(ReturnCode::ErrorCacheOverflow);
                    }
                }
                let entry = Entry::new(key.clone(), now);
                let node = state.deque.push_front(entry);
                state.map.insert(key.clone(), node);
                state.current_entry_count += 1;
                node
            }
        };

        // SAFETY: `node` was just looked up from or inserted into `state.map`,
        // so it is live and linked into `state.deque`.
        let entry = unsafe { state.deque.get_mut(node) };
        if entry.is_unusable() {
            return Acquired::Done(ReturnCode::ErrorEntryUnusable);
        }

        entry.incr_used_count();
        entry.set_expire(now + self.config.max_inactive());
        // SAFETY: node is live and linked, as above.
        unsafe { state.deque.move_to_front(node) };
        let entry = unsafe { state.deque.get_mut(node) };

        if entry.used_count() < self.config.min_uses() {
            return Acquired::Done(ReturnCode::ErrorUnreachMinUses);
        }

        entry.incr_ref_count();

        if entry.is_usable() {
            return Acquired::Read(key);
        }

        if entry.mark_as_updating() {
            return Acquired::Produce(key);
        }

        // Status is Updating: someone else is producing. Wait for them.
        for _ in 0..self.config.wait_count() {
            self.update_cv.wait_for(&mut state, self.config.lock_age());
            // SAFETY: node remains live; nothing unlinks a referenced entry.
            let entry = unsafe { state.deque.get_mut(node) };
            if entry.is_usable() {
                return Acquired::Read(key);
            }
            if entry.is_created() && entry.mark_as_updating() {
                return Acquired::Produce(key);
            }
        }

        // SAFETY: node remains live.
        let entry = unsafe { state.deque.get_mut(node) };
        entry.decr_ref_count();
        if entry.is_deleting() && entry.ref_count() == 0 {
            self.unlink_locked(&mut state, node, delete);
            return Acquired::Done(ReturnCode::ErrorEntryUnusable);
        }
        Acquired::Done(ReturnCode::ErrorWaitCountReached)
    }

    /// Completes the read path after [`Acquired::Read`]: releases the
    /// reference taken by `acquire`, optionally marking the entry for deletion
    /// when the back end reports the value missing (a metadata-present,
    /// data-missing race).
    pub fn finish_read(&self, key: &K, should_purge: bool, delete: &dyn Fn(&K)) {
        let mut state = self.state.lock();
        let Some(node) = state.map.get(key).copied() else {
            return;
        };
        // SAFETY: node came from a successful map lookup just above.
        let entry = unsafe { state.deque.get_mut(node) };
        entry.decr_ref_count();
        if should_purge {
            let _ = entry.mark_as_deleting_if_necessary();
        }
        let entry = unsafe { state.deque.get(node) };
        if entry.is_deleting() && entry.ref_count() == 0 {
            self.unlink_locked(&mut state, node, delete);
        }
    }

    /// Completes the produce path after [`Acquired::Produce`]: releases the
    /// reference taken by `acquire`, resolves `Updating -> Updated` (or back to
    /// `Created` on failure), charges `size` on success, and wakes waiters.
    pub fn finish_update(&self, key: &K, success: bool, size: u64) {
        let mut state = self.state.lock();
        let Some(node) = state.map.get(key).copied() else {
            return;
        };
        // SAFETY: node came from a successful map lookup just above.
        let entry = unsafe { state.deque.get_mut(node) };
        entry.decr_ref_count();
        let _ = entry.set_updating_result(success);
        if success {
            entry.set_size(size);
            state.current_size += size;
        }
        self.update_cv.notify_all();
    }

    /// Soft expiry pass: walks from the tail, refreshing and skipping
    /// referenced entries, unlinking unreferenced ones past their deadline.
    /// Stops after one full sweep back to the first refreshed node (the
    /// "sentinel"), never looping indefinitely on a fully pinned cache.
    pub fn expire(&self, delete: &dyn Fn(&K), now: Instant) {
        let mut state = self.state.lock();
        let mut sentinel: Option<Node<K>> = None;
        while let Some(node) = state.deque.peek_back() {
            if sentinel == Some(node) {
                break;
            }
            // SAFETY: node came from `peek_back` on `state.deque`.
            let entry = unsafe { state.deque.get_mut(node) };
            if entry.expire() > now {
                break;
            }
            if entry.ref_count() == 0 {
                self.unlink_locked(&mut state, node, delete);
                sentinel = None;
                continue;
            }
            entry.set_expire(now + self.config.max_inactive());
            // SAFETY: node is live and linked.
            unsafe { state.deque.move_to_front(node) };
            if sentinel.is_none() {
                sentinel = Some(node);
            }
        }
    }

    /// Hard expiry pass: ignores `expire` deadlines, evicting the first
    /// unreferenced tail-ward entry found. Returns `true` iff something was
    /// unlinked. `tries`, if given, bounds the number of nodes visited; the
    /// sentinel sweep is still the authority for termination on a fully
    /// referenced cache.
    pub fn force_expire(&self, tries: Option<u32>, delete: &dyn Fn(&K)) -> bool {
        self.force_expire_impl(tries, delete)
    }

    fn force_expire_impl(&self, mut tries: Option<u32>, delete: &dyn Fn(&K)) -> bool {
        let mut state = self.state.lock();
        let mut sentinel: Option<Node<K>> = None;
        let now = Instant::now();
        loop {
            let Some(node) = state.deque.peek_back() else {
                return false;
            };
            if sentinel == Some(node) {
                return false;
            }
            // SAFETY: node came from `peek_back` on `state.deque`.
            let entry = unsafe { state.deque.get_mut(node) };
            if entry.ref_count() == 0 {
                self.unlink_locked(&mut state, node, delete);
                return true;
            }
            entry.set_expire(now + self.config.max_inactive());
            // SAFETY: node is live and linked.
            unsafe { state.deque.move_to_front(node) };
            if sentinel.is_none() {
                sentinel = Some(node);
            }
            if let Some(t) = tries {
                if t <= 1 {
                    return false;
                }
                tries = Some(t - 1);
            }
        }
    }

    /// Removes `key` outright. `ERROR_KEY_NOT_EXISTS` if absent,
    /// `ERROR_KEY_UPDATING` if a producer is currently in flight, `Ok`
    /// (idempotently) otherwise.
    pub fn purge(&self, key: &K, delete: &dyn Fn(&K)) -> ReturnCode {
        let mut state = self.state.lock();
        let Some(node) = state.map.get(key).copied() else {
            return ReturnCode::ErrorKeyNotExists;
        };
        // SAFETY: node came from a successful map lookup just above.
        let entry = unsafe { state.deque.get_mut(node) };
        if entry.is_unusable() {
            return ReturnCode::Ok;
        }
        if entry.is_updating() {
            return ReturnCode::ErrorKeyUpdating;
        }
        let _ = entry.mark_as_deleting();
        let ref_count = entry.ref_count();
        if ref_count == 0 {
            self.unlink_locked(&mut state, node, delete);
        }
        ReturnCode::Ok
    }

    /// Runs the unlink protocol on an already-identified, zero-referenced (or
    /// about-to-be) node: mark `Deleting`, pin with a ref, release the lock to
    /// call `delete`, then reacquire, unpin, mark `Deleted`, and remove from
    /// both the map and deque.
    fn unlink_locked(
        &self,
        state: &mut MutexGuard<'_, EngineState<K>>,
        node: Node<K>,
        delete: &dyn Fn(&K),
    ) {
        let key = {
            // SAFETY: node is live and linked; caller guarantees ref_count == 0
            // or is in the process of driving it there.
            let entry = unsafe { state.deque.get_mut(node) };
            if entry.ref_count() > 0 {
                log::error!("unlink_locked called with nonzero ref_count");
                return;
            }
            if !entry.mark_as_deleting_if_necessary() {
                log::error!("entry status cannot transition to Deleting");
                return;
            }
            entry.incr_ref_count();
            entry.key().clone()
        };

        MutexGuard::unlocked(state, || {
            delete(&key);
        });

        // SAFETY: node is still live; nothing else touches a Deleting entry
        // with ref_count > 0.
        let size = {
            let entry = unsafe { state.deque.get_mut(node) };
            entry.decr_ref_count();
            let _ = entry.mark_as_deleted();
            entry.size()
        };
        state.current_size = state.current_size.saturating_sub(size);
        state.current_entry_count -= 1;
        state.map.remove(&key);
        self.metrics.record_eviction();
        // SAFETY: node is still linked into the deque and is about to be
        // dropped from every other structure that referenced it.
        unsafe {
            state.deque.unlink(node);
        }
    }
}

impl<K> std::fmt::Debug for Engine<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn cfg(max_entry_count: usize, max_size: u64) -> EngineConfig {
        EngineConfig::builder()
            .with_max_entry_count(NonZeroUsize::new(max_entry_count).unwrap())
            .with_max_size(max_size)
            .build()
            .unwrap()
    }

    #[test]
    fn miss_then_produce_then_hit() {
        let engine: Engine<String> = Engine::new(cfg(10, 1024));
        let now = Instant::now();
        let noop = |_: &String| {};
        match engine.acquire("a".to_string(), &noop, now) {
            Acquired::Produce(k) => {
                engine.finish_update(&k, true, 5);
            }
            other => panic!("expected Produce, got {other:?}"),
        }
        match engine.acquire("a".to_string(), &noop, now) {
            Acquired::Read(_) => {}
            other => panic!("expected Read, got {other:?}"),
        }
        assert_eq!(engine.current_size(), 5);
        assert_eq!(engine.current_entry_count(), 1);
    }

    #[test]
    fn min_uses_gate_bypasses_cache() {
        let config = EngineConfig::builder()
            .with_max_entry_count(NonZeroUsize::new(10).unwrap())
            .with_max_size(1024)
            .with_min_uses(2)
            .build()
            .unwrap();
        let engine: Engine<String> = Engine::new(config);
        let now = Instant::now();
        let noop = |_: &String| {};
        match engine.acquire("k".to_string(), &noop, now) {
            Acquired::Done(ReturnCode::ErrorUnreachMinUses) => {}
            other => panic!("expected ErrorUnreachMinUses, got {other:?}"),
        }
        match engine.acquire("k".to_string(), &noop, now) {
            Acquired::Produce(_) => {}
            other => panic!("expected Produce, got {other:?}"),
        }
    }

    #[test]
    fn capacity_refusal_when_full_and_pinned() {
        let engine: Engine<String> = Engine::new(cfg(1, 1024));
        let now = Instant::now();
        let noop = |_: &String| {};
        // Admit and pin "a" by leaving it in Updating (never finish_update).
        match engine.acquire("a".to_string(), &noop, now) {
            Acquired::Produce(_) => {}
            other => panic!("expected Produce, got {other:?}"),
        }
        match engine.acquire("b".to_string(), &noop, now) {
            Acquired::Done(ReturnCode::ErrorCacheOverflow) => {}
            other => panic!("expected ErrorCacheOverflow, got {other:?}"),
        }
    }

    #[test]
    fn purge_missing_key_then_present_key() {
        let engine: Engine<String> = Engine::new(cfg(10, 1024));
        let noop = |_: &String| {};
        assert!(matches!(
            engine.purge(&"missing".to_string(), &noop),
            ReturnCode::ErrorKeyNotExists
        ));
        let now = Instant::now();
        match engine.acquire("a".to_string(), &noop, now) {
            Acquired::Produce(k) => engine.finish_update(&k, true, 1),
            _ => panic!(),
        }
        assert!(matches!(
            engine.purge(&"a".to_string(), &noop),
            ReturnCode::Ok
        ));
        assert_eq!(engine.current_entry_count(), 0);
        // idempotent: key no longer exists
        assert!(matches!(
            engine.purge(&"a".to_string(), &noop),
            ReturnCode::ErrorKeyNotExists
        ));
    }

    #[test]
    fn purge_rejects_in_flight_update() {
        let engine: Engine<String> = Engine::new(cfg(10, 1024));
        let noop = |_: &String| {};
        let now = Instant::now();
        match engine.acquire("a".to_string(), &noop, now) {
            Acquired::Produce(_) => {}
            _ => panic!(),
        }
        assert!(matches!(
            engine.purge(&"a".to_string(), &noop),
            ReturnCode::ErrorKeyUpdating
        ));
    }

    #[test]
    fn add_meta_inserts_directly_as_updated() {
        let engine: Engine<String> = Engine::new(cfg(10, 1024));
        let now = Instant::now();
        assert!(engine.add_meta("preexisting".to_string(), 7, now));
        assert_eq!(engine.current_size(), 7);
        let noop = |_: &String| {};
        match engine.acquire("preexisting".to_string(), &noop, now) {
            Acquired::Read(_) => {}
            other => panic!("expected Read, got {other:?}"),
        }
    }

    #[test]
    fn add_meta_rejects_over_capacity() {
        let engine: Engine<String> = Engine::new(cfg(1, 10));
        let now = Instant::now();
        assert!(engine.add_meta("a".to_string(), 5, now));
        assert!(!engine.add_meta("b".to_string(), 5, now));
        assert_eq!(engine.current_entry_count(), 1);
    }

    #[test]
    fn expire_evicts_past_deadline_unreferenced_entries() {
        let config = EngineConfig::builder()
            .with_max_entry_count(NonZeroUsize::new(10).unwrap())
            .with_max_size(1024)
            .with_max_inactive(Duration::from_secs(0))
            .build()
            .unwrap();
        let engine: Engine<String> = Engine::new(config);
        let now = Instant::now();
        assert!(engine.add_meta("old".to_string(), 1, now));
        let noop = |_: &String| {};
        engine.expire(&noop, now + Duration::from_millis(1));
        assert_eq!(engine.current_entry_count(), 0);
    }

    #[test]
    fn force_expire_evicts_even_before_deadline() {
        let engine: Engine<String> = Engine::new(cfg(10, 1024));
        let now = Instant::now();
        assert!(engine.add_meta("fresh".to_string(), 1, now));
        let noop = |_: &String| {};
        assert!(engine.force_expire(None, &noop));
        assert_eq!(engine.current_entry_count(), 0);
    }

    #[test]
    fn force_expire_on_empty_engine_returns_false() {
        let engine: Engine<String> = Engine::new(cfg(10, 1024));
        let noop = |_: &String| {};
        assert!(!engine.force_expire(None, &noop));
    }
}
