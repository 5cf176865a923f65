//! The `WAITING -> STARTING -> LOADING -> LOADED -> STOPPING -> STOPPED` state
//! machine and its single background worker thread.
//!
//! The worker runs two phases in sequence: Load (drive the back end's
//! [`Backend::load`], admitting pre-existing artifacts via
//! [`Engine::add_meta`]) and Manage (repeated soft/hard expiry passes). Both
//! phases sleep on a cancellable condition variable so `stop()` can interrupt
//! them promptly instead of waiting out a full interval.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{Backend, LoadSink};
use crate::config::EngineConfig;
use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Starting,
    Loading,
    Loaded,
    Stopping,
    Stopped,
}

/// Drives one [`Engine`]'s background lifecycle: loading pre-existing data
/// from the back end, then periodically expiring stale entries.
pub struct Lifecycle<K, B> {
    engine: Arc<Engine<K>>,
    backend: Arc<B>,
    config: EngineConfig,
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K, B> Lifecycle<K, B>
where
    K: Ord + Clone + Send + 'static,
    B: Backend<K> + 'static,
{
    pub(crate) fn new(engine: Arc<Engine<K>>, backend: Arc<B>, config: EngineConfig) -> Self {
        Lifecycle {
            engine,
            backend,
            config,
            state: Arc::new(Mutex::new(State::Waiting)),
            cv: Arc::new(Condvar::new()),
            worker: Mutex::new(None),
        }
    }

    /// True once the load phase has completed and the manage phase is running.
    pub fn is_usable(&self) -> bool {
        *self.state.lock() == State::Loaded
    }

    /// Blocks until the state becomes `Loaded`, `Stopping`, or `Stopped` (or
    /// `timeout` elapses). Returns `true` iff the observed state is `Loaded`.
    pub fn wait_for_usable(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let deadline = Instant::now() + timeout;
        loop {
            match *state {
                State::Loaded => return true,
                State::Stopping | State::Stopped => return false,
                _ => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return *state == State::Loaded;
            }
            self.cv.wait_for(&mut state, remaining);
        }
    }

    /// Starts the background worker. No-op unless the state is `Waiting` or `Stopped`.
    pub fn start(&self) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Waiting | State::Stopped) {
                return;
            }
            *state = State::Starting;
        }
        if let Err(err) = self.backend.prepare() {
            log::error!("backend prepare failed: {err}");
        }
        {
            *self.state.lock() = State::Loading;
        }

        let engine = Arc::clone(&self.engine);
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        let cv = Arc::clone(&self.cv);
        let handle =
            thread::spawn(move || run_worker(&engine, backend.as_ref(), &config, &state, &cv));
        *self.worker.lock() = Some(handle);
        log::info!("lifecycle started");
    }

    /// Transitions to `Stopping`, wakes the worker, and joins it (bounded by
    /// `timeout` if given), then calls the back end's `finalize`. No-op unless
    /// the state is `Loading` or `Loaded`.
    pub fn stop(&self, timeout: Option<Duration>) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Loading | State::Loaded) {
                return;
            }
            *state = State::Stopping;
        }
        self.cv.notify_all();

        let stopped = {
            let mut state = self.state.lock();
            match timeout {
                Some(budget) => {
                    let deadline = Instant::now() + budget;
                    while *state != State::Stopped {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            break;
                        }
                        self.cv.wait_for(&mut state, remaining);
                    }
                    *state == State::Stopped
                }
                None => {
                    while *state != State::Stopped {
                        self.cv.wait(&mut state);
                    }
                    true
                }
            }
        };

        if !stopped {
            log::error!("worker thread still running after stop join timeout");
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("lifecycle worker thread panicked");
            }
        }
        if let Err(err) = self.backend.finalize() {
            log::error!("backend finalize failed: {err}");
        }
        log::info!("lifecycle stopped");
    }
}

fn cancellable_sleep(state: &Mutex<State>, cv: &Condvar, dur: Duration) -> bool {
    let mut guard = state.lock();
    if *guard == State::Stopping {
        return true;
    }
    cv.wait_for(&mut guard, dur);
    *guard == State::Stopping
}

struct WorkerSink<'a, K> {
    engine: &'a Engine<K>,
    state: &'a Mutex<State>,
    cv: &'a Condvar,
}

impl<'a, K> LoadSink<K> for WorkerSink<'a, K>
where
    K: Ord + Clone + Send + 'static,
{
    fn add_meta(&mut self, key: K, size: u64) -> bool {
        self.engine.add_meta(key, size, Instant::now())
    }

    fn pause(&mut self, seconds: f64) {
        cancellable_sleep(
            self.state,
            self.cv,
            Duration::from_secs_f64(seconds.max(0.0)),
        );
    }
}

fn run_worker<K, B>(
    engine: &Engine<K>,
    backend: &B,
    config: &EngineConfig,
    state: &Arc<Mutex<State>>,
    cv: &Arc<Condvar>,
) where
    K: Ord + Clone + Send + 'static,
    B: Backend<K>,
{
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut sink = WorkerSink {
            engine,
            state: state.as_ref(),
            cv: cv.as_ref(),
        };
        if let Err(err) = backend.load(&mut sink) {
            log::error!("load phase failed: {err}");
            if let Err(ferr) = backend.finalize() {
                log::error!("backend finalize failed: {ferr}");
            }
            *state.lock() = State::Stopping;
            cv.notify_all();
            return;
        }
        {
            let mut s = state.lock();
            if *s == State::Loading {
                *s = State::Loaded;
            }
        }
        cv.notify_all();
        log::debug!("lifecycle entered Loaded");

        let delete = |key: &K| {
            if let Err(err) = backend.delete(key) {
                log::error!("delete during manage failed: {err}");
            }
        };

        loop {
            if *state.lock() == State::Stopping {
                break;
            }
            engine.expire(&delete, Instant::now());
            while engine.current_size() > config.max_size() {
                if *state.lock() == State::Stopping {
                    break;
                }
                if !engine.force_expire(None, &delete)
                    && cancellable_sleep(state, cv, config.forced_expire_interval())
                {
                    break;
                }
            }
            if cancellable_sleep(state, cv, config.expire_interval()) {
                break;
            }
        }
    }));

    if result.is_err() {
        log::error!("lifecycle manage loop panicked");
    }
    *state.lock() = State::Stopped;
    cv.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use std::num::NonZeroUsize;

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .with_max_entry_count(NonZeroUsize::new(10).unwrap())
            .with_max_size(1024)
            .with_expire_interval(Duration::from_millis(5))
            .with_forced_expire_interval(Duration::from_millis(5))
            .build()
            .unwrap()
    }

    #[test]
    fn start_then_stop_reaches_loaded_then_stopped() {
        let engine = Arc::new(Engine::<String>::new(config()));
        let backend = Arc::new(MemoryBackend::<String>::new());
        let lifecycle = Lifecycle::new(engine, backend, config());
        lifecycle.start();
        assert!(lifecycle.wait_for_usable(Duration::from_secs(2)));
        assert!(lifecycle.is_usable());
        lifecycle.stop(Some(Duration::from_secs(2)));
        assert!(!lifecycle.is_usable());
    }

    #[test]
    fn load_admits_seeded_entries_before_becoming_usable() {
        let engine = Arc::new(Engine::<String>::new(config()));
        let backend = Arc::new(MemoryBackend::<String>::new());
        backend.seed("preexisting".to_string(), 4, b"data".to_vec());
        let lifecycle = Lifecycle::new(Arc::clone(&engine), backend, config());
        lifecycle.start();
        assert!(lifecycle.wait_for_usable(Duration::from_secs(2)));
        assert_eq!(engine.current_entry_count(), 1);
        lifecycle.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let engine = Arc::new(Engine::<String>::new(config()));
        let backend = Arc::new(MemoryBackend::<String>::new());
        let lifecycle = Lifecycle::new(engine, backend, config());
        lifecycle.stop(Some(Duration::from_millis(50)));
        assert!(!lifecycle.is_usable());
    }

    #[derive(Debug)]
    struct FailingLoadBackend;

    impl Backend<String> for FailingLoadBackend {
        fn prepare(&self) -> Result<(), crate::error::BackendError> {
            Ok(())
        }

        fn finalize(&self) -> Result<(), crate::error::BackendError> {
            Ok(())
        }

        fn load(&self, _sink: &mut dyn LoadSink<String>) -> Result<(), crate::error::BackendError> {
            Err(crate::error::BackendError::InvalidKey("boom".to_string()))
        }

        fn read(&self, _key: &String) -> Result<Vec<u8>, crate::error::BackendError> {
            Err(crate::error::BackendError::KeyNotFound)
        }

        fn write(&self, _key: &String, _data: &[u8]) -> Result<(), crate::error::BackendError> {
            Ok(())
        }

        fn delete(&self, _key: &String) -> Result<(), crate::error::BackendError> {
            Ok(())
        }
    }

    #[test]
    fn load_failure_stops_the_lifecycle_instead_of_becoming_usable() {
        let engine = Arc::new(Engine::<String>::new(config()));
        let backend = Arc::new(FailingLoadBackend);
        let lifecycle = Lifecycle::new(engine, backend, config());
        lifecycle.start();

        // The worker never reaches `Loaded`; it transitions straight to
        // `Stopped`, so `wait_for_usable` must return false rather than hang.
        assert!(!lifecycle.wait_for_usable(Duration::from_secs(2)));
        assert!(!lifecycle.is_usable());
    }
}
