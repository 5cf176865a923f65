//! Pluggable storage back ends.
//!
//! The engine only ever calls a back end with the engine lock released, holding
//! a reference count on the corresponding entry to keep it alive meanwhile. A
//! `Backend` therefore only needs to be internally safe for concurrent access
//! per distinct key; the engine guarantees at most one concurrent `write` or
//! `delete` for a given key, though `read` may run concurrently across keys.

pub mod file;
pub mod memory;

use crate::error::BackendError;

/// Receives pre-existing artifacts discovered by [`Backend::load`] and lets the
/// back end cooperatively pause between batches.
///
/// This replaces the lazy generator-of-wait-times pattern: the lifecycle
/// worker implements `LoadSink` and drives the pause through its own
/// cancellable condition variable, so `stop()` can interrupt a load in progress.
pub trait LoadSink<K> {
    /// Registers a pre-existing artifact found for `key` with the given `size`.
    /// Returns `false` if admission failed (capacity exceeded); the back end
    /// should then typically delete the underlying artifact.
    fn add_meta(&mut self, key: K, size: u64) -> bool;

    /// Requests that the worker sleep for `seconds`, interruptible by `stop()`.
    fn pause(&mut self, seconds: f64);
}

/// Storage for the materialized values the engine's entries describe.
///
/// Implementations must be safe to share across threads (`Send + Sync`): the
/// engine holds one back end per engine instance and calls into it from
/// whichever caller thread currently owns the operation.
pub trait Backend<K>: Send + Sync {
    /// Called once before the lifecycle's background worker starts.
    fn prepare(&self) -> Result<(), BackendError>;

    /// Called once after the lifecycle's background worker has stopped.
    fn finalize(&self) -> Result<(), BackendError>;

    /// Discovers pre-existing artifacts, registering each with `sink`.
    fn load(&self, sink: &mut dyn LoadSink<K>) -> Result<(), BackendError>;

    /// Reads the bytes for `key`. Returns [`BackendError::KeyNotFound`] on a
    /// clean miss; any other error is surfaced to the caller unchanged.
    fn read(&self, key: &K) -> Result<Vec<u8>, BackendError>;

    /// Durably, atomically (at the key level) writes `data` for `key`.
    fn write(&self, key: &K, data: &[u8]) -> Result<(), BackendError>;

    /// Idempotently, best-effort deletes any data stored for `key`.
    fn delete(&self, key: &K) -> Result<(), BackendError>;
}
