//! Error types and observable return codes.

use thiserror::Error;

/// Observable outcomes of [`crate::engine::Engine::open`](crate::engine::Engine) and
/// [`crate::engine::Engine::purge`](crate::engine::Engine) that do not themselves carry a value.
///
/// `ResponsibleForUpdating` is an internal signal used between the hit path and the
/// call site that actually invokes the producer; it is never returned to a caller of
/// the public API, but it shares this enum because it participates in the same state
/// machine as the other codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReturnCode {
    /// The entry was found and its value is ready to read.
    Ok,
    /// The entry exists but is being deleted or has been deleted.
    ErrorEntryUnusable,
    /// The key has not been observed `min_uses` times yet; bypass the cache.
    ErrorUnreachMinUses,
    /// A concurrent producer did not finish within the configured wait budget.
    ErrorWaitCountReached,
    /// The cache is full and a forced eviction pass could not free room.
    ErrorCacheOverflow,
    /// `purge` was called for a key that is not present.
    ErrorKeyNotExists,
    /// `purge` was called for a key whose producer is currently in flight.
    ErrorKeyUpdating,
    /// Internal: the caller assumed responsibility for running the producer.
    ResponsibleForUpdating,
}

/// Errors surfaced by [`crate::engine::Engine::open`](crate::engine::Engine).
///
/// `E` is the error type of the caller-supplied producer. Variants without a payload
/// correspond 1:1 to the non-`Ok` members of [`ReturnCode`]; `Producer`, `Io`, and
/// `Serialize` wrap failures from outside the engine's own state machine.
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// See [`ReturnCode::ErrorEntryUnusable`].
    #[error("entry is unusable (being deleted)")]
    EntryUnusable,
    /// See [`ReturnCode::ErrorUnreachMinUses`].
    #[error("minimum use count not yet reached")]
    UnreachMinUses,
    /// See [`ReturnCode::ErrorWaitCountReached`].
    #[error("wait count reached before producer completed")]
    WaitCountReached,
    /// See [`ReturnCode::ErrorCacheOverflow`].
    #[error("cache is full and could not be expired to make room")]
    CacheOverflow,
    /// See [`ReturnCode::ErrorKeyNotExists`].
    #[error("key does not exist")]
    KeyNotExists,
    /// See [`ReturnCode::ErrorKeyUpdating`].
    #[error("key is currently being updated")]
    KeyUpdating,
    /// The back end failed while reading, writing, or deleting the value.
    #[error("back end error: {0}")]
    Backend(#[from] BackendError),
    /// The caller-supplied producer returned an error.
    #[error("producer failed: {0}")]
    Producer(E),
    /// The serializer failed to encode or decode a value.
    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Errors returned by a [`crate::backend::Backend`] implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// `read` found no value for the given key. This is a normal, expected outcome
    /// (a cache miss at the storage layer) and is handled specially by the engine.
    #[error("key not found in back end")]
    KeyNotFound,
    /// Any I/O failure while accessing the underlying storage.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A temp file could not be atomically persisted into place.
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
    /// The key is not valid for this back end (e.g. too short, non-alphanumeric).
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Errors raised while building an [`crate::config::EngineConfig`] or
/// [`crate::backend::file::FileBackend`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required builder field was never set.
    #[error("missing required field: {0}")]
    Missing(&'static str),
    /// A field was set but fails a validation rule.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}
