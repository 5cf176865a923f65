//! Per-key metadata and the entry state machine.

use std::time::Instant;

/// The state an [`Entry`] occupies at any given moment. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Freshly admitted, no value has ever been produced.
    Created,
    /// A producer is currently computing (or writing) the value.
    Updating,
    /// A value is present and readable from the back end.
    Updated,
    /// The entry is being torn down; `ref_count` must reach zero before unlink.
    Deleting,
    /// Terminal; observed only briefly between the last ref release and unlink.
    Deleted,
}

/// Per-key metadata tracked by the engine: recency, reference counting, and the
/// state machine that coordinates single-flight producer calls.
///
/// `Entry` does not itself hold the cached value — that lives in the back end.
/// It only holds what the engine needs to decide who may read, who must
/// produce, and when the entry becomes eligible for expiry.
#[derive(Debug)]
pub struct Entry<K> {
    key: K,
    ref_count: u32,
    used_count: u64,
    status: Status,
    expire: Instant,
    size: u64,
}

impl<K> Entry<K> {
    /// Creates a fresh `Created` entry for `key` with everything else zeroed.
    pub fn new(key: K, now: Instant) -> Self {
        Entry {
            key,
            ref_count: 0,
            used_count: 0,
            status: Status::Created,
            expire: now,
            size: 0,
        }
    }

    /// Creates an entry that already has a value, as used by
    /// [`crate::lifecycle`] when the back end reports a pre-existing artifact.
    /// Skips the `Created`/`Updating` transitional states entirely.
    pub fn new_preloaded(key: K, size: u64, expire: Instant) -> Self {
        Entry {
            key,
            ref_count: 0,
            used_count: 0,
            status: Status::Updated,
            expire,
            size,
        }
    }

    /// The key this entry tracks.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Current reference count. Zero is required before the entry may be unlinked.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub(crate) fn incr_ref_count(&mut self) {
        self.ref_count += 1;
    }

    pub(crate) fn decr_ref_count(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
    }

    /// Number of times this entry has been observed via the hit path.
    pub fn used_count(&self) -> u64 {
        self.used_count
    }

    pub(crate) fn incr_used_count(&mut self) {
        self.used_count += 1;
    }

    /// Deadline after which the entry is eligible for background expiry, absent
    /// outstanding references.
    pub fn expire(&self) -> Instant {
        self.expire
    }

    pub(crate) fn set_expire(&mut self, expire: Instant) {
        self.expire = expire;
    }

    /// Bytes charged to capacity by this entry. Zero until a producer completes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Current state.
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_created(&self) -> bool {
        self.status == Status::Created
    }

    pub fn is_updating(&self) -> bool {
        self.status == Status::Updating
    }

    /// True once a value is readable from the back end.
    pub fn is_usable(&self) -> bool {
        self.status == Status::Updated
    }

    pub fn is_deleting(&self) -> bool {
        self.status == Status::Deleting
    }

    /// True if the entry is being torn down or already gone.
    pub fn is_unusable(&self) -> bool {
        matches!(self.status, Status::Deleting | Status::Deleted)
    }

    /// Attempts `Created -> Updating`. Succeeds only from `Created`.
    #[must_use]
    pub(crate) fn mark_as_updating(&mut self) -> bool {
        if self.status == Status::Created {
            self.status = Status::Updating;
            true
        } else {
            false
        }
    }

    /// Resolves an in-flight `Updating` entry: `Updated` on success, back to
    /// `Created` on failure so a later caller may retry the producer.
    #[must_use]
    pub(crate) fn set_updating_result(&mut self, success: bool) -> bool {
        if self.status != Status::Updating {
            return false;
        }
        self.status = if success {
            Status::Updated
        } else {
            Status::Created
        };
        true
    }

    /// Attempts `Created | Updated -> Deleting`.
    #[must_use]
    pub(crate) fn mark_as_deleting(&mut self) -> bool {
        if matches!(self.status, Status::Created | Status::Updated) {
            self.status = Status::Deleting;
            true
        } else {
            false
        }
    }

    /// Like [`Entry::mark_as_deleting`] but idempotent if already `Deleting`.
    #[must_use]
    pub(crate) fn mark_as_deleting_if_necessary(&mut self) -> bool {
        if self.status == Status::Deleting {
            true
        } else {
            self.mark_as_deleting()
        }
    }

    /// Attempts `Deleting -> Deleted`.
    #[must_use]
    pub(crate) fn mark_as_deleted(&mut self) -> bool {
        if self.status == Status::Deleting {
            self.status = Status::Deleted;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn fresh_entry_is_created() {
        let e = Entry::new("k", Instant::now());
        assert!(e.is_created());
        assert_eq!(e.ref_count(), 0);
        assert_eq!(e.used_count(), 0);
    }

    #[test]
    fn updating_transitions() {
        let mut e = Entry::new("k", Instant::now());
        assert!(e.mark_as_updating());
        assert!(e.is_updating());
        // second attempt fails, already updating
        assert!(!e.mark_as_updating());
        assert!(e.set_updating_result(true));
        assert!(e.is_usable());
    }

    #[test]
    fn failed_update_returns_to_created() {
        let mut e = Entry::new("k", Instant::now());
        assert!(e.mark_as_updating());
        assert!(e.set_updating_result(false));
        assert!(e.is_created());
    }

    #[test]
    fn deleting_lifecycle() {
        let mut e = Entry::new("k", Instant::now());
        assert!(e.mark_as_updating());
        assert!(e.set_updating_result(true));
        assert!(e.mark_as_deleting());
        assert!(e.is_deleting());
        assert!(e.mark_as_deleting_if_necessary());
        assert!(e.mark_as_deleted());
        assert!(e.is_unusable());
    }

    #[test]
    fn cannot_delete_while_updating() {
        let mut e = Entry::new("k", Instant::now());
        assert!(e.mark_as_updating());
        assert!(!e.mark_as_deleting());
    }

    #[test]
    fn preloaded_entry_is_updated_directly() {
        let now = Instant::now();
        let e = Entry::new_preloaded("k", 42, now);
        assert!(e.is_usable());
        assert_eq!(e.size(), 42);
        assert_eq!(e.ref_count(), 0);
    }

    #[test]
    fn ref_count_saturates_at_zero() {
        let mut e = Entry::new("k", Instant::now());
        e.decr_ref_count();
        assert_eq!(e.ref_count(), 0);
        e.incr_ref_count();
        e.incr_ref_count();
        e.decr_ref_count();
        assert_eq!(e.ref_count(), 1);
    }
}
