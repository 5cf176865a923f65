//! Engine configuration, built and validated via [`EngineConfigBuilder`].

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::ConfigError;

/// Bounds and policy knobs for one [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) max_entry_count: NonZeroUsize,
    pub(crate) max_size: u64,
    pub(crate) min_uses: u64,
    pub(crate) max_inactive: Duration,
    pub(crate) lock_age: Duration,
    pub(crate) wait_count: u32,
    pub(crate) expire_interval: Duration,
    pub(crate) forced_expire_interval: Duration,
}

impl EngineConfig {
    /// Starts a builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Maximum number of entries the cache may hold.
    pub fn max_entry_count(&self) -> NonZeroUsize {
        self.max_entry_count
    }

    /// Maximum total bytes charged across all `Updated` entries.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Minimum number of observed accesses before a key is cached at all.
    pub fn min_uses(&self) -> u64 {
        self.min_uses
    }

    /// Seconds of inactivity after which an entry is eligible for expiry.
    pub fn max_inactive(&self) -> Duration {
        self.max_inactive
    }

    /// Maximum wait per attempt for a concurrent producer to finish.
    pub fn lock_age(&self) -> Duration {
        self.lock_age
    }

    /// Maximum number of wait attempts before giving up on a concurrent producer.
    pub fn wait_count(&self) -> u32 {
        self.wait_count
    }

    /// Sleep between manage-phase soft expiry passes.
    pub fn expire_interval(&self) -> Duration {
        self.expire_interval
    }

    /// Sleep between manage-phase hard expiry passes when nothing could be freed.
    pub fn forced_expire_interval(&self) -> Duration {
        self.forced_expire_interval
    }
}

/// Builder for [`EngineConfig`], in the style of a fluent `with_*` configuration
/// type: every setter returns `Self` and validation happens once, at `build()`.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    max_entry_count: Option<NonZeroUsize>,
    max_size: Option<u64>,
    min_uses: u64,
    max_inactive: Duration,
    lock_age: Duration,
    wait_count: u32,
    expire_interval: Duration,
    forced_expire_interval: Duration,
}

impl EngineConfigBuilder {
    /// Starts a builder pre-filled with the reference defaults: `min_uses = 1`,
    /// `max_inactive = 24h`, `lock_age = 400ms`, `wait_count = 5`,
    /// `expire_interval = 10s`, `forced_expire_interval = 1s`.
    pub fn new() -> Self {
        EngineConfigBuilder {
            max_entry_count: None,
            max_size: None,
            min_uses: 1,
            max_inactive: Duration::from_secs(24 * 60 * 60),
            lock_age: Duration::from_millis(400),
            wait_count: 5,
            expire_interval: Duration::from_secs(10),
            forced_expire_interval: Duration::from_secs(1),
        }
    }

    /// Maximum number of entries. Required.
    #[must_use]
    pub fn with_max_entry_count(mut self, max_entry_count: NonZeroUsize) -> Self {
        self.max_entry_count = Some(max_entry_count);
        self
    }

    /// Maximum total bytes charged across all `Updated` entries. Required.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Minimum observed accesses before a key is cached at all.
    #[must_use]
    pub fn with_min_uses(mut self, min_uses: u64) -> Self {
        self.min_uses = min_uses;
        self
    }

    /// Seconds of inactivity after which an entry becomes expiry-eligible.
    #[must_use]
    pub fn with_max_inactive(mut self, max_inactive: Duration) -> Self {
        self.max_inactive = max_inactive;
        self
    }

    /// Maximum wait per attempt for a concurrent producer to finish.
    #[must_use]
    pub fn with_lock_age(mut self, lock_age: Duration) -> Self {
        self.lock_age = lock_age;
        self
    }

    /// Maximum number of wait attempts before giving up on a concurrent producer.
    #[must_use]
    pub fn with_wait_count(mut self, wait_count: u32) -> Self {
        self.wait_count = wait_count;
        self
    }

    /// Sleep between manage-phase soft expiry passes.
    #[must_use]
    pub fn with_expire_interval(mut self, expire_interval: Duration) -> Self {
        self.expire_interval = expire_interval;
        self
    }

    /// Sleep between manage-phase hard expiry passes when nothing could be freed.
    #[must_use]
    pub fn with_forced_expire_interval(mut self, forced_expire_interval: Duration) -> Self {
        self.forced_expire_interval = forced_expire_interval;
        self
    }

    /// Validates and constructs the [`EngineConfig`].
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let max_entry_count = self
            .max_entry_count
            .ok_or(ConfigError::Missing("max_entry_count"))?;
        let max_size = self.max_size.ok_or(ConfigError::Missing("max_size"))?;
        if self.wait_count == 0 {
            return Err(ConfigError::Invalid {
                field: "wait_count",
                reason: "must be at least 1",
            });
        }
        Ok(EngineConfig {
            max_entry_count,
            max_size,
            min_uses: self.min_uses,
            max_inactive: self.max_inactive,
            lock_age: self.lock_age,
            wait_count: self.wait_count,
            expire_interval: self.expire_interval,
            forced_expire_interval: self.forced_expire_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_max_entry_count() {
        let err = EngineConfigBuilder::new()
            .with_max_size(100)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("max_entry_count"));
    }

    #[test]
    fn build_requires_max_size() {
        let err = EngineConfigBuilder::new()
            .with_max_entry_count(NonZeroUsize::new(1).unwrap())
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("max_size"));
    }

    #[test]
    fn build_rejects_zero_wait_count() {
        let err = EngineConfigBuilder::new()
            .with_max_entry_count(NonZeroUsize::new(1).unwrap())
            .with_max_size(100)
            .with_wait_count(0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                field: "wait_count",
                reason: "must be at least 1"
            }
        );
    }

    #[test]
    fn build_applies_defaults() {
        let cfg = EngineConfigBuilder::new()
            .with_max_entry_count(NonZeroUsize::new(10).unwrap())
            .with_max_size(1024)
            .build()
            .unwrap();
        assert_eq!(cfg.min_uses(), 1);
        assert_eq!(cfg.wait_count(), 5);
    }
}
