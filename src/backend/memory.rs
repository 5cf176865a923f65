//! An in-memory [`Backend`], useful for tests, demos, and workloads that do not
//! need durability across process restarts.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use super::{Backend, LoadSink};
use crate::error::BackendError;

/// Stores values in a `Mutex`-guarded `HashMap`. `load()` reports whatever was
/// pre-seeded via [`MemoryBackend::seed`] before the lifecycle starts; nothing
/// is discovered automatically since there is no durable medium to scan.
#[derive(Debug)]
pub struct MemoryBackend<K> {
    data: Mutex<HashMap<K, Vec<u8>>>,
    seeded: Mutex<Vec<(K, u64, Vec<u8>)>>,
}

impl<K> MemoryBackend<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty backend.
    pub fn new() -> Self {
        MemoryBackend {
            data: Mutex::new(HashMap::new()),
            seeded: Mutex::new(Vec::new()),
        }
    }

    /// Registers `(key, size, bytes)` to be reported by the next `load()` call,
    /// as if it had been discovered on durable storage before startup.
    pub fn seed(&self, key: K, size: u64, bytes: Vec<u8>) {
        self.seeded.lock().push((key, size, bytes));
    }

    /// Number of values currently stored.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// True if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl<K> Default for MemoryBackend<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Backend<K> for MemoryBackend<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn prepare(&self) -> Result<(), BackendError> {
        log::debug!("preparing MemoryBackend");
        Ok(())
    }

    fn finalize(&self) -> Result<(), BackendError> {
        log::debug!("MemoryBackend finalized");
        Ok(())
    }

    fn load(&self, sink: &mut dyn LoadSink<K>) -> Result<(), BackendError> {
        let seeded = std::mem::take(&mut *self.seeded.lock());
        let mut data = self.data.lock();
        for (key, size, bytes) in seeded {
            data.insert(key.clone(), bytes);
            if !sink.add_meta(key.clone(), size) {
                data.remove(&key);
            }
        }
        Ok(())
    }

    fn read(&self, key: &K) -> Result<Vec<u8>, BackendError> {
        self.data
            .lock()
            .get(key)
            .cloned()
            .ok_or(BackendError::KeyNotFound)
    }

    fn write(&self, key: &K, data: &[u8]) -> Result<(), BackendError> {
        self.data.lock().insert(key.clone(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), BackendError> {
        self.data.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSink<K> {
        added: Vec<(K, u64)>,
        admit: bool,
    }

    impl<K> LoadSink<K> for VecSink<K> {
        fn add_meta(&mut self, key: K, size: u64) -> bool {
            self.added.push((key, size));
            self.admit
        }
        fn pause(&mut self, _seconds: f64) {}
    }

    #[test]
    fn write_read_delete_roundtrip() {
        let backend: MemoryBackend<String> = MemoryBackend::new();
        backend.write(&"k".to_string(), b"v").unwrap();
        assert_eq!(backend.read(&"k".to_string()).unwrap(), b"v");
        backend.delete(&"k".to_string()).unwrap();
        assert!(matches!(
            backend.read(&"k".to_string()),
            Err(BackendError::KeyNotFound)
        ));
    }

    #[test]
    fn delete_missing_key_is_idempotent() {
        let backend: MemoryBackend<String> = MemoryBackend::new();
        backend.delete(&"missing".to_string()).unwrap();
        backend.delete(&"missing".to_string()).unwrap();
    }

    #[test]
    fn load_reports_seeded_entries() {
        let backend: MemoryBackend<String> = MemoryBackend::new();
        backend.seed("a".to_string(), 3, b"abc".to_vec());
        backend.seed("b".to_string(), 3, b"def".to_vec());
        let mut sink = VecSink {
            added: Vec::new(),
            admit: true,
        };
        backend.load(&mut sink).unwrap();
        assert_eq!(sink.added.len(), 2);
        assert_eq!(backend.read(&"a".to_string()).unwrap(), b"abc");
    }

    #[test]
    fn load_removes_rejected_seed() {
        let backend: MemoryBackend<String> = MemoryBackend::new();
        backend.seed("a".to_string(), 3, b"abc".to_vec());
        let mut sink = VecSink {
            added: Vec::new(),
            admit: false,
        };
        backend.load(&mut sink).unwrap();
        assert!(matches!(
            backend.read(&"a".to_string()),
            Err(BackendError::KeyNotFound)
        ));
    }
}
