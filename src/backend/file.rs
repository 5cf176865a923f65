//! A sharded-directory filesystem [`Backend`], keyed by alphanumeric string keys.
//!
//! Keys are sharded into nested directories using their own trailing characters
//! (`levels`, e.g. `"1:2"` means: one directory named by the key's last
//! character, then inside it a directory named by the two characters before
//! that), so no single directory accumulates every key. Writes go through a
//! temp file in the same target directory followed by an atomic rename/persist,
//! so a reader never observes a partially written file.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{Backend, LoadSink};
use crate::error::{BackendError, ConfigError};

const TEMP_FILE_PREFIX: &str = "tempfile";
const DEFAULT_LEVELS: &str = "1:2";
const DEFAULT_LOAD_MAX_FILES: usize = 10_000;
const DEFAULT_LOAD_INTERVAL: f64 = 0.01;

/// Filesystem-backed [`Backend`] storing one file per key under a sharded
/// directory tree rooted at `base_path`.
#[derive(Debug)]
pub struct FileBackend {
    base_path: PathBuf,
    levels: Vec<usize>,
    load_max_files: usize,
    load_interval: f64,
}

impl FileBackend {
    fn generate_levels(spec: &str) -> Vec<usize> {
        let parsed: Option<Vec<usize>> = spec
            .split(':')
            .take(3)
            .map(|s| s.parse::<usize>().ok().filter(|&l| l <= 2))
            .collect();
        match parsed {
            Some(levels) if !levels.is_empty() => levels,
            _ => vec![1, 2],
        }
    }

    fn is_valid_key(&self, key: &str) -> bool {
        key.chars().all(|c| c.is_ascii_alphanumeric())
            && key.len() >= self.levels.iter().sum::<usize>()
    }

    /// Directory (and, unless `only_dir_part`, final file) path for `key`.
    fn generate_path(&self, key: &str, only_dir_part: bool) -> PathBuf {
        let mut path = self.base_path.clone();
        let mut end = key.len();
        let mut dirs = Vec::with_capacity(self.levels.len());
        for &level in &self.levels {
            let start = end - level;
            dirs.push(&key[start..end]);
            end = start;
        }
        for dir in dirs {
            path.push(dir);
        }
        if !only_dir_part {
            path.push(key);
        }
        path
    }

    fn is_valid_dir_name(name: &str, length: usize) -> bool {
        name.chars().count() == length && name.chars().all(|c| c.is_ascii_alphanumeric())
    }

    fn safe_remove_file(path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            log::error!("failed to remove {}: {}", path.display(), err);
        }
    }

    fn safe_remove_dir(path: &Path) {
        if let Err(err) = fs::remove_dir_all(path) {
            log::error!("failed to remove {}: {}", path.display(), err);
        }
    }

    /// Walks the sharded tree, cleaning up stray temp files, invalidly-named
    /// shard directories, and files that do not round-trip through
    /// [`FileBackend::generate_path`], and reporting everything valid to
    /// `sink`. Every `load_max_files` admitted entries, pauses via
    /// `sink.pause` so a large tree doesn't block `load()` uninterruptibly.
    fn walk(
        &self,
        dir: &Path,
        level: usize,
        sink: &mut dyn LoadSink<String>,
        count: &mut usize,
    ) -> Result<(), BackendError> {
        if !dir.is_dir() {
            return Ok(());
        }
        let entries = fs::read_dir(dir)?;
        if level <= self.levels.len() {
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_file() {
                    Self::safe_remove_file(&path);
                    continue;
                }
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !Self::is_valid_dir_name(&name, self.levels[level - 1]) {
                    Self::safe_remove_dir(&path);
                    continue;
                }
                self.walk(&path, level + 1, sink, count)?;
            }
        } else {
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    Self::safe_remove_dir(&path);
                    continue;
                }
                let name = entry.file_name();
                let name = name.to_string_lossy().into_owned();
                if name.starts_with(TEMP_FILE_PREFIX) {
                    Self::safe_remove_file(&path);
                    continue;
                }
                if self.generate_path(&name, false) != path {
                    Self::safe_remove_file(&path);
                    continue;
                }
                let size = match fs::metadata(&path) {
                    Ok(meta) => meta.len(),
                    Err(err) => {
                        log::error!("failed to stat {}: {}", path.display(), err);
                        continue;
                    }
                };
                if !sink.add_meta(name, size) {
                    Self::safe_remove_file(&path);
                }
                *count += 1;
                if *count >= self.load_max_files {
                    log::debug!("load_max_files reached, pausing {}s", self.load_interval);
                    sink.pause(self.load_interval);
                    *count = 0;
                }
            }
        }
        Ok(())
    }
}

impl Backend<String> for FileBackend {
    fn prepare(&self) -> Result<(), BackendError> {
        log::debug!("preparing FileBackend at {}", self.base_path.display());
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }

    fn finalize(&self) -> Result<(), BackendError> {
        log::debug!("FileBackend at {} finalized", self.base_path.display());
        Ok(())
    }

    fn load(&self, sink: &mut dyn LoadSink<String>) -> Result<(), BackendError> {
        let mut count = 0;
        self.walk(&self.base_path.clone(), 1, sink, &mut count)
    }

    fn read(&self, key: &String) -> Result<Vec<u8>, BackendError> {
        if !self.is_valid_key(key) {
            return Err(BackendError::InvalidKey(key.clone()));
        }
        let path = self.generate_path(key, false);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::KeyNotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &String, data: &[u8]) -> Result<(), BackendError> {
        if !self.is_valid_key(key) {
            return Err(BackendError::InvalidKey(key.clone()));
        }
        let dir = self.generate_path(key, true);
        fs::create_dir_all(&dir)?;
        let path = dir.join(key);
        let mut temp = NamedTempFile::with_prefix_in(TEMP_FILE_PREFIX, &dir)?;
        std::io::Write::write_all(&mut temp, data)?;
        temp.persist(&path)?;
        Ok(())
    }

    fn delete(&self, key: &String) -> Result<(), BackendError> {
        if !self.is_valid_key(key) {
            log::error!("invalid key {key}");
            return Ok(());
        }
        let path = self.generate_path(key, false);
        if path.is_file() {
            Self::safe_remove_file(&path);
        }
        Ok(())
    }
}

/// Builds a [`FileBackend`], validating required fields at [`FileBackendBuilder::build`] time.
#[derive(Debug, Default)]
pub struct FileBackendBuilder {
    base_path: Option<PathBuf>,
    levels: Option<String>,
    load_max_files: Option<usize>,
    load_interval: Option<f64>,
}

impl FileBackendBuilder {
    /// Creates a builder with no fields set except `levels`, `load_max_files`,
    /// and `load_interval`, which default to `"1:2"`, `10_000`, and `0.01`s.
    pub fn new() -> Self {
        FileBackendBuilder {
            base_path: None,
            levels: Some(DEFAULT_LEVELS.to_string()),
            load_max_files: Some(DEFAULT_LOAD_MAX_FILES),
            load_interval: Some(DEFAULT_LOAD_INTERVAL),
        }
    }

    /// Sets the root directory under which sharded artifacts are stored. Required.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    /// Sets the shard level spec, e.g. `"1:2"`. Each level must be 0, 1, or 2;
    /// at most 3 levels are honored.
    #[must_use]
    pub fn with_levels(mut self, levels: impl Into<String>) -> Self {
        self.levels = Some(levels.into());
        self
    }

    /// Sets how many files `load()` admits before pausing for `load_interval`,
    /// so a large on-disk tree doesn't block `load()` uninterruptibly.
    #[must_use]
    pub fn with_load_max_files(mut self, load_max_files: usize) -> Self {
        self.load_max_files = Some(load_max_files);
        self
    }

    /// Sets how long, in seconds, `load()` pauses every `load_max_files` entries.
    #[must_use]
    pub fn with_load_interval(mut self, load_interval: f64) -> Self {
        self.load_interval = Some(load_interval);
        self
    }

    /// Validates and constructs the [`FileBackend`].
    pub fn build(self) -> Result<FileBackend, ConfigError> {
        let base_path = self.base_path.ok_or(ConfigError::Missing("base_path"))?;
        let levels_spec = self.levels.unwrap_or_else(|| DEFAULT_LEVELS.to_string());
        let levels = FileBackend::generate_levels(&levels_spec);
        let load_max_files = self.load_max_files.unwrap_or(DEFAULT_LOAD_MAX_FILES);
        let load_interval = self.load_interval.unwrap_or(DEFAULT_LOAD_INTERVAL);
        Ok(FileBackend {
            base_path,
            levels,
            load_max_files,
            load_interval,
        })
    }
}
