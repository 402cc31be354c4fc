//! Durable key–value storage for capture progress.
//!
//! The capture flow writes through on every transition, so a reload resumes
//! at the right step with the right images. Three keys are used, all string
//! valued; absence of a key means "not captured yet".
//!
//! [`FileStore`] keeps the whole map in one JSON file and replaces it
//! atomically (temp file in the same directory, then rename): a crash mid-way
//! leaves either the old snapshot or the new one, never a torn file.

use crate::error::DocScanError;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const FRONT_IMAGE_KEY: &str = "front_image";
pub const BACK_IMAGE_KEY: &str = "back_image";
pub const CURRENT_STEP_KEY: &str = "current_step";

/// One mutation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set(&'static str, String),
    Remove(&'static str),
}

/// String-valued durable storage.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, DocScanError>;

    /// Apply a batch of mutations. Implementations should make the batch
    /// all-or-nothing where the medium allows it.
    fn apply(&self, ops: &[StoreOp]) -> Result<(), DocScanError>;

    fn set(&self, key: &'static str, value: String) -> Result<(), DocScanError> {
        self.apply(&[StoreOp::Set(key, value)])
    }

    fn remove(&self, key: &'static str) -> Result<(), DocScanError> {
        self.apply(&[StoreOp::Remove(key)])
    }
}

fn apply_ops(map: &mut BTreeMap<String, String>, ops: &[StoreOp]) {
    for op in ops {
        match op {
            StoreOp::Set(key, value) => {
                map.insert((*key).to_string(), value.clone());
            }
            StoreOp::Remove(key) => {
                map.remove(*key);
            }
        }
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Process-lifetime store, for tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keys currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, DocScanError> {
        Ok(self.lock().get(key).cloned())
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<(), DocScanError> {
        apply_ops(&mut self.lock(), ops);
        Ok(())
    }
}

// ── JSON file ────────────────────────────────────────────────────────────

/// Store backed by a single JSON object file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store; the file and its parent directory
    /// are created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DocScanError> {
        let path = path.into();
        let map = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| DocScanError::Storage {
                detail: format!("'{}' is not a capture state file: {}", path.display(), e),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(DocScanError::Storage {
                    detail: format!("failed to read '{}': {}", path.display(), e),
                })
            }
        };
        debug!("Opened capture store {} ({} keys)", path.display(), map.len());
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_atomic(&self, map: &BTreeMap<String, String>) -> Result<(), DocScanError> {
        let storage_err = |what: &str, e: &dyn std::fmt::Display| DocScanError::Storage {
            detail: format!("failed to {} '{}': {}", what, self.path.display(), e),
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| storage_err("create parent of", &e))?;

        let json = serde_json::to_vec_pretty(map).map_err(|e| storage_err("serialise", &e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| storage_err("stage", &e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| storage_err("write", &e))?;
        tmp.persist(&self.path)
            .map_err(|e| storage_err("replace", &e.error))?;
        Ok(())
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, DocScanError> {
        Ok(self.lock().get(key).cloned())
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<(), DocScanError> {
        let mut map = self.lock();
        let mut next = map.clone();
        apply_ops(&mut next, ops);
        if next == *map {
            return Ok(());
        }
        self.write_atomic(&next)?;
        *map = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get(FRONT_IMAGE_KEY).unwrap(), None);
        store.set(FRONT_IMAGE_KEY, "a".into()).unwrap();
        assert_eq!(store.get(FRONT_IMAGE_KEY).unwrap().as_deref(), Some("a"));
        store.remove(FRONT_IMAGE_KEY).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        store
            .apply(&[
                StoreOp::Set(CURRENT_STEP_KEY, "back".into()),
                StoreOp::Set(CURRENT_STEP_KEY, "ready".into()),
                StoreOp::Set(BACK_IMAGE_KEY, "b".into()),
                StoreOp::Remove(BACK_IMAGE_KEY),
            ])
            .unwrap();
        assert_eq!(store.keys(), vec![CURRENT_STEP_KEY.to_string()]);
        assert_eq!(store.get(CURRENT_STEP_KEY).unwrap().as_deref(), Some("ready"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        {
            let store = FileStore::open(&path).unwrap();
            store
                .apply(&[
                    StoreOp::Set(FRONT_IMAGE_KEY, "front".into()),
                    StoreOp::Set(CURRENT_STEP_KEY, "back".into()),
                ])
                .unwrap();
        }
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(FRONT_IMAGE_KEY).unwrap().as_deref(), Some("front"));
        assert_eq!(reopened.get(CURRENT_STEP_KEY).unwrap().as_deref(), Some("back"));
        assert_eq!(reopened.get(BACK_IMAGE_KEY).unwrap(), None);
    }

    #[test]
    fn file_store_missing_file_is_empty_and_not_created_by_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(CURRENT_STEP_KEY).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, DocScanError::Storage { .. }));
    }

    #[test]
    fn file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();
        store.set(FRONT_IMAGE_KEY, "x".into()).unwrap();
        store.remove(FRONT_IMAGE_KEY).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "{}");
    }
}
