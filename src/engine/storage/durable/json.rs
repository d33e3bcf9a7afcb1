//! JSON-backed durable store.
//!
//! `JsonFileStore` keeps every key in a single JSON object on disk.
//!
//! ### Concurrency
//! - Internally synchronized; every operation is a read-modify-write of the
//!   whole file under one mutex, so two writers in this process never lose
//!   each other's keys.
//!
//! ### I/O characteristics
//! - Writes go to a temporary file in the same directory which is then renamed
//!   over the target, so a crash leaves either the old or the new file.
//! - A file that fails to parse is treated as empty (and logged); the next write
//!   replaces it.
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use super::DurableStore;

/// On-disk representation of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    entries: BTreeMap<String, Value>,
}

pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens (or creates) a JSON store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let path = path.into();
        let store = Self {
            path,
            lock: Mutex::new(()),
        };
        if !store.path.exists() {
            store.save_file(&StoreFile::default())?;
        }
        Ok(Arc::new(store))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_file(&self) -> Result<StoreFile> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        match serde_json::from_str(&contents) {
            Ok(file) => Ok(file),
            Err(e) => {
                log::warn!("Durable store {} is corrupt, starting empty: {e}", self.path.display());
                Ok(StoreFile::default())
            }
        }
    }

    fn save_file(&self, file: &StoreFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, file)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn update<R>(&self, f: impl FnOnce(&mut StoreFile) -> R) -> Result<R> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.load_file()?;
        let out = f(&mut file);
        self.save_file(&file)?;
        Ok(out)
    }
}

impl DurableStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load_file()?.entries.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.update(|file| {
            file.entries.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|file| {
            file.entries.remove(key);
        })
    }
}
