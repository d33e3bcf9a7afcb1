use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;

use super::types::StorageItem;

/// Object-safe key/value storage area (DOM's Storage).
pub trait StorageArea: Send + Sync {
    /// Retrieves the value associated with the given key, or `None` if not found.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Sets the value for the given key, overwriting any existing value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the item with the given key.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Returns the number of items in the storage area.
    fn len(&self) -> usize;

    /// Returns all keys in the storage area.
    fn keys(&self) -> Vec<String>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry, in key order.
    fn items(&self) -> Vec<StorageItem> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get_item(&key).map(|value| StorageItem { key, value }))
            .collect()
    }
}

/// In-memory storage area, one per page in the in-memory host.
#[derive(Default)]
pub struct InMemoryArea {
    map: Mutex<HashMap<String, String>>,
}

impl InMemoryArea {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageArea for InMemoryArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.map().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.map().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.map().remove(key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.map().len()
    }

    fn keys(&self) -> Vec<String> {
        let mut v: Vec<String> = self.map().keys().cloned().collect();
        v.sort_unstable();
        v
    }
}
