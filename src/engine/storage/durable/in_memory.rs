use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde_json::Value;

use super::DurableStore;

/// Durable store that lives only as long as the process. Sharing one instance
/// between two engines simulates a restart.
#[derive(Default)]
pub struct InMemoryDurableStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

impl DurableStore for InMemoryDurableStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}
