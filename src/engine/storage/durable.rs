pub mod in_memory;
pub mod json;
#[cfg(feature = "sqlite_store")]
pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Durable key/value space offered by the host.
///
/// Every write of a single key is atomic: a reader sees either the old or the
/// new value, never a mix.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub type DurableStoreHandle = Arc<dyn DurableStore>;

impl dyn DurableStore {
    /// Reads and decodes `key`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Encodes and writes `value` under `key`.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?)
    }
}
