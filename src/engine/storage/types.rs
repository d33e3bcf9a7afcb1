use serde::{Deserialize, Serialize};

/// A single localStorage entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageItem {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl StorageItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
