//! Source of the configured site list.
//!
//! The list is owned by the user interface and usually lives in a store that
//! follows the user across devices. The engine only reads it and listens for
//! changes.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::engine::errors::SyncError;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;

pub type SiteUpdates = broadcast::Receiver<Vec<String>>;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn configured_sites(&self) -> Result<Vec<String>, SyncError>;

    /// Emits the new list every time it changes.
    fn subscribe(&self) -> SiteUpdates;
}

pub type ConfigStoreHandle = Arc<dyn ConfigStore>;

pub struct InMemoryConfigStore {
    sites: RwLock<Vec<String>>,
    tx: broadcast::Sender<Vec<String>>,
}

impl InMemoryConfigStore {
    pub fn new<I, S>(sites: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Arc::new(Self {
            sites: RwLock::new(sites.into_iter().map(Into::into).collect()),
            tx,
        })
    }

    /// Stores a new list; emits only when it differs from the current one.
    pub fn set_sites<I, S>(&self, sites: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sites: Vec<String> = sites.into_iter().map(Into::into).collect();
        {
            let mut current = self.sites.write().unwrap_or_else(|e| e.into_inner());
            if *current == sites {
                return false;
            }
            *current = sites.clone();
        }
        let _ = self.tx.send(sites);
        true
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn configured_sites(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.sites.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn subscribe(&self) -> SiteUpdates {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_only_on_change() {
        let store = InMemoryConfigStore::new(["shop.test"]);
        let mut rx = store.subscribe();

        assert!(!store.set_sites(["shop.test"]));
        assert!(store.set_sites(["shop.test", "news.test"]));

        assert_eq!(rx.recv().await.unwrap(), vec!["shop.test", "news.test"]);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.configured_sites().await.unwrap().len(), 2);
    }
}
