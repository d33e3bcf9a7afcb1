//! Pending change set.
//!
//! Sites with cookie changes that have not been replicated yet. The set is
//! written through to the durable store on every change, and every write first
//! merges what is persisted, so nothing added by a concurrent writer is lost.

use anyhow::Result;

use crate::engine::storage::DurableStoreHandle;

pub struct PendingChangeSet {
    store: DurableStoreHandle,
    key: String,
    members: Vec<String>,
}

impl PendingChangeSet {
    pub fn new(store: DurableStoreHandle, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            members: Vec::new(),
        }
    }

    /// Merges the persisted set into memory; returns the resulting size.
    pub fn load(&mut self) -> Result<usize> {
        self.merge_persisted()?;
        Ok(self.members.len())
    }

    /// Adds `site` and persists immediately. Returns false if it was already pending.
    pub fn add(&mut self, site: &str) -> Result<bool> {
        self.merge_persisted()?;
        let inserted = !self.members.iter().any(|m| m == site);
        if inserted {
            self.members.push(site.to_string());
        }
        self.persist()?;
        Ok(inserted)
    }

    /// Current members merged with the persisted set, in insertion order.
    pub fn snapshot(&mut self) -> Result<Vec<String>> {
        self.merge_persisted()?;
        Ok(self.members.clone())
    }

    /// Removes exactly `processed` and persists the remainder; returns how many remain.
    pub fn remove_processed(&mut self, processed: &[String]) -> Result<usize> {
        self.merge_persisted()?;
        self.members.retain(|m| !processed.contains(m));
        self.persist()?;
        Ok(self.members.len())
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn merge_persisted(&mut self) -> Result<()> {
        let persisted: Vec<String> = self.store.load(&self.key)?.unwrap_or_default();
        for site in persisted {
            if !self.members.contains(&site) {
                self.members.push(site);
            }
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        if self.members.is_empty() {
            self.store.remove(&self.key)
        } else {
            self.store.save(&self.key, &self.members)
        }
    }
}
