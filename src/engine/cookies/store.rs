//! Cookie store host interface.
//!
//! A **cookie store** is the host's cookie database across all partitions. The
//! engine reads cookies of the normal partition, writes cookies into alternate
//! partitions and listens for changes.
//!
//! Implementations must be `Send + Sync` and safe for concurrent use; the
//! engine holds them behind a [`CookieStoreHandle`].
mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::engine::cookies::{CookieChange, CookieRecord, CookieWrite, PartitionId};
use crate::engine::errors::SyncError;

pub use in_memory::InMemoryCookieStore;

/// Stream of cookie mutations.
pub type CookieChanges = broadcast::Receiver<CookieChange>;

#[async_trait]
pub trait CookieStore: Send + Sync {
    /// Every partition that currently exists, the normal one included.
    async fn list_partitions(&self) -> Result<Vec<PartitionId>, SyncError>;

    /// Cookies of `partition` whose domain is `domain` or one of its subdomains.
    async fn list_cookies(&self, domain: &str, partition: &PartitionId) -> Result<Vec<CookieRecord>, SyncError>;

    /// Creates or overwrites a cookie. Rejections are reported as
    /// [`SyncError::TransientWrite`].
    async fn write_cookie(&self, write: &CookieWrite) -> Result<CookieRecord, SyncError>;

    /// Subscribes to cookie mutations in every partition.
    fn subscribe(&self) -> CookieChanges;
}

pub type CookieStoreHandle = Arc<dyn CookieStore>;
