//! Shared engine context.
//!
//! [`SyncContext`] bundles the configuration, the host collaborators and the
//! little in-memory state the engine keeps (configured sites and last-sync
//! times). It is created once per engine and shared behind an `Arc` by the
//! aggregator, the sync engine and the tab orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::engine::cache::OriginCache;
use crate::engine::clock::ClockHandle;
use crate::engine::config::EngineConfig;
use crate::engine::config_store::ConfigStoreHandle;
use crate::engine::cookies::{CookieRecord, CookieStoreHandle, PartitionId};
use crate::engine::domain::{domain_matches, SiteList};
use crate::engine::errors::SyncError;
use crate::engine::messaging::{Messenger, PageChannelHandle};
use crate::engine::notify::NotifierHandle;
use crate::engine::storage::{DurableStoreHandle, StorageItem};
use crate::engine::tab::{PageInfo, TabRegistryHandle};
use crate::engine::timer::TimerServiceHandle;

/// Host collaborators handed to the engine.
#[derive(Clone)]
pub struct HostServices {
    pub clock: ClockHandle,
    pub store: DurableStoreHandle,
    pub cookies: CookieStoreHandle,
    pub tabs: TabRegistryHandle,
    pub pages: PageChannelHandle,
    pub timers: TimerServiceHandle,
    pub notifier: NotifierHandle,
    pub config_store: ConfigStoreHandle,
}

/// Which side of the sync a page lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Normal,
    Alternate,
}

pub struct SyncContext {
    pub config: Arc<EngineConfig>,
    pub clock: ClockHandle,
    pub sites: SiteList,
    pub cache: OriginCache,
    pub store: DurableStoreHandle,
    pub cookies: CookieStoreHandle,
    pub tabs: TabRegistryHandle,
    pub messenger: Messenger,
    pub timers: TimerServiceHandle,
    pub notifier: NotifierHandle,
    pub config_store: ConfigStoreHandle,
    last_sync: Mutex<HashMap<String, u64>>,
}

impl SyncContext {
    pub fn new(config: EngineConfig, services: HostServices) -> Arc<Self> {
        let config = Arc::new(config);
        let sites = SiteList::default();
        let cache = OriginCache::new(
            services.store.clone(),
            sites.clone(),
            services.clock.clone(),
            config.clone(),
        );
        let messenger = Messenger::new(services.pages, config.message_timeout);

        Arc::new(Self {
            config,
            clock: services.clock,
            sites,
            cache,
            store: services.store,
            cookies: services.cookies,
            tabs: services.tabs,
            messenger,
            timers: services.timers,
            notifier: services.notifier,
            config_store: services.config_store,
            last_sync: Mutex::new(HashMap::new()),
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Absolute deadline `after` from now.
    pub fn deadline(&self, after: Duration) -> u64 {
        self.now() + after.as_millis() as u64
    }

    pub fn is_normal(&self, partition: &PartitionId) -> bool {
        *partition == self.config.normal_partition
    }

    /// Re-reads the configured sites from the config store.
    pub async fn reload_sites(&self) -> Result<bool, SyncError> {
        let sites = self.config_store.configured_sites().await?;
        Ok(self.apply_sites(sites))
    }

    pub fn apply_sites(&self, sites: Vec<String>) -> bool {
        let changed = self.sites.replace(sites);
        if changed {
            log::info!("Configured sites: {:?}", self.sites.snapshot());
        }
        changed
    }

    /// Every partition except the normal one.
    pub async fn alternate_partitions(&self) -> Result<Vec<PartitionId>, SyncError> {
        Ok(self
            .cookies
            .list_partitions()
            .await?
            .into_iter()
            .filter(|p| !self.is_normal(p))
            .collect())
    }

    /// Like [`alternate_partitions`](Self::alternate_partitions), but an empty
    /// result is [`SyncError::DestinationAbsent`].
    pub async fn require_alternate_partitions(&self) -> Result<Vec<PartitionId>, SyncError> {
        let partitions = self.alternate_partitions().await?;
        if partitions.is_empty() {
            return Err(SyncError::DestinationAbsent);
        }
        Ok(partitions)
    }

    /// Cookies of `site` in the normal partition.
    pub async fn live_cookies(&self, site: &str) -> Result<Vec<CookieRecord>, SyncError> {
        self.cookies.list_cookies(site, &self.config.normal_partition).await
    }

    /// Replaces the cookie cache of `site` with a live read. An empty read
    /// leaves the cache alone and is reported as [`SyncError::SourceUnavailable`].
    pub async fn refresh_cookie_cache(&self, site: &str) -> Result<usize, SyncError> {
        let cookies = self.live_cookies(site).await?;
        if cookies.is_empty() {
            return Err(SyncError::SourceUnavailable(site.to_string()));
        }
        let count = cookies.len();
        self.cache.put_cookies(site, cookies)?;
        Ok(count)
    }

    /// Open pages on `site` in the given partition scope.
    pub async fn pages_for(&self, site: &str, scope: Scope) -> Result<Vec<PageInfo>, SyncError> {
        Ok(self
            .tabs
            .list_pages()
            .await?
            .into_iter()
            .filter(|p| self.is_normal(&p.partition) == (scope == Scope::Normal))
            .filter(|p| p.host().is_some_and(|h| domain_matches(&h, site)))
            .collect())
    }

    /// Reads localStorage of `site` from the first answering normal page and
    /// caches it when non-empty.
    pub async fn refresh_storage_cache(&self, site: &str) -> Result<Vec<StorageItem>, SyncError> {
        let pages = self.pages_for(site, Scope::Normal).await?;

        let mut last_err = None;
        for page in pages {
            match self.messenger.get_local_storage(page.id, site).await {
                Ok(items) => {
                    if !items.is_empty() {
                        self.cache.put_storage(site, items.clone())?;
                    }
                    return Ok(items);
                }
                Err(e) => {
                    log::debug!("Could not read localStorage of {site} from page {}: {e}", page.id);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => e.into(),
            None => SyncError::SourceUnavailable(site.to_string()),
        })
    }

    fn last_sync_map(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.last_sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_sync(&self, site: &str) -> Option<u64> {
        self.last_sync_map().get(site).copied()
    }

    pub fn record_sync(&self, site: &str) {
        let now = self.now();
        self.last_sync_map().insert(site.to_string(), now);
    }

    /// True when `site` was never synced or its cooldown has passed.
    pub fn cooldown_elapsed(&self, site: &str) -> bool {
        match self.last_sync(site) {
            Some(last) => self.now().saturating_sub(last) >= self.config.sync_cooldown.as_millis() as u64,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Host;
    use crate::engine::storage::StorageArea;

    #[tokio::test]
    async fn partitions_and_pages_by_scope() {
        let host = Host::new(&["shop.test"]);
        let ctx = host.context();

        assert!(matches!(
            ctx.require_alternate_partitions().await,
            Err(SyncError::DestinationAbsent)
        ));
        host.cookies.open_partition("1");
        assert_eq!(ctx.alternate_partitions().await.unwrap(), vec![PartitionId::new("1")]);

        host.tabs.open("https://www.shop.test/", "0");
        host.tabs.open("https://shop.test/", "1");
        host.tabs.open("https://other.test/", "1");

        assert_eq!(ctx.pages_for("shop.test", Scope::Normal).await.unwrap().len(), 1);
        assert_eq!(ctx.pages_for("shop.test", Scope::Alternate).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_live_read_keeps_cache() {
        let host = Host::new(&["shop.test"]);
        let ctx = host.context();

        host.cookies.set_cookie("0", CookieRecord::new("sid", "1", "shop.test"));
        assert_eq!(ctx.refresh_cookie_cache("shop.test").await.unwrap(), 1);

        host.cookies.remove_cookie(&PartitionId::new("0"), "sid", "shop.test");
        assert!(matches!(
            ctx.refresh_cookie_cache("shop.test").await,
            Err(SyncError::SourceUnavailable(_))
        ));
        assert_eq!(ctx.cache.get_cookies("shop.test").len(), 1);
    }

    #[tokio::test]
    async fn storage_refresh_reads_normal_page() {
        let host = Host::new(&["shop.test"]);
        let ctx = host.context();

        assert!(matches!(
            ctx.refresh_storage_cache("shop.test").await,
            Err(SyncError::SourceUnavailable(_))
        ));

        let page = host.tabs.open("https://shop.test/", "0");
        host.tabs.local_storage(page).unwrap().set_item("cart", "3").unwrap();

        let items = ctx.refresh_storage_cache("shop.test").await.unwrap();
        assert_eq!(items, vec![StorageItem::new("cart", "3")]);
        assert_eq!(ctx.cache.storage_set("shop.test").unwrap().unwrap().items, items);
    }

    #[tokio::test]
    async fn cooldown_is_per_site() {
        let host = Host::new(&["shop.test"]);
        let ctx = host.context();

        assert!(ctx.cooldown_elapsed("shop.test"));
        ctx.record_sync("shop.test");
        assert!(!ctx.cooldown_elapsed("shop.test"));
        assert!(ctx.cooldown_elapsed("news.test"));

        host.clock.advance(5_000);
        assert!(ctx.cooldown_elapsed("shop.test"));
    }
}
