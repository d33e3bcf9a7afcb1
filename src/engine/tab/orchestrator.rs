//! Reacting to pages in alternate partitions.
//!
//! When a page on a configured site opens in an alternate partition, the
//! partition is brought up to date before the user interacts with the page.
//! The check is cheap: if the partition already holds at least as many cookies
//! for the site as the cache does, nothing is done.

use std::sync::Arc;

use crate::engine::context::SyncContext;
use crate::engine::errors::SyncError;
use crate::engine::sync::{SyncEngine, SyncReport};
use crate::engine::tab::page::{page_host, PageEvent, PageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Not an alternate-partition page on a configured site, or nowhere to sync to.
    Ignored,
    /// The partition already had at least as many cookies as the cache.
    AlreadySynced { cached: usize, existing: usize },
    Synced(SyncReport),
}

pub struct TabOrchestrator {
    ctx: Arc<SyncContext>,
    sync: Arc<SyncEngine>,
}

impl TabOrchestrator {
    pub fn new(ctx: Arc<SyncContext>, sync: Arc<SyncEngine>) -> Self {
        Self { ctx, sync }
    }

    pub async fn on_page_event(&self, event: &PageEvent) -> PageOutcome {
        if self.ctx.is_normal(event.partition()) {
            return PageOutcome::Ignored;
        }

        let host = match page_host(event.url()) {
            Ok(Some(host)) => host,
            Ok(None) => return PageOutcome::Ignored,
            Err(e) => {
                log::debug!("Ignoring page {}: {e}", event.page());
                return PageOutcome::Ignored;
            }
        };

        match self.check_and_sync(&host, event.page()).await {
            Ok(outcome) => outcome,
            Err(SyncError::DestinationAbsent) => PageOutcome::Ignored,
            Err(e) => {
                log::warn!("Page check for {host} failed: {e}");
                PageOutcome::Ignored
            }
        }
    }

    async fn check_and_sync(&self, host: &str, page: PageId) -> Result<PageOutcome, SyncError> {
        let Some(site) = self.ctx.sites.match_host(host) else {
            return Ok(PageOutcome::Ignored);
        };
        let partitions = self.ctx.require_alternate_partitions().await?;

        let cached = self.ctx.cache.get_cookies(&site).len();
        let existing = self.ctx.cookies.list_cookies(&site, &partitions[0]).await?.len();
        if cached > 0 && existing >= cached {
            log::debug!("{site} already has {existing} cookies in partition {}, skipping", partitions[0]);
            return Ok(PageOutcome::AlreadySynced { cached, existing });
        }

        log::info!("Page {page} opened {site} in an alternate partition, syncing");
        let report = self.sync.sync_site(&site, false, Some(page)).await;
        if let Err(e) = self.ctx.tabs.reload(page).await {
            log::warn!("Failed to reload page {page}: {e}");
        }
        Ok(PageOutcome::Synced(report))
    }

    /// A page announced it is ready; hand it the localStorage of its site.
    pub async fn on_page_ready(&self, host: &str, page: PageId) -> Result<usize, SyncError> {
        let Some(site) = self.ctx.sites.match_host(host) else {
            return Ok(0);
        };
        self.sync.push_local_storage(&site, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cookies::{CookieRecord, PartitionId};
    use crate::engine::storage::StorageItem;
    use crate::engine::testing::Host;

    fn orchestrator(host: &Host) -> (TabOrchestrator, Arc<SyncContext>) {
        let ctx = host.context();
        let sync = Arc::new(SyncEngine::new(ctx.clone()));
        (TabOrchestrator::new(ctx.clone(), sync), ctx)
    }

    fn created(page: PageId, url: &str, partition: &str) -> PageEvent {
        PageEvent::Created { page, url: url.to_string(), partition: PartitionId::new(partition) }
    }

    #[tokio::test]
    async fn syncs_first_visit_and_reloads_only_that_page() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        host.cookies.set_cookie("0", CookieRecord::new("sid", "1", "shop.test"));
        let other = host.tabs.open("https://shop.test/other", "1");
        let page = host.tabs.open("https://shop.test/", "1");
        let (orch, _) = orchestrator(&host);

        let outcome = orch.on_page_event(&created(page, "https://shop.test/", "1")).await;
        let PageOutcome::Synced(report) = outcome else {
            panic!("expected a sync, got {outcome:?}");
        };
        assert_eq!(report.cookies_synced, 1);
        assert_eq!(host.tabs.reloads(), vec![page]);
        assert!(!host.tabs.reloads().contains(&other));
    }

    #[tokio::test]
    async fn skips_when_partition_has_parity() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        let (orch, ctx) = orchestrator(&host);
        ctx.cache.put_cookies("shop.test", vec![CookieRecord::new("sid", "1", "shop.test")]).unwrap();
        host.cookies.set_cookie("1", CookieRecord::new("sid", "old", "shop.test"));

        let page = PageId::new();
        let outcome = orch.on_page_event(&created(page, "https://shop.test/", "1")).await;
        assert_eq!(outcome, PageOutcome::AlreadySynced { cached: 1, existing: 1 });
        assert!(host.cookies.writes().is_empty());
        assert!(host.tabs.reloads().is_empty());
    }

    #[tokio::test]
    async fn ignores_normal_unconfigured_and_malformed_pages() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        let (orch, _) = orchestrator(&host);
        let page = PageId::new();

        assert_eq!(orch.on_page_event(&created(page, "https://shop.test/", "0")).await, PageOutcome::Ignored);
        assert_eq!(orch.on_page_event(&created(page, "https://other.test/", "1")).await, PageOutcome::Ignored);
        assert_eq!(orch.on_page_event(&created(page, "chrome://newtab/", "1")).await, PageOutcome::Ignored);
        assert_eq!(orch.on_page_event(&created(page, "::bad::", "1")).await, PageOutcome::Ignored);
    }

    #[tokio::test]
    async fn ignored_without_alternate_partition() {
        let host = Host::new(&["shop.test"]);
        let (orch, _) = orchestrator(&host);
        let outcome = orch.on_page_event(&created(PageId::new(), "https://shop.test/", "1")).await;
        assert_eq!(outcome, PageOutcome::Ignored);
    }

    #[tokio::test]
    async fn page_ready_pushes_cached_storage() {
        let host = Host::new(&["shop.test"]);
        let (orch, ctx) = orchestrator(&host);
        ctx.cache.put_storage("shop.test", vec![StorageItem::new("cart", "3")]).unwrap();
        let page = host.tabs.open("https://www.shop.test/", "1");

        assert_eq!(orch.on_page_ready("www.shop.test", page).await.unwrap(), 1);
        assert_eq!(orch.on_page_ready("other.test", page).await.unwrap(), 0);
        assert!(host.tabs.reloads().is_empty());
    }
}
