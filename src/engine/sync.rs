//! Replication of one site from the normal partition into every alternate one.
//!
//! Writes are idempotent overwrites, so running a sync twice is harmless and
//! a partial failure is repaired by the next run. Individual cookie or page
//! failures are tallied in the [`SyncReport`]; only failures that prevent the
//! sync as a whole (the host cannot list partitions or pages) mark it unsuccessful.

use std::sync::Arc;

use serde::Serialize;

use crate::engine::cache::resolve_with_fallback;
use crate::engine::context::{Scope, SyncContext};
use crate::engine::cookies::{CookieRecord, CookieWrite, PartitionId};
use crate::engine::domain::clean_domain;
use crate::engine::errors::SyncError;
use crate::engine::tab::PageId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub site: String,
    pub cookies_synced: usize,
    pub cookies_failed: usize,
    pub local_storage_synced: usize,
    pub local_storage_failed: usize,
    pub success: bool,
    pub error: Option<String>,
}

impl SyncReport {
    fn new(site: &str) -> Self {
        Self {
            site: site.to_string(),
            ..Default::default()
        }
    }

    pub fn synced_anything(&self) -> bool {
        self.cookies_synced > 0 || self.local_storage_synced > 0
    }
}

pub struct SyncEngine {
    ctx: Arc<SyncContext>,
}

impl SyncEngine {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Replicates cookies and localStorage of `site`. Never fails; problems end
    /// up in the returned report.
    ///
    /// With `target` set, localStorage is only pushed to that page. With
    /// `force_reload` set, alternate pages on the site are reloaded when
    /// anything was synced.
    pub async fn sync_site(&self, site: &str, force_reload: bool, target: Option<PageId>) -> SyncReport {
        let mut report = SyncReport::new(site);

        match self.run(site, force_reload, target, &mut report).await {
            Ok(()) => {
                report.success = true;
                log::info!(
                    "Synced {site}: {} cookies ({} failed), {} localStorage items ({} failed)",
                    report.cookies_synced,
                    report.cookies_failed,
                    report.local_storage_synced,
                    report.local_storage_failed
                );
            }
            Err(e) => {
                log::error!("Sync of {site} failed: {e}");
                report.error = Some(e.to_string());
            }
        }
        report
    }

    async fn run(
        &self,
        site: &str,
        force_reload: bool,
        target: Option<PageId>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        (report.cookies_synced, report.cookies_failed) = self.sync_cookies(site).await?;
        (report.local_storage_synced, report.local_storage_failed) = self.sync_local_storage(site, target).await?;

        self.ctx.record_sync(site);

        if force_reload && report.synced_anything() {
            self.reload_alternate_pages(site).await?;
        }
        Ok(())
    }

    async fn sync_cookies(&self, site: &str) -> Result<(usize, usize), SyncError> {
        let partitions = self.ctx.alternate_partitions().await?;
        if partitions.is_empty() {
            log::debug!("No alternate partition open, skipping cookies of {site}");
            return Ok((0, 0));
        }

        let source = resolve_with_fallback(self.ctx.live_cookies(site), async { self.ctx.cache.get_cookies(site) }).await;
        log::debug!("Replicating {} cookies of {site} from {:?}", source.items.len(), source.source);

        let (mut synced, mut failed) = (0, 0);
        for cookie in &source.items {
            for partition in &partitions {
                match self.write_with_retry(cookie, partition).await {
                    Ok(()) => synced += 1,
                    Err(e) => {
                        log::warn!("Failed to write cookie {} into partition {partition}: {e}", cookie.name);
                        failed += 1;
                    }
                }
            }
        }
        Ok((synced, failed))
    }

    async fn write_with_retry(&self, cookie: &CookieRecord, partition: &PartitionId) -> Result<(), SyncError> {
        match self.ctx.cookies.write_cookie(&CookieWrite::full(cookie, partition)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                log::debug!("Full write of {} rejected ({e}), retrying with minimal attributes", cookie.name);
                self.ctx
                    .cookies
                    .write_cookie(&CookieWrite::minimal(cookie, partition))
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn sync_local_storage(&self, site: &str, target: Option<PageId>) -> Result<(usize, usize), SyncError> {
        let source =
            resolve_with_fallback(self.ctx.refresh_storage_cache(site), async { self.ctx.cache.get_storage(site) }).await;
        if source.is_empty() {
            return Ok((0, 0));
        }

        let pages: Vec<_> = self
            .ctx
            .pages_for(site, Scope::Alternate)
            .await?
            .into_iter()
            .filter(|p| target.map_or(true, |t| p.id == t))
            .collect();

        let (mut acked, mut failed) = (false, 0);
        for page in &pages {
            match self.ctx.messenger.set_local_storage(page.id, site, &source.items).await {
                Ok(n) => {
                    log::debug!("Page {} stored {n} localStorage items of {site}", page.id);
                    acked = true;
                }
                Err(e) => {
                    log::warn!("Failed to push localStorage of {site} to page {}: {e}", page.id);
                    failed += 1;
                }
            }
        }

        Ok((if acked { source.items.len() } else { 0 }, failed))
    }

    async fn reload_alternate_pages(&self, site: &str) -> Result<(), SyncError> {
        for page in self.ctx.pages_for(site, Scope::Alternate).await? {
            if let Err(e) = self.ctx.tabs.reload(page.id).await {
                log::warn!("Failed to reload page {}: {e}", page.id);
            }
        }
        Ok(())
    }

    /// One-off sync requested by the user. Works for unconfigured hosts too and
    /// always notifies the outcome.
    pub async fn manual_sync(&self, host: &str) -> SyncReport {
        let host = clean_domain(host);
        let site = self.ctx.sites.match_host(host).unwrap_or_else(|| host.to_string());

        if let Err(e) = self.ctx.refresh_cookie_cache(&site).await {
            log::debug!("Cookie cache of {site} not refreshed: {e}");
        }
        if let Err(e) = self.ctx.refresh_storage_cache(&site).await {
            log::debug!("localStorage cache of {site} not refreshed: {e}");
        }

        let report = self.sync_site(&site, true, None).await;

        let message = match &report.error {
            None => format!(
                "Synced {} cookies and {} localStorage items",
                report.cookies_synced, report.local_storage_synced
            ),
            Some(e) => format!("Sync failed: {e}"),
        };
        self.ctx.notifier.notify(&self.ctx.config.notification_title, &message);
        report
    }

    /// Pushes localStorage of `site` to a single page, preferring the cache over
    /// a fresh read. Returns how many items the page stored.
    pub async fn push_local_storage(&self, site: &str, page: PageId) -> Result<usize, SyncError> {
        let mut items = self.ctx.cache.get_storage(site);
        if items.is_empty() {
            items = match self.ctx.refresh_storage_cache(site).await {
                Ok(items) => items,
                Err(SyncError::SourceUnavailable(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
        }
        if items.is_empty() {
            return Ok(0);
        }
        Ok(self.ctx.messenger.set_local_storage(page, site, &items).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cookies::SameSite;
    use crate::engine::storage::{StorageArea, StorageItem};
    use crate::engine::testing::Host;

    fn private() -> PartitionId {
        PartitionId::new("1")
    }

    #[tokio::test]
    async fn replicates_host_only_cookie_and_reloads() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        host.cookies.set_cookie("0", CookieRecord::new("sid", "abc", "shop.test"));
        let page = host.tabs.open("https://shop.test/", "1");
        let engine = SyncEngine::new(host.context());

        let report = engine.sync_site("shop.test", true, None).await;
        assert!(report.success);
        assert_eq!(report.cookies_synced, 1);
        assert_eq!(report.cookies_failed, 0);

        let writes = host.cookies.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].url, "https://shop.test/");
        assert_eq!(writes[0].domain, None);
        assert_eq!(host.cookies.cookies(&private())[0].value, "abc");
        assert_eq!(host.tabs.reloads(), vec![page]);
    }

    #[tokio::test]
    async fn every_partition_receives_every_cookie() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        host.cookies.open_partition("2");
        host.cookies.set_cookie("0", CookieRecord::new("a", "1", ".shop.test"));
        host.cookies.set_cookie("0", CookieRecord::new("b", "2", "shop.test"));
        let engine = SyncEngine::new(host.context());

        let report = engine.sync_site("shop.test", false, None).await;
        assert_eq!(report.cookies_synced, 4);
        assert_eq!(host.cookies.cookies(&PartitionId::new("2")).len(), 2);
        assert!(host.tabs.reloads().is_empty());
    }

    #[tokio::test]
    async fn rejected_write_is_retried_with_minimal_attributes() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        host.cookies
            .set_cookie("0", CookieRecord::new("track", "1", ".shop.test").same_site(SameSite::NoRestriction));
        let engine = SyncEngine::new(host.context());

        let report = engine.sync_site("shop.test", false, None).await;
        assert_eq!(report.cookies_synced, 1);

        let source = host.cookies.cookies(&PartitionId::new("0"))[0].clone();
        let writes = host.cookies.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], CookieWrite::full(&source, &private()));
        assert_eq!(writes[1], CookieWrite::minimal(&source, &private()));
    }

    #[tokio::test]
    async fn no_alternate_partition_is_not_an_error() {
        let host = Host::new(&["shop.test"]);
        host.cookies.set_cookie("0", CookieRecord::new("sid", "1", "shop.test"));
        let engine = SyncEngine::new(host.context());

        let report = engine.sync_site("shop.test", true, None).await;
        assert!(report.success);
        assert_eq!(report.cookies_synced, 0);
        assert!(host.cookies.writes().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_cache_when_live_is_empty() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        let ctx = host.context();
        ctx.cache.put_cookies("shop.test", vec![CookieRecord::new("sid", "cached", "shop.test")]).unwrap();
        let engine = SyncEngine::new(ctx);

        let report = engine.sync_site("shop.test", false, None).await;
        assert_eq!(report.cookies_synced, 1);
        assert_eq!(host.cookies.cookies(&private())[0].value, "cached");
    }

    #[tokio::test]
    async fn local_storage_reaches_alternate_pages() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        let normal = host.tabs.open("https://shop.test/", "0");
        host.tabs.local_storage(normal).unwrap().set_item("cart", "3").unwrap();
        let first = host.tabs.open("https://shop.test/a", "1");
        let dead = host.tabs.open("https://www.shop.test/", "1");
        host.tabs.set_responsive(dead, false);

        let mut config = host.config.clone();
        config.message_timeout = std::time::Duration::from_millis(50);
        let ctx = crate::engine::context::SyncContext::new(config, host.services());
        ctx.apply_sites(host.sites.clone());
        let engine = SyncEngine::new(ctx.clone());

        let report = engine.sync_site("shop.test", false, None).await;
        assert!(report.success);
        assert_eq!(report.local_storage_synced, 1);
        assert_eq!(report.local_storage_failed, 1);
        assert_eq!(
            host.tabs.local_storage(first).unwrap().items(),
            vec![StorageItem::new("cart", "3")]
        );
        assert_eq!(ctx.cache.get_storage("shop.test").len(), 1);
    }

    #[tokio::test]
    async fn targeted_sync_touches_one_page() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        let normal = host.tabs.open("https://shop.test/", "0");
        host.tabs.local_storage(normal).unwrap().set_item("k", "v").unwrap();
        let a = host.tabs.open("https://shop.test/", "1");
        let engine = SyncEngine::new(host.context());

        let report = engine.sync_site("shop.test", false, Some(PageId::new())).await;
        assert_eq!(report.local_storage_synced, 0);

        let report = engine.sync_site("shop.test", false, Some(a)).await;
        assert_eq!(report.local_storage_synced, 1);
    }

    #[tokio::test]
    async fn manual_sync_notifies_with_counts() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        host.cookies.set_cookie("0", CookieRecord::new("sid", "1", ".shop.test"));
        let normal = host.tabs.open("https://www.shop.test/", "0");
        host.tabs.local_storage(normal).unwrap().set_item("cart", "3").unwrap();
        let private_page = host.tabs.open("https://www.shop.test/", "1");
        let ctx = host.context();
        let engine = SyncEngine::new(ctx.clone());

        let report = engine.manual_sync("www.shop.test").await;
        assert_eq!(report.site, "shop.test");
        assert_eq!(report.cookies_synced, 1);
        assert_eq!(report.local_storage_synced, 1);
        assert_eq!(host.tabs.reloads(), vec![private_page]);
        assert_eq!(
            host.notifier.sent(),
            vec![("Csync".to_string(), "Synced 1 cookies and 1 localStorage items".to_string())]
        );
        assert!(ctx.last_sync("shop.test").is_some());
    }

    #[tokio::test]
    async fn manual_sync_of_unconfigured_host_uses_raw_host() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        host.cookies.set_cookie("0", CookieRecord::new("sid", "1", "misc.test"));
        let ctx = host.context();
        let engine = SyncEngine::new(ctx.clone());

        let report = engine.manual_sync(".misc.test").await;
        assert_eq!(report.site, "misc.test");
        assert_eq!(report.cookies_synced, 1);
        assert_eq!(ctx.cache.cookie_set("misc.test").unwrap().unwrap().cookies.len(), 1);
    }

    #[tokio::test]
    async fn push_prefers_cache() {
        let host = Host::new(&["shop.test"]);
        let ctx = host.context();
        ctx.cache.put_storage("shop.test", vec![StorageItem::new("k", "cached")]).unwrap();
        let page = host.tabs.open("https://shop.test/", "1");
        let engine = SyncEngine::new(ctx);

        assert_eq!(engine.push_local_storage("shop.test", page).await.unwrap(), 1);
        assert_eq!(
            host.tabs.local_storage(page).unwrap().get_item("k").as_deref(),
            Some("cached")
        );
    }
}
