//! Read-only views on the sync state of a site.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::cache::{resolve_with_fallback, Source};
use crate::engine::context::SyncContext;
use crate::engine::cookies::{CookieKey, CookieRecord, PartitionId};
use crate::engine::domain::clean_domain;
use crate::engine::errors::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_configured: bool,
    pub has_alternate_partition: bool,
    pub last_sync_time: Option<u64>,
    pub cached_cookie_count: usize,
    pub cached_storage_count: usize,
    pub cookie_cache_timestamp: Option<u64>,
    pub storage_cache_timestamp: Option<u64>,
}

/// Status of `host`, keyed by its configured site or by the host itself.
pub async fn request_status(ctx: &SyncContext, host: &str) -> SyncStatus {
    let host = clean_domain(host);
    let matched = ctx.sites.match_host(host);
    let site = matched.as_deref().unwrap_or(host);

    let has_alternate_partition = match ctx.alternate_partitions().await {
        Ok(p) => !p.is_empty(),
        Err(e) => {
            log::warn!("Could not list partitions: {e}");
            false
        }
    };

    let cookies = ctx.cache.cookie_set(site).unwrap_or_else(|e| {
        log::warn!("Could not read cookie cache of {site}: {e}");
        None
    });
    let storage = ctx.cache.storage_set(site).unwrap_or_else(|e| {
        log::warn!("Could not read localStorage cache of {site}: {e}");
        None
    });

    SyncStatus {
        is_configured: matched.is_some(),
        has_alternate_partition,
        last_sync_time: ctx.last_sync(site),
        cached_cookie_count: cookies.as_ref().map_or(0, |s| s.cookies.len()),
        cached_storage_count: storage.as_ref().map_or(0, |s| s.items.len()),
        cookie_cache_timestamp: cookies.map(|s| s.captured_at),
        storage_cache_timestamp: storage.map(|s| s.captured_at),
    }
}

/// Cookie differences between the source and one alternate partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionDiff {
    pub partition: PartitionId,
    /// In the source, absent from the partition.
    pub missing: Vec<CookieKey>,
    /// Present in both with a different value.
    pub stale: Vec<CookieKey>,
    /// In the partition only.
    pub extra: Vec<CookieKey>,
}

impl PartitionDiff {
    pub fn in_sync(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub site: String,
    pub source: Source,
    pub source_count: usize,
    pub partitions: Vec<PartitionDiff>,
}

impl VerificationReport {
    pub fn in_sync(&self) -> bool {
        self.partitions.iter().all(PartitionDiff::in_sync)
    }
}

/// Compares the cookies of `host` in every alternate partition with the live
/// normal partition (or the cache when nothing live is available).
pub async fn verify(ctx: &SyncContext, host: &str) -> Result<VerificationReport, SyncError> {
    let host = clean_domain(host);
    let site = ctx.sites.match_host(host).unwrap_or_else(|| host.to_string());

    let source = resolve_with_fallback(ctx.live_cookies(&site), async { ctx.cache.get_cookies(&site) }).await;
    let expected = by_key(&source.items);

    let mut partitions = Vec::new();
    for partition in ctx.alternate_partitions().await? {
        let actual_cookies = ctx.cookies.list_cookies(&site, &partition).await?;
        let actual = by_key(&actual_cookies);

        let mut diff = PartitionDiff {
            partition,
            missing: Vec::new(),
            stale: Vec::new(),
            extra: Vec::new(),
        };
        for (key, value) in &expected {
            match actual.get(key) {
                None => diff.missing.push(key.clone()),
                Some(v) if v != value => diff.stale.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.extra = actual.keys().filter(|k| !expected.contains_key(*k)).cloned().collect();
        partitions.push(diff);
    }

    Ok(VerificationReport {
        site,
        source: source.source,
        source_count: source.items.len(),
        partitions,
    })
}

fn by_key(cookies: &[CookieRecord]) -> BTreeMap<CookieKey, &str> {
    cookies.iter().map(|c| (c.key(), c.value.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{Host, START};

    #[tokio::test]
    async fn unconfigured_host_has_empty_status() {
        let host = Host::new(&["shop.test"]);
        let ctx = host.context();

        let status = request_status(&ctx, "unconfigured.test").await;
        assert_eq!(status, SyncStatus::default());
    }

    #[tokio::test]
    async fn unconfigured_host_still_sees_open_partition() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        let ctx = host.context();

        let status = request_status(&ctx, "unconfigured.test").await;
        assert!(!status.is_configured);
        assert!(status.has_alternate_partition);
        assert_eq!(status.cached_cookie_count, 0);
        assert_eq!(status.cached_storage_count, 0);
        assert_eq!(status.last_sync_time, None);
    }

    #[tokio::test]
    async fn status_reports_cache_and_last_sync() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        let ctx = host.context();
        ctx.cache.put_cookies("shop.test", vec![CookieRecord::new("a", "1", "shop.test")]).unwrap();
        ctx.record_sync("shop.test");

        let status = request_status(&ctx, "www.shop.test").await;
        assert!(status.is_configured);
        assert!(status.has_alternate_partition);
        assert_eq!(status.cached_cookie_count, 1);
        assert_eq!(status.cookie_cache_timestamp, Some(START));
        assert_eq!(status.last_sync_time, Some(START));
        assert_eq!(status.storage_cache_timestamp, None);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isConfigured"], true);
        assert_eq!(json["cachedCookieCount"], 1);
    }

    #[tokio::test]
    async fn verify_lists_missing_stale_and_extra() {
        let host = Host::new(&["shop.test"]);
        host.cookies.open_partition("1");
        host.cookies.set_cookie("0", CookieRecord::new("a", "1", "shop.test"));
        host.cookies.set_cookie("0", CookieRecord::new("b", "2", "shop.test"));
        host.cookies.set_cookie("1", CookieRecord::new("b", "old", "shop.test"));
        host.cookies.set_cookie("1", CookieRecord::new("c", "3", "shop.test"));
        let ctx = host.context();

        let report = verify(&ctx, "shop.test").await.unwrap();
        assert_eq!(report.source, Source::Live);
        assert_eq!(report.source_count, 2);
        assert!(!report.in_sync());

        let diff = &report.partitions[0];
        assert_eq!(diff.missing.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(diff.stale.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(diff.extra.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(), vec!["c"]);
    }
}
