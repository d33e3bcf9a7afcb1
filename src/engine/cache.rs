//! Origin cache.
//!
//! The last known cookies and localStorage items of every configured site,
//! captured from the normal partition and kept in the durable store. The cache
//! is the fallback source whenever no live data can be read, e.g. right after a
//! restart when no normal page of the site is open.
//!
//! Every write replaces the whole set of a site; sets are never merged. There
//! is no expiry, staleness is visible only through `captured_at`.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::clock::ClockHandle;
use crate::engine::config::EngineConfig;
use crate::engine::cookies::CookieRecord;
use crate::engine::domain::{domain_matches, SiteList};
use crate::engine::storage::{DurableStoreHandle, StorageItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCookieSet {
    pub site: String,
    pub cookies: Vec<CookieRecord>,
    pub captured_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStorageSet {
    pub site: String,
    pub items: Vec<StorageItem>,
    pub captured_at: u64,
}

#[derive(Clone)]
pub struct OriginCache {
    store: DurableStoreHandle,
    sites: SiteList,
    clock: ClockHandle,
    config: Arc<EngineConfig>,
}

impl OriginCache {
    pub fn new(store: DurableStoreHandle, sites: SiteList, clock: ClockHandle, config: Arc<EngineConfig>) -> Self {
        Self { store, sites, clock, config }
    }

    pub fn put_cookies(&self, site: &str, cookies: Vec<CookieRecord>) -> Result<CachedCookieSet> {
        let set = CachedCookieSet {
            site: site.to_string(),
            cookies,
            captured_at: self.clock.now(),
        };
        self.store.save(&self.config.cookie_cache_key(site), &set)?;
        log::debug!("Cached {} cookies for {site}", set.cookies.len());
        Ok(set)
    }

    pub fn put_storage(&self, site: &str, items: Vec<StorageItem>) -> Result<CachedStorageSet> {
        let set = CachedStorageSet {
            site: site.to_string(),
            items,
            captured_at: self.clock.now(),
        };
        self.store.save(&self.config.storage_cache_key(site), &set)?;
        log::debug!("Cached {} localStorage items for {site}", set.items.len());
        Ok(set)
    }

    /// Exact-key lookup, no fallback.
    pub fn cookie_set(&self, site: &str) -> Result<Option<CachedCookieSet>> {
        self.store.load(&self.config.cookie_cache_key(site))
    }

    /// Exact-key lookup, no fallback.
    pub fn storage_set(&self, site: &str) -> Result<Option<CachedStorageSet>> {
        self.store.load(&self.config.storage_cache_key(site))
    }

    /// Cached cookies of `site`, falling back to any configured site it matches.
    pub fn get_cookies(&self, site: &str) -> Vec<CookieRecord> {
        self.lookup::<CachedCookieSet>(site, |s| self.config.cookie_cache_key(s))
            .map(|set| set.cookies)
            .unwrap_or_default()
    }

    /// Cached localStorage of `site`, falling back to any configured site it matches.
    pub fn get_storage(&self, site: &str) -> Vec<StorageItem> {
        self.lookup::<CachedStorageSet>(site, |s| self.config.storage_cache_key(s))
            .map(|set| set.items)
            .unwrap_or_default()
    }

    fn lookup<T: DeserializeOwned>(&self, site: &str, key: impl Fn(&str) -> String) -> Option<T> {
        if let Some(hit) = self.read(&key(site)) {
            return Some(hit);
        }
        self.sites
            .snapshot()
            .iter()
            .filter(|configured| configured.as_str() != site && domain_matches(site, configured))
            .find_map(|configured| self.read(&key(configured)))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.load(key) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to read cache entry {key}: {e}");
                None
            }
        }
    }
}

/// Which source answered a [`resolve_with_fallback`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Live,
    Cache,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub items: Vec<T>,
    pub source: Source,
}

impl<T> Resolved<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Uses the live read when it succeeds with at least one item, otherwise the
/// cached value. `cached` is only polled when the live read is not used.
pub async fn resolve_with_fallback<T, E, L, C>(live: L, cached: C) -> Resolved<T>
where
    E: Display,
    L: Future<Output = Result<Vec<T>, E>>,
    C: Future<Output = Vec<T>>,
{
    match live.await {
        Ok(items) if !items.is_empty() => {
            return Resolved { items, source: Source::Live };
        }
        Ok(_) => {}
        Err(e) => log::debug!("Live read failed, using cache: {e}"),
    }

    let items = cached.await;
    let source = if items.is_empty() { Source::Empty } else { Source::Cache };
    Resolved { items, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::cookies::SameSite;
    use crate::engine::storage::InMemoryDurableStore;

    fn cache(sites: &[&str]) -> (OriginCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = OriginCache::new(
            InMemoryDurableStore::new(),
            SiteList::new(sites.iter().copied()),
            clock.clone(),
            Arc::new(EngineConfig::default()),
        );
        (cache, clock)
    }

    #[test]
    fn put_replaces_whole_set() {
        let (cache, clock) = cache(&["shop.test"]);
        cache
            .put_cookies("shop.test", vec![CookieRecord::new("a", "1", "shop.test"), CookieRecord::new("b", "2", "shop.test")])
            .unwrap();
        clock.advance(500);
        cache.put_cookies("shop.test", vec![CookieRecord::new("c", "3", "shop.test")]).unwrap();

        let set = cache.cookie_set("shop.test").unwrap().unwrap();
        assert_eq!(set.cookies.len(), 1);
        assert_eq!(set.cookies[0].name, "c");
        assert_eq!(set.captured_at, 1_500);
    }

    #[test]
    fn round_trip_preserves_records() {
        let (cache, _) = cache(&["x.test"]);
        let cookies = vec![
            CookieRecord::new("sid", "s-1", ".x.test").secure(true).http_only(true),
            CookieRecord::new("pref", "dark", "www.x.test")
                .with_path("/app")
                .same_site(SameSite::Strict),
            CookieRecord::new("track", "", "x.test")
                .secure(true)
                .same_site(SameSite::NoRestriction)
                .expires_at(1_900_000_000.5),
        ];
        let items = vec![StorageItem::new("cart", "[1,2]"), StorageItem::new("empty", "")];

        cache.put_cookies("x.test", cookies.clone()).unwrap();
        cache.put_storage("x.test", items.clone()).unwrap();

        assert_eq!(cache.get_cookies("x.test"), cookies);
        assert_eq!(cache.get_storage("x.test"), items);
    }

    #[test]
    fn subdomain_falls_back_to_configured_site() {
        let (cache, _) = cache(&["example.com"]);
        cache.put_cookies("example.com", vec![CookieRecord::new("sid", "1", ".example.com")]).unwrap();
        cache.put_storage("example.com", vec![StorageItem::new("k", "v")]).unwrap();

        assert_eq!(cache.get_cookies("www.example.com").len(), 1);
        assert_eq!(cache.get_storage("www.example.com"), vec![StorageItem::new("k", "v")]);
        assert!(cache.cookie_set("www.example.com").unwrap().is_none());
        assert!(cache.get_cookies("other.test").is_empty());
    }

    #[test]
    fn parent_falls_back_to_configured_subdomain() {
        let (cache, _) = cache(&["www.example.com"]);
        cache.put_cookies("www.example.com", vec![CookieRecord::new("sid", "1", "www.example.com")]).unwrap();

        assert_eq!(cache.get_cookies("example.com").len(), 1);
        assert!(cache.get_cookies("api.example.com").is_empty());
    }

    #[tokio::test]
    async fn live_wins_when_non_empty() {
        let cache_read = std::cell::Cell::new(false);
        let r = resolve_with_fallback(
            async { Ok::<_, String>(vec![1, 2]) },
            async {
                cache_read.set(true);
                Vec::new()
            },
        )
        .await;
        assert_eq!(r.items, vec![1, 2]);
        assert_eq!(r.source, Source::Live);
        assert!(!cache_read.get());
    }

    #[tokio::test]
    async fn empty_or_failed_live_uses_cache() {
        let r = resolve_with_fallback(async { Ok::<Vec<u8>, String>(vec![]) }, async { vec![7] }).await;
        assert_eq!(r.source, Source::Cache);

        let r = resolve_with_fallback(async { Err::<Vec<u8>, _>("offline") }, async { vec![7] }).await;
        assert_eq!(r.items, vec![7]);

        let r = resolve_with_fallback(async { Err::<Vec<u8>, _>("offline") }, async { vec![] }).await;
        assert_eq!(r.source, Source::Empty);
        assert!(r.is_empty());
    }
}
