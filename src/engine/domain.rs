//! Host matching against the configured site list.
//!
//! Matching is purely label based: two hosts match when they are equal or
//! one is a dot-separated suffix of the other. There is no public-suffix
//! knowledge, so `foo.co.uk` and `bar.co.uk` do not match each other, but both
//! match a configured `co.uk`.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Strips a single leading dot, as found on domain cookies.
pub fn clean_domain(domain: &str) -> &str {
    domain.strip_prefix('.').unwrap_or(domain)
}

/// Returns true when `a` and `b` are the same host or one is a subdomain of the other.
pub fn domain_matches(a: &str, b: &str) -> bool {
    let a = clean_domain(a);
    let b = clean_domain(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || is_subdomain_of(a, b) || is_subdomain_of(b, a)
}

fn is_subdomain_of(host: &str, parent: &str) -> bool {
    host.len() > parent.len()
        && host.ends_with(parent)
        && host.as_bytes()[host.len() - parent.len() - 1] == b'.'
}

/// First configured site, in stored order, that matches `host`.
pub fn match_configured_site(host: &str, sites: &[String]) -> Option<String> {
    let host = clean_domain(host);
    sites.iter().find(|site| domain_matches(host, site)).cloned()
}

/// Shared handle to the configured site list.
///
/// Cloning is cheap; every clone observes the same list. The list can always be
/// re-derived from the config store, so it is never persisted by the engine.
#[derive(Debug, Clone, Default)]
pub struct SiteList {
    inner: Arc<RwLock<Vec<String>>>,
}

impl SiteList {
    pub fn new<I, S>(sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = Self::default();
        list.replace(sites.into_iter().map(Into::into).collect());
        list
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<String>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<String>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the list, returning whether its contents changed.
    pub fn replace(&self, sites: Vec<String>) -> bool {
        let normalized = normalize(sites);
        let mut guard = self.write();
        if *guard == normalized {
            return false;
        }
        *guard = normalized;
        true
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.read().clone()
    }

    pub fn match_host(&self, host: &str) -> Option<String> {
        match_configured_site(host, &self.read())
    }

    pub fn contains(&self, site: &str) -> bool {
        self.read().iter().any(|s| s == site)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn normalize(sites: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(sites.len());
    for site in sites {
        let site = site.trim();
        if site.is_empty() || out.iter().any(|s| s == site) {
            continue;
        }
        out.push(site.to_string());
    }
    out
}
