//! Cookie core types.
//!
//! [`CookieRecord`] is an immutable snapshot of a cookie as the host reports it
//! and is what the origin cache persists. [`CookieWrite`] is the request handed
//! back to the host when a cookie is replayed into another partition.
//!
//! ```rust
//! use csync::cookies::{CookieRecord, CookieWrite, PartitionId, SameSite};
//!
//! let c = CookieRecord::new("session", "abc123", ".example.com")
//!     .with_path("/account")
//!     .secure(true)
//!     .same_site(SameSite::Lax);
//!
//! let write = CookieWrite::full(&c, &PartitionId::new("1"));
//! assert_eq!(write.url, "https://example.com/account");
//! assert_eq!(write.domain.as_deref(), Some(".example.com"));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::domain::clean_domain;

/// Opaque id of a cookie/storage partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(String);

impl PartitionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    NoRestriction,
    Lax,
    Strict,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    /// Domain as reported by the host; domain cookies carry a leading dot.
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    #[serde(default)]
    pub same_site: SameSite,
    /// Seconds since the Unix epoch; `None` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    pub host_only: bool,
}

/// Diff identity of a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CookieKey {
    pub name: String,
    pub domain: String,
}

impl CookieRecord {
    /// A session cookie on path `/`. A leading dot in `domain` makes it a domain
    /// cookie, otherwise it is host-only.
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            host_only: !domain.starts_with('.'),
            name: name.into(),
            value: value.into(),
            domain,
            path: "/".to_string(),
            secure: false,
            http_only: false,
            same_site: SameSite::Unspecified,
            expiration_date: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    pub fn http_only(mut self, on: bool) -> Self {
        self.http_only = on;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    pub fn expires_at(mut self, seconds: f64) -> Self {
        self.expiration_date = Some(seconds);
        self
    }

    pub fn clean_domain(&self) -> &str {
        clean_domain(&self.domain)
    }

    pub fn key(&self) -> CookieKey {
        CookieKey {
            name: self.name.clone(),
            domain: self.clean_domain().to_string(),
        }
    }

    /// URL a write for this cookie is scoped to.
    pub fn url(&self) -> String {
        format!("https://{}{}", self.clean_domain(), self.path)
    }
}

/// Request to create or overwrite a cookie in a given partition.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieWrite {
    pub url: String,
    pub name: String,
    pub value: String,
    pub path: String,
    pub partition: PartitionId,
    /// Only set for domain cookies; host-only cookies inherit the URL host.
    pub domain: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub same_site: Option<SameSite>,
    pub expiration_date: Option<f64>,
}

impl CookieWrite {
    /// Write carrying every attribute of `cookie`.
    pub fn full(cookie: &CookieRecord, partition: &PartitionId) -> Self {
        Self {
            domain: (!cookie.host_only).then(|| cookie.domain.clone()),
            secure: Some(cookie.secure),
            http_only: Some(cookie.http_only),
            same_site: match cookie.same_site {
                SameSite::Unspecified => None,
                other => Some(other),
            },
            expiration_date: cookie.expiration_date,
            ..Self::minimal(cookie, partition)
        }
    }

    /// Write carrying only what identifies the cookie; used as the retry after a
    /// full write was rejected.
    pub fn minimal(cookie: &CookieRecord, partition: &PartitionId) -> Self {
        Self {
            url: cookie.url(),
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            path: cookie.path.clone(),
            partition: partition.clone(),
            domain: None,
            secure: None,
            http_only: None,
            same_site: None,
            expiration_date: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    Explicit,
    Overwrite,
    Expired,
    ExpiredOverwrite,
    Evicted,
}

/// A cookie mutation reported by the host.
#[derive(Debug, Clone)]
pub struct CookieChange {
    pub cookie: CookieRecord,
    pub partition: PartitionId,
    pub cause: ChangeCause,
    pub removed: bool,
}
