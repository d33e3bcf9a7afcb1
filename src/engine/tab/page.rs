use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::engine::cookies::PartitionId;
use crate::engine::errors::SyncError;

/// Identifier of an open page (a browser tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(Uuid);

impl PageId {
    /// Create a new unique `PageId` using a random UUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub id: PageId,
    pub url: String,
    pub partition: PartitionId,
}

impl PageInfo {
    /// Host of the page, if it shows a web page.
    pub fn host(&self) -> Option<String> {
        page_host(&self.url).ok().flatten()
    }
}

/// Host of a page URL. Non-web schemes have no host for our purposes.
pub fn page_host(url: &str) -> Result<Option<String>, SyncError> {
    let parsed = Url::parse(url).map_err(|e| SyncError::MalformedInput(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Ok(None);
    }
    Ok(parsed.host_str().map(str::to_string))
}

/// Page lifecycle notifications from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Created { page: PageId, url: String, partition: PartitionId },
    NavigationCompleted { page: PageId, url: String, partition: PartitionId },
}

impl PageEvent {
    pub fn page(&self) -> PageId {
        match self {
            PageEvent::Created { page, .. } | PageEvent::NavigationCompleted { page, .. } => *page,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            PageEvent::Created { url, .. } | PageEvent::NavigationCompleted { url, .. } => url,
        }
    }

    pub fn partition(&self) -> &PartitionId {
        match self {
            PageEvent::Created { partition, .. } | PageEvent::NavigationCompleted { partition, .. } => partition,
        }
    }
}
