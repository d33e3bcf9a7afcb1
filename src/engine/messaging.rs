//! Request/response messaging with pages.
//!
//! The engine talks to an agent running inside each page to read and write that
//! page's localStorage. Messages are plain serde types so a host can put them
//! on any transport:
//!
//! ```json
//! {"type":"get_localStorage","domain":"shop.test"}
//! {"isOk":true,"msg":"ok","result":[{"key":"cart","value":"3"}]}
//! ```
//!
//! [`Messenger`] bounds every round-trip with a timeout and maps failures to
//! [`MessagingError`]. [`PageAgent`] is the receiving side.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::domain::domain_matches;
use crate::engine::errors::MessagingError;
use crate::engine::storage::{StorageArea, StorageItem};
use crate::engine::tab::PageId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageRequest {
    #[serde(rename = "get_localStorage")]
    GetLocalStorage { domain: String },
    #[serde(rename = "set_localStorage")]
    SetLocalStorage { domain: String, items: Vec<StorageItem> },
}

impl PageRequest {
    pub fn domain(&self) -> &str {
        match self {
            PageRequest::GetLocalStorage { domain } | PageRequest::SetLocalStorage { domain, .. } => domain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub is_ok: bool,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl PageResponse {
    pub fn ok(msg: impl Into<String>, result: Value) -> Self {
        Self {
            is_ok: true,
            msg: msg.into(),
            result: Some(result),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            is_ok: false,
            msg: msg.into(),
            result: None,
        }
    }
}

/// Transport to the agent of a page.
#[async_trait]
pub trait PageChannel: Send + Sync {
    async fn send(&self, page: PageId, request: PageRequest) -> Result<PageResponse, MessagingError>;
}

pub type PageChannelHandle = Arc<dyn PageChannel>;

#[derive(Clone)]
pub struct Messenger {
    channel: PageChannelHandle,
    timeout: Duration,
}

impl Messenger {
    pub fn new(channel: PageChannelHandle, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    async fn request(&self, page: PageId, request: PageRequest) -> Result<PageResponse, MessagingError> {
        let response = match tokio::time::timeout(self.timeout, self.channel.send(page, request)).await {
            Ok(res) => res?,
            Err(_) => return Err(MessagingError::Timeout(self.timeout)),
        };
        if !response.is_ok {
            return Err(MessagingError::Rejected(response.msg));
        }
        Ok(response)
    }

    /// Reads every localStorage item of `page`, which must be on `site`.
    pub async fn get_local_storage(&self, page: PageId, site: &str) -> Result<Vec<StorageItem>, MessagingError> {
        let response = self
            .request(page, PageRequest::GetLocalStorage { domain: site.to_string() })
            .await?;
        let payload = response.result.unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(payload)
            .map_err(|e| MessagingError::Rejected(format!("malformed localStorage payload: {e}")))
    }

    /// Writes `items` into the localStorage of `page`; returns how many the page stored.
    pub async fn set_local_storage(
        &self,
        page: PageId,
        site: &str,
        items: &[StorageItem],
    ) -> Result<usize, MessagingError> {
        let response = self
            .request(
                page,
                PageRequest::SetLocalStorage {
                    domain: site.to_string(),
                    items: items.to_vec(),
                },
            )
            .await?;
        Ok(response
            .result
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(items.len()))
    }
}

/// Agent running inside a page, serving requests against the page's own storage.
///
/// Every request names the site it is meant for; the agent refuses requests
/// whose site does not match its own host.
pub struct PageAgent {
    host: String,
    area: Arc<dyn StorageArea>,
}

impl PageAgent {
    pub fn new(host: impl Into<String>, area: Arc<dyn StorageArea>) -> Self {
        Self { host: host.into(), area }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn area(&self) -> Arc<dyn StorageArea> {
        Arc::clone(&self.area)
    }

    pub fn handle(&self, request: PageRequest) -> PageResponse {
        if !domain_matches(&self.host, request.domain()) {
            log::debug!("Refusing request for {} on {}", request.domain(), self.host);
            return PageResponse::error(format!("domain mismatch: {} vs {}", request.domain(), self.host));
        }

        match request {
            PageRequest::GetLocalStorage { .. } => match serde_json::to_value(self.area.items()) {
                Ok(items) => PageResponse::ok("ok", items),
                Err(e) => PageResponse::error(format!("get localStorage error: {e}")),
            },
            PageRequest::SetLocalStorage { items, .. } => {
                let mut count = 0usize;
                for item in items.iter().filter(|i| !i.key.is_empty()) {
                    if let Err(e) = self.area.set_item(&item.key, &item.value) {
                        return PageResponse::error(format!("set localStorage error: {e}"));
                    }
                    count += 1;
                }
                PageResponse::ok(format!("set {count} items"), Value::from(count as u64))
            }
        }
    }
}
