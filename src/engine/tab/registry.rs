use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::page::{page_host, PageEvent, PageId, PageInfo};
use crate::engine::cookies::PartitionId;
use crate::engine::errors::{MessagingError, SyncError};
use crate::engine::messaging::{PageAgent, PageChannel, PageRequest, PageResponse};
use crate::engine::storage::{InMemoryArea, StorageArea};
use crate::engine::DEFAULT_CHANNEL_CAPACITY;

/// Stream of page lifecycle events.
pub type PageEvents = broadcast::Receiver<PageEvent>;

/// The host's list of open pages.
#[async_trait]
pub trait TabRegistry: Send + Sync {
    async fn list_pages(&self) -> Result<Vec<PageInfo>, SyncError>;

    async fn reload(&self, page: PageId) -> Result<(), SyncError>;

    fn subscribe(&self) -> PageEvents;
}

pub type TabRegistryHandle = Arc<dyn TabRegistry>;

struct OpenPage {
    info: PageInfo,
    agent: Option<Arc<PageAgent>>,
    responsive: bool,
}

/// In-memory browser: open pages, one localStorage area per (partition, host),
/// and an agent in every web page that answers [`PageRequest`]s.
pub struct InMemoryTabs {
    pages: RwLock<Vec<OpenPage>>,
    areas: Mutex<HashMap<(PartitionId, String), Arc<dyn StorageArea>>>,
    reloads: Mutex<Vec<PageId>>,
    tx: broadcast::Sender<PageEvent>,
}

impl InMemoryTabs {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Arc::new(Self {
            pages: RwLock::new(Vec::new()),
            areas: Mutex::new(HashMap::new()),
            reloads: Mutex::new(Vec::new()),
            tx,
        })
    }

    fn agent_for(&self, url: &str, partition: &PartitionId) -> Option<Arc<PageAgent>> {
        let host = page_host(url).ok().flatten()?;
        let area = self
            .areas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((partition.clone(), host.clone()))
            .or_insert_with(|| Arc::new(InMemoryArea::new()) as Arc<dyn StorageArea>)
            .clone();
        Some(Arc::new(PageAgent::new(host, area)))
    }

    /// Opens a page and announces it.
    pub fn open(&self, url: &str, partition: impl Into<PartitionId>) -> PageId {
        let partition = partition.into();
        let id = PageId::new();
        let info = PageInfo { id, url: url.to_string(), partition: partition.clone() };
        let agent = self.agent_for(url, &partition);
        self.pages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(OpenPage { info, agent, responsive: true });

        let _ = self.tx.send(PageEvent::Created { page: id, url: url.to_string(), partition });
        id
    }

    /// Navigates an open page and announces the completed navigation.
    pub fn navigate(&self, page: PageId, url: &str) -> bool {
        let partition = {
            let mut pages = self.pages.write().unwrap_or_else(|e| e.into_inner());
            let Some(open) = pages.iter_mut().find(|p| p.info.id == page) else {
                return false;
            };
            open.info.url = url.to_string();
            open.info.partition.clone()
        };

        let agent = self.agent_for(url, &partition);
        if let Some(open) = self
            .pages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .iter_mut()
            .find(|p| p.info.id == page)
        {
            open.agent = agent;
        }

        let _ = self.tx.send(PageEvent::NavigationCompleted { page, url: url.to_string(), partition });
        true
    }

    pub fn close(&self, page: PageId) -> bool {
        let mut pages = self.pages.write().unwrap_or_else(|e| e.into_inner());
        let before = pages.len();
        pages.retain(|p| p.info.id != page);
        pages.len() != before
    }

    /// An unresponsive page accepts requests but never answers them.
    pub fn set_responsive(&self, page: PageId, responsive: bool) {
        if let Some(open) = self
            .pages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .iter_mut()
            .find(|p| p.info.id == page)
        {
            open.responsive = responsive;
        }
    }

    pub fn page(&self, page: PageId) -> Option<PageInfo> {
        self.pages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.info.id == page)
            .map(|p| p.info.clone())
    }

    /// localStorage area seen by `page`.
    pub fn local_storage(&self, page: PageId) -> Option<Arc<dyn StorageArea>> {
        self.pages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.info.id == page)
            .and_then(|p| p.agent.as_ref().map(|a| a.area()))
    }

    /// Pages reloaded so far, in order.
    pub fn reloads(&self) -> Vec<PageId> {
        self.reloads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TabRegistry for InMemoryTabs {
    async fn list_pages(&self) -> Result<Vec<PageInfo>, SyncError> {
        Ok(self
            .pages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|p| p.info.clone())
            .collect())
    }

    async fn reload(&self, page: PageId) -> Result<(), SyncError> {
        if self.page(page).is_none() {
            return Err(SyncError::Host(format!("no such page: {page}")));
        }
        log::debug!("Reloading page {page}");
        self.reloads.lock().unwrap_or_else(|e| e.into_inner()).push(page);
        Ok(())
    }

    fn subscribe(&self) -> PageEvents {
        self.tx.subscribe()
    }
}

#[async_trait]
impl PageChannel for InMemoryTabs {
    async fn send(&self, page: PageId, request: PageRequest) -> Result<PageResponse, MessagingError> {
        let target = {
            let pages = self.pages.read().unwrap_or_else(|e| e.into_inner());
            pages
                .iter()
                .find(|p| p.info.id == page)
                .map(|p| (p.agent.clone(), p.responsive))
        };

        match target {
            None => Err(MessagingError::Unreachable(format!("page {page} is closed"))),
            Some((_, false)) => futures::future::pending().await,
            Some((None, true)) => Err(MessagingError::Unreachable(format!("page {page} has no agent"))),
            Some((Some(agent), true)) => Ok(agent.handle(request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::StorageItem;

    #[tokio::test]
    async fn open_announces_and_lists() {
        let tabs = InMemoryTabs::new();
        let mut rx = tabs.subscribe();

        let id = tabs.open("https://shop.test/", "1");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.page(), id);
        assert_eq!(event.partition().as_str(), "1");

        let pages = tabs.list_pages().await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].host().as_deref(), Some("shop.test"));
    }

    #[tokio::test]
    async fn storage_is_shared_per_partition_and_host() {
        let tabs = InMemoryTabs::new();
        let a = tabs.open("https://shop.test/a", "0");
        let b = tabs.open("https://shop.test/b", "0");
        let c = tabs.open("https://shop.test/", "1");

        tabs.local_storage(a).unwrap().set_item("k", "v").unwrap();
        assert_eq!(tabs.local_storage(b).unwrap().get_item("k").as_deref(), Some("v"));
        assert!(tabs.local_storage(c).unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_reaches_page_agent() {
        let tabs = InMemoryTabs::new();
        let page = tabs.open("https://shop.test/", "1");
        let resp = tabs
            .send(
                page,
                PageRequest::SetLocalStorage {
                    domain: "shop.test".into(),
                    items: vec![StorageItem::new("k", "v")],
                },
            )
            .await
            .unwrap();
        assert!(resp.is_ok);

        tabs.close(page);
        let err = tabs
            .send(page, PageRequest::GetLocalStorage { domain: "shop.test".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Unreachable(_)));
    }

    #[tokio::test]
    async fn navigate_switches_agent() {
        let tabs = InMemoryTabs::new();
        let page = tabs.open("chrome://newtab/", "1");
        assert!(tabs.local_storage(page).is_none());

        assert!(tabs.navigate(page, "https://shop.test/"));
        assert!(tabs.local_storage(page).is_some());
        assert!(tabs.reload(page).await.is_ok());
        assert_eq!(tabs.reloads(), vec![page]);
        assert!(tabs.reload(PageId::new()).await.is_err());
    }
}
