//! In-memory host wiring shared by the unit tests.

use std::sync::Arc;

use crate::engine::clock::ManualClock;
use crate::engine::config::EngineConfig;
use crate::engine::config_store::InMemoryConfigStore;
use crate::engine::context::{HostServices, SyncContext};
use crate::engine::cookies::InMemoryCookieStore;
use crate::engine::notify::RecordingNotifier;
use crate::engine::storage::InMemoryDurableStore;
use crate::engine::tab::InMemoryTabs;
use crate::engine::timer::ManualTimerService;

pub(crate) const START: u64 = 1_000_000;

pub(crate) struct Host {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryDurableStore>,
    pub cookies: Arc<InMemoryCookieStore>,
    pub tabs: Arc<InMemoryTabs>,
    pub timers: Arc<ManualTimerService>,
    pub notifier: Arc<RecordingNotifier>,
    pub config_store: Arc<InMemoryConfigStore>,
    pub config: EngineConfig,
    pub sites: Vec<String>,
}

impl Host {
    pub fn new(sites: &[&str]) -> Self {
        Self::with_store(sites, InMemoryDurableStore::new())
    }

    /// A fresh host sharing `store`, as after a restart.
    pub fn with_store(sites: &[&str], store: Arc<InMemoryDurableStore>) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(START)),
            store,
            cookies: InMemoryCookieStore::new("0"),
            tabs: InMemoryTabs::new(),
            timers: ManualTimerService::new(),
            notifier: RecordingNotifier::new(),
            config_store: InMemoryConfigStore::new(sites.iter().copied()),
            config: EngineConfig::default(),
            sites: sites.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            clock: self.clock.clone(),
            store: self.store.clone(),
            cookies: self.cookies.clone(),
            tabs: self.tabs.clone(),
            pages: self.tabs.clone(),
            timers: self.timers.clone(),
            notifier: self.notifier.clone(),
            config_store: self.config_store.clone(),
        }
    }

    /// Context with the configured sites already loaded.
    pub fn context(&self) -> Arc<SyncContext> {
        let ctx = SyncContext::new(self.config.clone(), self.services());
        ctx.apply_sites(self.sites.clone());
        ctx
    }
}
