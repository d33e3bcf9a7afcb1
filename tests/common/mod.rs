#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use csync::cookies::InMemoryCookieStore;
use csync::storage::{DurableStoreHandle, InMemoryDurableStore};
use csync::tab::InMemoryTabs;
use csync::{
    CsyncEngine, EngineConfig, EngineEvent, EngineHandle, HostServices, InMemoryConfigStore, ManualClock,
    ManualTimerService, RecordingNotifier,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const START: u64 = 1_700_000_000_000;

/// In-memory browser with hand-driven timers.
pub struct TestHost {
    pub clock: Arc<ManualClock>,
    pub store: DurableStoreHandle,
    pub cookies: Arc<InMemoryCookieStore>,
    pub tabs: Arc<InMemoryTabs>,
    pub timers: Arc<ManualTimerService>,
    pub notifier: Arc<RecordingNotifier>,
    pub config_store: Arc<InMemoryConfigStore>,
}

pub struct Running {
    pub handle: EngineHandle,
    pub join: JoinHandle<()>,
    pub events: broadcast::Receiver<EngineEvent>,
}

impl TestHost {
    pub fn new(sites: &[&str]) -> Self {
        Self::with_store(sites, InMemoryDurableStore::new())
    }

    pub fn with_store(sites: &[&str], store: DurableStoreHandle) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(START)),
            store,
            cookies: InMemoryCookieStore::new("0"),
            tabs: InMemoryTabs::new(),
            timers: ManualTimerService::new(),
            notifier: RecordingNotifier::new(),
            config_store: InMemoryConfigStore::new(sites.iter().copied()),
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

    pub async fn start(&self) -> Running {
        start_with(EngineConfig::default(), self.services()).await
    }
}

/// Starts an engine and waits until it has finished its startup.
pub async fn start_with(config: EngineConfig, services: HostServices) -> Running {
    let engine = CsyncEngine::new(config, services);
    let mut events = engine.subscribe_events();
    let (handle, join) = engine.start().unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::EngineStarted { .. })).await;
    Running { handle, join, events }
}

/// Next event matching `pred`, skipping everything else.
pub async fn wait_for(
    events: &mut broadcast::Receiver<EngineEvent>,
    pred: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    let next = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("engine event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), next)
        .await
        .expect("timed out waiting for engine event")
}

impl Running {
    pub async fn stop(self) {
        self.handle.shutdown().await.unwrap();
        self.join.await.unwrap();
    }
}
