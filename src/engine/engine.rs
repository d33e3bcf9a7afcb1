use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::engine::aggregator::{ChangeAggregator, TimerOutcome};
use crate::engine::config_store::SiteUpdates;
use crate::engine::context::{HostServices, SyncContext};
use crate::engine::cookies::{CookieChange, CookieChanges};
use crate::engine::events::{EngineCommand, EngineEvent};
use crate::engine::handle::EngineHandle;
use crate::engine::status::{request_status, verify};
use crate::engine::sync::SyncEngine;
use crate::engine::tab::{PageEvent, PageEvents, TabOrchestrator};
use crate::engine::timer::TimerFires;
use crate::{EngineConfig, EngineError};

/// How long shutdown waits for in-flight batches and commands.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The sync engine. Build it with [`CsyncEngine::new`], then [`start`](Self::start)
/// it to get an [`EngineHandle`].
pub struct CsyncEngine {
    ctx: Arc<SyncContext>,
    sync: Arc<SyncEngine>,
    aggregator: Arc<ChangeAggregator>,
    orchestrator: Arc<TabOrchestrator>,
    /// Command sender, moved into the first handle on start.
    cmd_tx: Option<mpsc::Sender<EngineCommand>>,
    /// Command receiver (owned by the engine run loop).
    cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: broadcast::Sender<EngineEvent>,
    /// Is the engine running?
    running: bool,
}

/// Host streams the run loop listens to. A stream that closes is dropped.
struct HostStreams {
    cookies: Option<CookieChanges>,
    timers: Option<TimerFires>,
    pages: Option<PageEvents>,
    sites: Option<SiteUpdates>,
}

impl CsyncEngine {
    pub fn new(config: EngineConfig, services: HostServices) -> Self {
        let capacity = config.channel_capacity;
        let ctx = SyncContext::new(config, services);
        let sync = Arc::new(SyncEngine::new(ctx.clone()));
        let aggregator = Arc::new(ChangeAggregator::new(ctx.clone(), sync.clone()));
        let orchestrator = Arc::new(TabOrchestrator::new(ctx.clone(), sync.clone()));

        let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>(capacity);
        let (event_tx, _) = broadcast::channel::<EngineEvent>(capacity);

        Self {
            ctx,
            sync,
            aggregator,
            orchestrator,
            cmd_tx: Some(cmd_tx),
            cmd_rx,
            event_tx,
            running: false,
        }
    }

    pub fn context(&self) -> Arc<SyncContext> {
        self.ctx.clone()
    }

    pub fn aggregator(&self) -> Arc<ChangeAggregator> {
        self.aggregator.clone()
    }

    /// Subscribe before [`start`](Self::start) to see [`EngineEvent::EngineStarted`].
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the engine and returns its handle and join handle. The engine
    /// stops on [`EngineHandle::shutdown`] or when every handle is dropped.
    pub fn start(mut self) -> Result<(EngineHandle, JoinHandle<()>), EngineError> {
        if self.running {
            return Err(EngineError::AlreadyRunning);
        }
        let cmd_tx = self.cmd_tx.take().ok_or(EngineError::AlreadyRunning)?;

        // Subscribe before spawning so nothing emitted in between is lost.
        let streams = HostStreams {
            cookies: Some(self.ctx.cookies.subscribe()),
            timers: Some(self.ctx.timers.subscribe()),
            pages: Some(self.ctx.tabs.subscribe()),
            sites: Some(self.ctx.config_store.subscribe()),
        };

        let engine_handle = EngineHandle::new(cmd_tx, self.event_tx.clone());
        let join_handle = tokio::spawn(self.run(streams));

        Ok((engine_handle, join_handle))
    }

    async fn run(mut self, mut streams: HostStreams) {
        self.running = true;
        let recovered = self.startup().await;
        self.emit(EngineEvent::EngineStarted { recovered });

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown { reply }) => {
                        self.drain(&mut tasks).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.dispatch(cmd, &mut tasks),
                    None => {
                        log::debug!("All engine handles dropped, stopping");
                        self.drain(&mut tasks).await;
                        break;
                    }
                },
                change = next_event(&mut streams.cookies, "cookie") => {
                    self.on_cookie_change(change).await;
                }
                name = next_event(&mut streams.timers, "timer") => {
                    self.on_timer(name, &mut tasks);
                }
                event = next_event(&mut streams.pages, "page") => {
                    self.on_page_event(event, &mut tasks);
                }
                sites = next_event(&mut streams.sites, "config") => {
                    self.on_sites_changed(sites, &mut tasks);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("Engine task failed: {e}");
                    }
                }
            }
        }

        self.running = false;
        self.emit(EngineEvent::EngineShutdown);
    }

    /// Loads sites, restores timers and pending changes, and schedules the
    /// initial cache fill. Returns how many pending sites were recovered.
    async fn startup(&self) -> usize {
        if let Err(e) = self.ctx.reload_sites().await {
            self.warn(format!("Could not load configured sites: {e}"));
        }

        match self.ctx.timers.restore() {
            Ok(0) => {}
            Ok(n) => log::info!("Restored {n} timers"),
            Err(e) => self.warn(format!("Could not restore timers: {e}")),
        }

        let recovered = self.aggregator.recover().await.unwrap_or_else(|e| {
            self.warn(format!("Could not recover pending changes: {e}"));
            0
        });

        let config = &self.ctx.config;
        let at = self.ctx.deadline(config.init_cache_delay);
        if let Err(e) = self.ctx.timers.schedule(&config.init_cache_timer(), at).await {
            self.warn(format!("Could not schedule cache init: {e}"));
        }
        recovered
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn warn(&self, message: String) {
        log::warn!("{message}");
        self.emit(EngineEvent::Warning { message });
    }

    async fn drain(&self, tasks: &mut JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        log::debug!("Waiting for {} engine tasks", tasks.len());
        let finished = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            log::warn!("Aborting {} engine tasks after {SHUTDOWN_GRACE:?}", tasks.len());
            tasks.abort_all();
        }
    }

    /// Cookie changes are recorded in arrival order, so they run on the loop.
    async fn on_cookie_change(&self, change: CookieChange) {
        match self.aggregator.on_cookie_changed(&change).await {
            Ok(Some(site)) => self.emit(EngineEvent::ChangeQueued { site }),
            Ok(None) => {}
            Err(e) => self.warn(format!("Could not record cookie change: {e}")),
        }
    }

    fn on_timer(&self, name: String, tasks: &mut JoinSet<()>) {
        let aggregator = self.aggregator.clone();
        let event_tx = self.event_tx.clone();
        tasks.spawn(async move {
            let event = match aggregator.on_timer_fired(&name).await {
                Ok(TimerOutcome::Batch(outcome)) => EngineEvent::BatchProcessed(outcome),
                Ok(TimerOutcome::CacheInitialized { refreshed }) => EngineEvent::CacheInitialized { refreshed },
                Ok(TimerOutcome::Unknown) => {
                    log::debug!("Ignoring unknown timer {name}");
                    return;
                }
                Err(e) => {
                    let message = format!("Timer {name} failed: {e}");
                    log::error!("{message}");
                    EngineEvent::Warning { message }
                }
            };
            let _ = event_tx.send(event);
        });
    }

    fn on_page_event(&self, event: PageEvent, tasks: &mut JoinSet<()>) {
        let orchestrator = self.orchestrator.clone();
        let event_tx = self.event_tx.clone();
        tasks.spawn(async move {
            let outcome = orchestrator.on_page_event(&event).await;
            let _ = event_tx.send(EngineEvent::PageHandled { page: event.page(), outcome });
        });
    }

    fn on_sites_changed(&self, sites: Vec<String>, tasks: &mut JoinSet<()>) {
        if !self.ctx.apply_sites(sites) {
            return;
        }
        self.emit(EngineEvent::SitesUpdated { sites: self.ctx.sites.snapshot() });
        self.spawn_init_cache(tasks);
    }

    fn spawn_init_cache(&self, tasks: &mut JoinSet<()>) {
        let aggregator = self.aggregator.clone();
        let event_tx = self.event_tx.clone();
        tasks.spawn(async move {
            let refreshed = aggregator.init_cache().await;
            let _ = event_tx.send(EngineEvent::CacheInitialized { refreshed });
        });
    }

    /// Runs a command off the loop so a slow sync never blocks change intake.
    fn dispatch(&self, cmd: EngineCommand, tasks: &mut JoinSet<()>) {
        let ctx = self.ctx.clone();
        let event_tx = self.event_tx.clone();

        match cmd {
            EngineCommand::ManualSync { site, reply } => {
                let sync = self.sync.clone();
                tasks.spawn(async move {
                    let report = sync.manual_sync(&site).await;
                    let _ = event_tx.send(EngineEvent::SiteSynced(report.clone()));
                    let _ = reply.send(report);
                });
            }
            EngineCommand::Status { site, reply } => {
                tasks.spawn(async move {
                    let _ = reply.send(request_status(&ctx, &site).await);
                });
            }
            EngineCommand::Verify { site, reply } => {
                tasks.spawn(async move {
                    let _ = reply.send(verify(&ctx, &site).await);
                });
            }
            EngineCommand::UpdateSites { sites, reply } => {
                let changed = ctx.apply_sites(sites);
                if changed {
                    self.emit(EngineEvent::SitesUpdated { sites: ctx.sites.snapshot() });
                }
                let _ = reply.send(changed);
                self.spawn_init_cache(tasks);
            }
            EngineCommand::ReloadSites { reply } => {
                let aggregator = self.aggregator.clone();
                tasks.spawn(async move {
                    let result = ctx.reload_sites().await;
                    if let Ok(true) = result {
                        let _ = event_tx.send(EngineEvent::SitesUpdated { sites: ctx.sites.snapshot() });
                    }
                    let ok = result.is_ok();
                    let _ = reply.send(result);
                    if ok {
                        let refreshed = aggregator.init_cache().await;
                        let _ = event_tx.send(EngineEvent::CacheInitialized { refreshed });
                    }
                });
            }
            EngineCommand::PageReady { host, page, reply } => {
                let orchestrator = self.orchestrator.clone();
                tasks.spawn(async move {
                    let _ = reply.send(orchestrator.on_page_ready(&host, page).await);
                });
            }
            EngineCommand::Shutdown { reply } => {
                // Handled by the run loop.
                let _ = reply.send(());
            }
        }
    }
}

/// Next item of an optional broadcast stream. Lagging is logged and skipped;
/// a closed stream is dropped and never yields again.
async fn next_event<T: Clone>(stream: &mut Option<broadcast::Receiver<T>>, what: &str) -> T {
    loop {
        let Some(rx) = stream.as_mut() else {
            return std::future::pending::<T>().await;
        };
        match rx.recv().await {
            Ok(item) => return item,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Missed {n} {what} events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                log::debug!("The {what} stream closed");
                *stream = None;
            }
        }
    }
}
