//! Coalescing of cookie changes into batches.
//!
//! Every cookie change on a configured site marks the site pending and
//! restarts the debounce timer. A separate max-wait timer is armed by the first
//! change of a burst and never pushed back, so a site that keeps changing is
//! still processed at least every `max_debounce_wait`. Whichever timer fires
//! first runs a batch over everything pending at that moment.
//!
//! All of this state (pending sites and timers) is durable, so a batch that was
//! due when the process went away still runs after a restart.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;

use crate::engine::context::SyncContext;
use crate::engine::cookies::CookieChange;
use crate::engine::domain::clean_domain;
use crate::engine::errors::SyncError;
use crate::engine::pending::PendingChangeSet;
use crate::engine::sync::{SyncEngine, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReason {
    Debounce,
    MaxWait,
}

impl fmt::Display for BatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchReason::Debounce => write!(f, "debounce"),
            BatchReason::MaxWait => write!(f, "max-wait"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub reason: BatchReason,
    /// Sites taken into this batch, in processing order.
    pub processed: Vec<String>,
    /// Reports of the sites that were actually synced.
    pub synced: Vec<SyncReport>,
    /// Sites whose processing failed.
    pub failed: Vec<String>,
    /// Sites still pending afterwards (they arrived during the batch).
    pub remaining: usize,
}

impl BatchOutcome {
    fn new(reason: BatchReason) -> Self {
        Self {
            reason,
            processed: Vec::new(),
            synced: Vec::new(),
            failed: Vec::new(),
            remaining: 0,
        }
    }
}

/// What a fired timer led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    Batch(BatchOutcome),
    CacheInitialized { refreshed: usize },
    Unknown,
}

pub struct ChangeAggregator {
    ctx: Arc<SyncContext>,
    sync: Arc<SyncEngine>,
    pending: Mutex<PendingChangeSet>,
    batch_lock: tokio::sync::Mutex<()>,
}

impl ChangeAggregator {
    pub fn new(ctx: Arc<SyncContext>, sync: Arc<SyncEngine>) -> Self {
        let pending = PendingChangeSet::new(ctx.store.clone(), ctx.config.pending_key());
        Self {
            ctx,
            sync,
            pending: Mutex::new(pending),
            batch_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingChangeSet> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sites currently waiting for a batch.
    pub fn pending_sites(&self) -> Vec<String> {
        self.pending().members().to_vec()
    }

    /// Records a cookie change. Returns the configured site it was attributed
    /// to, or `None` when the change is irrelevant.
    pub async fn on_cookie_changed(&self, change: &CookieChange) -> Result<Option<String>, SyncError> {
        if !self.ctx.is_normal(&change.partition) {
            return Ok(None);
        }
        let domain = clean_domain(&change.cookie.domain);
        let Some(site) = self.ctx.sites.match_host(domain) else {
            log::debug!("Ignoring cookie change on {domain}");
            return Ok(None);
        };

        let added = self.pending().add(&site)?;
        if added {
            log::debug!("{site} is now pending");
        }
        self.arm_timers().await?;
        Ok(Some(site))
    }

    async fn arm_timers(&self) -> Result<(), SyncError> {
        let timers = &self.ctx.timers;
        let config = &self.ctx.config;

        let debounce = config.debounce_timer();
        timers.cancel(&debounce).await?;
        timers.schedule(&debounce, self.ctx.deadline(config.debounce_delay)).await?;

        let max_wait = config.max_wait_timer();
        if !timers.is_scheduled(&max_wait).await {
            timers.schedule(&max_wait, self.ctx.deadline(config.max_debounce_wait)).await?;
        }
        Ok(())
    }

    pub async fn on_timer_fired(&self, name: &str) -> Result<TimerOutcome, SyncError> {
        let config = &self.ctx.config;
        if name == config.debounce_timer() {
            Ok(TimerOutcome::Batch(self.process_batch(BatchReason::Debounce).await?))
        } else if name == config.max_wait_timer() {
            Ok(TimerOutcome::Batch(self.process_batch(BatchReason::MaxWait).await?))
        } else if name == config.init_cache_timer() {
            Ok(TimerOutcome::CacheInitialized { refreshed: self.init_cache().await })
        } else {
            Ok(TimerOutcome::Unknown)
        }
    }

    /// Processes every pending site. Batches never overlap; a site that
    /// becomes pending while a batch runs stays pending for the next one.
    pub async fn process_batch(&self, reason: BatchReason) -> Result<BatchOutcome, SyncError> {
        let _batch = self.batch_lock.lock().await;

        let mut outcome = BatchOutcome::new(reason);
        let snapshot = self.pending().snapshot()?;
        if snapshot.is_empty() {
            return Ok(outcome);
        }
        log::info!("Processing cookie changes ({reason}) for {snapshot:?}");

        for site in &snapshot {
            match self.process_site(site).await {
                Ok(Some(report)) => {
                    if !report.success {
                        outcome.failed.push(site.clone());
                    }
                    outcome.synced.push(report);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Processing {site} failed: {e}");
                    outcome.failed.push(site.clone());
                }
            }
        }

        // A site re-queued mid-batch is in the snapshot and is dropped here too.
        outcome.remaining = self.pending().remove_processed(&snapshot)?;
        outcome.processed = snapshot;

        let timers = &self.ctx.timers;
        let config = &self.ctx.config;
        if outcome.remaining > 0 {
            log::debug!("{} sites arrived during the batch, re-arming debounce", outcome.remaining);
            timers
                .schedule(&config.debounce_timer(), self.ctx.deadline(config.debounce_delay))
                .await?;
        } else {
            timers.cancel(&config.debounce_timer()).await?;
        }
        timers.cancel(&config.max_wait_timer()).await?;

        Ok(outcome)
    }

    async fn process_site(&self, site: &str) -> Result<Option<SyncReport>, SyncError> {
        match self.ctx.refresh_cookie_cache(site).await {
            Ok(n) => log::debug!("Refreshed {n} cached cookies of {site}"),
            Err(SyncError::SourceUnavailable(_)) => log::debug!("No live cookies for {site}, cache kept"),
            Err(e) => log::warn!("Could not refresh cookie cache of {site}: {e}"),
        }

        if self.ctx.alternate_partitions().await?.is_empty() {
            return Ok(None);
        }
        if !self.ctx.cooldown_elapsed(site) {
            log::debug!("{site} was synced recently, skipping");
            return Ok(None);
        }
        Ok(Some(self.sync.sync_site(site, false, None).await))
    }

    /// Reloads the persisted pending set after a restart and schedules a batch
    /// for it. Returns how many sites were recovered.
    pub async fn recover(&self) -> Result<usize, SyncError> {
        let recovered = self.pending().load()?;
        if recovered > 0 {
            log::info!("Recovered {recovered} pending sites, scheduling a batch");
            let config = &self.ctx.config;
            self.ctx
                .timers
                .schedule(&config.debounce_timer(), self.ctx.deadline(config.debounce_delay))
                .await?;
        }
        Ok(recovered)
    }

    /// Refreshes the cookie cache of every configured site. Returns how many
    /// caches were replaced.
    pub async fn init_cache(&self) -> usize {
        let sites = self.ctx.sites.snapshot();
        let results = join_all(sites.iter().map(|site| self.ctx.refresh_cookie_cache(site))).await;

        let mut refreshed = 0;
        for (site, result) in sites.iter().zip(results) {
            match result {
                Ok(_) => refreshed += 1,
                Err(SyncError::SourceUnavailable(_)) => {}
                Err(e) => log::warn!("Cache init for {site} failed: {e}"),
            }
        }
        log::debug!("Initialized cookie cache for {refreshed} of {} sites", sites.len());
        refreshed
    }
}
