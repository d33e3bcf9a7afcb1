//! Engine commands and events.
//!
//! - [`EngineCommand`]: requests sent by an [`EngineHandle`](crate::EngineHandle)
//!   to the engine loop, each carrying a oneshot reply channel.
//! - [`EngineEvent`]: what the engine broadcasts to every subscriber.

use tokio::sync::oneshot;

use crate::engine::aggregator::BatchOutcome;
use crate::engine::errors::SyncError;
use crate::engine::status::{SyncStatus, VerificationReport};
use crate::engine::sync::SyncReport;
use crate::engine::tab::{PageId, PageOutcome};

#[derive(Debug)]
pub enum EngineCommand {
    /// Sync a host right now, even an unconfigured one, and notify the user.
    ManualSync { site: String, reply: oneshot::Sender<SyncReport> },
    Status { site: String, reply: oneshot::Sender<SyncStatus> },
    Verify { site: String, reply: oneshot::Sender<Result<VerificationReport, SyncError>> },
    /// The user interface saved a new site list.
    UpdateSites { sites: Vec<String>, reply: oneshot::Sender<bool> },
    /// Re-read the site list from the config store.
    ReloadSites { reply: oneshot::Sender<Result<bool, SyncError>> },
    /// A page in an alternate partition finished loading and can take localStorage.
    PageReady { host: String, page: PageId, reply: oneshot::Sender<Result<usize, SyncError>> },
    Shutdown { reply: oneshot::Sender<()> },
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The loop is running; `recovered` sites were pending from a previous run.
    EngineStarted { recovered: usize },
    SitesUpdated { sites: Vec<String> },
    /// A cookie change on `site` was recorded.
    ChangeQueued { site: String },
    BatchProcessed(BatchOutcome),
    CacheInitialized { refreshed: usize },
    /// Result of a manual sync.
    SiteSynced(SyncReport),
    PageHandled { page: PageId, outcome: PageOutcome },
    Warning { message: String },
    EngineShutdown,
}
