use tokio::sync::{broadcast, mpsc, oneshot};

use crate::engine::errors::EngineError;
use crate::engine::events::{EngineCommand, EngineEvent};
use crate::engine::status::{SyncStatus, VerificationReport};
use crate::engine::sync::SyncReport;
use crate::engine::tab::PageId;

/// Cloneable handle to a running engine. The engine stops when the last
/// handle is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct EngineHandle {
    /// Engine-wide command sender
    cmd_tx: mpsc::Sender<EngineCommand>,
    /// Event sender, kept to hand out subscriptions
    event_tx: broadcast::Sender<EngineEvent>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("cmd_tx", &self.cmd_tx)
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

impl EngineHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<EngineCommand>, event_tx: broadcast::Sender<EngineEvent>) -> Self {
        Self { cmd_tx, event_tx }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Sends a command and waits for its reply.
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn request_manual_sync(&self, site: impl Into<String>) -> Result<SyncReport, EngineError> {
        let site = site.into();
        self.request(|reply| EngineCommand::ManualSync { site, reply }).await
    }

    pub async fn request_status(&self, site: impl Into<String>) -> Result<SyncStatus, EngineError> {
        let site = site.into();
        self.request(|reply| EngineCommand::Status { site, reply }).await
    }

    pub async fn verify(&self, site: impl Into<String>) -> Result<VerificationReport, EngineError> {
        let site = site.into();
        Ok(self.request(|reply| EngineCommand::Verify { site, reply }).await??)
    }

    /// Replaces the configured sites; returns whether the list changed.
    pub async fn update_sites(&self, sites: Vec<String>) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::UpdateSites { sites, reply }).await
    }

    pub async fn reload_sites(&self) -> Result<bool, EngineError> {
        Ok(self.request(|reply| EngineCommand::ReloadSites { reply }).await??)
    }

    pub async fn page_ready(&self, host: impl Into<String>, page: PageId) -> Result<usize, EngineError> {
        let host = host.into();
        Ok(self.request(|reply| EngineCommand::PageReady { host, page, reply }).await??)
    }

    /// Gracefully shutdown the engine, waiting for in-flight work to finish.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }
}
