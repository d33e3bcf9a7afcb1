use std::time::Duration;

use crate::engine::config::ConfigError;

/// Failures of a single request/response round-trip to a page.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Page did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Page unreachable: {0}")]
    Unreachable(String),

    #[error("Page rejected request: {0}")]
    Rejected(String),
}

/// Errors raised while caching or replicating a site.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Cookie write rejected: {0}")]
    TransientWrite(String),

    #[error("No source data available for {0}")]
    SourceUnavailable(String),

    #[error("No alternate partition is open")]
    DestinationAbsent,

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Channel closed")]
    ChannelClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine channel closed")]
    ChannelClosed,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}
