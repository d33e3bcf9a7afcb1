pub mod aggregator;
pub mod cache;
pub mod clock;
pub mod config;
pub mod config_store;
pub mod context;
pub mod cookies;
pub mod domain;
#[allow(clippy::module_inception)]
mod engine;
pub mod errors;
pub mod events;
mod handle;
pub mod messaging;
pub mod notify;
pub mod pending;
pub mod status;
pub mod storage;
pub mod sync;
pub mod tab;
pub mod timer;

#[cfg(test)]
mod testing;

/// Capacity of the engine's command and event channels, and of the broadcast
/// streams of the in-memory host services.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

pub use aggregator::{BatchOutcome, BatchReason, ChangeAggregator, TimerOutcome};
pub use clock::{Clock, ClockHandle, ManualClock, SystemClock, TokioClock};
pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
pub use config_store::{ConfigStore, ConfigStoreHandle, InMemoryConfigStore};
pub use context::{HostServices, SyncContext};
pub use engine::CsyncEngine;
pub use errors::{EngineError, MessagingError, SyncError};
pub use events::{EngineCommand, EngineEvent};
pub use handle::EngineHandle;
pub use notify::{LogNotifier, Notifier, NotifierHandle, RecordingNotifier};
pub use status::{PartitionDiff, SyncStatus, VerificationReport};
pub use sync::{SyncEngine, SyncReport};
pub use timer::{ManualTimerService, TimerService, TimerServiceHandle, TokioTimerService};
