//! Engine configuration.
//!
//! `EngineConfig` holds the timing windows and naming used by the
//! replication pipeline: how long cookie changes are coalesced, how long a
//! burst may postpone a batch, how often a single site may be re-synced and how
//! long a page gets to answer a storage request.
//!
//! `EngineConfig` provides the production values via [`Default`] and a fluent
//! [`EngineConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use csync::EngineConfig;
//! let cfg = EngineConfig::default();
//! assert_eq!(cfg.debounce_delay.as_secs(), 3);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use std::time::Duration;
//! use csync::EngineConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = EngineConfig::builder()
//!     .debounce_delay(Duration::from_millis(500))
//!     .max_debounce_wait(Duration::from_secs(2))
//!     .normal_partition("default")
//!     .build()?; // returns Result<EngineConfig, ConfigError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `debounce_delay`: quiet period after the last cookie change before a batch runs (default: 3s).
//! - `max_debounce_wait`: upper bound on how long a burst can postpone a batch (default: 15s).
//! - `sync_cooldown`: minimum time between two automatic syncs of the same site (default: 5s).
//! - `message_timeout`: how long a page gets to answer a storage request (default: 5s).
//! - `init_cache_delay`: delay of the cache warm-up after start (default: 600ms).
//! - `normal_partition`: id of the partition that is the source of truth (default: `"0"`).
//! - `key_prefix`: prefix of every durable key and timer name (default: `csync_`).
//! - `notification_title`: title used for user notifications (default: `Csync`).
//! - `channel_capacity`: capacity of the command and event channels (default: 128).
//!
//! # Errors
//!
//! Builder validation returns [`ConfigError`] when `max_debounce_wait` is shorter
//! than `debounce_delay`, when a duration that must be positive is zero, or when
//! the key prefix or channel capacity is empty.

use std::fmt;
use std::time::Duration;

use crate::engine::cookies::PartitionId;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub debounce_delay: Duration,
    pub max_debounce_wait: Duration,
    pub sync_cooldown: Duration,
    pub message_timeout: Duration,
    pub init_cache_delay: Duration,
    pub normal_partition: PartitionId,
    pub key_prefix: String,
    pub notification_title: String,
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_secs(3),
            max_debounce_wait: Duration::from_secs(15),
            sync_cooldown: Duration::from_secs(5),
            message_timeout: Duration::from_secs(5),
            init_cache_delay: Duration::from_millis(600),
            normal_partition: PartitionId::new("0"),
            key_prefix: "csync_".to_string(),
            notification_title: "Csync".to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Durable key holding the pending change set.
    pub fn pending_key(&self) -> String {
        format!("{}pending_domains", self.key_prefix)
    }

    pub fn cookie_cache_key(&self, site: &str) -> String {
        format!("{}cookie_{site}", self.key_prefix)
    }

    pub fn storage_cache_key(&self, site: &str) -> String {
        format!("{}localStorage_{site}", self.key_prefix)
    }

    pub fn debounce_timer(&self) -> String {
        format!("{}cookie_debounce", self.key_prefix)
    }

    pub fn max_wait_timer(&self) -> String {
        format!("{}cookie_maxwait", self.key_prefix)
    }

    pub fn init_cache_timer(&self) -> String {
        format!("{}init_cache", self.key_prefix)
    }

    /// Durable key under which a persisting timer service keeps its deadlines.
    pub fn timers_key(&self) -> String {
        format!("{}timers", self.key_prefix)
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    inner: EngineConfig,
}

impl EngineConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn debounce_delay(self, d: Duration) -> Self { self.map(|c| c.debounce_delay = d) }
    pub fn max_debounce_wait(self, d: Duration) -> Self { self.map(|c| c.max_debounce_wait = d) }
    pub fn sync_cooldown(self, d: Duration) -> Self { self.map(|c| c.sync_cooldown = d) }
    pub fn message_timeout(self, d: Duration) -> Self { self.map(|c| c.message_timeout = d) }
    pub fn init_cache_delay(self, d: Duration) -> Self { self.map(|c| c.init_cache_delay = d) }
    pub fn normal_partition<S: Into<String>>(self, id: S) -> Self { self.map(|c| c.normal_partition = PartitionId::new(id)) }
    pub fn key_prefix<S: Into<String>>(self, prefix: S) -> Self { self.map(|c| c.key_prefix = prefix.into()) }
    pub fn notification_title<S: Into<String>>(self, title: S) -> Self { self.map(|c| c.notification_title = title.into()) }
    pub fn channel_capacity(self, n: usize) -> Self { self.map(|c| c.channel_capacity = n) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut EngineConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroDebounce,
    MaxWaitShorterThanDebounce { max_wait: Duration, debounce: Duration },
    ZeroMessageTimeout,
    EmptyKeyPrefix,
    EmptyPartitionId,
    ZeroChannelCapacity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroDebounce =>
                write!(f, "debounce_delay must be greater than zero"),
            ConfigError::MaxWaitShorterThanDebounce { max_wait, debounce } =>
                write!(f, "max_debounce_wait ({max_wait:?}) < debounce_delay ({debounce:?})"),
            ConfigError::ZeroMessageTimeout =>
                write!(f, "message_timeout must be greater than zero"),
            ConfigError::EmptyKeyPrefix =>
                write!(f, "key_prefix must not be empty"),
            ConfigError::EmptyPartitionId =>
                write!(f, "normal_partition must not be empty"),
            ConfigError::ZeroChannelCapacity =>
                write!(f, "channel_capacity must be at least 1"),
        }
    }
}
impl std::error::Error for ConfigError {}

fn validate(c: &EngineConfig) -> Result<(), ConfigError> {
    if c.debounce_delay.is_zero() {
        return Err(ConfigError::ZeroDebounce);
    }
    if c.max_debounce_wait < c.debounce_delay {
        return Err(ConfigError::MaxWaitShorterThanDebounce {
            max_wait: c.max_debounce_wait,
            debounce: c.debounce_delay,
        });
    }
    if c.message_timeout.is_zero() {
        return Err(ConfigError::ZeroMessageTimeout);
    }
    if c.key_prefix.is_empty() {
        return Err(ConfigError::EmptyKeyPrefix);
    }
    if c.normal_partition.as_str().is_empty() {
        return Err(ConfigError::EmptyPartitionId);
    }
    if c.channel_capacity == 0 {
        return Err(ConfigError::ZeroChannelCapacity);
    }
    Ok(())
}
