//! Named timers.
//!
//! A timer is identified by name; scheduling a name that is already armed
//! replaces the old deadline, so there is never more than one live timer per
//! name. Fired names are published on a broadcast stream.
//!
//! [`TokioTimerService`] can persist its deadlines in a durable store and
//! [`restore`](TimerService::restore) them after a restart; deadlines that
//! passed while the process was gone fire right away.
//! [`ManualTimerService`] never fires by itself and is driven by the host.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::engine::clock::ClockHandle;
use crate::engine::errors::SyncError;
use crate::engine::storage::DurableStoreHandle;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;

/// Stream of fired timer names.
pub type TimerFires = broadcast::Receiver<String>;

#[async_trait]
pub trait TimerService: Send + Sync {
    /// Arms `name` to fire at `at` (ms since the Unix epoch), replacing any
    /// earlier deadline for the same name.
    async fn schedule(&self, name: &str, at: u64) -> Result<(), SyncError>;

    /// Disarms `name`; returns whether it was armed.
    async fn cancel(&self, name: &str) -> Result<bool, SyncError>;

    async fn is_scheduled(&self, name: &str) -> bool;

    fn subscribe(&self) -> TimerFires;

    /// Re-arms deadlines that outlived a previous run; returns how many.
    /// Must be called from within a tokio runtime.
    fn restore(&self) -> Result<usize, SyncError> {
        Ok(0)
    }
}

pub type TimerServiceHandle = Arc<dyn TimerService>;

struct ArmedTimer {
    at: u64,
    generation: u64,
    cancel: CancellationToken,
}

struct TimerState {
    clock: ClockHandle,
    persistence: Option<(DurableStoreHandle, String)>,
    armed: Mutex<HashMap<String, ArmedTimer>>,
    next_generation: AtomicU64,
    tx: broadcast::Sender<String>,
}

impl TimerState {
    fn armed(&self) -> MutexGuard<'_, HashMap<String, ArmedTimer>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, armed: &HashMap<String, ArmedTimer>) -> anyhow::Result<()> {
        let Some((store, key)) = &self.persistence else {
            return Ok(());
        };
        if armed.is_empty() {
            return store.remove(key);
        }
        let deadlines: BTreeMap<&str, u64> = armed.iter().map(|(name, t)| (name.as_str(), t.at)).collect();
        store.save(key, &deadlines)
    }

    fn fire(&self, name: &str, generation: u64) {
        let fired = {
            let mut armed = self.armed();
            match armed.get(name) {
                Some(t) if t.generation == generation => {
                    armed.remove(name);
                    if let Err(e) = self.persist(&armed) {
                        log::warn!("Failed to persist timers after {name} fired: {e}");
                    }
                    true
                }
                _ => false,
            }
        };

        if fired {
            log::debug!("Timer {name} fired");
            let _ = self.tx.send(name.to_string());
        }
    }
}

/// Timers backed by tokio sleeps, one task per armed name.
#[derive(Clone)]
pub struct TokioTimerService {
    state: Arc<TimerState>,
}

impl TokioTimerService {
    pub fn new(clock: ClockHandle) -> Arc<Self> {
        Arc::new(Self::build(clock, None))
    }

    /// Timers whose deadlines are mirrored under `key` in `store`.
    pub fn persistent(clock: ClockHandle, store: DurableStoreHandle, key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(clock, Some((store, key.into()))))
    }

    fn build(clock: ClockHandle, persistence: Option<(DurableStoreHandle, String)>) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(TimerState {
                clock,
                persistence,
                armed: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                tx,
            }),
        }
    }

    /// Stops every timer task while leaving persisted deadlines in place, as
    /// when the host process goes away.
    pub fn halt(&self) {
        for (_, timer) in self.state.armed().drain() {
            timer.cancel.cancel();
        }
    }

    fn arm(&self, name: &str, at: u64) -> Result<(), SyncError> {
        let generation = self.state.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        {
            let mut armed = self.state.armed();
            let timer = ArmedTimer { at, generation, cancel: cancel.clone() };
            let previous = armed.insert(name.to_string(), timer);
            if let Err(e) = self.state.persist(&armed) {
                // Not armed unless persisted; the previous deadline stays live.
                match previous {
                    Some(old) => armed.insert(name.to_string(), old),
                    None => armed.remove(name),
                };
                return Err(SyncError::Store(e));
            }
            if let Some(old) = previous {
                old.cancel.cancel();
            }
        }

        let state = Arc::clone(&self.state);
        let name = name.to_string();
        let delay = Duration::from_millis(at.saturating_sub(state.clock.now()));
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => state.fire(&name, generation),
            }
        });

        Ok(())
    }
}

#[async_trait]
impl TimerService for TokioTimerService {
    async fn schedule(&self, name: &str, at: u64) -> Result<(), SyncError> {
        self.arm(name, at)
    }

    async fn cancel(&self, name: &str) -> Result<bool, SyncError> {
        let mut armed = self.state.armed();
        match armed.remove(name) {
            Some(timer) => {
                timer.cancel.cancel();
                self.state.persist(&armed)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_scheduled(&self, name: &str) -> bool {
        self.state.armed().contains_key(name)
    }

    fn subscribe(&self) -> TimerFires {
        self.state.tx.subscribe()
    }

    fn restore(&self) -> Result<usize, SyncError> {
        let Some((store, key)) = &self.state.persistence else {
            return Ok(0);
        };
        let deadlines: BTreeMap<String, u64> = store.load(key)?.unwrap_or_default();

        let mut restored = 0;
        for (name, at) in deadlines {
            if self.state.armed().contains_key(&name) {
                continue;
            }
            log::debug!("Restoring timer {name} at {at}");
            self.arm(&name, at)?;
            restored += 1;
        }
        Ok(restored)
    }
}

/// Timers that only fire when told to.
pub struct ManualTimerService {
    armed: Mutex<BTreeMap<String, u64>>,
    schedules: Mutex<HashMap<String, usize>>,
    tx: broadcast::Sender<String>,
}

impl ManualTimerService {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Arc::new(Self {
            armed: Mutex::new(BTreeMap::new()),
            schedules: Mutex::new(HashMap::new()),
            tx,
        })
    }

    fn armed(&self) -> MutexGuard<'_, BTreeMap<String, u64>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn deadline(&self, name: &str) -> Option<u64> {
        self.armed().get(name).copied()
    }

    /// How many times `name` has been scheduled.
    pub fn schedule_count(&self, name: &str) -> usize {
        self.schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Fires `name` if it is armed.
    pub fn fire(&self, name: &str) -> bool {
        if self.armed().remove(name).is_none() {
            return false;
        }
        let _ = self.tx.send(name.to_string());
        true
    }

    /// Fires every timer due at `now`, earliest first.
    pub fn fire_due(&self, now: u64) -> Vec<String> {
        let mut due: Vec<(String, u64)> = self
            .armed()
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(name, at)| (name.clone(), *at))
            .collect();
        due.sort_by_key(|(_, at)| *at);
        due.into_iter()
            .map(|(name, _)| name)
            .filter(|name| self.fire(name))
            .collect()
    }
}

#[async_trait]
impl TimerService for ManualTimerService {
    async fn schedule(&self, name: &str, at: u64) -> Result<(), SyncError> {
        self.armed().insert(name.to_string(), at);
        *self
            .schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn cancel(&self, name: &str) -> Result<bool, SyncError> {
        Ok(self.armed().remove(name).is_some())
    }

    async fn is_scheduled(&self, name: &str) -> bool {
        self.armed().contains_key(name)
    }

    fn subscribe(&self) -> TimerFires {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::{Clock, TokioClock};
    use crate::engine::storage::{DurableStore, InMemoryDurableStore};

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let clock = Arc::new(TokioClock::starting_at(0));
        let timers = TokioTimerService::new(clock.clone());
        let mut rx = timers.subscribe();

        timers.schedule("t", 1_000).await.unwrap();
        assert!(timers.is_scheduled("t").await);

        let name = rx.recv().await.unwrap();
        assert_eq!(name, "t");
        assert_eq!(clock.now(), 1_000);
        assert!(!timers.is_scheduled("t").await);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_deadline() {
        let clock = Arc::new(TokioClock::starting_at(0));
        let timers = TokioTimerService::new(clock.clone());
        let mut rx = timers.subscribe();

        timers.schedule("t", 1_000).await.unwrap();
        timers.schedule("t", 3_000).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "t");
        assert_eq!(clock.now(), 3_000);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let clock = Arc::new(TokioClock::starting_at(0));
        let timers = TokioTimerService::new(clock);
        let mut rx = timers.subscribe();

        timers.schedule("t", 500).await.unwrap();
        assert!(timers.cancel("t").await.unwrap());
        assert!(!timers.cancel("t").await.unwrap());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restores_persisted_deadlines() {
        let store: DurableStoreHandle = InMemoryDurableStore::new();
        let clock = Arc::new(TokioClock::starting_at(0));

        let first = TokioTimerService::persistent(clock.clone(), store.clone(), "timers");
        first.schedule("debounce", 2_000).await.unwrap();
        first.schedule("gone", 2_500).await.unwrap();
        first.cancel("gone").await.unwrap();
        first.halt();

        let second = TokioTimerService::persistent(clock.clone(), store.clone(), "timers");
        let mut rx = second.subscribe();
        assert_eq!(second.restore().unwrap(), 1);
        assert!(second.is_scheduled("debounce").await);

        assert_eq!(rx.recv().await.unwrap(), "debounce");
        assert_eq!(clock.now(), 2_000);
        assert!(store.get("timers").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_deadline_fires_immediately_on_restore() {
        let store: DurableStoreHandle = InMemoryDurableStore::new();
        store.save("timers", &BTreeMap::from([("late".to_string(), 10u64)])).unwrap();

        let clock = Arc::new(TokioClock::starting_at(5_000));
        let timers = TokioTimerService::persistent(clock.clone(), store, "timers");
        let mut rx = timers.subscribe();
        timers.restore().unwrap();

        assert_eq!(rx.recv().await.unwrap(), "late");
        assert_eq!(clock.now(), 5_000);
    }

    /// Store that rejects writes once `fail` is set.
    struct FlakyStore {
        inner: DurableStoreHandle,
        fail: std::sync::atomic::AtomicBool,
    }

    impl DurableStore for FlakyStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_persist_leaves_previous_deadline() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryDurableStore::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let clock = Arc::new(TokioClock::starting_at(0));
        let timers = TokioTimerService::persistent(clock.clone(), store.clone(), "timers");
        let mut rx = timers.subscribe();

        timers.schedule("kept", 1_000).await.unwrap();
        store.fail.store(true, Ordering::SeqCst);
        assert!(timers.schedule("kept", 5_000).await.is_err());
        assert!(timers.schedule("new", 500).await.is_err());
        assert!(!timers.is_scheduled("new").await);

        assert_eq!(rx.recv().await.unwrap(), "kept");
        assert_eq!(clock.now(), 1_000);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn manual_timers_fire_on_demand() {
        let timers = ManualTimerService::new();
        let mut rx = timers.subscribe();

        timers.schedule("a", 200).await.unwrap();
        timers.schedule("b", 100).await.unwrap();
        timers.schedule("a", 300).await.unwrap();
        assert_eq!(timers.schedule_count("a"), 2);
        assert_eq!(timers.deadline("a"), Some(300));

        assert_eq!(timers.fire_due(250), vec!["b"]);
        assert_eq!(rx.recv().await.unwrap(), "b");
        assert!(!timers.fire("b"));
        assert!(timers.fire("a"));
        assert_eq!(rx.recv().await.unwrap(), "a");
    }
}
