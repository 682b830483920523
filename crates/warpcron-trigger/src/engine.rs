//! Cron engine: the in-process trigger primitive.
//!
//! `CronEngine` keeps a table of entries and a ticking task that wakes on
//! each minute boundary and fires every entry whose next occurrence is due.
//! Each fire runs on its own task. A missed occurrence is never replayed:
//! after a fire the next occurrence is computed from the current time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{TriggerError, TriggerResult};
use crate::spec::{ParsedSpec, parse_spec};

/// Opaque handle to a registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerHandle(u64);

impl TriggerHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TriggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// Work to run when an entry fires.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Register, remove and stop time-based triggers.
pub trait TriggerPrimitive: Send + Sync {
    /// Register `job` to run on `spec`. Rejects invalid expressions and
    /// unknown zones.
    fn add(&self, spec: &str, job: Job) -> TriggerResult<TriggerHandle>;

    /// Remove an entry. Once this returns the entry never fires again.
    /// Returns whether the handle was registered.
    fn remove(&self, handle: TriggerHandle) -> bool;

    /// Halt all firing.
    fn stop(&self) {}
}

struct Entry {
    spec: String,
    parsed: ParsedSpec,
    job: Job,
    next: Option<DateTime<Utc>>,
}

type EntryTable = Arc<Mutex<BTreeMap<TriggerHandle, Entry>>>;

pub struct CronEngine {
    entries: EntryTable,
    next_id: AtomicU64,
    stopped: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CronEngine {
    /// Create an engine. Nothing fires until [`CronEngine::start`].
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            ticker: Mutex::new(None),
        }
    }

    /// Spawn the ticking task. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut ticker = lock(&self.ticker);
        if ticker.is_some() || self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let entries = self.entries.clone();
        let stopped = self.stopped.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        *ticker = Some(tokio::spawn(async move {
            info!("cron engine started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(until_next_minute(Utc::now())) => {
                        let fired = fire_due(&entries, &stopped, Utc::now());
                        if fired > 0 {
                            debug!(fired, "cron tick");
                        }
                    }
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
            }
            info!("cron engine stopped");
        }));
    }

    /// Fire every entry due at `now`. Returns the number of jobs spawned.
    ///
    /// Called by the ticker; exposed so callers can drive the engine with
    /// their own clock.
    pub fn fire_due(&self, now: DateTime<Utc>) -> usize {
        fire_due(&self.entries, &self.stopped, now)
    }

    /// Next scheduled occurrence of an entry.
    pub fn next_fire(&self, handle: TriggerHandle) -> Option<DateTime<Utc>> {
        lock(&self.entries).get(&handle).and_then(|e| e.next)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl TriggerPrimitive for CronEngine {
    fn add(&self, spec: &str, job: Job) -> TriggerResult<TriggerHandle> {
        if self.is_stopped() {
            return Err(TriggerError::Stopped);
        }
        let parsed = parse_spec(spec)?;
        let next = parsed.next_after(Utc::now());
        if next.is_none() {
            warn!(%spec, "cron expression has no future occurrence");
        }

        let handle = TriggerHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.entries).insert(
            handle,
            Entry {
                spec: spec.to_string(),
                parsed,
                job,
                next,
            },
        );
        debug!(%handle, %spec, "trigger added");
        Ok(handle)
    }

    fn remove(&self, handle: TriggerHandle) -> bool {
        let removed = lock(&self.entries).remove(&handle);
        if let Some(entry) = &removed {
            debug!(%handle, spec = %entry.spec, "trigger removed");
        }
        removed.is_some()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        lock(&self.ticker).take();
    }
}

impl Drop for CronEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn fire_due(entries: &EntryTable, stopped: &AtomicBool, now: DateTime<Utc>) -> usize {
    if stopped.load(Ordering::SeqCst) {
        return 0;
    }

    let mut fired = 0;
    let mut table = lock(entries);
    for (handle, entry) in table.iter_mut() {
        match entry.next {
            Some(next) if next <= now => {
                tokio::spawn((entry.job)());
                entry.next = entry.parsed.next_after(now);
                fired += 1;
                debug!(%handle, spec = %entry.spec, "trigger fired");
            }
            _ => {}
        }
    }
    fired
}

fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = now.timestamp_millis().rem_euclid(60_000) as u64;
    Duration::from_millis(60_000 - into_minute)
}

/// The entry table holds no invariants a panicking job could break, so a
/// poisoned lock is recovered.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn counting_job(counter: Arc<AtomicUsize>, tx: mpsc::UnboundedSender<()>) -> Job {
        Arc::new(move || {
            let counter = counter.clone();
            let tx = tx.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            })
        })
    }

    fn noop_job() -> Job {
        Arc::new(|| Box::pin(async {}))
    }

    #[tokio::test]
    async fn test_add_assigns_distinct_handles() {
        let engine = CronEngine::new();
        let a = engine.add("* * * * *", noop_job()).unwrap();
        let b = engine.add("* * * * *", noop_job()).unwrap();
        assert_ne!(a, b);
        assert_eq!(engine.len(), 2);
        assert!(engine.next_fire(a).is_some());
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_spec() {
        let engine = CronEngine::new();
        assert!(engine.add("every tuesday", noop_job()).is_err());
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_fire_due_runs_job_once_per_tick() {
        let engine = CronEngine::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = engine
            .add("* * * * *", counting_job(counter.clone(), tx))
            .unwrap();

        let later = Utc::now() + chrono::Duration::minutes(2);
        assert_eq!(engine.fire_due(later), 1);
        rx.recv().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Missed minutes are not replayed; next fire is after `later`.
        assert!(engine.next_fire(handle).unwrap() > later);
        assert_eq!(engine.fire_due(later), 0);
    }

    #[tokio::test]
    async fn test_nothing_due_before_next_occurrence() {
        let engine = CronEngine::new();
        engine.add("0 0 1 1 *", noop_job()).unwrap();
        assert_eq!(engine.fire_due(Utc::now()), 0);
    }

    #[tokio::test]
    async fn test_removed_entry_never_fires() {
        let engine = CronEngine::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = engine
            .add("* * * * *", counting_job(counter.clone(), tx))
            .unwrap();

        assert!(engine.remove(handle));
        assert!(!engine.remove(handle));
        let later = Utc::now() + chrono::Duration::minutes(5);
        assert_eq!(engine.fire_due(later), 0);
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_halts_firing_and_rejects_adds() {
        let engine = CronEngine::new();
        engine.start();
        engine.add("* * * * *", noop_job()).unwrap();
        engine.stop();

        assert!(engine.is_stopped());
        assert_eq!(engine.fire_due(Utc::now() + chrono::Duration::hours(1)), 0);
        assert_eq!(
            engine.add("* * * * *", noop_job()).unwrap_err(),
            TriggerError::Stopped
        );
    }

    #[test]
    fn test_until_next_minute() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 45).unwrap();
        assert_eq!(until_next_minute(now), Duration::from_secs(15));
        let boundary = Utc.with_ymd_and_hms(2024, 3, 1, 10, 16, 0).unwrap();
        assert_eq!(until_next_minute(boundary), Duration::from_secs(60));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(TriggerHandle::new(7).to_string(), "entry-7");
    }
}
