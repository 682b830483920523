//! Service: runs watchers and applies their snapshots in arrival order.
//!
//! Snapshots flow through a channel of capacity 1, so a slow replace call
//! holds back every watcher. That keeps a single consumer and per-workload
//! ordering without any per-workload locking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use warpcron_core::Snapshot;

use crate::error::SchedulerError;
use crate::manager::ScheduleManager;

/// Capacity of the snapshot channel.
pub const SNAPSHOT_CHANNEL_CAPACITY: usize = 1;

/// How long shutdown waits for watchers before aborting them.
const WATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A producer of per-workload snapshots.
///
/// `watch` runs until `out` reports cancellation, publishing one snapshot
/// per observed change.
#[async_trait]
pub trait Watcher: Send + Sync {
    fn name(&self) -> &str;

    async fn watch(&self, out: SnapshotSender);
}

/// Sending half of the snapshot channel, bound to the shutdown signal.
#[derive(Clone)]
pub struct SnapshotSender {
    tx: mpsc::Sender<Snapshot>,
    shutdown: watch::Receiver<bool>,
}

impl SnapshotSender {
    pub fn new(tx: mpsc::Sender<Snapshot>, shutdown: watch::Receiver<bool>) -> Self {
        Self { tx, shutdown }
    }

    /// Deliver a snapshot, waiting for the consumer.
    ///
    /// Returns `false` and drops the snapshot once shutdown is signalled or
    /// the consumer is gone.
    pub async fn send(&self, snapshot: Snapshot) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => false,
            sent = self.tx.send(snapshot) => sent.is_ok(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow() || self.tx.is_closed()
    }

    /// Resolves once shutdown is signalled or the consumer is gone.
    pub async fn cancelled(&self) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = stopped(&mut shutdown) => {}
            _ = self.tx.closed() => {}
        }
    }
}

/// Resolves once `shutdown` reads `true` or its sender is dropped.
///
/// The borrow guard from `wait_for` is released before returning, so the
/// caller's future stays `Send`.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub struct Service {
    manager: Arc<ScheduleManager>,
    watchers: Vec<Arc<dyn Watcher>>,
}

impl Service {
    pub fn new(manager: Arc<ScheduleManager>) -> Self {
        Self {
            manager,
            watchers: Vec::new(),
        }
    }

    pub fn with_watcher(mut self, watcher: Arc<dyn Watcher>) -> Self {
        self.watchers.push(watcher);
        self
    }

    pub fn manager(&self) -> &Arc<ScheduleManager> {
        &self.manager
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// On shutdown the watchers are stopped, the channel is closed, and the
    /// manager removes every trigger so nothing fires afterwards.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);

        let mut watchers = JoinSet::new();
        for watcher in &self.watchers {
            let watcher = watcher.clone();
            let out = SnapshotSender::new(tx.clone(), shutdown.clone());
            watchers.spawn(async move {
                debug!(watcher = watcher.name(), "watcher started");
                watcher.watch(out).await;
                debug!(watcher = watcher.name(), "watcher exited");
            });
        }
        drop(tx);

        info!(watchers = self.watchers.len(), "schedule service started");

        let mut idle_shutdown = shutdown.clone();
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                snapshot = rx.recv() => match snapshot {
                    Some(snapshot) => self.apply(snapshot).await,
                    None => {
                        // Every watcher has exited; triggers keep firing
                        // until shutdown.
                        warn!("all watchers exited");
                        stopped(&mut idle_shutdown).await;
                        break;
                    }
                },
            }
        }

        info!("schedule service shutting down");
        drop(rx);

        let drained = tokio::time::timeout(WATCHER_STOP_TIMEOUT, async {
            while let Some(joined) = watchers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "watcher task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("watchers did not stop in time, aborting");
            watchers.abort_all();
        }

        self.manager.shutdown().await;
        info!("schedule service stopped");
    }

    async fn apply(&self, snapshot: Snapshot) {
        let workload = &snapshot.workload;
        let count = snapshot.schedules.len();
        match self
            .manager
            .replace_workload_schedules(workload, &snapshot.schedules)
            .await
        {
            Ok(outcome) => {
                debug!(%workload, schedules = count, remove = snapshot.remove, ?outcome, "snapshot applied");
            }
            Err(SchedulerError::Registration {
                failures, applied, ..
            }) => {
                for failure in &failures {
                    error!(
                        workload = workload.name(),
                        environment_id = workload.environment_id(),
                        organization_id = workload.organization_id(),
                        schedules = count,
                        cron = %failure.cron,
                        reason = %failure.reason,
                        "failed to apply schedule"
                    );
                }
                debug!(%workload, ?applied, "snapshot partially applied");
            }
        }
    }
}
