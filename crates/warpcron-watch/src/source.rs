//! The resubscribe loop shared by both watchers.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info};

use warpcron_core::{
    ClientResult, WatchError, WatchEvent, WatchSettings, WatchStream, WorkloadId,
};
use warpcron_scheduler::SnapshotSender;

/// Environment (and organization) a watcher observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchScope {
    pub environment_id: String,
    pub organization_id: String,
}

impl WatchScope {
    pub fn new(environment_id: impl Into<String>) -> Self {
        Self {
            environment_id: environment_id.into(),
            organization_id: String::new(),
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = organization_id.into();
        self
    }

    /// Workload identity of a workflow in this scope.
    pub fn workload(&self, name: &str) -> WorkloadId {
        WorkloadId::new(name, &self.environment_id).with_organization(&self.organization_id)
    }
}

/// One watched collection.
#[async_trait]
pub(crate) trait EventSource: Send + Sync {
    type Resource: Send + 'static;

    fn kind(&self) -> &'static str;

    async fn subscribe(&self, include_initial: bool) -> ClientResult<WatchStream<Self::Resource>>;

    /// Process one event. Returns `false` once `out` is closed.
    async fn handle(&self, event: WatchEvent<Self::Resource>, out: &SnapshotSender) -> bool;

    /// Catch up on changes an earlier round may have missed, deletions in
    /// particular, which a replay of initial data cannot show. Runs right
    /// after a resyncing subscription opens. Returns `false` once `out` is
    /// closed.
    async fn resync(&self, out: &SnapshotSender) -> bool;
}

/// Subscribe, drain, wait, resubscribe, until `out` is cancelled.
///
/// The first opened subscription requests initial data. Later ones are
/// incremental unless the previous round lagged (events were dropped, so
/// only a full listing can recover them) or it failed and
/// `settings.resync_after_error` is set. Every resubscription that asks for
/// initial data also runs [`EventSource::resync`].
pub(crate) async fn run_watch_loop<S: EventSource>(
    source: &S,
    settings: WatchSettings,
    out: &SnapshotSender,
) {
    let kind = source.kind();
    let mut include_initial = true;
    let mut first = true;

    while !out.is_shutdown() {
        let subscription = tokio::select! {
            _ = out.cancelled() => return,
            subscription = source.subscribe(include_initial) => subscription,
        };

        match subscription {
            Ok(mut stream) => {
                debug!(%kind, include_initial, "watch subscribed");
                if include_initial && !first {
                    info!(%kind, "resyncing after a lost watch round");
                    if !source.resync(out).await {
                        return;
                    }
                }
                first = false;
                let mut failed = false;
                let mut lagged = false;
                loop {
                    let next = tokio::select! {
                        _ = out.cancelled() => return,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(event)) => {
                            if !source.handle(event, out).await {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            error!(%kind, error = %e, "watch stream failed");
                            failed = true;
                            lagged = matches!(e, WatchError::Lagged(_));
                            break;
                        }
                        None => {
                            debug!(%kind, "watch stream ended");
                            break;
                        }
                    }
                }
                include_initial = lagged || (failed && settings.resync_after_error);
            }
            Err(e) => {
                error!(%kind, error = %e, "failed to open watch");
            }
        }

        tokio::select! {
            _ = out.cancelled() => return,
            _ = tokio::time::sleep(settings.retry_delay) => {}
        }
    }
}
