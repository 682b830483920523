//! Workflow watcher.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, error, info};

use warpcron_core::{
    ClientResult, EventKind, Snapshot, TemplateClient, WatchEvent, WatchSettings, WatchStream,
    Workflow, WorkflowClient,
};
use warpcron_scheduler::{SnapshotSender, Watcher};

use crate::resolve::TemplateResolver;
use crate::source::{EventSource, WatchScope, run_watch_loop};

/// Emits a snapshot for every created, updated or deleted workflow.
pub struct WorkflowWatcher {
    workflows: Arc<dyn WorkflowClient>,
    resolver: TemplateResolver,
    scope: WatchScope,
    settings: WatchSettings,
    /// Workflows this watcher has published schedules for.
    known: Mutex<HashSet<String>>,
}

impl WorkflowWatcher {
    pub fn new(
        workflows: Arc<dyn WorkflowClient>,
        templates: Arc<dyn TemplateClient>,
        scope: WatchScope,
    ) -> Self {
        Self {
            workflows,
            resolver: TemplateResolver::new(templates, scope.environment_id.clone()),
            scope,
            settings: WatchSettings::default(),
            known: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_settings(mut self, settings: WatchSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[async_trait]
impl EventSource for WorkflowWatcher {
    type Resource = Workflow;

    fn kind(&self) -> &'static str {
        "workflow"
    }

    async fn subscribe(&self, include_initial: bool) -> ClientResult<WatchStream<Workflow>> {
        self.workflows
            .watch(&self.scope.environment_id, include_initial)
            .await
    }

    async fn handle(&self, event: WatchEvent<Workflow>, out: &SnapshotSender) -> bool {
        let WatchEvent { kind, resource, .. } = event;
        let Some(spec) = &resource.spec else {
            debug!(workflow = %resource.name, "skipping workflow event without spec");
            return true;
        };
        if !kind.is_change() {
            return true;
        }

        let workload = self.scope.workload(&resource.name);
        let snapshot = if kind == EventKind::Delete {
            self.known().remove(&resource.name);
            Snapshot::removal(workload)
        } else {
            self.known().insert(resource.name.clone());
            let schedules = self.resolver.resolve(&resource.name, spec, None).await;
            Snapshot::new(workload, schedules)
        };

        if !out.send(snapshot).await {
            return false;
        }
        info!(workflow = %resource.name, ?kind, "seen workflow change");
        true
    }

    async fn resync(&self, out: &SnapshotSender) -> bool {
        let listed = match self.workflows.list(&self.scope.environment_id).await {
            Ok(listed) => listed,
            Err(e) => {
                error!(error = %e, "failed to list workflows for resync");
                return true;
            }
        };
        let present: HashSet<String> = listed.into_iter().map(|w| w.name).collect();

        let gone = {
            let mut known = self.known();
            let gone: Vec<String> = known.difference(&present).cloned().collect();
            known.retain(|name| present.contains(name));
            gone
        };
        for name in gone {
            if !out.send(Snapshot::removal(self.scope.workload(&name))).await {
                return false;
            }
            info!(workflow = %name, "removed workflow deleted while the watch was down");
        }
        true
    }
}

impl WorkflowWatcher {
    fn known(&self) -> MutexGuard<'_, HashSet<String>> {
        self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Watcher for WorkflowWatcher {
    fn name(&self) -> &str {
        "workflows"
    }

    async fn watch(&self, out: SnapshotSender) {
        run_watch_loop(self, self.settings, &out).await;
    }
}
