//! Template watcher.
//!
//! A template change can alter the schedules of every workflow that uses
//! it, so each change re-resolves those workflows and emits one snapshot
//! per workflow, keyed by the workflow's name.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use warpcron_core::{
    ClientResult, EventKind, Snapshot, Template, TemplateClient, WatchEvent, WatchSettings,
    WatchStream, WorkflowClient,
};
use warpcron_scheduler::{SnapshotSender, Watcher};

use crate::resolve::TemplateResolver;
use crate::source::{EventSource, WatchScope, run_watch_loop};

pub struct TemplateWatcher {
    workflows: Arc<dyn WorkflowClient>,
    templates: Arc<dyn TemplateClient>,
    resolver: TemplateResolver,
    scope: WatchScope,
    settings: WatchSettings,
}

impl TemplateWatcher {
    pub fn new(
        workflows: Arc<dyn WorkflowClient>,
        templates: Arc<dyn TemplateClient>,
        scope: WatchScope,
    ) -> Self {
        Self {
            workflows,
            resolver: TemplateResolver::new(templates.clone(), scope.environment_id.clone()),
            templates,
            scope,
            settings: WatchSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WatchSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[async_trait]
impl EventSource for TemplateWatcher {
    type Resource = Template;

    fn kind(&self) -> &'static str {
        "template"
    }

    async fn subscribe(&self, include_initial: bool) -> ClientResult<WatchStream<Template>> {
        self.templates
            .watch(&self.scope.environment_id, include_initial)
            .await
    }

    async fn handle(&self, event: WatchEvent<Template>, out: &SnapshotSender) -> bool {
        let WatchEvent { kind, resource, .. } = event;
        if resource.spec.is_none() {
            debug!(template = %resource.name, "skipping template event without spec");
            return true;
        }
        if !kind.is_change() {
            return true;
        }

        let workflows = match self.workflows.list(&self.scope.environment_id).await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!(
                    template = %resource.name,
                    error = %e,
                    "failed to list workflows to check for scheduled template changes"
                );
                return true;
            }
        };

        let skip = (kind == EventKind::Delete).then_some(resource.name.as_str());
        let mut affected = 0usize;
        for workflow in &workflows {
            let Some(spec) = &workflow.spec else {
                continue;
            };
            if !spec.uses_template(&resource.name) {
                continue;
            }

            let schedules = self.resolver.resolve(&workflow.name, spec, skip).await;
            let snapshot = Snapshot::new(self.scope.workload(&workflow.name), schedules);
            if !out.send(snapshot).await {
                return false;
            }
            affected += 1;
        }

        info!(template = %resource.name, ?kind, affected, "seen workflow template change");
        true
    }

    /// Template deletes missed while lagging leave stale schedules behind,
    /// so every workflow that uses any template is resolved again.
    async fn resync(&self, out: &SnapshotSender) -> bool {
        let workflows = match self.workflows.list(&self.scope.environment_id).await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!(error = %e, "failed to list workflows for template resync");
                return true;
            }
        };

        let mut affected = 0usize;
        for workflow in &workflows {
            let Some(spec) = &workflow.spec else {
                continue;
            };
            if spec.uses.is_empty() {
                continue;
            }
            let schedules = self.resolver.resolve(&workflow.name, spec, None).await;
            if !out
                .send(Snapshot::new(self.scope.workload(&workflow.name), schedules))
                .await
            {
                return false;
            }
            affected += 1;
        }
        info!(affected, "template users resynced");
        true
    }
}

#[async_trait]
impl Watcher for TemplateWatcher {
    fn name(&self) -> &str {
        "templates"
    }

    async fn watch(&self, out: SnapshotSender) {
        run_watch_loop(self, self.settings, &out).await;
    }
}
