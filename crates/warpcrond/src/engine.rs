//! Engine assembly.

use std::sync::Arc;

use tracing::info;

use warpcron_core::config::EngineConfig;
use warpcron_core::WatchSettings;
use warpcron_dispatch::Dispatcher;
use warpcron_scheduler::{ScheduleManager, Service};
use warpcron_state::StateStore;
use warpcron_trigger::TriggerPrimitive;
use warpcron_watch::{TemplateWatcher, WatchScope, WorkflowWatcher};

/// Resolved engine settings (config file plus CLI overrides).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub environment_id: String,
    pub organization_id: String,
    pub watch: WatchSettings,
    /// Look the workflow up before each fire and skip deleted ones.
    pub resolve_workflow: bool,
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        Ok(Self {
            environment_id: config.environment_id(),
            organization_id: config.organization_id(),
            watch: config.watch_settings()?,
            resolve_workflow: config.resolve_workflow(),
        })
    }

    fn scope(&self) -> WatchScope {
        WatchScope::new(&self.environment_id).with_organization(&self.organization_id)
    }
}

/// Build the schedule service with the store acting as resource store and
/// execution runtime. The caller owns `trigger` and must start it.
pub fn build_service(
    store: &StateStore,
    trigger: Arc<dyn TriggerPrimitive>,
    options: &EngineOptions,
) -> Service {
    let store = Arc::new(store.clone());

    let mut dispatcher = Dispatcher::new(store.clone());
    if options.resolve_workflow {
        dispatcher = dispatcher.with_workflow_resolution(store.clone());
    }

    let manager = Arc::new(ScheduleManager::new(trigger, Arc::new(dispatcher)));

    let workflows =
        WorkflowWatcher::new(store.clone(), store.clone(), options.scope()).with_settings(options.watch);
    let templates =
        TemplateWatcher::new(store.clone(), store, options.scope()).with_settings(options.watch);

    info!(
        environment_id = %options.environment_id,
        organization_id = %options.organization_id,
        resolve_workflow = options.resolve_workflow,
        "schedule engine assembled"
    );

    Service::new(manager)
        .with_watcher(Arc::new(workflows))
        .with_watcher(Arc::new(templates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn options_from_empty_config() {
        let options = EngineOptions::from_config(&EngineConfig::default()).unwrap();
        assert_eq!(options.environment_id, "default");
        assert_eq!(options.organization_id, "");
        assert_eq!(options.watch.retry_delay, Duration::from_millis(200));
        assert!(options.resolve_workflow);
    }

    #[test]
    fn options_reject_bad_duration() {
        let config: EngineConfig = toml::from_str("[watch]\nretry_delay = \"soon\"\n").unwrap();
        assert!(EngineOptions::from_config(&config).is_err());
    }
}
