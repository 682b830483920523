//! Workflow and template resources as seen by the engine.
//!
//! Only the parts relevant to scheduling are modelled: a workflow's own
//! events, the templates it uses, and each template's events. An event is
//! schedule-bearing when it carries a `cronjob`.

use serde::{Deserialize, Serialize};

use crate::types::ScheduleSpec;

/// A workflow event. Non-cron events are carried but ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cronjob: Option<ScheduleSpec>,
}

impl Event {
    pub fn cron(spec: ScheduleSpec) -> Self {
        Self {
            cronjob: Some(spec),
        }
    }
}

/// Reference from a workflow to a template, by display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
}

impl TemplateRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Stable storage name of the referenced template.
    pub fn internal_name(&self) -> String {
        internal_template_name(&self.name)
    }
}

/// Map a template display name (`group/name`) to its storage name
/// (`group--name`).
pub fn internal_template_name(display_name: &str) -> String {
    display_name.replace('/', "--")
}

fn schedules_of(events: &[Event]) -> impl Iterator<Item = &ScheduleSpec> {
    events.iter().filter_map(|e| e.cronjob.as_ref())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default, rename = "use")]
    pub uses: Vec<TemplateRef>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl WorkflowSpec {
    /// Schedules declared directly on the workflow.
    pub fn schedules(&self) -> impl Iterator<Item = &ScheduleSpec> {
        schedules_of(&self.events)
    }

    /// Whether this workflow references the template with `internal_name`.
    pub fn uses_template(&self, internal_name: &str) -> bool {
        self.uses.iter().any(|r| r.internal_name() == internal_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    /// `None` for partial payloads; such resources are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<WorkflowSpec>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, spec: WorkflowSpec) -> Self {
        Self {
            name: name.into(),
            spec: Some(spec),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    #[serde(default)]
    pub events: Vec<Event>,
}

impl TemplateSpec {
    pub fn schedules(&self) -> impl Iterator<Item = &ScheduleSpec> {
        schedules_of(&self.events)
    }
}

/// A reusable workflow fragment. `name` is the internal (storage) name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<TemplateSpec>,
}

impl Template {
    pub fn new(name: impl Into<String>, spec: TemplateSpec) -> Self {
        Self {
            name: name.into(),
            spec: Some(spec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_name_replaces_slashes() {
        assert_eq!(internal_template_name("official/cron"), "official--cron");
        assert_eq!(internal_template_name("plain"), "plain");
        assert_eq!(TemplateRef::new("a/b/c").internal_name(), "a--b--c");
    }

    #[test]
    fn workflow_schedules_skip_non_cron_events() {
        let spec = WorkflowSpec {
            uses: vec![],
            events: vec![
                Event::default(),
                Event::cron(ScheduleSpec::new("0 * * * *")),
            ],
        };
        let crons: Vec<_> = spec.schedules().map(|s| s.cron.as_str()).collect();
        assert_eq!(crons, vec!["0 * * * *"]);
    }

    #[test]
    fn uses_template_matches_internal_name() {
        let spec = WorkflowSpec {
            uses: vec![TemplateRef::new("shared/nightly")],
            events: vec![],
        };
        assert!(spec.uses_template("shared--nightly"));
        assert!(!spec.uses_template("shared/nightly"));
    }

    #[test]
    fn workflow_parses_use_key() {
        let wf: Workflow = serde_json::from_str(
            r#"{"name":"w","spec":{"use":[{"name":"t"}],"events":[{"cronjob":{"cron":"* * * * *"}}]}}"#,
        )
        .unwrap();
        let spec = wf.spec.unwrap();
        assert_eq!(spec.uses[0].name, "t");
        assert_eq!(spec.schedules().count(), 1);
    }
}
