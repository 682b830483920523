//! Domain types shared across warpcron crates.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Workload ──────────────────────────────────────────────────────

/// Identifies a schedulable workload across a multi-tenant installation.
///
/// `organization_id` is empty in single-tenant deployments. Fields are
/// private so an identity cannot be mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId {
    name: String,
    environment_id: String,
    #[serde(default)]
    organization_id: String,
}

impl WorkloadId {
    pub fn new(name: impl Into<String>, environment_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment_id: environment_id.into(),
            organization_id: String::new(),
        }
    }

    /// Attach an organization to the identity.
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = organization_id.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.organization_id.is_empty() {
            write!(f, "{}/{}", self.environment_id, self.name)
        } else {
            write!(
                f,
                "{}/{}/{}",
                self.organization_id, self.environment_id, self.name
            )
        }
    }
}

// ── Schedule ──────────────────────────────────────────────────────

/// Selects which runners an execution should land on.
///
/// Passed through to the execution client untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub replicate: Vec<String>,
}

/// One desired cron schedule for a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Standard 5-field cron expression.
    pub cron: String,
    /// IANA timezone the expression is evaluated in (UTC when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Parameter overrides applied at execution time.
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSelector>,
}

impl ScheduleSpec {
    pub fn new(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            ..Self::default()
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_target(mut self, target: TargetSelector) -> Self {
        self.target = Some(target);
        self
    }

    /// The string handed to the trigger primitive.
    ///
    /// Timezoned schedules use the `CRON_TZ=<zone> <expr>` convention.
    pub fn trigger_spec(&self) -> String {
        match &self.timezone {
            Some(zone) => format!("CRON_TZ={zone} {}", self.cron.trim()),
            None => self.cron.trim().to_string(),
        }
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// The complete desired schedule set for one workload.
///
/// An empty `schedules` list means no schedules should exist for the
/// workload. `remove` marks snapshots produced by a delete event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub workload: WorkloadId,
    pub schedules: Vec<ScheduleSpec>,
    pub remove: bool,
}

impl Snapshot {
    pub fn new(workload: WorkloadId, schedules: Vec<ScheduleSpec>) -> Self {
        Self {
            workload,
            schedules,
            remove: false,
        }
    }

    /// Snapshot for a deleted workload: no schedules, `remove` set.
    pub fn removal(workload: WorkloadId) -> Self {
        Self {
            workload,
            schedules: Vec::new(),
            remove: true,
        }
    }
}
