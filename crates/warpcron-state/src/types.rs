//! Records owned by the state store.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use warpcron_core::{RunningContext, TargetSelector, Template, WatchEvent, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
}

/// An execution accepted by the local runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub environment_id: String,
    #[serde(default)]
    pub organization_id: String,
    pub workflow: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub target: Option<TargetSelector>,
    pub context: RunningContext,
    pub status: ExecutionStatus,
    /// Unix timestamp (milliseconds).
    pub created_at: u64,
}

impl ExecutionRecord {
    /// Build the composite key for the executions table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.workflow, self.id)
    }
}

/// A change to a stored resource.
#[derive(Debug, Clone)]
pub enum Change {
    Workflow(WatchEvent<Workflow>),
    Template(WatchEvent<Template>),
}

/// One entry on the store's change feed.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub environment_id: String,
    pub change: Change,
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
