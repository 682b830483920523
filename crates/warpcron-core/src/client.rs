//! Contracts for the engine's external collaborators.
//!
//! The engine never talks to a concrete resource store or execution
//! runtime. It consumes these traits; `warpcron-state` provides a local
//! implementation and tests provide in-memory doubles.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{ClientResult, ExecutionError, WatchError};
use crate::resource::{Template, Workflow};
use crate::types::TargetSelector;

// ── Watch ─────────────────────────────────────────────────────────

/// Kind of change observed on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    /// Anything else the store reports (bookmarks, heartbeats).
    Other,
}

impl EventKind {
    /// Create, update and delete are the only kinds the engine acts on.
    pub fn is_change(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// One change on a watched collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent<R> {
    pub kind: EventKind,
    /// Unix timestamp (milliseconds) of the change.
    pub timestamp: u64,
    pub resource: R,
}

impl<R> WatchEvent<R> {
    pub fn new(kind: EventKind, timestamp: u64, resource: R) -> Self {
        Self {
            kind,
            timestamp,
            resource,
        }
    }
}

/// A subscription. An `Err` item is a transport failure and ends the round.
pub type WatchStream<R> = BoxStream<'static, Result<WatchEvent<R>, WatchError>>;

#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Subscribe to workflow changes. With `include_initial`, every existing
    /// workflow is delivered first as a `Create` event.
    async fn watch(
        &self,
        environment_id: &str,
        include_initial: bool,
    ) -> ClientResult<WatchStream<Workflow>>;

    async fn list(&self, environment_id: &str) -> ClientResult<Vec<Workflow>>;

    async fn get(&self, environment_id: &str, name: &str) -> ClientResult<Option<Workflow>>;
}

#[async_trait]
pub trait TemplateClient: Send + Sync {
    async fn watch(
        &self,
        environment_id: &str,
        include_initial: bool,
    ) -> ClientResult<WatchStream<Template>>;

    /// Fetch a template by its internal name.
    async fn get(&self, environment_id: &str, internal_name: &str)
    -> ClientResult<Option<Template>>;
}

// ── Execution ─────────────────────────────────────────────────────

/// Who asked for an execution and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningContext {
    /// Always `"cron"` for engine-issued executions.
    pub actor: String,
    /// Identity of the schedule that fired.
    pub schedule: String,
    pub cron: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub environment_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization_id: String,
    pub workflow: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSelector>,
    pub context: RunningContext,
}

/// One execution created by a request (a request may fan out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub workflow: String,
}

pub type ExecutionStream = BoxStream<'static, Result<ExecutionResult, ExecutionError>>;

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Submit an execution. A submission failure is returned directly;
    /// failures of individual executions arrive on the stream.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionStream, ExecutionError>;
}
