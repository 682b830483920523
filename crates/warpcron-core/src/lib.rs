//! warpcron-core: shared types for the warpcron scheduling engine.
//!
//! - **`types`**: workload identities, schedule specs, snapshots
//! - **`identity`**: deterministic schedule identity hashing
//! - **`resource`**: workflow/template resource model
//! - **`client`**: contracts for the resource store and execution runtime
//! - **`config`**: `warpcron.toml` parser

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod resource;
pub mod types;

pub use client::{
    EventKind, ExecutionClient, ExecutionRequest, ExecutionResult, ExecutionStream,
    RunningContext, TemplateClient, WatchEvent, WatchStream, WorkflowClient,
};
pub use config::{EngineConfig, WatchSettings};
pub use error::{ClientError, ClientResult, ExecutionError, IdentityError, WatchError};
pub use identity::ScheduleIdentity;
pub use resource::{Event, Template, TemplateRef, TemplateSpec, Workflow, WorkflowSpec};
pub use types::*;
