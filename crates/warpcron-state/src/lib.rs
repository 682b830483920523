//! warpcron-state: local resource store for warpcron.
//!
//! Backed by [redb](https://docs.rs/redb). Holds workflows, templates and
//! the executions started for them, and implements the engine's
//! `WorkflowClient`, `TemplateClient` and `ExecutionClient` contracts so a
//! single process can run the whole engine without an external store.
//!
//! # Architecture
//!
//! ```text
//! StateStore (Clone, Arc<Database>)
//!   ├── workflows   {environment_id}/{name}  → Workflow JSON
//!   ├── templates   {environment_id}/{name}  → Template JSON
//!   ├── executions  {workflow}:{id}          → ExecutionRecord JSON
//!   └── change feed (broadcast) ──▶ watch streams
//! ```

mod clients;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{FEED_CAPACITY, StateStore};
pub use types::*;
