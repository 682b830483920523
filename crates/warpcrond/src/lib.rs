//! warpcrond: wiring for the warpcron daemon.
//!
//! - **`engine`**: assembles cron engine, manager, dispatcher, watchers
//!   and service over a `StateStore`
//! - **`manifests`**: loads workflow/template manifests from disk into
//!   the store
//!
//! # Architecture
//!
//! ```text
//! warpcrond standalone
//!   ├── StateStore (redb) ◀── ManifestLoader (rescans *.toml)
//!   └── Service
//!       ├── WorkflowWatcher ─┐
//!       ├── TemplateWatcher ─┴─▶ ScheduleManager ──▶ CronEngine
//!       └──────────────────────────────────────────▶ Dispatcher (on fire)
//! ```

pub mod engine;
pub mod manifests;

pub use engine::{EngineOptions, build_service};
pub use manifests::{ManifestLoader, ScanReport};
