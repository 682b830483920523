//! warpcron-scheduler: keeps registered cron triggers equal to the
//! desired schedules of every workload.
//!
//! Watchers publish complete per-workload `Snapshot`s into the `Service`.
//! The service hands each snapshot to the `ScheduleManager`, which diffs it
//! against what is registered and adds or removes triggers on the
//! `TriggerPrimitive`. When a trigger fires, the manager invokes the
//! configured `FireHandler`.
//!
//! # Architecture
//!
//! ```text
//! Service
//!   ├── Watchers (one task each) ──Snapshot──▶ channel (capacity 1)
//!   └── Consumer
//!       └── ScheduleManager
//!           ├── workload → identity → TriggerHandle (one async mutex)
//!           ├── TriggerPrimitive (CronEngine)
//!           └── FireHandler (execution dispatcher)
//! ```

pub mod error;
pub mod manager;
pub mod service;

pub use error::{RegistrationFailure, SchedulerError, SchedulerResult};
pub use manager::{FireHandler, ReplaceOutcome, ScheduleManager};
pub use service::{SNAPSHOT_CHANNEL_CAPACITY, Service, SnapshotSender, Watcher};
