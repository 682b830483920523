//! warpcron-trigger: the time-based trigger primitive.
//!
//! Accepts cron spec strings, invokes a registered job each time a spec
//! comes due, and lets callers remove entries by handle. Handles are opaque.
//!
//! # Architecture
//!
//! ```text
//! CronEngine
//!   ├── Entry table (std Mutex, never held across an await)
//!   │   └── entry-N: parsed schedule, zone, job, next fire
//!   └── Ticker task (wakes on minute boundaries)
//!       └── one spawned task per due job
//! ```

pub mod engine;
pub mod error;
pub mod spec;

pub use engine::{CronEngine, Job, TriggerHandle, TriggerPrimitive};
pub use error::{TriggerError, TriggerResult};
pub use spec::{ParsedSpec, parse_spec};
