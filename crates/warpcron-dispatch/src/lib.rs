//! warpcron-dispatch: runs a workflow when one of its schedules fires.
//!
//! Each fire becomes exactly one execution request. Nothing is retried:
//! a failed or skipped fire is logged and the next tick is the next chance.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{CRON_ACTOR, DispatchReport, Dispatcher};
pub use error::{DispatchError, DispatchResult};
