//! Scheduler error types.

use thiserror::Error;

use warpcron_core::{ScheduleIdentity, WorkloadId};

use crate::manager::ReplaceOutcome;

/// One schedule that could not be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationFailure {
    pub cron: String,
    /// `None` when the identity itself could not be computed.
    pub identity: Option<ScheduleIdentity>,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Some schedules were rejected. Every other schedule in the snapshot
    /// was still applied; `applied` says how.
    #[error("failed to register {} schedule(s) for {workload}", .failures.len())]
    Registration {
        workload: WorkloadId,
        failures: Vec<RegistrationFailure>,
        applied: ReplaceOutcome,
    },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
