//! Trigger error types.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("invalid cron expression {spec:?}: {reason}")]
    InvalidExpression { spec: String, reason: String },

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("trigger engine is stopped")]
    Stopped,
}

pub type TriggerResult<T> = Result<T, TriggerError>;
