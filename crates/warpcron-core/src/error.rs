//! Error types shared by the engine and its collaborators.

use thiserror::Error;

/// Result type alias for resource client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by resource store clients (list/get/subscribe).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("resource store unavailable: {0}")]
    Unavailable(String),

    #[error("resource store request failed: {0}")]
    Request(String),

    #[error("malformed resource {name}: {reason}")]
    Malformed { name: String, reason: String },
}

/// A broken subscription. Ends the current watch round.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("watch stream transport failed: {0}")]
    Transport(String),

    #[error("watch stream lagged, {0} events dropped")]
    Lagged(u64),
}

/// Failure computing a schedule identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to encode schedule config: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors reported by the execution runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("execution submission rejected: {0}")]
    Rejected(String),

    #[error("execution runtime error: {0}")]
    Runtime(String),
}
