//! Dispatch error types.

use thiserror::Error;

use warpcron_core::{ClientError, ExecutionError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to resolve workflow {workflow}: {source}")]
    Resolve {
        workflow: String,
        #[source]
        source: ClientError,
    },

    /// The workflow was deleted between registration and fire.
    #[error("workflow no longer exists: {0}")]
    WorkflowGone(String),

    #[error("execution submission failed: {0}")]
    Submit(#[from] ExecutionError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
