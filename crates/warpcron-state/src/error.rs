//! Error types for the warpcron state store.

use thiserror::Error;

use warpcron_core::ClientError;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl From<StateError> for ClientError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Open(_) | StateError::Transaction(_) => {
                ClientError::Unavailable(e.to_string())
            }
            _ => ClientError::Request(e.to_string()),
        }
    }
}
