//! Error types for the pulsewatch state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
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

    #[error("not found: {0}")]
    NotFound(String),
}

impl StateError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Transaction, read, and write failures come from the storage backend
    /// (I/O, commit contention). Everything else is deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StateError::Transaction(_) | StateError::Read(_) | StateError::Write(_)
        )
    }
}
