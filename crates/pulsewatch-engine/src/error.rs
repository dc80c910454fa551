//! Error types for engine operations.

use thiserror::Error;

use pulsewatch_state::{Incident, StateError};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input to a create command.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The command does not apply to the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Resolve on a terminal incident. Carries the incident unchanged.
    #[error("incident {} already resolved", .0.id)]
    AlreadyResolved(Box<Incident>),

    /// Transient store failure that outlived its retries.
    #[error("store unavailable: {0}")]
    Unavailable(StateError),

    #[error("store error: {0}")]
    Store(StateError),
}

impl EngineError {
    pub fn service_not_found(id: u64) -> Self {
        EngineError::NotFound(format!("service {id}"))
    }

    pub fn incident_not_found(id: u64) -> Self {
        EngineError::NotFound(format!("incident {id}"))
    }

    /// Both plain invalid-state errors and already-resolved incidents.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidState(_) | EngineError::AlreadyResolved(_)
        )
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => EngineError::NotFound(what),
            e if e.is_transient() => EngineError::Unavailable(e),
            e => EngineError::Store(e),
        }
    }
}
