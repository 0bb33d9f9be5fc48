//! Error types for the migration engine
//!
//! Domain errors are tagged variants rather than stringly-typed panics so the
//! HTTP layer can map each one to a status code and machine-readable code.

use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by engine operations
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Bad or missing caller input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A definition with the same id is already registered
    #[error("Migration '{0}' is already registered")]
    DuplicateId(String),

    /// Unknown migration, execution, rollback point or alert
    #[error("{0}")]
    NotFound(String),

    /// Another execution of the same migration is still in flight
    #[error("Migration '{0}' is already running")]
    Concurrency(String),

    /// SQL execution failure or timeout reported by the database collaborator
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Persistence-layer fault (connection, query, serialization)
    #[error("Database error: {0}")]
    Database(String),
}

impl EngineError {
    /// Create a validation error
    pub fn validation<T: Into<String>>(message: T) -> Self {
        EngineError::Validation(message.into())
    }

    /// Create a not-found error
    pub fn not_found<T: Into<String>>(message: T) -> Self {
        EngineError::NotFound(message.into())
    }

    /// Create an execution error
    pub fn execution<T: Into<String>>(message: T) -> Self {
        EngineError::Execution(message.into())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Database(format!("Serialization error: {}", err))
    }
}
