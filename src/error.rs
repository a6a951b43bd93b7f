//! Error taxonomy for the orchestration core.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias
//! over [`OrchestratorError`]. The variants mirror the error taxonomy the
//! bus, workflow engine, agent runtime, and tool clients are designed
//! around: validation and state errors are never retried and propagate
//! immediately; transport and timeout errors are retried by whichever
//! component owns the retry budget before they ever reach this type.

use thiserror::Error;

/// A single schema validation failure: the JSON pointer-ish path into the
/// value that failed, and a human-readable message.
pub type ValidationIssue = (String, String);

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Input or output failed schema validation. Never retried.
    #[error("validation failed: {0:?}")]
    Validation(Vec<ValidationIssue>),

    /// An operation exceeded its configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// HTTP or stdio transport failure (spawn, connection, non-2xx, parse).
    #[error("transport error: {0}")]
    Transport(String),

    /// A workflow step's dependency did not succeed.
    #[error("dependency not satisfied: {0}")]
    Dependency(String),

    /// A cycle was detected in a dependency graph (registry or workflow).
    #[error("cycle detected: {0}")]
    Cycle(String),

    /// An invalid state transition was requested.
    #[error("invalid state: {0}")]
    State(String),

    /// A message exhausted its retry budget and was moved to the dead-letter queue.
    #[error("message moved to dead-letter queue: {0}")]
    DeadLetter(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested entity already exists (e.g. duplicate registration).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed input that does not fit any other variant.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
