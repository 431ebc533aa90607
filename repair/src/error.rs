//! Repair error types
//!
//! Compile failures are never errors: they are `CompileResult::Failure` values
//! that the repair loop consumes. The errors here cover what remains: unreadable
//! input, persistence, configuration and session bookkeeping.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for repair operations
pub type RepairResult<T> = Result<T, RepairError>;

/// Errors surfaced to callers of the repair core
#[derive(Debug, Error)]
pub enum RepairError {
    /// Source or witness file could not be read
    #[error("Failed to read input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a repaired artifact or session history failed
    #[error("Failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A session bookkeeping invariant would have been broken
    #[error("Session error: {message}")]
    Session { message: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RepairError {
    /// Create an input error
    pub fn input(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Input {
            path: path.into(),
            source,
        }
    }

    /// Create a persistence error
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Whether this error happened while writing results rather than reading input
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}
