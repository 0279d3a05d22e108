//! Error types for Larder.
//!
//! Library crates use [`LarderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Larder operations.
#[derive(Debug, thiserror::Error)]
pub enum LarderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed import row or cell.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The store could not be read during a required lookup.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// The store rejected a create because the name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other store write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A record or category with the given identifier does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Enrichment client setup error.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LarderError>;

impl LarderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from a rejected create (duplicate name).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
