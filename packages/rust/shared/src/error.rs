//! Error types for stixfeed.
//!
//! Library crates use [`StixFeedError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::ObjectKind;

/// Top-level error type for all stixfeed operations.
#[derive(Debug, thiserror::Error)]
pub enum StixFeedError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to the catalog.
    #[error("network error: {0}")]
    Network(String),

    /// A per-kind collection fetch could not complete. Fatal to the run.
    #[error("failed to fetch {kind} objects: {message}")]
    Fetch { kind: ObjectKind, message: String },

    /// JSON decoding or object ingestion error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Contract violation on pipeline input (missing kind, bad argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StixFeedError>;

impl StixFeedError {
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

    /// Wrap any error raised while fetching `kind` into a fetch failure.
    pub fn fetch(kind: ObjectKind, msg: impl Into<String>) -> Self {
        Self::Fetch {
            kind,
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
}
