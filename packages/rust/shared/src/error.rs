//! Error types for extruder.
//!
//! Library crates use [`ExtruderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Stage-level outcomes (a lookup that found nothing, a precondition that
//! was not met) are NOT errors — they travel as failure events through the
//! pipeline. The variants here cover the operational layer around it.

use std::path::PathBuf;

/// Top-level error type for all extruder operations.
#[derive(Debug, thiserror::Error)]
pub enum ExtruderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP transport error against the remote system.
    #[error("network error: {0}")]
    Network(String),

    /// A response body lacked an expected shape or pattern.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A stage name string did not match any known stage.
    #[error("unknown stage name: {0}")]
    UnknownStage(String),

    /// Spreadsheet reading or result-table writing error.
    #[error("sheet error: {0}")]
    Sheet(String),

    /// Snapshot write failure. Load failures are absorbed by the store.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Web front-end server error.
    #[error("server error: {0}")]
    Server(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ExtruderError>;

impl ExtruderError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
