//! Error types for Neutral IPC.
//!
//! `NeutralError` is the crate-wide error. `CodecError` and `SchemaError`
//! are the focused failures of the wire codec and the schema model; the
//! orchestrator treats them differently (a codec error closes the
//! connection, a schema error becomes a 400 response).

use std::path::PathBuf;
use thiserror::Error;

/// Framing failures. Fatal to the connection they occur on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Oversized frame: declared {declared} bytes exceeds maximum {max}")]
    Oversized { declared: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Schema payload failures. Reported to the client as a status, not fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Malformed schema: {0}")]
    Malformed(String),

    #[error("Invalid shape at {path}: {message}")]
    InvalidShape { path: String, message: String },
}

impl SchemaError {
    pub(crate) fn shape(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::InvalidShape {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Main error type for the Neutral IPC library.
#[derive(Debug, Error)]
pub enum NeutralError {
    // Transport errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Render server unreachable at {addr}")]
    ServerUnreachable { addr: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    // Protocol errors
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Cache store errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Cache store error: {message}")]
    Cache { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Neutral IPC operations.
pub type Result<T> = std::result::Result<T, NeutralError>;

impl From<std::io::Error> for NeutralError {
    fn from(err: std::io::Error) -> Self {
        NeutralError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for NeutralError {
    fn from(err: serde_json::Error) -> Self {
        NeutralError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for NeutralError {
    fn from(err: rusqlite::Error) -> Self {
        NeutralError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl NeutralError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        NeutralError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Map to the status code carried in a response frame.
    ///
    /// Codec errors never reach a response: the connection is closed.
    ///
    /// - 400: the request payload was invalid (schema errors)
    /// - 503: a collaborator was unavailable
    /// - 500: everything else
    pub fn to_status_code(&self) -> u16 {
        match self {
            NeutralError::Schema(_) | NeutralError::Json { .. } => 400,
            NeutralError::ServerUnreachable { .. } | NeutralError::Timeout(_) => 503,
            _ => 500,
        }
    }
}
