//! Error types and result handling for sync-relay.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use sync_relay::{Error, Result};
//!
//! fn check_table(table: &str) -> Result<()> {
//!     Err(Error::SchemaMismatch {
//!         message: format!("no active schema history for table {}", table),
//!     })
//! }
//!
//! match check_table("orders") {
//!     Ok(()) => println!("Table known"),
//!     Err(Error::SchemaMismatch { message }) => eprintln!("Schema error: {}", message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for sync-relay operations.
///
/// Expression and schema errors point at configuration or metadata
/// problems and are always surfaced. Sink failures abandon the batch being
/// written; the batch stays eligible for a fresh extraction.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A route expression could not be parsed.
    #[error("Invalid route expression '{clause}' in '{expression}'")]
    ExpressionSyntax {
        /// The full expression text
        expression: String,
        /// The clause that failed to parse
        clause: String,
    },

    /// A change disagrees with its schema history, or no history exists.
    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the mismatch
        message: String,
    },

    /// A route names a matcher kind that is not registered.
    #[error("Unknown router type: {0}")]
    UnknownRouter(String),

    /// I/O failure while writing to an output sink or checkpoint file.
    #[error("Sink write error: {0}")]
    SinkWrite(#[from] std::io::Error),

    /// A checkpoint file exists but could not be read or parsed.
    #[error("Checkpoint error in {path}: {message}")]
    Checkpoint {
        /// Path of the checkpoint file
        path: String,
        /// Description of the failure
        message: String,
    },

    /// JSON serialization error for checkpoints and capture documents.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The extraction serializer was driven out of order.
    #[error("Invalid extractor state: {message}")]
    InvalidState {
        /// Description of the violated transition
        message: String,
    },

    /// A malformed line was found while reading a wire stream.
    #[error("Protocol error at line {line}: {message}")]
    Protocol {
        /// 1-based line number in the stream
        line: usize,
        /// Description of what was invalid
        message: String,
    },
}

impl Error {
    pub(crate) fn schema_mismatch(message: impl Into<String>) -> Self {
        Error::SchemaMismatch {
            message: message.into(),
        }
    }

    pub(crate) fn checkpoint(path: &std::path::Path, message: impl Into<String>) -> Self {
        Error::Checkpoint {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }
}

/// A convenient Result type alias for sync-relay operations.
///
/// This is equivalent to `std::result::Result<T, sync_relay::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
