//! Error types for Folio
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for Folio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Folio document store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while writing, renaming or unlinking record files
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A document could not be encoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Stored bytes for a record could not be decoded
    #[error("Failed to decode record '{id}': {message}")]
    Decode {
        /// Id of the record whose file is malformed
        id: String,
        /// Codec error message
        message: String,
    },

    /// A named lock could not be acquired
    #[error("Unable to synchronize over '{name}': {source}")]
    Synchronization {
        /// Name of the lock that failed
        name: String,
        /// Underlying failure opening or locking the marker file
        #[source]
        source: io::Error,
    },

    /// A handler registration had nothing to bind to
    #[error("Invalid handler: {0}")]
    InvalidHandler(String),

    /// Id is empty, `.`, `..` or contains a reserved character
    #[error("Invalid id: {0:?}")]
    InvalidId(String),

    /// Bookkeeping record (counter, index state) is inconsistent
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Store configuration could not be read, written or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// An event handler vetoed the operation
    #[error("Operation aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Build a lock acquisition failure for `name`
    pub fn synchronization(name: impl Into<String>, source: io::Error) -> Self {
        Error::Synchronization {
            name: name.into(),
            source,
        }
    }

    /// Build a decode failure for the record `id`
    pub fn decode(id: impl Into<String>, message: impl ToString) -> Self {
        Error::Decode {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// True when this error came from lock acquisition
    pub fn is_synchronization(&self) -> bool {
        matches!(self, Error::Synchronization { .. })
    }
}
