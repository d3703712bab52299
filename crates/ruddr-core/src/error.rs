//! Unified error type for the ruddr ingester.
//!
//! All crates funnel their failures into [`Error`], which carries enough
//! context for HTTP handlers to derive a status code via
//! [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in ruddr.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration could not be loaded or is unusable. Fatal at startup.
    #[error("Config error: {0}")]
    Config(String),

    /// The incoming fMP4 byte stream is corrupt or ended unexpectedly.
    /// Terminates the parser for that representation only.
    #[error("Stream error [{representation}]: {message}")]
    Stream {
        /// Representation whose pipe produced the bad data.
        representation: String,
        /// Human-readable description of the corruption.
        message: String,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "representation", "fragment").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The stream exists but has not produced enough data to answer yet.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Stream { .. } => 500,
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::NotReady(_) => 406,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Stream`].
    pub fn stream(representation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Stream {
            representation: representation.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
