//! Unified error type for the relay.
//!
//! Every component funnels its failures into [`Error`], which carries enough
//! context for HTTP handlers to derive a status code via [`Error::http_status`].

use std::fmt;

/// Error type covering all failure modes of the relay pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A session for this stream name is already registered.
    #[error("Stream already publishing: {name}")]
    DuplicateStream {
        /// The contested stream name.
        name: String,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "session", "segment").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A transcode worker exited unexpectedly. Recovered by the supervisor.
    #[error("Worker crashed [{stream}]: {message}")]
    WorkerCrash {
        /// Stream the worker was bound to.
        stream: String,
        /// Exit description.
        message: String,
    },

    /// The worker could not be kept alive within the restart budget.
    #[error("Worker restart budget exhausted [{stream}] after {attempts} failures: {message}")]
    WorkerExhausted {
        /// Stream the worker was bound to.
        stream: String,
        /// Consecutive failures observed.
        attempts: u32,
        /// Last failure description.
        message: String,
    },

    /// Segment or playlist storage rejected a write.
    #[error("Write error [{stream}]: {source}")]
    Write {
        /// Stream whose output could not be stored.
        stream: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The transcode command template is unusable.
    #[error("Invalid transcode command: {0}")]
    InvalidCommand(String),

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
            Error::DuplicateStream { .. } => 409,
            Error::NotFound { .. } => 404,
            Error::WorkerCrash { .. } => 502,
            Error::WorkerExhausted { .. } => 502,
            Error::Write { .. } => 507,
            Error::Validation(_) => 400,
            Error::InvalidCommand(_) => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::DuplicateStream`].
    pub fn duplicate(name: impl Into<String>) -> Self {
        Error::DuplicateStream { name: name.into() }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Write`].
    pub fn write(stream: impl Into<String>, source: std::io::Error) -> Self {
        Error::Write {
            stream: stream.into(),
            source,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
