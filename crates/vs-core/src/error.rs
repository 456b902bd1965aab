//! Unified error type for vodserve.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for HTTP handlers to derive a status code via [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in vodserve.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "file", "segment").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation (malformed path, unknown representation).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A storage backend failed to resolve a source location.
    #[error("Resolution error [{backend}]: {message}")]
    Resolution {
        /// Backend tag (e.g. "rclone").
        backend: String,
        /// Backend-specific detail, passed through verbatim.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe, rclone) failed to launch or exited
    /// abnormally.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Waiting for output from a running session exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Media probing failed or produced unusable output.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The server is not accepting new work (e.g. shutting down).
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Resolution { .. } => 502,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 504,
            Error::Timeout(_) => 504,
            Error::Probe(_) => 422,
            Error::Unavailable(_) => 503,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Resolution { .. } => "resolution_error",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "process_error",
            Error::Timeout(_) => "timeout",
            Error::Probe(_) => "probe_error",
            Error::Unavailable(_) => "unavailable",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether a client may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Unavailable(_))
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Resolution`].
    pub fn resolution(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Resolution {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
