//! Storage-layer errors.
//!
//! Kept separate from [`vs_core::Error`] so callers can tell a missing file
//! apart from an unreachable backend before the failure is flattened into an
//! HTTP status.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The locator string could not be parsed.
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// The backend answered and the path does not exist.
    #[error("{backend}: no such file or directory: {path}")]
    NotFound { backend: String, path: String },

    /// The backend failed (network, auth, misconfiguration); the message is
    /// the backend's own.
    #[error("{backend}: {message}")]
    Backend { backend: String, message: String },

    /// An operation that needs a directory was given a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Local filesystem error.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn invalid(locator: &str, reason: impl Into<String>) -> Self {
        StorageError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                backend: "local".into(),
                path: path.display().to_string(),
            }
        } else {
            StorageError::Io { path, source }
        }
    }

    /// Whether the failure means the target is permanently absent, as opposed
    /// to the backend being unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

impl From<StorageError> for vs_core::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidLocator { .. } | StorageError::NotADirectory(_) => {
                vs_core::Error::Validation(e.to_string())
            }
            StorageError::NotFound { ref path, .. } => vs_core::Error::not_found("file", path),
            StorageError::Backend { backend, message } => {
                vs_core::Error::Resolution { backend, message }
            }
            StorageError::Io { source, .. } => vs_core::Error::Io { source },
        }
    }
}
