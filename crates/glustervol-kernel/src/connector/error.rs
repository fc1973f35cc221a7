//! Connector error types.

use std::io;
use thiserror::Error;

/// Error from a remote filesystem connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Entry not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Entry already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The backend does not implement this operation.
    #[error("{op} is not supported by the {backend} backend")]
    Unsupported {
        op: &'static str,
        backend: &'static str,
    },

    /// Path escapes the connector root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ConnectorError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(op: &'static str, backend: &'static str) -> Self {
        Self::Unsupported { op, backend }
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Map an I/O error for `path` onto the closest connector error.
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(path),
            io::ErrorKind::AlreadyExists => Self::already_exists(path),
            io::ErrorKind::NotADirectory => Self::not_a_directory(path),
            _ => Self::Io(err),
        }
    }
}

/// Connector result type.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
