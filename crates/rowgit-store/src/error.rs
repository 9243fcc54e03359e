//! POSIX-style error taxonomy for filesystem callers.

use thiserror::Error;

/// Errors surfaced by the chunk filesystem.
///
/// Each variant carries the offending virtual path and maps to exactly one
/// POSIX error code (see [`StoreError::code`]). The Git plumbing library
/// above this crate branches on these codes, so the classification happens
/// once, here, and never by matching message text downstream.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entry exists at the path (ENOENT).
    #[error("ENOENT: no such file or directory: {0}")]
    NotFound(String),

    /// An entry already exists at the path (EEXIST).
    #[error("EEXIST: file already exists: {0}")]
    AlreadyExists(String),

    /// A path component that must be a directory is not one (ENOTDIR).
    #[error("ENOTDIR: not a directory: {0}")]
    NotADirectory(String),

    /// The operation needs a non-directory but found a directory (EISDIR).
    #[error("EISDIR: illegal operation on a directory: {0}")]
    IsADirectory(String),

    /// A directory being removed still has children (ENOTEMPTY).
    #[error("ENOTEMPTY: directory not empty: {0}")]
    NotEmpty(String),

    /// The operation class is not permitted on this node (EPERM).
    #[error("EPERM: operation not permitted: {0}")]
    NotPermitted(String),

    /// An unclassified row-store failure (EIO).
    #[error("EIO: {0}")]
    Io(String),
}

impl StoreError {
    /// The POSIX code name for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ENOENT",
            Self::AlreadyExists(_) => "EEXIST",
            Self::NotADirectory(_) => "ENOTDIR",
            Self::IsADirectory(_) => "EISDIR",
            Self::NotEmpty(_) => "ENOTEMPTY",
            Self::NotPermitted(_) => "EPERM",
            Self::Io(_) => "EIO",
        }
    }

    /// The path (or message, for `EIO`) the error refers to.
    pub fn path(&self) -> &str {
        match self {
            Self::NotFound(p)
            | Self::AlreadyExists(p)
            | Self::NotADirectory(p)
            | Self::IsADirectory(p)
            | Self::NotEmpty(p)
            | Self::NotPermitted(p)
            | Self::Io(p) => p,
        }
    }
}

impl From<crate::sql::DbError> for StoreError {
    fn from(err: crate::sql::DbError) -> Self {
        StoreError::Io(err.to_string())
    }
}
