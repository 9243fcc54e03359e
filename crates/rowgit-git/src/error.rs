//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line framing.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// Malformed protocol input.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Malformed object id.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// Chunk filesystem failure.
    #[error(transparent)]
    Store(#[from] rowgit_store::StoreError),

    /// Failure reported by the object-model plumbing.
    #[error("plumbing error: {0}")]
    Plumbing(#[from] crate::plumbing::PlumbingError),
}
