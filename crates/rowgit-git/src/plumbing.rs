//! Boundary to the external Git object-model library.
//!
//! The protocol engine never computes OIDs, walks history, or indexes
//! packs itself; it calls through this trait. Implementations are expected
//! to read and write refs and objects as virtual files through the chunk
//! filesystem (see [`crate::LooseRefs`] for the ref half).

use crate::ObjectId;
use thiserror::Error;

/// Opaque failure from the plumbing collaborator.
///
/// Rendered verbatim into `ng`/`unpack` report reasons, never rethrown to
/// the transport.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PlumbingError(pub String);

impl PlumbingError {
    /// Wraps any displayable failure.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<rowgit_store::StoreError> for PlumbingError {
    fn from(err: rowgit_store::StoreError) -> Self {
        Self(err.to_string())
    }
}

/// Result type for plumbing calls.
pub type PlumbingResult<T> = std::result::Result<T, PlumbingError>;

/// Object-model operations the protocol engine delegates.
pub trait Plumbing: Send + Sync {
    /// Every resolvable branch and tag ref with its target OID, any order.
    fn list_refs(&self) -> PlumbingResult<Vec<(String, ObjectId)>>;

    /// Resolves one ref to an OID, `None` if it does not exist.
    fn resolve_ref(&self, name: &str) -> PlumbingResult<Option<ObjectId>>;

    /// The commit an annotated tag ultimately targets, `None` for
    /// lightweight tags or non-tags.
    fn peel_tag(&self, name: &str) -> PlumbingResult<Option<ObjectId>>;

    /// The branch name HEAD symbolically points at, `None` if HEAD is
    /// absent or detached.
    fn head_branch(&self) -> PlumbingResult<Option<String>>;

    /// Repoints HEAD's symbolic target at `refs/heads/<branch>`.
    fn set_head_branch(&self, branch: &str) -> PlumbingResult<()>;

    /// Force-writes a ref to an OID, creating it if needed.
    fn update_ref(&self, name: &str, oid: ObjectId) -> PlumbingResult<()>;

    /// Deletes a ref.
    fn delete_ref(&self, name: &str) -> PlumbingResult<()>;

    /// Indexes a packfile previously persisted at the given virtual path,
    /// making its objects addressable.
    fn index_pack(&self, pack_path: &str) -> PlumbingResult<()>;
}
