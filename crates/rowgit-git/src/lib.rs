//! Git HTTP wire protocol for Rowgit.
//!
//! This crate implements pkt-line framing and the server side of the smart
//! push protocol (receive-pack), plus the read-only "dumb" ref listing,
//! over the chunk filesystem. Object-model concerns (OID computation, pack
//! indexing, tag peeling) live behind the [`Plumbing`] trait and are
//! supplied by an external library.

mod error;
mod oid;
mod pktline;
mod plumbing;
mod protocol;
mod refs;

pub use error::GitError;
pub use oid::ObjectId;
pub use pktline::{encode, read_until_flush, Decoder, PktLine, PktWriter};
pub use plumbing::{Plumbing, PlumbingError};
pub use protocol::{
    advertise_refs, head_symref, info_refs_dumb, receive_pack, ProtocolConfig, RefUpdate,
    RefUpdateResult, RepoSession, DEFAULT_MAX_PACK_BYTES, RECEIVE_PACK_SERVICE,
};
pub use refs::LooseRefs;

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
