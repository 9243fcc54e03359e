//! Chunked virtual filesystem for Rowgit.
//!
//! This crate stores a POSIX-like file hierarchy in a single relational
//! table of chunk rows, splitting oversized file content into bounded
//! chunks that are reassembled transparently on read. A Git plumbing
//! library sits on top of it and relies on exact POSIX-style error codes.

mod chunkfs;
mod error;
mod path;
mod sql;
mod sqlite;

pub use chunkfs::{ChunkFs, FsConfig, Metadata, NodeKind, DEFAULT_CHUNK_THRESHOLD};
pub use error::StoreError;
pub use path::{normalize, parent};
pub use sql::{DbError, RowStore, SqlRow, SqlValue};
pub use sqlite::SqliteStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
