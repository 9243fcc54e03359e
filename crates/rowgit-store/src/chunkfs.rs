//! Chunk object store: a POSIX-like file hierarchy in one relational table.
//!
//! Every live path owns a `chunk_index = 0` row carrying its authoritative
//! kind, mode, mtime and total size. File content above the configured
//! threshold is split across consecutively indexed rows and reassembled on
//! read; directories and symlinks never have rows past index 0. Row sets are
//! replaced wholesale on overwrite, never mutated in place.

use crate::path::{normalize, parent, ROOT};
use crate::sql::{RowStore, SqlValue};
use crate::{Result, StoreError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default split threshold: ~1.8 MiB per chunk row.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 1_887_436;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;
const DEFAULT_SYMLINK_MODE: u32 = 0o777;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS chunks (
    path TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    kind INTEGER NOT NULL,
    content BLOB,
    mode INTEGER NOT NULL,
    mtime_ms INTEGER NOT NULL,
    total_size INTEGER NOT NULL,
    PRIMARY KEY (path, chunk_index)
)";

/// The kind of node a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link; content holds the target path.
    Symlink,
}

impl NodeKind {
    fn as_i64(self) -> i64 {
        match self {
            Self::File => 0,
            Self::Directory => 1,
            Self::Symlink => 2,
        }
    }

    fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::File),
            1 => Some(Self::Directory),
            2 => Some(Self::Symlink),
            _ => None,
        }
    }
}

/// Filesystem configuration.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Content longer than this is split across multiple chunk rows.
    pub chunk_threshold: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

/// Stat result for a virtual path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Node kind.
    pub kind: NodeKind,
    /// Total content size in bytes (0 for directories).
    pub size: u64,
    /// POSIX permission bits.
    pub mode: u32,
    /// Last modification time, milliseconds since the Unix epoch.
    pub mtime_ms: i64,
}

impl Metadata {
    /// True for regular files.
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// True for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// True for symbolic links.
    pub fn is_symlink(&self) -> bool {
        self.kind == NodeKind::Symlink
    }
}

/// Chunked virtual filesystem over a [`RowStore`].
///
/// This type is the exclusive writer of the `chunks` table. All operations
/// normalize their path argument first; `"."` is the implicit root and can
/// be listed and stat'd but never created or removed.
pub struct ChunkFs {
    store: Box<dyn RowStore>,
    chunk_threshold: usize,
}

impl ChunkFs {
    /// Wraps a row store, creating the chunk table if needed.
    pub fn new<S: RowStore + 'static>(store: S, config: FsConfig) -> Result<Self> {
        store.execute(CREATE_TABLE, &[])?;
        Ok(Self {
            store: Box::new(store),
            chunk_threshold: config.chunk_threshold,
        })
    }

    /// The active chunk split threshold in bytes.
    pub fn chunk_threshold(&self) -> usize {
        self.chunk_threshold
    }

    /// Stats a path.
    pub fn stat(&self, path: &str) -> Result<Metadata> {
        let path = normalize(path);
        if path == ROOT {
            return Ok(Metadata {
                kind: NodeKind::Directory,
                size: 0,
                mode: DEFAULT_DIR_MODE,
                mtime_ms: 0,
            });
        }
        self.head_row(&path)?
            .ok_or(StoreError::NotFound(path))
    }

    /// True if any node exists at the path.
    pub fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Reads a file (or a symlink's target bytes), reassembling chunks in
    /// index order.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path);
        if path == ROOT {
            return Err(StoreError::IsADirectory(path));
        }
        let rows = self.store.query_all(
            "SELECT kind, content FROM chunks WHERE path = ?1 ORDER BY chunk_index",
            &[SqlValue::from(path.as_str())],
        )?;
        let first = match rows.first() {
            Some(row) => row,
            None => return Err(StoreError::NotFound(path)),
        };
        let kind = NodeKind::from_i64(first.as_i64(0).map_err(StoreError::from)?);
        if kind == Some(NodeKind::Directory) {
            return Err(StoreError::IsADirectory(path));
        }
        let mut out = Vec::new();
        for row in &rows {
            out.extend_from_slice(row.as_blob(1).map_err(StoreError::from)?);
        }
        Ok(out)
    }

    /// Lists the immediate-child basenames of a directory, sorted by name.
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize(path);
        if path == ROOT {
            let rows = self.store.query_all(
                "SELECT path FROM chunks WHERE chunk_index = 0 \
                 AND path NOT LIKE '%/%' ORDER BY path",
                &[],
            )?;
            let mut names = Vec::with_capacity(rows.len());
            for row in &rows {
                names.push(row.as_text(0).map_err(StoreError::from)?.to_string());
            }
            return Ok(names);
        }

        let meta = self.head_row(&path)?.ok_or_else(|| StoreError::NotFound(path.clone()))?;
        if meta.kind != NodeKind::Directory {
            return Err(StoreError::NotADirectory(path));
        }

        // Half-open key range covering every descendant: '0' is the byte
        // successor of '/'.
        let prefix = format!("{}/", path);
        let upper = format!("{}0", path);
        let rows = self.store.query_all(
            "SELECT path FROM chunks WHERE chunk_index = 0 \
             AND path >= ?1 AND path < ?2 ORDER BY path",
            &[SqlValue::from(prefix.as_str()), SqlValue::from(upper.as_str())],
        )?;
        let mut names = Vec::new();
        for row in &rows {
            let full = row.as_text(0).map_err(StoreError::from)?;
            let rest = &full[prefix.len()..];
            if !rest.contains('/') {
                names.push(rest.to_string());
            }
        }
        Ok(names)
    }

    /// Writes a file, replacing any previous row set for the path.
    ///
    /// Content longer than the chunk threshold is split into consecutively
    /// indexed rows, each stamped with the same total size and mtime. With
    /// no explicit mode the previous mode survives an overwrite.
    pub fn write(&self, path: &str, data: &[u8], mode: Option<u32>) -> Result<()> {
        let path = normalize(path);
        if path == ROOT {
            return Err(StoreError::IsADirectory(path));
        }
        self.require_parent_dir(&path)?;

        let existing = self.head_row(&path)?;
        if let Some(meta) = &existing {
            if meta.kind == NodeKind::Directory {
                return Err(StoreError::IsADirectory(path));
            }
        }
        let mode = mode
            .or(existing.map(|m| m.mode))
            .unwrap_or(DEFAULT_FILE_MODE);

        self.delete_rows(&path)?;
        let mtime_ms = now_ms();
        let total = data.len();
        let count = chunk_count(total, self.chunk_threshold);
        for index in 0..count {
            let start = index * self.chunk_threshold;
            let end = (start + self.chunk_threshold).min(total);
            self.insert_row(
                &path,
                index as i64,
                NodeKind::File,
                Some(&data[start..end]),
                mode,
                mtime_ms,
                total as i64,
            )?;
        }
        tracing::debug!(path = %path, size = total, chunks = count, "wrote file");
        Ok(())
    }

    /// Creates a directory.
    pub fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<()> {
        let path = normalize(path);
        if path == ROOT {
            return Err(StoreError::AlreadyExists(path));
        }
        if self.head_row(&path)?.is_some() {
            return Err(StoreError::AlreadyExists(path));
        }
        self.require_parent_dir(&path)?;
        self.insert_row(
            &path,
            0,
            NodeKind::Directory,
            None,
            mode.unwrap_or(DEFAULT_DIR_MODE),
            now_ms(),
            0,
        )?;
        tracing::debug!(path = %path, "created directory");
        Ok(())
    }

    /// Creates a symbolic link whose content is the target path.
    pub fn symlink(&self, path: &str, target: &str) -> Result<()> {
        let path = normalize(path);
        if path == ROOT || self.head_row(&path)?.is_some() {
            return Err(StoreError::AlreadyExists(path));
        }
        self.require_parent_dir(&path)?;
        self.insert_row(
            &path,
            0,
            NodeKind::Symlink,
            Some(target.as_bytes()),
            DEFAULT_SYMLINK_MODE,
            now_ms(),
            target.len() as i64,
        )?;
        Ok(())
    }

    /// Unlinks a file or symlink.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        if path == ROOT {
            return Err(StoreError::NotPermitted(path));
        }
        let meta = self.head_row(&path)?.ok_or_else(|| StoreError::NotFound(path.clone()))?;
        if meta.kind == NodeKind::Directory {
            return Err(StoreError::NotPermitted(path));
        }
        self.delete_rows(&path)?;
        tracing::debug!(path = %path, "unlinked");
        Ok(())
    }

    /// Removes an empty directory.
    pub fn remove_dir(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        if path == ROOT {
            return Err(StoreError::NotPermitted(path));
        }
        let meta = self.head_row(&path)?.ok_or_else(|| StoreError::NotFound(path.clone()))?;
        if meta.kind != NodeKind::Directory {
            return Err(StoreError::NotADirectory(path));
        }
        if self.has_descendants(&path)? {
            return Err(StoreError::NotEmpty(path));
        }
        self.store.execute(
            "DELETE FROM chunks WHERE path = ?1 AND chunk_index = 0",
            &[SqlValue::from(path.as_str())],
        )?;
        tracing::debug!(path = %path, "removed directory");
        Ok(())
    }

    /// Flushes and releases the underlying row store.
    pub fn close(&self) -> Result<()> {
        self.store.close()?;
        Ok(())
    }

    fn head_row(&self, path: &str) -> Result<Option<Metadata>> {
        let row = self.store.query_one(
            "SELECT kind, mode, mtime_ms, total_size FROM chunks \
             WHERE path = ?1 AND chunk_index = 0",
            &[SqlValue::from(path)],
        )?;
        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let raw_kind = row.as_i64(0).map_err(StoreError::from)?;
        let kind = NodeKind::from_i64(raw_kind)
            .ok_or_else(|| StoreError::Io(format!("corrupt kind {} at {}", raw_kind, path)))?;
        Ok(Some(Metadata {
            kind,
            size: row.as_i64(3).map_err(StoreError::from)? as u64,
            mode: row.as_i64(1).map_err(StoreError::from)? as u32,
            mtime_ms: row.as_i64(2).map_err(StoreError::from)?,
        }))
    }

    fn require_parent_dir(&self, path: &str) -> Result<()> {
        let dir = parent(path);
        if dir == ROOT {
            return Ok(());
        }
        let meta = self
            .head_row(&dir)?
            .ok_or_else(|| StoreError::NotFound(dir.clone()))?;
        if meta.kind != NodeKind::Directory {
            return Err(StoreError::NotADirectory(dir));
        }
        Ok(())
    }

    fn has_descendants(&self, path: &str) -> Result<bool> {
        let prefix = format!("{}/", path);
        let upper = format!("{}0", path);
        let row = self.store.query_one(
            "SELECT path FROM chunks WHERE path >= ?1 AND path < ?2 LIMIT 1",
            &[SqlValue::from(prefix.as_str()), SqlValue::from(upper.as_str())],
        )?;
        Ok(row.is_some())
    }

    fn delete_rows(&self, path: &str) -> Result<usize> {
        let n = self.store.execute(
            "DELETE FROM chunks WHERE path = ?1",
            &[SqlValue::from(path)],
        )?;
        Ok(n)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_row(
        &self,
        path: &str,
        index: i64,
        kind: NodeKind,
        content: Option<&[u8]>,
        mode: u32,
        mtime_ms: i64,
        total_size: i64,
    ) -> Result<()> {
        let content = match content {
            Some(bytes) => SqlValue::Blob(bytes.to_vec()),
            None => SqlValue::Null,
        };
        self.store.execute(
            "INSERT INTO chunks (path, chunk_index, kind, content, mode, mtime_ms, total_size) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            &[
                SqlValue::from(path),
                SqlValue::Integer(index),
                SqlValue::Integer(kind.as_i64()),
                content,
                SqlValue::Integer(mode as i64),
                SqlValue::Integer(mtime_ms),
                SqlValue::Integer(total_size),
            ],
        )?;
        Ok(())
    }
}

fn chunk_count(len: usize, threshold: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(threshold)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
