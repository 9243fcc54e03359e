//! Loose refs and the HEAD symref as virtual files.
//!
//! A ref lives at its own name (`refs/heads/main` is a file whose content
//! is the target OID in hex); HEAD is a file containing a `ref: ...`
//! symref line. This covers the ref-file half of the [`crate::Plumbing`]
//! contract; object-model pieces stay with the external library.

use crate::plumbing::PlumbingResult;
use crate::ObjectId;
use rowgit_store::{ChunkFs, StoreError};
use std::sync::Arc;

const HEAD_FILE: &str = "HEAD";
const REFS_DIR: &str = "refs";

/// Loose-ref storage over the chunk filesystem.
pub struct LooseRefs {
    fs: Arc<ChunkFs>,
}

impl LooseRefs {
    /// Wraps a chunk filesystem.
    pub fn new(fs: Arc<ChunkFs>) -> Self {
        Self { fs }
    }

    /// Reads a ref, `None` if it does not exist.
    pub fn read(&self, name: &str) -> PlumbingResult<Option<ObjectId>> {
        let content = match self.fs.read(name) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&content);
        let oid = ObjectId::from_hex(text.trim())
            .map_err(|e| crate::PlumbingError::new(format!("ref {}: {}", name, e)))?;
        Ok(Some(oid))
    }

    /// Force-writes a ref, creating missing parent directories.
    pub fn write(&self, name: &str, oid: ObjectId) -> PlumbingResult<()> {
        let content = format!("{}\n", oid.to_hex());
        match self.fs.write(name, content.as_bytes(), None) {
            Ok(()) => Ok(()),
            // Auto-create parents only for ENOENT; ENOTDIR means a ref
            // file is in the way and must surface.
            Err(StoreError::NotFound(_)) => {
                self.mkdir_all(&rowgit_store::parent(name))?;
                self.fs.write(name, content.as_bytes(), None)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a ref. Deleting an absent ref is a no-op.
    pub fn delete(&self, name: &str) -> PlumbingResult<()> {
        match self.fs.remove_file(name) {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks `refs/` and returns every parseable ref with its OID.
    ///
    /// Uses an explicit worklist rather than recursion so arbitrarily deep
    /// ref namespaces stay bounded.
    pub fn list(&self) -> PlumbingResult<Vec<(String, ObjectId)>> {
        let mut refs = Vec::new();
        let mut worklist = vec![REFS_DIR.to_string()];
        while let Some(dir) = worklist.pop() {
            let children = match self.fs.list(&dir) {
                Ok(children) => children,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            for child in children {
                let path = format!("{}/{}", dir, child);
                let meta = self.fs.stat(&path).map_err(crate::PlumbingError::from)?;
                if meta.is_dir() {
                    worklist.push(path);
                } else if let Some(oid) = self.read(&path)? {
                    refs.push((path, oid));
                }
            }
        }
        Ok(refs)
    }

    /// The branch HEAD symbolically points at.
    pub fn head_branch(&self) -> PlumbingResult<Option<String>> {
        let content = match self.fs.read(HEAD_FILE) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&content);
        let target = match text.trim().strip_prefix("ref: ") {
            Some(target) => target.to_string(),
            // Detached HEAD holds a raw OID.
            None => return Ok(None),
        };
        Ok(target.strip_prefix("refs/heads/").map(|s| s.to_string()))
    }

    /// Points HEAD's symbolic target at a branch.
    pub fn set_head_branch(&self, branch: &str) -> PlumbingResult<()> {
        let content = format!("ref: refs/heads/{}\n", branch);
        self.fs.write(HEAD_FILE, content.as_bytes(), None)?;
        Ok(())
    }

    fn mkdir_all(&self, dir: &str) -> PlumbingResult<()> {
        if dir == "." {
            return Ok(());
        }
        let mut prefix = String::new();
        for part in dir.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            match self.fs.mkdir(&prefix, None) {
                Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
