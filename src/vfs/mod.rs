//! Virtual file layer
//!
//! [`FileNode`] is the backend-agnostic handle the comparison and execution
//! layers work with: one node per file or directory, carrying a metadata
//! record and a lazily listed, memoized child list. Nodes are produced per
//! backend by a [`producer::FileProducer`] and never outlive one sync run.

pub mod backend;
pub mod cipher;
pub mod listing;
pub mod local;
pub mod producer;
pub mod webdav;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use crate::error::Result;
use crate::vfs::backend::{join_rel, split_rel, ByteReader, EntryInfo};
use crate::vfs::producer::FileProducer;

/// Metadata record of one file or directory.
///
/// Owned exclusively by the node that carries it. Invariants: a nonexistent
/// entry has size 0 and modification time 0; a directory's size is always 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Backend-root-relative parent directory (`""` at the top)
    pub path: String,
    /// Entry name; empty for the root itself
    pub name: String,
    pub is_directory: bool,
    pub exists: bool,
    pub size: u64,
    /// Modification time, unix seconds
    pub modified: i64,
    pub can_read: bool,
    pub can_write: bool,
}

impl FileMeta {
    pub fn from_entry(entry: &EntryInfo) -> Self {
        let (path, name) = split_rel(&entry.rel_path);
        Self {
            path: path.to_string(),
            name: name.to_string(),
            is_directory: entry.is_directory,
            exists: entry.exists,
            size: if entry.is_directory || !entry.exists { 0 } else { entry.size },
            modified: if entry.exists { entry.modified } else { 0 },
            can_read: entry.can_read,
            can_write: entry.can_write,
        }
    }

    /// Backend-root-relative path of the entry itself
    pub fn rel_path(&self) -> String {
        join_rel(&self.path, &self.name)
    }
}

/// One file or directory on one backend.
///
/// The child list is populated at most once per node (through the
/// producer's shared listing cache) and stays fixed for the node's
/// lifetime; a re-sync rebuilds the tree.
pub struct FileNode {
    producer: FileProducer,
    meta: Mutex<FileMeta>,
    children: OnceCell<Vec<Arc<FileNode>>>,
}

impl FileNode {
    pub(crate) fn new(producer: FileProducer, meta: FileMeta) -> Arc<Self> {
        Arc::new(Self {
            producer,
            meta: Mutex::new(meta),
            children: OnceCell::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FileMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the node's metadata
    pub fn meta(&self) -> FileMeta {
        self.lock().clone()
    }

    pub fn producer(&self) -> &FileProducer {
        &self.producer
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn rel_path(&self) -> String {
        self.lock().rel_path()
    }

    pub fn exists(&self) -> bool {
        self.lock().exists
    }

    pub fn is_directory(&self) -> bool {
        self.lock().is_directory
    }

    pub fn len(&self) -> u64 {
        self.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn modified(&self) -> i64 {
        self.lock().modified
    }

    pub fn can_read(&self) -> bool {
        self.lock().can_read
    }

    pub fn can_write(&self) -> bool {
        self.lock().can_write
    }

    /// The node's children, listed lazily and memoized.
    ///
    /// Files and nonexistent nodes have no children. A listing failure
    /// under the treat-empty policy yields an empty list (recorded as a
    /// recoverable failure); under the abort policy it ends the run.
    pub async fn children(&self) -> Result<Vec<Arc<FileNode>>> {
        if !self.is_directory() || !self.exists() {
            return Ok(Vec::new());
        }
        let rel_dir = self.rel_path();
        let producer = self.producer.clone();
        let children = self
            .children
            .get_or_try_init(|| async move { producer.children_of(&rel_dir).await })
            .await?;
        Ok(children.clone())
    }

    /// Open the file for reading
    pub async fn open_read(&self) -> Result<ByteReader> {
        let rel = self.rel_path();
        self.producer
            .backend()
            .open_read(&rel)
            .await
            .map_err(|e| crate::error::SyncError::metadata_error(&rel, e.to_string()))
    }

    /// Write the file's content from a reader; parents must already exist
    /// in the plan order (the local adapter also creates them defensively)
    pub async fn write_from(&self, reader: ByteReader, len: u64) -> Result<u64> {
        let rel = self.rel_path();
        self.producer
            .backend()
            .write_from(&rel, reader, len)
            .await
            .map_err(|e| crate::error::SyncError::copy_error(&rel, &rel, e.to_string()))
    }

    /// Delete the file or directory
    pub async fn delete(&self) -> Result<()> {
        let meta = self.meta();
        let rel = meta.rel_path();
        self.producer
            .call_with_deadline(&rel, self.producer.backend().delete(&rel, meta.is_directory))
            .await
            .map_err(|e| crate::error::SyncError::deletion_error(&rel, e.to_string()))?;

        let mut meta = self.lock();
        meta.exists = false;
        meta.size = 0;
        meta.modified = 0;
        Ok(())
    }

    /// Create this node as a directory
    pub async fn mkdir(&self) -> Result<()> {
        let rel = self.rel_path();
        self.producer
            .call_with_deadline(&rel, self.producer.backend().create_dir(&rel))
            .await
            .map_err(|e| crate::error::SyncError::mkdir_error(&rel, e.to_string()))?;

        let mut meta = self.lock();
        meta.exists = true;
        meta.is_directory = true;
        meta.size = 0;
        Ok(())
    }

    /// Set the modification time, through whatever mechanism the backend
    /// supports. The node's record is updated even when the backend call
    /// fails so a later comparison in the same run stays self-consistent.
    pub async fn set_modified(&self, modified: i64) -> Result<()> {
        let (rel, is_dir) = {
            let mut meta = self.lock();
            meta.modified = modified;
            (meta.rel_path(), meta.is_directory)
        };
        self.producer
            .call_with_deadline(
                &rel,
                self.producer.backend().set_modified(&rel, is_dir, modified),
            )
            .await
            .map_err(|e| crate::error::SyncError::metadata_error(&rel, e.to_string()))
    }

    /// Mark the node read-only
    pub async fn set_read_only(&self) -> Result<()> {
        let rel = {
            let mut meta = self.lock();
            meta.can_write = false;
            meta.rel_path()
        };
        self.producer
            .call_with_deadline(&rel, self.producer.backend().set_read_only(&rel))
            .await
            .map_err(|e| crate::error::SyncError::metadata_error(&rel, e.to_string()))
    }

    /// Hook before a copy reads from this node
    pub fn pre_copy_source(&self, _target: &FileNode) -> bool {
        true
    }

    /// Hook before a copy writes to this node: takes over the expected
    /// size, timestamp, and permission metadata from the source so the
    /// transfer is issued against known values.
    pub fn pre_copy_target(&self, source: &FileNode) -> bool {
        let src = source.meta();
        let mut meta = self.lock();
        meta.modified = src.modified;
        if !src.is_directory {
            meta.size = src.size;
            if !src.can_write {
                meta.can_write = false;
            }
        }
        true
    }

    /// Hook after a fully successful copy onto this node: finalizes the
    /// record and pushes the timestamp (and read-only state, when
    /// mirrored) to the backend. Must not run after a failed transfer.
    pub async fn post_copy_target(&self, source: &FileNode) -> bool {
        let src = source.meta();
        {
            let mut meta = self.lock();
            meta.is_directory = src.is_directory;
            meta.exists = src.exists;
            meta.size = src.size;
        }

        // Best-effort: a store that cannot persist the timestamp still has
        // the correct content.
        if let Err(e) = self.set_modified(src.modified).await {
            tracing::warn!("could not finalize mtime of '{}': {}", self.rel_path(), e);
        }

        if self.producer.mirror_read_only() && !src.can_write {
            if let Err(e) = self.set_read_only().await {
                tracing::warn!("could not mirror read-only on '{}': {}", self.rel_path(), e);
            }
        }
        true
    }

    /// Hook after a fully successful copy read from this node
    pub fn post_copy_source(&self, _target: &FileNode) -> bool {
        true
    }
}

impl std::fmt::Debug for FileNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta();
        write!(
            f,
            "FileNode({} {}{} '{}')",
            self.producer.side(),
            if meta.is_directory { "d" } else { "-" },
            if meta.exists { "e" } else { "-" },
            meta.rel_path()
        )
    }
}
