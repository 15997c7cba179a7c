//! Backend capability trait shared by all storage adapters
//!
//! Every store the engine can synchronize (local disk, WebDAV, the
//! encrypting overlay) implements [`Backend`]. Paths handed to a backend are
//! always backend-root relative, `/`-separated, with `""` naming the root
//! itself. Backend methods return `anyhow::Result`; the node layer converts
//! every failure into the recoverable-failure channel so nothing propagates
//! past a single node operation.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::vfs::cipher::{Cipher, CipherBackend};
use crate::vfs::local::LocalBackend;
use crate::vfs::webdav::{DavSession, WebDavBackend};

/// Byte stream handed across the backend boundary
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// One entry of a directory listing (or a root stat), as reported by a
/// backend. Child directory-ness and metadata come from the listing response
/// so no second round trip is needed per child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Entry name (last path segment; empty for the root)
    pub name: String,
    /// Backend-root-relative path of the entry
    pub rel_path: String,
    pub is_directory: bool,
    pub exists: bool,
    /// Size in bytes; always 0 for directories
    pub size: u64,
    /// Modification time, unix seconds; 0 when the backend reports none
    pub modified: i64,
    pub can_read: bool,
    pub can_write: bool,
}

impl EntryInfo {
    /// An entry for a path that does not exist (yet) on this backend
    pub fn absent(rel_path: &str, is_directory: bool) -> Self {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path).to_string();
        Self {
            name,
            rel_path: rel_path.to_string(),
            is_directory,
            exists: false,
            size: 0,
            modified: 0,
            can_read: true,
            can_write: true,
        }
    }
}

/// Capability set every storage adapter must provide
#[async_trait]
pub trait Backend: Send + Sync {
    /// Scheme identifying the adapter, for diagnostics ("local", "dav", ...)
    fn scheme(&self) -> &str;

    /// Stat the backend root. `exists == false` means the root itself is
    /// absent (e.g. a target directory that has not been created yet).
    async fn stat_root(&self) -> Result<EntryInfo>;

    /// Enumerate the children of one directory in a single call.
    /// The returned entries never include the directory's own entry.
    async fn list_dir(&self, rel_dir: &str) -> Result<Vec<EntryInfo>>;

    /// Open a file for reading
    async fn open_read(&self, rel: &str) -> Result<ByteReader>;

    /// Write a file from the given reader, creating parents as needed.
    /// Returns the number of bytes written; partial writes are errors.
    async fn write_from(&self, rel: &str, reader: ByteReader, len: u64) -> Result<u64>;

    /// Delete a file or an (empty or not) directory
    async fn delete(&self, rel: &str, is_dir: bool) -> Result<()>;

    /// Create a directory (parents are expected to exist already)
    async fn create_dir(&self, rel: &str) -> Result<()>;

    /// Set the modification time, through whatever mechanism the store
    /// supports (native mtime, custom property, ...)
    async fn set_modified(&self, rel: &str, is_dir: bool, modified: i64) -> Result<()>;

    /// Mark a file read-only, where the store supports it
    async fn set_read_only(&self, rel: &str) -> Result<()>;
}

/// Root location of one side of a sync run. Collaborator handles (the
/// network session, the cipher) are constructed by the embedder; this enum
/// only selects and wires the matching adapter.
pub enum RootLocation {
    /// A directory on the local filesystem
    Local { path: PathBuf },
    /// A WebDAV collection reached through an externally provided session
    WebDav {
        session: Arc<dyn DavSession>,
        root_url: String,
    },
    /// An encrypting overlay over another location
    Encrypted {
        inner: Box<RootLocation>,
        cipher: Arc<dyn Cipher>,
    },
}

/// Construct the backend adapter for a root location.
pub fn backend_for_root(location: RootLocation) -> crate::error::Result<Arc<dyn Backend>> {
    match location {
        RootLocation::Local { path } => {
            tracing::debug!("creating local backend at {}", path.display());
            Ok(Arc::new(LocalBackend::new(path)) as Arc<dyn Backend>)
        }
        RootLocation::WebDav { session, root_url } => {
            tracing::debug!("creating webdav backend at {}", root_url);
            Ok(Arc::new(WebDavBackend::new(session, &root_url)?) as Arc<dyn Backend>)
        }
        RootLocation::Encrypted { inner, cipher } => {
            let inner = backend_for_root(*inner)?;
            Ok(Arc::new(CipherBackend::new(inner, cipher)) as Arc<dyn Backend>)
        }
    }
}

/// Race a backend call against the configured per-operation deadline.
/// Transfers are excluded; the deadline covers listings and metadata calls.
pub async fn with_deadline<T>(
    limit: Option<Duration>,
    rel_path: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("operation timed out after {:?} at '{}'", limit, rel_path),
        },
        None => fut.await,
    }
}

/// Split a relative path into its parent directory and name components.
pub fn split_rel(rel_path: &str) -> (&str, &str) {
    match rel_path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", rel_path),
    }
}

/// Join a relative directory and a child name.
pub fn join_rel(rel_dir: &str, name: &str) -> String {
    if rel_dir.is_empty() {
        name.to_string()
    } else {
        format!("{rel_dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rel() {
        assert_eq!(split_rel(""), ("", ""));
        assert_eq!(split_rel("a.txt"), ("", "a.txt"));
        assert_eq!(split_rel("dir/a.txt"), ("dir", "a.txt"));
        assert_eq!(split_rel("dir/sub/a.txt"), ("dir/sub", "a.txt"));
    }

    #[test]
    fn test_join_rel() {
        assert_eq!(join_rel("", "a.txt"), "a.txt");
        assert_eq!(join_rel("dir", "a.txt"), "dir/a.txt");
    }

    #[test]
    fn test_absent_entry_invariants() {
        let entry = EntryInfo::absent("dir/missing.txt", false);
        assert_eq!(entry.name, "missing.txt");
        assert!(!entry.exists);
        assert_eq!(entry.size, 0);
        assert_eq!(entry.modified, 0);
    }
}
