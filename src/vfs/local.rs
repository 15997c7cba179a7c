//! Local filesystem backend

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use filetime::FileTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::vfs::backend::{join_rel, Backend, ByteReader, EntryInfo};

/// Storage adapter for a directory tree on the local disk
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a backend-relative `/`-separated path to an absolute one
    fn resolve(&self, rel: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in rel.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    fn entry_from_metadata(
        &self,
        rel_path: &str,
        name: &str,
        metadata: &std::fs::Metadata,
    ) -> EntryInfo {
        let is_directory = metadata.is_dir();
        EntryInfo {
            name: name.to_string(),
            rel_path: rel_path.to_string(),
            is_directory,
            exists: true,
            size: if is_directory { 0 } else { metadata.len() },
            modified: system_time_secs(metadata.modified().ok()),
            can_read: true,
            can_write: !metadata.permissions().readonly(),
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn scheme(&self) -> &str {
        "local"
    }

    async fn stat_root(&self) -> Result<EntryInfo> {
        match fs::metadata(&self.root).await {
            Ok(metadata) => Ok(self.entry_from_metadata("", "", &metadata)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(EntryInfo::absent("", true))
            }
            Err(e) => Err(e).context(format!("stat of '{}' failed", self.root.display())),
        }
    }

    async fn list_dir(&self, rel_dir: &str) -> Result<Vec<EntryInfo>> {
        let dir = self.resolve(rel_dir);
        let mut reader = fs::read_dir(&dir)
            .await
            .context(format!("listing '{}' failed", dir.display()))?;

        let mut entries = Vec::new();
        while let Some(dir_entry) = reader
            .next_entry()
            .await
            .context(format!("listing '{}' failed", dir.display()))?
        {
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let metadata = match dir_entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry '{}': {}", name, e);
                    continue;
                }
            };
            let rel_path = join_rel(rel_dir, &name);
            entries.push(self.entry_from_metadata(&rel_path, &name, &metadata));
        }
        Ok(entries)
    }

    async fn open_read(&self, rel: &str) -> Result<ByteReader> {
        let path = self.resolve(rel);
        let file = fs::File::open(&path)
            .await
            .context(format!("opening '{}' failed", path.display()))?;
        Ok(Box::pin(file) as ByteReader)
    }

    async fn write_from(&self, rel: &str, mut reader: ByteReader, len: u64) -> Result<u64> {
        let path = self.resolve(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context(format!("creating parent of '{}' failed", path.display()))?;
        }

        let mut file = fs::File::create(&path)
            .await
            .context(format!("creating '{}' failed", path.display()))?;
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .context(format!("writing '{}' failed", path.display()))?;
        file.flush()
            .await
            .context(format!("flushing '{}' failed", path.display()))?;

        if written != len {
            anyhow::bail!(
                "short write to '{}': {} of {} bytes",
                path.display(),
                written,
                len
            );
        }
        Ok(written)
    }

    async fn delete(&self, rel: &str, is_dir: bool) -> Result<()> {
        let path = self.resolve(rel);
        if is_dir {
            fs::remove_dir_all(&path)
                .await
                .context(format!("deleting directory '{}' failed", path.display()))
        } else {
            fs::remove_file(&path)
                .await
                .context(format!("deleting '{}' failed", path.display()))
        }
    }

    async fn create_dir(&self, rel: &str) -> Result<()> {
        let path = self.resolve(rel);
        fs::create_dir_all(&path)
            .await
            .context(format!("creating directory '{}' failed", path.display()))
    }

    async fn set_modified(&self, rel: &str, _is_dir: bool, modified: i64) -> Result<()> {
        let path = self.resolve(rel);
        let mtime = FileTime::from_unix_time(modified, 0);
        set_mtime_blocking(&path, mtime).await
    }

    async fn set_read_only(&self, rel: &str) -> Result<()> {
        let path = self.resolve(rel);
        let metadata = fs::metadata(&path)
            .await
            .context(format!("stat of '{}' failed", path.display()))?;
        let mut permissions = metadata.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions)
            .await
            .context(format!("chmod of '{}' failed", path.display()))
    }
}

/// Convert a filesystem timestamp to unix seconds, 0 when unavailable
fn system_time_secs(time: Option<SystemTime>) -> i64 {
    time.and_then(|t| match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).ok(),
        Err(_) => None,
    })
    .unwrap_or(0)
}

/// filetime only exposes a blocking API; run it off the async worker
async fn set_mtime_blocking(path: &Path, mtime: FileTime) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_mtime(&path, mtime)
            .context(format!("setting mtime of '{}' failed", path.display()))
    })
    .await
    .context("mtime task failed")?
}
