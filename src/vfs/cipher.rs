//! Encrypting overlay backend
//!
//! Wraps any inner [`Backend`] so that names and contents stored there are
//! sealed while the rest of the engine keeps seeing plaintext nodes. The
//! codec itself is the embedder's [`Cipher`] collaborator; this module only
//! maps paths, sizes, and byte streams across the boundary.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::vfs::backend::{join_rel, Backend, ByteReader, EntryInfo};

/// Name and content codec for the encrypting overlay.
///
/// Name sealing must be deterministic and reversible so listings map back to
/// plaintext names. Content sealing may change lengths; `plain_len` reports
/// the plaintext size for a sealed size so node metadata stays comparable.
pub trait Cipher: Send + Sync {
    /// Seal one path segment
    fn seal_name(&self, plain: &str) -> String;

    /// Open one path segment; `None` marks a foreign entry to be skipped
    fn open_name(&self, sealed: &str) -> Option<String>;

    /// Seal file content
    fn seal(&self, plain: Vec<u8>) -> Vec<u8>;

    /// Open file content
    fn open(&self, sealed: Vec<u8>) -> Result<Vec<u8>>;

    /// Plaintext length for a sealed length
    fn plain_len(&self, sealed_len: u64) -> u64;

    /// Sealed length for a plaintext length
    fn sealed_len(&self, plain_len: u64) -> u64;
}

/// Backend adapter sealing names and contents on their way to an inner store
pub struct CipherBackend {
    inner: Arc<dyn Backend>,
    cipher: Arc<dyn Cipher>,
}

impl CipherBackend {
    pub fn new(inner: Arc<dyn Backend>, cipher: Arc<dyn Cipher>) -> Self {
        Self { inner, cipher }
    }

    /// Seal every segment of a relative path
    fn seal_path(&self, rel: &str) -> String {
        rel.split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| self.cipher.seal_name(segment))
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl Backend for CipherBackend {
    fn scheme(&self) -> &str {
        "enc"
    }

    async fn stat_root(&self) -> Result<EntryInfo> {
        let mut root = self.inner.stat_root().await?;
        root.size = 0;
        Ok(root)
    }

    async fn list_dir(&self, rel_dir: &str) -> Result<Vec<EntryInfo>> {
        let sealed_dir = self.seal_path(rel_dir);
        let listing = self.inner.list_dir(&sealed_dir).await?;

        let mut entries = Vec::with_capacity(listing.len());
        for sealed in listing {
            let name = match self.cipher.open_name(&sealed.name) {
                Some(name) => name,
                None => {
                    tracing::warn!("foreign entry '{}' in sealed store, skipping", sealed.name);
                    continue;
                }
            };
            let rel_path = join_rel(rel_dir, &name);
            let size = if sealed.is_directory {
                0
            } else {
                self.cipher.plain_len(sealed.size)
            };
            entries.push(EntryInfo {
                name,
                rel_path,
                size,
                ..sealed
            });
        }
        Ok(entries)
    }

    async fn open_read(&self, rel: &str) -> Result<ByteReader> {
        let mut sealed_reader = self.inner.open_read(&self.seal_path(rel)).await?;
        let mut sealed = Vec::new();
        sealed_reader.read_to_end(&mut sealed).await?;
        let plain = self.cipher.open(sealed)?;
        Ok(Box::pin(std::io::Cursor::new(plain)) as ByteReader)
    }

    async fn write_from(&self, rel: &str, mut reader: ByteReader, len: u64) -> Result<u64> {
        let mut plain = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        reader.read_to_end(&mut plain).await?;
        let plain_len = plain.len() as u64;
        if plain_len != len {
            anyhow::bail!("short body for '{}': {} of {} bytes", rel, plain_len, len);
        }

        let sealed = self.cipher.seal(plain);
        let sealed_len = sealed.len() as u64;
        let body: ByteReader = Box::pin(std::io::Cursor::new(sealed));
        self.inner
            .write_from(&self.seal_path(rel), body, sealed_len)
            .await?;
        Ok(plain_len)
    }

    async fn delete(&self, rel: &str, is_dir: bool) -> Result<()> {
        self.inner.delete(&self.seal_path(rel), is_dir).await
    }

    async fn create_dir(&self, rel: &str) -> Result<()> {
        self.inner.create_dir(&self.seal_path(rel)).await
    }

    async fn set_modified(&self, rel: &str, is_dir: bool, modified: i64) -> Result<()> {
        self.inner
            .set_modified(&self.seal_path(rel), is_dir, modified)
            .await
    }

    async fn set_read_only(&self, rel: &str) -> Result<()> {
        self.inner.set_read_only(&self.seal_path(rel)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::HexCipher;
    use crate::vfs::local::LocalBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_content_round_trip_through_sealed_store() {
        let temp_dir = TempDir::new().unwrap();
        let inner = Arc::new(LocalBackend::new(temp_dir.path()));
        let overlay = CipherBackend::new(inner, Arc::new(HexCipher));

        let body: ByteReader = Box::pin(std::io::Cursor::new(b"secret".to_vec()));
        overlay.write_from("dir/note.txt", body, 6).await.unwrap();

        // The inner store sees sealed names and sealed bytes
        let sealed_dir = temp_dir.path().join(HexCipher.seal_name("dir"));
        let sealed_file = sealed_dir.join(HexCipher.seal_name("note.txt"));
        let raw = std::fs::read(&sealed_file).unwrap();
        assert!(raw.starts_with(b"SEAL"));
        assert_ne!(&raw[4..], b"secret");

        // The overlay reads plaintext back
        let mut reader = overlay.open_read("dir/note.txt").await.unwrap();
        let mut plain = Vec::new();
        reader.read_to_end(&mut plain).await.unwrap();
        assert_eq!(plain, b"secret");
    }

    #[tokio::test]
    async fn test_listing_reports_plain_names_and_sizes() {
        let temp_dir = TempDir::new().unwrap();
        let inner = Arc::new(LocalBackend::new(temp_dir.path()));
        let overlay = CipherBackend::new(inner, Arc::new(HexCipher));

        let body: ByteReader = Box::pin(std::io::Cursor::new(b"0123456789".to_vec()));
        overlay.write_from("data.bin", body, 10).await.unwrap();
        // A stray file the cipher cannot map is not a listing entry
        std::fs::write(temp_dir.path().join("intruder!"), b"x").unwrap();

        let entries = overlay.list_dir("").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "data.bin");
        assert_eq!(entries[0].rel_path, "data.bin");
        assert_eq!(entries[0].size, 10);
    }

    #[tokio::test]
    async fn test_delete_and_mkdir_go_through_sealed_paths() {
        let temp_dir = TempDir::new().unwrap();
        let inner = Arc::new(LocalBackend::new(temp_dir.path()));
        let overlay = CipherBackend::new(inner, Arc::new(HexCipher));

        overlay.create_dir("plain").await.unwrap();
        assert!(temp_dir.path().join(HexCipher.seal_name("plain")).is_dir());

        overlay.delete("plain", true).await.unwrap();
        assert!(!temp_dir.path().join(HexCipher.seal_name("plain")).exists());
    }
}
