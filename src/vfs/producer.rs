//! Per-backend node factory
//!
//! A [`FileProducer`] owns one side's backend handle, its listing cache,
//! and the policy knobs node operations need. It materializes the root
//! node eagerly, child nodes from cached listings on demand, and
//! placeholder nodes for paths the other side is missing. The producer is
//! a cheap handle; every node of the side shares the same state.

use std::fmt;
use std::sync::Arc;

use crate::config::{OnListFailure, SyncConfig};
use crate::error::{FailureLog, Result, SyncError};
use crate::vfs::backend::{with_deadline, Backend, EntryInfo};
use crate::vfs::listing::ListingCache;
use crate::vfs::{FileMeta, FileNode};

/// Which side of the comparison a producer serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

struct ProducerInner {
    side: Side,
    backend: Arc<dyn Backend>,
    cache: ListingCache,
    config: SyncConfig,
    failures: FailureLog,
}

/// Factory and shared state for one backend's nodes
#[derive(Clone)]
pub struct FileProducer {
    inner: Arc<ProducerInner>,
}

impl FileProducer {
    pub fn new(
        side: Side,
        backend: Arc<dyn Backend>,
        config: &SyncConfig,
        failures: FailureLog,
    ) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                side,
                backend,
                cache: ListingCache::new(),
                config: config.clone(),
                failures,
            }),
        }
    }

    pub fn side(&self) -> Side {
        self.inner.side
    }

    pub fn scheme(&self) -> &str {
        self.inner.backend.scheme()
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub(crate) fn mirror_read_only(&self) -> bool {
        self.inner.config.mirror_read_only
    }

    pub(crate) async fn call_with_deadline<T>(
        &self,
        rel_path: &str,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        with_deadline(self.inner.config.operation_timeout, rel_path, fut).await
    }

    /// Materialize the root node. A failed root stat is recoverable: the
    /// root is then assumed to be an existing directory and any real
    /// problem resurfaces through the listing policy.
    pub async fn root_node(&self) -> Result<Arc<FileNode>> {
        let entry = match self
            .call_with_deadline("", self.inner.backend.stat_root())
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                self.inner.failures.record("", "stat", e.to_string());
                if self.inner.config.on_list_failure == OnListFailure::Abort {
                    return Err(SyncError::Aborted(format!(
                        "root stat on side {} failed: {}",
                        self.inner.side, e
                    )));
                }
                let mut assumed = EntryInfo::absent("", true);
                assumed.exists = true;
                assumed
            }
        };
        Ok(FileNode::new(self.clone(), FileMeta::from_entry(&entry)))
    }

    /// A node for a path that does not exist on this side yet
    pub fn placeholder(&self, rel_path: &str, is_directory: bool) -> Arc<FileNode> {
        FileNode::new(
            self.clone(),
            FileMeta::from_entry(&EntryInfo::absent(rel_path, is_directory)),
        )
    }

    /// Whether this side's listing of a directory is known to have failed
    pub(crate) fn listing_failed(&self, rel_dir: &str) -> bool {
        matches!(self.inner.cache.get(rel_dir), Some(None))
    }

    /// One listing per directory per run: a cache hit (success or failure)
    /// never goes back to the backend.
    async fn listing_for(&self, rel_dir: &str) -> Result<Arc<Vec<EntryInfo>>> {
        if let Some(cached) = self.inner.cache.get(rel_dir) {
            return match cached {
                Some(entries) => Ok(entries),
                None => self.listing_failure_result(rel_dir, None),
            };
        }

        match self
            .call_with_deadline(rel_dir, self.inner.backend.list_dir(rel_dir))
            .await
        {
            Ok(entries) => {
                tracing::debug!(
                    "side {} listed '{}': {} entries",
                    self.inner.side,
                    rel_dir,
                    entries.len()
                );
                Ok(self.inner.cache.insert(rel_dir, entries))
            }
            Err(e) => {
                self.inner.cache.insert_failure(rel_dir);
                self.inner.failures.record(rel_dir, "listing", e.to_string());
                self.listing_failure_result(rel_dir, Some(e))
            }
        }
    }

    fn listing_failure_result(
        &self,
        rel_dir: &str,
        cause: Option<anyhow::Error>,
    ) -> Result<Arc<Vec<EntryInfo>>> {
        match self.inner.config.on_list_failure {
            OnListFailure::TreatEmpty => Ok(Arc::new(Vec::new())),
            OnListFailure::Abort => Err(SyncError::Aborted(match cause {
                Some(e) => format!(
                    "listing '{}' on side {} failed: {}",
                    rel_dir, self.inner.side, e
                ),
                None => format!(
                    "listing '{}' on side {} failed earlier",
                    rel_dir, self.inner.side
                ),
            })),
        }
    }

    /// Child nodes of a directory, constructed from its (single) listing
    pub(crate) async fn children_of(&self, rel_dir: &str) -> Result<Vec<Arc<FileNode>>> {
        let entries = self.listing_for(rel_dir).await?;
        Ok(entries
            .iter()
            .map(|entry| FileNode::new(self.clone(), FileMeta::from_entry(entry)))
            .collect())
    }
}

impl fmt::Debug for FileProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileProducer")
            .field("side", &self.inner.side)
            .field("scheme", &self.inner.backend.scheme())
            .field("cached_dirs", &self.inner.cache.len())
            .finish()
    }
}
