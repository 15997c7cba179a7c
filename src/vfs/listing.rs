//! Per-directory listing cache shared across nodes of one backend
//!
//! Several nodes may need the same directory's children (a node's own
//! metadata comes from its parent's listing, the child list from its own);
//! the cache guarantees a single backend enumeration per directory per run.
//! Failed listings are cached too so a flaky directory is not re-hammered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::vfs::backend::EntryInfo;

#[derive(Debug, Clone)]
enum CacheSlot {
    Listed(Arc<Vec<EntryInfo>>),
    Failed,
}

/// Memoized directory listings, keyed by backend-root-relative path
#[derive(Debug, Default)]
pub struct ListingCache {
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a cached listing. `Some(None)` means the earlier listing
    /// attempt failed; `None` means the directory has not been listed yet.
    pub fn get(&self, rel_dir: &str) -> Option<Option<Arc<Vec<EntryInfo>>>> {
        self.lock().get(rel_dir).map(|slot| match slot {
            CacheSlot::Listed(entries) => Some(Arc::clone(entries)),
            CacheSlot::Failed => None,
        })
    }

    /// Record a successful listing
    pub fn insert(&self, rel_dir: &str, entries: Vec<EntryInfo>) -> Arc<Vec<EntryInfo>> {
        let entries = Arc::new(entries);
        self.lock()
            .insert(rel_dir.to_string(), CacheSlot::Listed(Arc::clone(&entries)));
        entries
    }

    /// Record a failed listing so later requests don't retry it
    pub fn insert_failure(&self, rel_dir: &str) {
        self.lock().insert(rel_dir.to_string(), CacheSlot::Failed);
    }

    /// Number of directories with a recorded outcome
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> EntryInfo {
        EntryInfo {
            name: name.to_string(),
            rel_path: name.to_string(),
            is_directory: false,
            exists: true,
            size: 1,
            modified: 1,
            can_read: true,
            can_write: true,
        }
    }

    #[test]
    fn test_populated_once() {
        let cache = ListingCache::new();
        assert!(cache.get("dir").is_none());

        cache.insert("dir", vec![entry("a"), entry("b")]);
        let hit = cache.get("dir").unwrap().unwrap();
        assert_eq!(hit.len(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failure_is_remembered() {
        let cache = ListingCache::new();
        cache.insert_failure("bad");
        assert!(matches!(cache.get("bad"), Some(None)));
    }
}
