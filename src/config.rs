//! Sync policy and run configuration
//!
//! All policy flags are carried in an explicit [`SyncConfig`] value that is
//! threaded through comparison, planning, and execution construction. No
//! component reads ambient global state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Synchronization policy deciding which side wins and whether deletes happen
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncMode {
    /// Make B an exact copy of A (copies A to B, deletes extras from B)
    MirrorAToB,
    /// Make A an exact copy of B (copies B to A, deletes extras from A)
    MirrorBToA,
    /// Propagate the newer side in both directions; never delete
    TwoWay,
    /// Copy missing/newer files from A to B only; never delete
    Update,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::Update
    }
}

/// What to do when a directory listing fails mid-run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OnListFailure {
    /// Record the failure and treat the directory as empty; the run continues
    TreatEmpty,
    /// Abort the whole run with an error
    Abort,
}

impl Default for OnListFailure {
    fn default() -> Self {
        Self::TreatEmpty
    }
}

/// Options for a sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Synchronization policy
    pub mode: SyncMode,
    /// Timestamp tolerance in seconds; backends truncate clock resolution
    /// differently, so two mtimes within this window compare equal
    pub granularity_secs: u32,
    /// Pair child names case-sensitively
    pub case_sensitive: bool,
    /// Listing failure policy
    pub on_list_failure: OnListFailure,
    /// Mirror the source's read-only state onto copy targets
    pub mirror_read_only: bool,
    /// Treat same-size files as equal even when their timestamps disagree
    /// (for stores that do not preserve original modification times); pairs
    /// equalized this way get their timestamps re-aligned instead of copied
    pub assume_equal_on_size_match: bool,
    /// Re-read the copy target afterwards and verify its content digest
    pub verify_after_copy: bool,
    /// Deadline applied to each non-transfer backend call
    pub operation_timeout: Option<Duration>,
    /// Buffer size for file transfers
    pub buffer_size: usize,
    /// Plan and count actions without mutating either side
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            granularity_secs: 2,
            case_sensitive: true,
            on_list_failure: OnListFailure::default(),
            mirror_read_only: false,
            assume_equal_on_size_match: false,
            verify_after_copy: false,
            operation_timeout: None,
            buffer_size: 64 * 1024, // 64KB
            dry_run: false,
        }
    }
}

impl SyncConfig {
    /// Configuration for an exact A-to-B mirror
    pub fn mirror_a_to_b() -> Self {
        Self {
            mode: SyncMode::MirrorAToB,
            ..Default::default()
        }
    }

    /// Configuration for an exact B-to-A mirror
    pub fn mirror_b_to_a() -> Self {
        Self {
            mode: SyncMode::MirrorBToA,
            ..Default::default()
        }
    }

    /// Configuration for bidirectional newest-wins merging
    pub fn two_way() -> Self {
        Self {
            mode: SyncMode::TwoWay,
            ..Default::default()
        }
    }
}
