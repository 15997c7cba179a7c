//! Tree Synchronization Engine
//!
//! A backend-agnostic directory synchronization library providing:
//! - A virtual file layer over heterogeneous stores (local disk, WebDAV,
//!   an encrypting overlay)
//! - Comparison trees pairing two node trees by relative path
//! - Policy-driven planning of ordered copy/delete/mkdir/touch actions
//! - Execution with per-action failure isolation and progress reporting

pub mod compare;
pub mod config;
pub mod error;
pub mod executor;
pub mod planner;
pub mod progress;
pub mod timefmt;
pub mod vfs;

// Re-export main types and functions
pub use compare::{ComparisonNode, ComparisonStatus, TreeComparer};
pub use config::{OnListFailure, SyncConfig, SyncMode};
pub use error::{FailureLog, FailureRecord, Result, SyncError};
pub use executor::{Executor, SyncReport};
pub use planner::{ActionKind, ActionPlanner, PlanSummary, SyncAction, SyncPlan};
pub use progress::{ProgressChannel, ProgressEvent, ProgressReporter};
pub use vfs::backend::{backend_for_root, Backend, ByteReader, EntryInfo, RootLocation};
pub use vfs::cipher::{Cipher, CipherBackend};
pub use vfs::local::LocalBackend;
pub use vfs::producer::{FileProducer, Side};
pub use vfs::webdav::{DavEntry, DavProperty, DavSession, WebDavBackend};
pub use vfs::{FileMeta, FileNode};

use std::sync::Arc;

/// Reconcile two trees under the given configuration
pub async fn sync_trees(
    backend_a: Arc<dyn Backend>,
    backend_b: Arc<dyn Backend>,
    config: SyncConfig,
) -> Result<SyncReport> {
    sync_trees_with_progress(backend_a, backend_b, config, None).await
}

/// Reconcile two trees, streaming progress events to the given reporter
pub async fn sync_trees_with_progress(
    backend_a: Arc<dyn Backend>,
    backend_b: Arc<dyn Backend>,
    config: SyncConfig,
    reporter: Option<ProgressReporter>,
) -> Result<SyncReport> {
    let failures = FailureLog::new();
    let producer_a = FileProducer::new(Side::A, backend_a, &config, failures.clone());
    let producer_b = FileProducer::new(Side::B, backend_b, &config, failures.clone());

    let tree = TreeComparer::new(&config)
        .compare(&producer_a, &producer_b)
        .await?;
    let plan = ActionPlanner::new(&config, producer_a, producer_b)
        .plan(&tree)
        .await?;

    let mut executor = Executor::new(&config, failures);
    if let Some(reporter) = reporter {
        executor = executor.with_reporter(reporter);
    }
    executor.execute(plan).await
}

/// Build the plan two trees would be reconciled with, without executing it
pub async fn preview(
    backend_a: Arc<dyn Backend>,
    backend_b: Arc<dyn Backend>,
    config: SyncConfig,
) -> Result<SyncPlan> {
    let failures = FailureLog::new();
    let producer_a = FileProducer::new(Side::A, backend_a, &config, failures.clone());
    let producer_b = FileProducer::new(Side::B, backend_b, &config, failures);

    let tree = TreeComparer::new(&config)
        .compare(&producer_a, &producer_b)
        .await?;
    ActionPlanner::new(&config, producer_a, producer_b)
        .plan(&tree)
        .await
}

// Test modules
#[cfg(test)]
pub(crate) mod testutil;
