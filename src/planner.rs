//! Policy decision tables and ordered action planning
//!
//! The planner turns a comparison tree into a flat, ordered action list.
//! Ordering is part of the contract the executor relies on: a directory's
//! `mkdir` precedes every action under it, and all actions under a
//! directory precede its `delete`.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::compare::{ComparisonNode, ComparisonStatus};
use crate::config::{SyncConfig, SyncMode};
use crate::error::Result;
use crate::vfs::producer::FileProducer;
use crate::vfs::FileNode;

/// The reconciliation operations a plan is made of
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionKind {
    CopyToA,
    CopyToB,
    DeleteFromA,
    DeleteFromB,
    MkdirA,
    MkdirB,
    TouchA,
    TouchB,
}

impl ActionKind {
    pub fn is_copy(self) -> bool {
        matches!(self, ActionKind::CopyToA | ActionKind::CopyToB)
    }

    pub fn is_delete(self) -> bool {
        matches!(self, ActionKind::DeleteFromA | ActionKind::DeleteFromB)
    }

    pub fn is_mkdir(self) -> bool {
        matches!(self, ActionKind::MkdirA | ActionKind::MkdirB)
    }

    pub fn is_touch(self) -> bool {
        matches!(self, ActionKind::TouchA | ActionKind::TouchB)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::CopyToA => write!(f, "copy to A"),
            ActionKind::CopyToB => write!(f, "copy to B"),
            ActionKind::DeleteFromA => write!(f, "delete from A"),
            ActionKind::DeleteFromB => write!(f, "delete from B"),
            ActionKind::MkdirA => write!(f, "mkdir on A"),
            ActionKind::MkdirB => write!(f, "mkdir on B"),
            ActionKind::TouchA => write!(f, "touch on A"),
            ActionKind::TouchB => write!(f, "touch on B"),
        }
    }
}

/// One planned mutation, consumed exactly once by the executor
#[derive(Debug, Clone)]
pub struct SyncAction {
    pub kind: ActionKind,
    pub rel_path: String,
    /// Tree depth of the affected pair, part of the ordering key
    pub depth: usize,
    /// Bytes to transfer (copies only)
    pub size: u64,
    pub(crate) source: Option<Arc<FileNode>>,
    pub(crate) target: Option<Arc<FileNode>>,
}

/// Summary statistics of a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_actions: usize,
    pub copies: usize,
    pub deletes: usize,
    pub directory_creates: usize,
    pub touches: usize,
    pub total_bytes_to_transfer: u64,
}

/// A complete ordered reconciliation plan
#[derive(Debug)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    pub summary: PlanSummary,
    /// Directory/file mismatches needing manual resolution; no automatic
    /// policy ever deletes and recreates across the mismatch
    pub conflicts: Vec<String>,
}

/// Maps a comparison tree to an ordered action list under one policy
pub struct ActionPlanner {
    config: SyncConfig,
    producer_a: FileProducer,
    producer_b: FileProducer,
}

impl ActionPlanner {
    pub fn new(
        config: &SyncConfig,
        producer_a: FileProducer,
        producer_b: FileProducer,
    ) -> Self {
        Self {
            config: config.clone(),
            producer_a,
            producer_b,
        }
    }

    /// Produce the ordered plan for a comparison tree
    pub async fn plan(&self, root: &ComparisonNode) -> Result<SyncPlan> {
        let mut actions = Vec::new();
        let mut conflicts = Vec::new();
        self.visit(root, &mut actions, &mut conflicts).await?;

        let summary = summarize(&actions);
        tracing::info!(
            "planned {} actions ({} copies, {} deletes, {} mkdirs, {} touches), {} conflicts",
            summary.total_actions,
            summary.copies,
            summary.deletes,
            summary.directory_creates,
            summary.touches,
            conflicts.len()
        );
        Ok(SyncPlan {
            actions,
            summary,
            conflicts,
        })
    }

    fn visit<'a>(
        &'a self,
        node: &'a ComparisonNode,
        actions: &'a mut Vec<SyncAction>,
        conflicts: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            match node.status {
                ComparisonStatus::Equal => {
                    if node.timestamps_diverged {
                        if let Some(action) = self.touch_action(node) {
                            actions.push(action);
                        }
                    }
                    for child in &node.children {
                        self.visit(child, &mut *actions, &mut *conflicts).await?;
                    }
                }
                ComparisonStatus::Changed => {
                    if let Some(action) = self.change_action(node) {
                        actions.push(action);
                    }
                }
                ComparisonStatus::OnlyInA => {
                    if let Some(a) = &node.a {
                        match self.config.mode {
                            SyncMode::MirrorAToB | SyncMode::TwoWay | SyncMode::Update => {
                                self.create_subtree(Arc::clone(a), true, node.depth, actions)
                                    .await?;
                            }
                            SyncMode::MirrorBToA => {
                                // A one-sided status caused by a failed
                                // listing on the other side must not turn
                                // into a delete.
                                if node.peer_listing_failed {
                                    tracing::warn!(
                                        "not deleting '{}': side B listing failed",
                                        node.rel_path
                                    );
                                } else {
                                    self.delete_subtree(Arc::clone(a), false, node.depth, actions)
                                        .await?;
                                }
                            }
                        }
                    }
                }
                ComparisonStatus::OnlyInB => {
                    if let Some(b) = &node.b {
                        match self.config.mode {
                            SyncMode::MirrorAToB => {
                                if node.peer_listing_failed {
                                    tracing::warn!(
                                        "not deleting '{}': side A listing failed",
                                        node.rel_path
                                    );
                                } else {
                                    self.delete_subtree(Arc::clone(b), true, node.depth, actions)
                                        .await?;
                                }
                            }
                            SyncMode::MirrorBToA | SyncMode::TwoWay => {
                                self.create_subtree(Arc::clone(b), false, node.depth, actions)
                                    .await?;
                            }
                            SyncMode::Update => {}
                        }
                    }
                }
                ComparisonStatus::DirFileMismatch => {
                    conflicts.push(node.rel_path.clone());
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Decision for a changed file pair
    fn change_action(&self, node: &ComparisonNode) -> Option<SyncAction> {
        let a = node.a.as_ref()?;
        let b = node.b.as_ref()?;
        let (kind, source, target) = match self.config.mode {
            SyncMode::MirrorAToB => (ActionKind::CopyToB, a, b),
            SyncMode::MirrorBToA => (ActionKind::CopyToA, b, a),
            SyncMode::TwoWay => {
                // Newer side wins; a tie keeps side A as the source
                if b.modified() > a.modified() {
                    (ActionKind::CopyToA, b, a)
                } else {
                    (ActionKind::CopyToB, a, b)
                }
            }
            SyncMode::Update => {
                if a.modified() > b.modified() {
                    (ActionKind::CopyToB, a, b)
                } else {
                    return None;
                }
            }
        };
        Some(SyncAction {
            kind,
            rel_path: node.rel_path.clone(),
            depth: node.depth,
            size: source.len(),
            source: Some(Arc::clone(source)),
            target: Some(Arc::clone(target)),
        })
    }

    /// Timestamp re-alignment for a pair equalized by the size-match
    /// assumption
    fn touch_action(&self, node: &ComparisonNode) -> Option<SyncAction> {
        let a = node.a.as_ref()?;
        let b = node.b.as_ref()?;
        if a.is_directory() || b.is_directory() {
            return None;
        }
        let (kind, source, target) = match self.config.mode {
            SyncMode::MirrorAToB => (ActionKind::TouchB, a, b),
            SyncMode::MirrorBToA => (ActionKind::TouchA, b, a),
            SyncMode::TwoWay => {
                if b.modified() > a.modified() {
                    (ActionKind::TouchA, b, a)
                } else {
                    (ActionKind::TouchB, a, b)
                }
            }
            SyncMode::Update => {
                if a.modified() > b.modified() {
                    (ActionKind::TouchB, a, b)
                } else {
                    return None;
                }
            }
        };
        Some(SyncAction {
            kind,
            rel_path: node.rel_path.clone(),
            depth: node.depth,
            size: 0,
            source: Some(Arc::clone(source)),
            target: Some(Arc::clone(target)),
        })
    }

    /// Emit actions creating a one-sided subtree on the other side:
    /// `mkdir` before descendants, parents before children.
    fn create_subtree<'a>(
        &'a self,
        existing: Arc<FileNode>,
        into_b: bool,
        depth: usize,
        actions: &'a mut Vec<SyncAction>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let rel_path = existing.rel_path();
            let target_producer = if into_b { &self.producer_b } else { &self.producer_a };

            if existing.is_directory() {
                let target = target_producer.placeholder(&rel_path, true);
                actions.push(SyncAction {
                    kind: if into_b { ActionKind::MkdirB } else { ActionKind::MkdirA },
                    rel_path,
                    depth,
                    size: 0,
                    source: Some(Arc::clone(&existing)),
                    target: Some(target),
                });
                let mut children = existing.children().await?;
                children.sort_by_key(|child| child.name());
                for child in children {
                    self.create_subtree(child, into_b, depth + 1, &mut *actions)
                        .await?;
                }
            } else {
                let target = target_producer.placeholder(&rel_path, false);
                actions.push(SyncAction {
                    kind: if into_b { ActionKind::CopyToB } else { ActionKind::CopyToA },
                    rel_path,
                    depth,
                    size: existing.len(),
                    source: Some(existing),
                    target: Some(target),
                });
            }
            Ok(())
        }
        .boxed()
    }

    /// Emit actions deleting a one-sided subtree: children before their
    /// directory. The root itself is never deleted, only emptied.
    fn delete_subtree<'a>(
        &'a self,
        existing: Arc<FileNode>,
        from_b: bool,
        depth: usize,
        actions: &'a mut Vec<SyncAction>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let rel_path = existing.rel_path();
            if existing.is_directory() {
                let mut children = existing.children().await?;
                children.sort_by_key(|child| child.name());
                for child in children {
                    self.delete_subtree(child, from_b, depth + 1, &mut *actions)
                        .await?;
                }
                if rel_path.is_empty() {
                    return Ok(());
                }
            }
            actions.push(SyncAction {
                kind: if from_b { ActionKind::DeleteFromB } else { ActionKind::DeleteFromA },
                rel_path,
                depth,
                size: 0,
                source: None,
                target: Some(existing),
            });
            Ok(())
        }
        .boxed()
    }
}

/// Compute summary statistics for an action list
pub fn summarize(actions: &[SyncAction]) -> PlanSummary {
    let mut summary = PlanSummary {
        total_actions: actions.len(),
        ..Default::default()
    };
    for action in actions {
        match action.kind {
            ActionKind::CopyToA | ActionKind::CopyToB => {
                summary.copies += 1;
                summary.total_bytes_to_transfer += action.size;
            }
            ActionKind::DeleteFromA | ActionKind::DeleteFromB => summary.deletes += 1,
            ActionKind::MkdirA | ActionKind::MkdirB => summary.directory_creates += 1,
            ActionKind::TouchA | ActionKind::TouchB => summary.touches += 1,
        }
    }
    summary
}
