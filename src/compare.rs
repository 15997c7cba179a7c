//! Comparison tree: a paired structural diff of two node trees

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::timefmt;
use crate::vfs::producer::FileProducer;
use crate::vfs::{FileMeta, FileNode};

/// Classification of one paired path
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComparisonStatus {
    /// Both sides present and equal within the configured tolerance
    Equal,
    /// Both sides present with differing content metadata
    Changed,
    /// Present on side A only (the whole subtree, when a directory)
    OnlyInA,
    /// Present on side B only (the whole subtree, when a directory)
    OnlyInB,
    /// One side is a directory, the other a file; terminal, never recursed
    DirFileMismatch,
}

/// One node of the comparison tree, pairing up to two file nodes by
/// relative path
#[derive(Debug)]
pub struct ComparisonNode {
    pub a: Option<Arc<FileNode>>,
    pub b: Option<Arc<FileNode>>,
    pub status: ComparisonStatus,
    /// Set when equality was assumed from matching sizes while the
    /// recorded timestamps still disagree beyond the granularity window
    pub timestamps_diverged: bool,
    /// Set on one-sided nodes whose status stems from a failed listing on
    /// the other side; mirror policies must not auto-delete these
    pub peer_listing_failed: bool,
    /// Relative path of the pair (side A's spelling when both exist)
    pub rel_path: String,
    pub depth: usize,
    /// Child pairs; populated only when both sides are directories
    pub children: Vec<ComparisonNode>,
}

impl ComparisonNode {
    fn pair(
        a: Arc<FileNode>,
        b: Arc<FileNode>,
        status: ComparisonStatus,
        timestamps_diverged: bool,
        rel_path: String,
        depth: usize,
        children: Vec<ComparisonNode>,
    ) -> Self {
        Self {
            a: Some(a),
            b: Some(b),
            status,
            timestamps_diverged,
            peer_listing_failed: false,
            rel_path,
            depth,
            children,
        }
    }

    fn only_in_a(a: Arc<FileNode>, depth: usize, peer_listing_failed: bool) -> Self {
        let rel_path = a.rel_path();
        Self {
            a: Some(a),
            b: None,
            status: ComparisonStatus::OnlyInA,
            timestamps_diverged: false,
            peer_listing_failed,
            rel_path,
            depth,
            children: Vec::new(),
        }
    }

    fn only_in_b(b: Arc<FileNode>, depth: usize, peer_listing_failed: bool) -> Self {
        let rel_path = b.rel_path();
        Self {
            a: None,
            b: Some(b),
            status: ComparisonStatus::OnlyInB,
            timestamps_diverged: false,
            peer_listing_failed,
            rel_path,
            depth,
            children: Vec::new(),
        }
    }

    /// Walk the tree, calling the visitor on every node
    pub fn visit(&self, visitor: &mut impl FnMut(&ComparisonNode)) {
        visitor(self);
        for child in &self.children {
            child.visit(visitor);
        }
    }

    /// Total number of pairs in the tree
    pub fn count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }
}

/// Builds a comparison tree over two producers' node trees
pub struct TreeComparer {
    config: SyncConfig,
}

impl TreeComparer {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Compare both trees from their roots
    pub async fn compare(
        &self,
        producer_a: &FileProducer,
        producer_b: &FileProducer,
    ) -> Result<ComparisonNode> {
        let root_a = producer_a.root_node().await?;
        let root_b = producer_b.root_node().await?;

        match (root_a.exists(), root_b.exists()) {
            (true, true) => self.compare_pair(root_a, root_b, String::new(), 0).await,
            (true, false) => Ok(ComparisonNode::only_in_a(root_a, 0, false)),
            (false, true) => Ok(ComparisonNode::only_in_b(root_b, 0, false)),
            (false, false) => Ok(ComparisonNode {
                a: None,
                b: None,
                status: ComparisonStatus::Equal,
                timestamps_diverged: false,
                peer_listing_failed: false,
                rel_path: String::new(),
                depth: 0,
                children: Vec::new(),
            }),
        }
    }

    fn fold_name(&self, name: &str) -> String {
        if self.config.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    /// Size first, then modification time within the granularity window.
    /// Returns the status and whether a size-match equality still has
    /// diverged timestamps.
    fn classify_files(&self, a: &FileMeta, b: &FileMeta) -> (ComparisonStatus, bool) {
        if a.size != b.size {
            return (ComparisonStatus::Changed, false);
        }
        if timefmt::times_equal(a.modified, b.modified, self.config.granularity_secs) {
            return (ComparisonStatus::Equal, false);
        }
        if self.config.assume_equal_on_size_match {
            return (ComparisonStatus::Equal, true);
        }
        (ComparisonStatus::Changed, false)
    }

    fn compare_pair<'s>(
        &'s self,
        a: Arc<FileNode>,
        b: Arc<FileNode>,
        rel_path: String,
        depth: usize,
    ) -> BoxFuture<'s, Result<ComparisonNode>> {
        async move {
            let am = a.meta();
            let bm = b.meta();

            if am.is_directory != bm.is_directory {
                tracing::warn!("directory/file mismatch at '{}'", rel_path);
                return Ok(ComparisonNode::pair(
                    a,
                    b,
                    ComparisonStatus::DirFileMismatch,
                    false,
                    rel_path,
                    depth,
                    Vec::new(),
                ));
            }

            if !am.is_directory {
                let (status, timestamps_diverged) = self.classify_files(&am, &bm);
                return Ok(ComparisonNode::pair(
                    a,
                    b,
                    status,
                    timestamps_diverged,
                    rel_path,
                    depth,
                    Vec::new(),
                ));
            }

            // Both directories: pair children by (possibly case-folded)
            // name. One-sided names cover their whole subtree without
            // further recursion.
            let children_a = a.children().await?;
            let children_b = b.children().await?;
            let a_listing_failed = a.producer().listing_failed(&rel_path);
            let b_listing_failed = b.producer().listing_failed(&rel_path);

            let map_a = self.index_children(children_a);
            let map_b = self.index_children(children_b);

            let mut names: Vec<&String> = map_a.keys().chain(map_b.keys()).collect();
            names.sort();
            names.dedup();

            let mut children = Vec::with_capacity(names.len());
            for name in names {
                match (map_a.get(name.as_str()), map_b.get(name.as_str())) {
                    (Some(ca), Some(cb)) => {
                        let child_rel = ca.rel_path();
                        children.push(
                            self.compare_pair(
                                Arc::clone(ca),
                                Arc::clone(cb),
                                child_rel,
                                depth + 1,
                            )
                            .await?,
                        );
                    }
                    (Some(ca), None) => {
                        children.push(ComparisonNode::only_in_a(
                            Arc::clone(ca),
                            depth + 1,
                            b_listing_failed,
                        ));
                    }
                    (None, Some(cb)) => {
                        children.push(ComparisonNode::only_in_b(
                            Arc::clone(cb),
                            depth + 1,
                            a_listing_failed,
                        ));
                    }
                    (None, None) => unreachable!(),
                }
            }

            Ok(ComparisonNode::pair(
                a,
                b,
                ComparisonStatus::Equal,
                false,
                rel_path,
                depth,
                children,
            ))
        }
        .boxed()
    }

    fn index_children(
        &self,
        children: Vec<Arc<FileNode>>,
    ) -> BTreeMap<String, Arc<FileNode>> {
        let mut map = BTreeMap::new();
        for child in children {
            let key = self.fold_name(&child.name());
            if let Some(previous) = map.insert(key, child) {
                tracing::warn!(
                    "duplicate name '{}' under case folding, keeping the later entry",
                    previous.rel_path()
                );
            }
        }
        map
    }
}
