//! Plan execution with per-action failure isolation
//!
//! Actions run one at a time in planner order. A failed action is recorded
//! and skipped; the run always continues to the next action. Copies go
//! through the node-level lifecycle hooks: target metadata is prepared
//! before the byte transfer and finalized only after the transfer fully
//! succeeded.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use uuid::Uuid;

use crate::config::{SyncConfig, SyncMode};
use crate::error::{FailureLog, FailureRecord, Result, SyncError};
use crate::planner::{ActionKind, SyncAction, SyncPlan};
use crate::progress::ProgressReporter;
use crate::vfs::backend::ByteReader;
use crate::vfs::FileNode;

/// End-of-run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Unique run identifier
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub dry_run: bool,
    pub files_copied: usize,
    pub deletes: usize,
    pub directories_created: usize,
    pub timestamps_aligned: usize,
    /// Actions that failed during execution
    pub actions_failed: usize,
    pub bytes_transferred: u64,
    pub duration: Duration,
    /// Every recoverable failure of the run (listing and action failures)
    pub failures: Vec<FailureRecord>,
    /// Directory/file mismatches left for manual resolution
    pub conflicts: Vec<String>,
}

impl SyncReport {
    /// Whether the run finished without any recorded failure
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether structural conflicts are awaiting manual resolution
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Number of actions that completed
    pub fn actions_succeeded(&self) -> usize {
        self.files_copied + self.deletes + self.directories_created + self.timestamps_aligned
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        format!(
            "run {}: {} copied, {} deleted, {} dirs created, {} touched, {} failed, {} conflicts, {} bytes in {:.1}s{}",
            self.run_id,
            self.files_copied,
            self.deletes,
            self.directories_created,
            self.timestamps_aligned,
            self.actions_failed,
            self.conflicts.len(),
            self.bytes_transferred,
            self.duration.as_secs_f64(),
            if self.dry_run { " (dry run)" } else { "" }
        )
    }

    /// Serialize the report for persistence or display
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Applies a plan action by action
pub struct Executor {
    config: SyncConfig,
    failures: FailureLog,
    reporter: Option<ProgressReporter>,
}

impl Executor {
    pub fn new(config: &SyncConfig, failures: FailureLog) -> Self {
        Self {
            config: config.clone(),
            failures,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Execute every action of the plan in order and report the outcome
    pub async fn execute(&self, plan: SyncPlan) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let mut report = SyncReport {
            run_id,
            mode: self.config.mode,
            dry_run: self.config.dry_run,
            files_copied: 0,
            deletes: 0,
            directories_created: 0,
            timestamps_aligned: 0,
            actions_failed: 0,
            bytes_transferred: 0,
            duration: Duration::default(),
            failures: Vec::new(),
            conflicts: plan.conflicts.clone(),
        };

        if let Some(reporter) = &self.reporter {
            reporter.run_started(
                run_id,
                plan.summary.total_actions,
                plan.summary.total_bytes_to_transfer,
            );
        }

        for action in &plan.actions {
            let action_started = Instant::now();
            if let Some(reporter) = &self.reporter {
                reporter.action_started(action.kind, &action.rel_path, action.size);
            }

            match self.execute_action(action).await {
                Ok(bytes) => {
                    match action.kind {
                        ActionKind::CopyToA | ActionKind::CopyToB => report.files_copied += 1,
                        ActionKind::DeleteFromA | ActionKind::DeleteFromB => report.deletes += 1,
                        ActionKind::MkdirA | ActionKind::MkdirB => {
                            report.directories_created += 1
                        }
                        ActionKind::TouchA | ActionKind::TouchB => {
                            report.timestamps_aligned += 1
                        }
                    }
                    report.bytes_transferred += bytes;
                    if let Some(reporter) = &self.reporter {
                        reporter.action_completed(
                            action.kind,
                            &action.rel_path,
                            bytes,
                            action_started.elapsed(),
                        );
                    }
                }
                Err(e) => {
                    report.actions_failed += 1;
                    self.failures
                        .record(&action.rel_path, action.kind.to_string(), e.to_string());
                    if let Some(reporter) = &self.reporter {
                        reporter.action_failed(action.kind, &action.rel_path, &e.to_string());
                    }
                }
            }
        }

        report.duration = started.elapsed();
        report.failures = self.failures.snapshot();

        if let Some(reporter) = &self.reporter {
            reporter.run_completed(
                run_id,
                report.actions_succeeded(),
                report.actions_failed,
                report.bytes_transferred,
                report.duration,
            );
            reporter.info(report.summary());
        }
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Run one action; returns the bytes transferred
    async fn execute_action(&self, action: &SyncAction) -> Result<u64> {
        match action.kind {
            ActionKind::CopyToA | ActionKind::CopyToB => self.copy(action).await,
            ActionKind::DeleteFromA | ActionKind::DeleteFromB => {
                let target = required(action, &action.target)?;
                if !self.config.dry_run {
                    target.delete().await?;
                }
                Ok(0)
            }
            ActionKind::MkdirA | ActionKind::MkdirB => {
                let target = required(action, &action.target)?;
                if !self.config.dry_run {
                    target.mkdir().await?;
                }
                Ok(0)
            }
            ActionKind::TouchA | ActionKind::TouchB => {
                let source = required(action, &action.source)?;
                let target = required(action, &action.target)?;
                if !self.config.dry_run {
                    target.set_modified(source.modified()).await?;
                }
                Ok(0)
            }
        }
    }

    /// The copy lifecycle: prepare target metadata, stream the bytes,
    /// verify completeness (and optionally content), and only then let the
    /// backends finalize metadata.
    async fn copy(&self, action: &SyncAction) -> Result<u64> {
        let source = required(action, &action.source)?;
        let target = required(action, &action.target)?;
        let expected = source.len();

        if self.config.dry_run {
            return Ok(expected);
        }

        source.pre_copy_source(target);
        target.pre_copy_target(source);

        let reader = source.open_read().await?;
        let (reader, transfer) = HashingReader::new(reader);
        let written = target.write_from(Box::pin(reader), expected).await?;

        let (read_bytes, digest) = transfer.finish();
        if written != expected || read_bytes != expected {
            return Err(SyncError::copy_error(
                source.rel_path(),
                target.rel_path(),
                format!("incomplete transfer: {read_bytes} read, {written} written, {expected} expected"),
            ));
        }

        if self.config.verify_after_copy {
            let target_reader = target.open_read().await?;
            let (target_bytes, target_digest) =
                hash_stream(target_reader, self.config.buffer_size).await?;
            if target_bytes != expected || target_digest != digest {
                return Err(SyncError::copy_error(
                    source.rel_path(),
                    target.rel_path(),
                    "content verification failed after copy",
                ));
            }
        }

        // Finalization runs only after a byte-complete transfer
        target.post_copy_target(source).await;
        source.post_copy_source(target);

        Ok(written)
    }
}

fn required<'n>(
    action: &SyncAction,
    node: &'n Option<Arc<FileNode>>,
) -> Result<&'n Arc<FileNode>> {
    node.as_ref().ok_or_else(|| {
        SyncError::metadata_error(
            &action.rel_path,
            format!("action '{}' is missing an endpoint", action.kind),
        )
    })
}

#[derive(Default)]
struct TransferState {
    hasher: blake3::Hasher,
    bytes: u64,
}

/// Shared observer of a transfer's byte count and content digest
#[derive(Clone)]
struct TransferProbe {
    state: Arc<Mutex<TransferState>>,
}

impl TransferProbe {
    fn finish(&self) -> (u64, blake3::Hash) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.bytes, state.hasher.finalize())
    }
}

/// Reader adapter feeding every transferred byte into a digest
struct HashingReader {
    inner: ByteReader,
    state: Arc<Mutex<TransferState>>,
}

impl HashingReader {
    fn new(inner: ByteReader) -> (Self, TransferProbe) {
        let state = Arc::new(Mutex::new(TransferState::default()));
        let probe = TransferProbe {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, probe)
    }
}

impl AsyncRead for HashingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                if !fresh.is_empty() {
                    let mut state =
                        this.state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.hasher.update(fresh);
                    state.bytes += fresh.len() as u64;
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Read a stream to its end, returning its length and digest
async fn hash_stream(mut reader: ByteReader, buffer_size: usize) -> Result<(u64, blake3::Hash)> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    Ok((total, hasher.finalize()))
}
