//! Error types and the recoverable-failure channel for the sync engine

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Comprehensive error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory listing errors
    #[error("Listing error at '{path}': {message}")]
    Listing { path: String, message: String },

    /// Metadata read/write errors
    #[error("Metadata error at '{path}': {message}")]
    Metadata { path: String, message: String },

    /// File copying errors
    #[error("Copy error: {message}")]
    Copy { message: String },

    /// File or directory deletion errors
    #[error("Deletion error at '{path}': {message}")]
    Deletion { path: String, message: String },

    /// Directory creation errors
    #[error("Directory creation error at '{path}': {message}")]
    CreateDir { path: String, message: String },

    /// Path/URL encoding errors
    #[error("Encoding error for '{path}': {message}")]
    Encoding { path: String, message: String },

    /// The run was aborted by the listing-failure policy
    #[error("Run aborted: {0}")]
    Aborted(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    /// Create a new listing error
    pub fn listing_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listing {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new metadata error
    pub fn metadata_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new copy error
    pub fn copy_error(
        source: impl AsRef<str>,
        dest: impl AsRef<str>,
        message: impl Into<String>,
    ) -> Self {
        let full_message = format!(
            "Copy error from '{}' to '{}': {}",
            source.as_ref(),
            dest.as_ref(),
            message.into()
        );
        Self::Copy {
            message: full_message,
        }
    }

    /// Create a new deletion error
    pub fn deletion_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Deletion {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new directory creation error
    pub fn mkdir_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CreateDir {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new encoding error
    pub fn encoding_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encoding {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A single recoverable failure recorded during a run.
///
/// Failures never abort the run (except under the abort listing policy);
/// they accumulate here and are surfaced in the final report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    /// Backend-root-relative path the failure occurred at
    pub rel_path: String,
    /// The operation that failed (listing, copy, delete, ...)
    pub operation: String,
    /// Human-readable reason
    pub reason: String,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.operation, self.rel_path, self.reason)
    }
}

/// Shared sink for recoverable failures, appended to by the node layer
/// during tree construction and by the executor during plan application.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    records: Arc<Mutex<Vec<FailureRecord>>>,
}

impl FailureLog {
    /// Create an empty failure log
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FailureRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a recoverable failure
    pub fn record(
        &self,
        rel_path: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) {
        let record = FailureRecord {
            rel_path: rel_path.into(),
            operation: operation.into(),
            reason: reason.into(),
        };
        tracing::warn!("recoverable failure: {}", record);
        self.lock().push(record);
    }

    /// Number of failures recorded so far
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of all failures recorded so far
    pub fn snapshot(&self) -> Vec<FailureRecord> {
        self.lock().clone()
    }
}
