//! Progress reporting for sync runs

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::planner::ActionKind;

/// Progress event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// Run started
    RunStarted {
        run_id: Uuid,
        total_actions: usize,
        total_bytes: u64,
    },
    /// One action started
    ActionStarted {
        kind: ActionKind,
        rel_path: String,
        size: u64,
    },
    /// One action completed
    ActionCompleted {
        kind: ActionKind,
        rel_path: String,
        size: u64,
        duration: Duration,
    },
    /// One action failed; the run continues
    ActionFailed {
        kind: ActionKind,
        rel_path: String,
        error: String,
    },
    /// Run completed
    RunCompleted {
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
        bytes_transferred: u64,
        duration: Duration,
    },
    /// Warning message
    Warning {
        message: String,
        rel_path: Option<String>,
    },
    /// Info message
    Info { message: String },
}

/// Receiving side of the progress stream
pub struct ProgressChannel {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressChannel {
    /// Create a connected reporter/channel pair
    pub fn new() -> (ProgressReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ProgressReporter { sender }, Self { receiver })
    }

    /// Receive the next progress event
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Try to receive a progress event without blocking
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Sending side of the progress stream.
///
/// Sends are best-effort: a dropped receiver never fails the run.
#[derive(Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    fn send(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("progress receiver gone, dropping event");
        }
    }

    pub fn run_started(&self, run_id: Uuid, total_actions: usize, total_bytes: u64) {
        self.send(ProgressEvent::RunStarted {
            run_id,
            total_actions,
            total_bytes,
        });
    }

    pub fn action_started(&self, kind: ActionKind, rel_path: &str, size: u64) {
        self.send(ProgressEvent::ActionStarted {
            kind,
            rel_path: rel_path.to_string(),
            size,
        });
    }

    pub fn action_completed(&self, kind: ActionKind, rel_path: &str, size: u64, duration: Duration) {
        self.send(ProgressEvent::ActionCompleted {
            kind,
            rel_path: rel_path.to_string(),
            size,
            duration,
        });
    }

    pub fn action_failed(&self, kind: ActionKind, rel_path: &str, error: &str) {
        self.send(ProgressEvent::ActionFailed {
            kind,
            rel_path: rel_path.to_string(),
            error: error.to_string(),
        });
    }

    pub fn run_completed(
        &self,
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
        bytes_transferred: u64,
        duration: Duration,
    ) {
        self.send(ProgressEvent::RunCompleted {
            run_id,
            succeeded,
            failed,
            bytes_transferred,
            duration,
        });
    }

    pub fn warning(&self, message: impl Into<String>, rel_path: Option<String>) {
        self.send(ProgressEvent::Warning {
            message: message.into(),
            rel_path,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Info {
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_flow_through_channel() {
        let (reporter, mut channel) = ProgressChannel::new();
        reporter.info("starting");
        reporter.action_started(ActionKind::CopyToB, "a.txt", 10);

        let events = channel.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProgressEvent::Info { .. }));
        assert!(matches!(
            events[1],
            ProgressEvent::ActionStarted { size: 10, .. }
        ));
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (reporter, channel) = ProgressChannel::new();
        drop(channel);
        reporter.info("nobody listening");
    }
}
