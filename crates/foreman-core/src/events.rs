//! The typed outbound event channel (§6 Events): every state transition an
//! execution goes through is published here, for a caller to render to
//! stdout, a log sink, or a UI.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One occurrence on the outbound event stream. Every variant carries a
/// timestamp and the execution identifier it belongs to; consumers are out
/// of scope for this crate (stdout JSON, a log sink, a UI — caller's
/// choice).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PlanGenerated {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        task_count: usize,
    },
    BatchStarted {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        batch_index: usize,
        task_ids: Vec<String>,
    },
    TaskStarted {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        task_id: String,
        agent: String,
    },
    TaskFinished {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        task_id: String,
        status: String,
    },
    BatchFinished {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        batch_index: usize,
    },
    CheckpointWritten {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        version: u64,
    },
    ApprovalRequest {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        request_id: Uuid,
        node_id: String,
    },
    ExecutionFinished {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        success_count: usize,
        failure_count: usize,
    },
}

/// The sending half handed to every component that produces events. Wraps an
/// `mpsc::UnboundedSender` so callers never block on a slow consumer, and
/// mirrors to `tracing` so operators tailing logs see the same timeline
/// without wiring a consumer at all.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<tokio::sync::mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<Event>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that only logs via `tracing`, for callers with no interest in
    /// the programmatic channel (e.g. most unit tests).
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: Event) {
        tracing::info!(target: "foreman::events", ?event, "event");
        if let Some(tx) = &self.tx {
            // The receiver may have been dropped (consumer stopped
            // listening); that is not this producer's problem.
            let _ = tx.send(event);
        }
    }
}
