//! Human-Approval Gate (§4.9): suspends a `HUMAN` workflow node until an
//! external decision arrives, or a timeout elapses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// A decision delivered for a pending [`ApprovalRequest`].
#[derive(Debug, Clone)]
pub enum ApprovalDecision {
    Approve,
    Reject { reason: String },
    /// Overlays `payload` onto `state.data`, then takes the approve edge.
    EditAndApprove { payload: Value },
}

/// Emitted to the outbound event channel when a `HUMAN` node is reached.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub request_id: Uuid,
    pub node_id: String,
    pub payload: Value,
    pub timeout: Duration,
}

/// The gate's resolved outcome, already classified into what the workflow
/// engine needs: which edge to take and what (if anything) to record into
/// `state.data`.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    TakeApproveEdge { overlay: Option<Value> },
    TakeRejectEdge { reason: String },
}

impl From<ApprovalDecision> for GateOutcome {
    fn from(decision: ApprovalDecision) -> Self {
        match decision {
            ApprovalDecision::Approve => GateOutcome::TakeApproveEdge { overlay: None },
            ApprovalDecision::Reject { reason } => GateOutcome::TakeRejectEdge { reason },
            ApprovalDecision::EditAndApprove { payload } => {
                GateOutcome::TakeApproveEdge { overlay: Some(payload) }
            }
        }
    }
}

/// Waits for a decision on `rx`, or treats an elapsed `timeout` as a reject
/// with reason `"timeout"`. A `timeout` of zero takes the reject edge
/// immediately without polling `rx` at all (§8 boundary behavior 15).
pub async fn await_decision(rx: oneshot::Receiver<ApprovalDecision>, timeout: Duration) -> GateOutcome {
    if timeout.is_zero() {
        return GateOutcome::TakeRejectEdge {
            reason: "timeout".to_string(),
        };
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(decision)) => decision.into(),
        Ok(Err(_)) | Err(_) => GateOutcome::TakeRejectEdge {
            reason: "timeout".to_string(),
        },
    }
}

/// The inbound side of the gate: a table of pending requests keyed by
/// request id, so an external caller (the CLI's `approve`/`reject`
/// commands) can deliver a decision asynchronously from wherever the
/// workflow is suspended.
#[derive(Default)]
pub struct ApprovalRegistry {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending request, returning the receiver the engine
    /// awaits on.
    pub fn register(&self, request_id: Uuid) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);
        rx
    }

    /// Delivers a decision for a still-pending request. Returns `false` if
    /// the request is unknown or already resolved (including by timeout).
    pub fn decide(&self, request_id: Uuid, decision: ApprovalDecision) -> bool {
        let tx = self.pending.lock().unwrap().remove(&request_id);
        match tx {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_timeout_rejects_immediately() {
        let (_tx, rx) = oneshot::channel();
        let outcome = await_decision(rx, Duration::ZERO).await;
        assert!(matches!(outcome, GateOutcome::TakeRejectEdge { reason } if reason == "timeout"));
    }

    #[tokio::test]
    async fn approve_decision_takes_approve_edge() {
        let (tx, rx) = oneshot::channel();
        tx.send(ApprovalDecision::Approve).unwrap();
        let outcome = await_decision(rx, Duration::from_secs(5)).await;
        assert!(matches!(outcome, GateOutcome::TakeApproveEdge { overlay: None }));
    }

    #[tokio::test]
    async fn reject_decision_carries_reason() {
        let (tx, rx) = oneshot::channel();
        tx.send(ApprovalDecision::Reject {
            reason: "not ready".to_string(),
        })
        .unwrap();
        let outcome = await_decision(rx, Duration::from_secs(5)).await;
        assert!(matches!(outcome, GateOutcome::TakeRejectEdge { reason } if reason == "not ready"));
    }

    #[tokio::test]
    async fn dropped_sender_is_treated_as_timeout() {
        let (tx, rx) = oneshot::channel::<ApprovalDecision>();
        drop(tx);
        let outcome = await_decision(rx, Duration::from_secs(5)).await;
        assert!(matches!(outcome, GateOutcome::TakeRejectEdge { .. }));
    }

    #[tokio::test]
    async fn edit_and_approve_carries_overlay_payload() {
        let (tx, rx) = oneshot::channel();
        tx.send(ApprovalDecision::EditAndApprove {
            payload: serde_json::json!({"k": "v"}),
        })
        .unwrap();
        let outcome = await_decision(rx, Duration::from_secs(5)).await;
        match outcome {
            GateOutcome::TakeApproveEdge { overlay: Some(v) } => assert_eq!(v["k"], "v"),
            _ => panic!("expected approve edge with overlay"),
        }
    }

    #[tokio::test]
    async fn registry_delivers_decision_to_registered_request() {
        let registry = ApprovalRegistry::new();
        let request_id = Uuid::new_v4();
        let rx = registry.register(request_id);
        assert!(registry.decide(request_id, ApprovalDecision::Approve));
        let outcome = await_decision(rx, Duration::from_secs(5)).await;
        assert!(matches!(outcome, GateOutcome::TakeApproveEdge { overlay: None }));
    }

    #[tokio::test]
    async fn registry_rejects_unknown_request() {
        let registry = ApprovalRegistry::new();
        assert!(!registry.decide(Uuid::new_v4(), ApprovalDecision::Approve));
    }
}
