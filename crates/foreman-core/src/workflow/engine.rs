//! Workflow Engine (§4.7): dispatches a `WorkflowGraph` node by node
//! through a single match statement (§9's closed-sum-type mapping), rather
//! than the source's dynamic dispatch on a node-kind field.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use super::graph::{NodeKind, WorkflowGraph};
use super::state::{right_biased_overlay, WorkflowState};
use crate::approval::{self, ApprovalDecision, ApprovalRegistry, ApprovalRequest, GateOutcome};
use crate::checkpoint::{Checkpoint, CheckpointMode, CheckpointStatus, CheckpointStore};
use crate::events::{Event, EventSink};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("node action failed: {0}")]
    Action(#[from] anyhow::Error),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] crate::error::OrchestratorError),
}

/// Everything a running execution needs beyond the graph and state itself.
pub struct EngineContext<'a> {
    pub graph: &'a WorkflowGraph,
    pub checkpoint_store: Option<&'a dyn CheckpointStore>,
    pub checkpoint_mode: CheckpointMode,
    pub approvals: &'a ApprovalRegistry,
    pub events: &'a EventSink,
}

enum NodeOutcome {
    Continue(String, WorkflowState),
    Terminal(WorkflowState),
}

/// `Execute(graph, initialState, executionId, checkpointHandle?) ->
/// WorkflowState`.
pub async fn execute(ctx: &EngineContext<'_>, mut state: WorkflowState) -> Result<WorkflowState, EngineError> {
    let mut current = ctx.graph.start_id().to_string();
    let mut version: u64 = 0;

    loop {
        version += 1;
        write_checkpoint(ctx, &state, CheckpointStatus::Running, Some(current.clone()), version).await?;

        // Kept so a failing `dispatch_node` (which consumes `state`) still
        // lets the FAILED checkpoint below carry the same completed set the
        // RUNNING checkpoint just above it recorded, per §4.7.
        let pre_dispatch_state = state.clone();

        match dispatch_node(ctx, &current, state).await {
            Ok(NodeOutcome::Continue(next, new_state)) => {
                state = new_state;
                current = next;
            }
            Ok(NodeOutcome::Terminal(mut final_state)) => {
                final_state.status = CheckpointStatus::Completed;
                version += 1;
                write_checkpoint(ctx, &final_state, CheckpointStatus::Completed, None, version).await?;
                ctx.events.emit(Event::ExecutionFinished {
                    execution_id: final_state.execution_id,
                    timestamp: chrono::Utc::now(),
                    success_count: 1,
                    failure_count: 0,
                });
                return Ok(final_state);
            }
            Err(e) => {
                let mut failed_state = pre_dispatch_state;
                failed_state.status = CheckpointStatus::Failed;
                version += 1;
                let _ = write_checkpoint(
                    ctx,
                    &failed_state,
                    CheckpointStatus::Failed,
                    Some(current.clone()),
                    version,
                )
                .await;
                return Err(e);
            }
        }
    }
}

async fn write_checkpoint(
    ctx: &EngineContext<'_>,
    state: &WorkflowState,
    status: CheckpointStatus,
    current_node: Option<String>,
    version: u64,
) -> Result<(), EngineError> {
    let Some(store) = ctx.checkpoint_store else {
        return Ok(());
    };
    let pending = current_node
        .as_deref()
        .map(|id| ctx.graph.reachable_from(id))
        .unwrap_or_default();

    let mut checkpoint = Checkpoint::new(ctx.graph.id.clone(), state.execution_id);
    checkpoint.version = version;
    checkpoint.status = status;
    checkpoint.current_node = current_node;
    checkpoint.completed = state.history.iter().cloned().collect();
    checkpoint.pending = pending;
    checkpoint.data = state.data.clone();
    checkpoint.graph_id = Some(ctx.graph.id.clone());

    match store.save(&checkpoint).await {
        Ok(v) => {
            ctx.events.emit(Event::CheckpointWritten {
                execution_id: state.execution_id,
                timestamp: chrono::Utc::now(),
                version: v,
            });
            Ok(())
        }
        Err(e) => {
            if ctx.checkpoint_mode == CheckpointMode::Strict {
                Err(e.into())
            } else {
                tracing::warn!(error = %e, "checkpoint write failed (best-effort mode, continuing)");
                Ok(())
            }
        }
    }
}

fn dispatch_node<'a>(
    ctx: &'a EngineContext<'a>,
    node_id: &'a str,
    state: WorkflowState,
) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, EngineError>> + Send + 'a>> {
    Box::pin(async move {
        let node = ctx
            .graph
            .node(node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?
            .clone();

        match &node.kind {
            NodeKind::Start => {
                let mut state = state;
                state.push_history(node_id);
                let next = node.next.clone().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
                Ok(NodeOutcome::Continue(next, state))
            }

            NodeKind::End => Ok(NodeOutcome::Terminal(state)),

            NodeKind::Task { action, .. } => {
                let mut new_state = action(state).await?;
                new_state.push_history(node_id);
                let next = node.next.clone().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
                Ok(NodeOutcome::Continue(next, new_state))
            }

            NodeKind::Condition { branches, default } => {
                let next = branches
                    .iter()
                    .find(|(pred, _)| pred(&state))
                    .map(|(_, target)| target.clone())
                    .unwrap_or_else(|| default.clone());
                Ok(NodeOutcome::Continue(next, state))
            }

            NodeKind::Loop {
                body_entry,
                condition,
                max_iterations,
                exit,
            } => {
                let mut state = state;
                let mut iterations = 0u32;
                while iterations < *max_iterations && condition(&state) {
                    state = run_loop_body(ctx, body_entry, node_id, state).await?;
                    iterations += 1;
                }
                Ok(NodeOutcome::Continue(exit.clone(), state))
            }

            NodeKind::Human {
                on_approve,
                on_reject,
                timeout,
            } => {
                let mut state = state;
                state.push_history(node_id);

                let request_id = Uuid::new_v4();
                let payload = Value::Object(state.data.clone().into_iter().collect());
                ctx.events.emit(Event::ApprovalRequest {
                    execution_id: state.execution_id,
                    timestamp: chrono::Utc::now(),
                    request_id,
                    node_id: node_id.to_string(),
                });
                let _request = ApprovalRequest {
                    request_id,
                    node_id: node_id.to_string(),
                    payload,
                    timeout: *timeout,
                };
                let rx = ctx.approvals.register(request_id);
                let outcome = approval::await_decision(rx, *timeout).await;

                match outcome {
                    GateOutcome::TakeApproveEdge { overlay } => {
                        if let Some(Value::Object(map)) = overlay {
                            right_biased_overlay(&mut state.data, map.into_iter().collect());
                        }
                        Ok(NodeOutcome::Continue(on_approve.clone(), state))
                    }
                    GateOutcome::TakeRejectEdge { reason } => {
                        state.data.insert(
                            format!("human:{node_id}"),
                            serde_json::json!({ "reason": reason }),
                        );
                        Ok(NodeOutcome::Continue(on_reject.clone(), state))
                    }
                }
            }

            NodeKind::Parallel { branches, join } => {
                let mut futures = FuturesUnordered::new();
                for branch_start in branches {
                    let branch_state = state.clone();
                    let branch_start = branch_start.clone();
                    let join = join.clone();
                    futures.push(async move { run_branch(ctx, &branch_start, &join, branch_state).await });
                }

                let mut merged_history = state.history.clone();
                let mut merged_data = state.data.clone();
                while let Some(result) = futures.next().await {
                    let (branch_history, branch_data) = result?;
                    merged_history.extend(branch_history);
                    right_biased_overlay(&mut merged_data, branch_data);
                }
                merged_history.push(join.clone());

                let mut new_state = state;
                new_state.history = merged_history;
                new_state.data = merged_data;

                let join_node = ctx
                    .graph
                    .node(join)
                    .ok_or_else(|| EngineError::UnknownNode(join.clone()))?;
                let next = join_node
                    .next
                    .clone()
                    .ok_or_else(|| EngineError::UnknownNode(join.clone()))?;
                Ok(NodeOutcome::Continue(next, new_state))
            }

            NodeKind::Join => {
                let mut state = state;
                state.push_history(node_id);
                let next = node.next.clone().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
                Ok(NodeOutcome::Continue(next, state))
            }
        }
    })
}

/// Runs a PARALLEL branch from `start` until it would continue into
/// `join_id`, returning just this branch's history/data additions. A
/// branch that reaches END directly bypasses the join (§4.7).
async fn run_branch(
    ctx: &EngineContext<'_>,
    start: &str,
    join_id: &str,
    mut state: WorkflowState,
) -> Result<(Vec<String>, HashMap<String, Value>), EngineError> {
    let base_history_len = state.history.len();
    let mut current = start.to_string();

    loop {
        if current == join_id {
            break;
        }
        match dispatch_node(ctx, &current, state).await? {
            NodeOutcome::Continue(next, new_state) => {
                state = new_state;
                current = next;
            }
            NodeOutcome::Terminal(final_state) => {
                state = final_state;
                break;
            }
        }
    }

    let branch_history = state.history[base_history_len..].to_vec();
    Ok((branch_history, state.data))
}

/// Runs a LOOP body from `body_entry` for exactly one iteration, stopping
/// when dispatch would continue back into `loop_node_id`.
async fn run_loop_body(
    ctx: &EngineContext<'_>,
    body_entry: &str,
    loop_node_id: &str,
    mut state: WorkflowState,
) -> Result<WorkflowState, EngineError> {
    let mut current = body_entry.to_string();
    loop {
        if current == loop_node_id {
            return Ok(state);
        }
        match dispatch_node(ctx, &current, state).await? {
            NodeOutcome::Continue(next, new_state) => {
                state = new_state;
                current = next;
            }
            NodeOutcome::Terminal(final_state) => return Ok(final_state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::{Action, Node, Predicate};
    use std::sync::Arc;

    fn pass_through() -> Action {
        Arc::new(|state: WorkflowState| Box::pin(async move { Ok(state) }))
    }

    fn always(v: bool) -> Predicate {
        Arc::new(move |_state: &WorkflowState| v)
    }

    fn ctx_for<'a>(
        graph: &'a WorkflowGraph,
        approvals: &'a ApprovalRegistry,
        events: &'a EventSink,
    ) -> EngineContext<'a> {
        EngineContext {
            graph,
            checkpoint_store: None,
            checkpoint_mode: CheckpointMode::BestEffort,
            approvals,
            events,
        }
    }

    #[tokio::test]
    async fn linear_chain_produces_expected_history() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("t1".into()),
            },
            Node {
                id: "t1".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("t2".into()),
            },
            Node {
                id: "t2".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        let graph = WorkflowGraph::new("g", nodes).unwrap();
        let approvals = ApprovalRegistry::new();
        let events = EventSink::noop();
        let ctx = ctx_for(&graph, &approvals, &events);
        let state = WorkflowState::new(Uuid::new_v4());

        let result = execute(&ctx, state).await.unwrap();
        assert_eq!(result.history, vec!["start", "t1", "t2"]);
    }

    fn scenario_f_graph() -> WorkflowGraph {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("a".into()),
            },
            Node {
                id: "a".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("h".into()),
            },
            Node {
                id: "h".into(),
                kind: NodeKind::Human {
                    on_approve: "b".into(),
                    on_reject: "c".into(),
                    timeout: std::time::Duration::from_secs(5),
                },
                next: None,
            },
            Node {
                id: "b".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "c".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        WorkflowGraph::new("g", nodes).unwrap()
    }

    /// Drives `execute` to completion while a watcher task approves (or
    /// rejects) the first `ApprovalRequest` event it observes, mirroring
    /// how the CLI's `approve`/`reject` commands resolve a suspended
    /// workflow from outside the engine.
    async fn run_with_decision(
        graph: &WorkflowGraph,
        approvals: &ApprovalRegistry,
        decision: ApprovalDecision,
    ) -> WorkflowState {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let events = EventSink::new(tx);
        let ctx = ctx_for(graph, approvals, &events);
        let state = WorkflowState::new(Uuid::new_v4());

        let exec = execute(&ctx, state);
        tokio::pin!(exec);

        loop {
            tokio::select! {
                res = &mut exec => return res.unwrap(),
                Some(event) = rx.recv() => {
                    if let Event::ApprovalRequest { request_id, .. } = event {
                        approvals.decide(request_id, decision.clone());
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn human_approve_path_matches_scenario_f() {
        let graph = scenario_f_graph();
        let approvals = ApprovalRegistry::new();
        let result = run_with_decision(&graph, &approvals, ApprovalDecision::Approve).await;
        assert_eq!(result.history, vec!["start", "a", "h", "b"]);
        assert!(!result.data.contains_key("human:h"));
    }

    #[tokio::test]
    async fn human_reject_path_matches_scenario_f() {
        let graph = scenario_f_graph();
        let approvals = ApprovalRegistry::new();
        let result = run_with_decision(
            &graph,
            &approvals,
            ApprovalDecision::Reject {
                reason: "needs changes".to_string(),
            },
        )
        .await;
        assert_eq!(result.history, vec!["start", "a", "h", "c"]);
        assert_eq!(
            result.data.get("human:h").and_then(|v| v.get("reason")).and_then(|v| v.as_str()),
            Some("needs changes")
        );
    }

    #[tokio::test]
    async fn human_timeout_is_treated_as_reject() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("h".into()),
            },
            Node {
                id: "h".into(),
                kind: NodeKind::Human {
                    on_approve: "b".into(),
                    on_reject: "c".into(),
                    timeout: std::time::Duration::ZERO,
                },
                next: None,
            },
            Node {
                id: "b".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "c".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        let graph = WorkflowGraph::new("g", nodes).unwrap();
        let approvals = ApprovalRegistry::new();
        let events = EventSink::noop();
        let ctx = ctx_for(&graph, &approvals, &events);
        let state = WorkflowState::new(Uuid::new_v4());

        let result = execute(&ctx, state).await.unwrap();
        assert_eq!(result.history, vec!["start", "h", "c"]);
    }

    #[tokio::test]
    async fn fan_out_join_merges_in_completion_order() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("p".into()),
            },
            Node {
                id: "p".into(),
                kind: NodeKind::Parallel {
                    branches: vec!["b1".into(), "b2".into()],
                    join: "j".into(),
                },
                next: None,
            },
            Node {
                id: "b1".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("j".into()),
            },
            Node {
                id: "b2".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("j".into()),
            },
            Node {
                id: "j".into(),
                kind: NodeKind::Join,
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        let graph = WorkflowGraph::new("g", nodes).unwrap();
        let approvals = ApprovalRegistry::new();
        let events = EventSink::noop();
        let ctx = ctx_for(&graph, &approvals, &events);
        let state = WorkflowState::new(Uuid::new_v4());

        let result = execute(&ctx, state).await.unwrap();
        assert!(result.history.contains(&"b1".to_string()));
        assert!(result.history.contains(&"b2".to_string()));
        assert!(result.history.contains(&"j".to_string()));
        assert_eq!(result.history[0], "start");
    }

    #[tokio::test]
    async fn loop_with_zero_max_iterations_skips_body() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("loop".into()),
            },
            Node {
                id: "loop".into(),
                kind: NodeKind::Loop {
                    body_entry: "body".into(),
                    condition: always(true),
                    max_iterations: 0,
                    exit: "end".into(),
                },
                next: None,
            },
            Node {
                id: "body".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("loop".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        let graph = WorkflowGraph::new("g", nodes).unwrap();
        let approvals = ApprovalRegistry::new();
        let events = EventSink::noop();
        let ctx = ctx_for(&graph, &approvals, &events);
        let state = WorkflowState::new(Uuid::new_v4());

        let result = execute(&ctx, state).await.unwrap();
        assert!(!result.history.contains(&"body".to_string()));
    }

    #[tokio::test]
    async fn condition_node_routes_without_appending_history() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("cond".into()),
            },
            Node {
                id: "cond".into(),
                kind: NodeKind::Condition {
                    branches: vec![(always(true), "yes".into())],
                    default: "no".into(),
                },
                next: None,
            },
            Node {
                id: "yes".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "no".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: pass_through(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        let graph = WorkflowGraph::new("g", nodes).unwrap();
        let approvals = ApprovalRegistry::new();
        let events = EventSink::noop();
        let ctx = ctx_for(&graph, &approvals, &events);
        let state = WorkflowState::new(Uuid::new_v4());

        let result = execute(&ctx, state).await.unwrap();
        assert_eq!(result.history, vec!["start", "yes"]);
        assert!(!result.history.contains(&"cond".to_string()));
    }
}
