//! DAG Scheduler (§4.6): executes a `TaskPlan` by successive parallel
//! batches, spawning one `tokio::spawn` task per ready task under a shared
//! `Semaphore` permit per in-flight invocation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointMode, CheckpointStatus, CheckpointStore};
use crate::config::OrchestratorConfig;
use crate::error::{AgentErrorKind, OrchestratorError};
use crate::events::{Event, EventSink};
use crate::harness::HarnessRegistry;
use crate::invoker;
use crate::retry::{self, RetryDecision};
use crate::selector::AgentSelector;
use crate::task::{ExecutionMode, ExecutionResult, Task, TaskPlan, TaskResult, TaskStatus};

/// Everything the scheduler needs beyond the plan itself.
pub struct SchedulerContext<'a> {
    pub harnesses: &'a HarnessRegistry,
    pub selector: &'a AgentSelector,
    pub checkpoint_store: Option<&'a dyn CheckpointStore>,
    pub checkpoint_mode: CheckpointMode,
    pub events: &'a EventSink,
    pub config: &'a OrchestratorConfig,
    pub workspace_root: PathBuf,
}

impl SchedulerContext<'_> {
    fn task_workspace(&self, execution_id: Uuid, task_id: &str) -> PathBuf {
        self.workspace_root.join(execution_id.to_string()).join(task_id)
    }
}

/// `Run(plan, config) -> ExecutionResult`.
pub async fn run(
    ctx: &SchedulerContext<'_>,
    plan: &TaskPlan,
    mode: ExecutionMode,
    execution_id: Uuid,
    cancel: CancellationToken,
) -> Result<ExecutionResult, OrchestratorError> {
    run_from(ctx, plan, mode, execution_id, cancel, HashSet::new(), HashMap::new()).await
}

/// `Resume(executionId, config) -> ExecutionResult`.
///
/// The Checkpoint entity (§3) doesn't embed the plan itself, only the id
/// sets — this repository asks the caller for the original `TaskPlan`
/// again rather than widening the on-disk schema; see DESIGN.md.
pub async fn resume(
    ctx: &SchedulerContext<'_>,
    plan: &TaskPlan,
    mode: ExecutionMode,
    execution_id: Uuid,
    cancel: CancellationToken,
) -> Result<ExecutionResult, OrchestratorError> {
    let store = ctx
        .checkpoint_store
        .ok_or_else(|| OrchestratorError::ConfigError("no checkpoint store configured".to_string()))?;
    let checkpoint = store
        .load(execution_id)
        .await?
        .ok_or_else(|| OrchestratorError::InputError(format!("no checkpoint found for {execution_id}")))?;

    // Loading a FAILED checkpoint forgives the failure: the completed set
    // is kept, `current` (if any) is retried, its error is cleared.
    let mut completed = checkpoint.completed;
    completed.remove(checkpoint.current_node.as_deref().unwrap_or(""));

    run_from(ctx, plan, mode, execution_id, cancel, completed, HashMap::new()).await
}

async fn run_from(
    ctx: &SchedulerContext<'_>,
    plan: &TaskPlan,
    mode: ExecutionMode,
    execution_id: Uuid,
    cancel: CancellationToken,
    already_completed: HashSet<String>,
    mut results: HashMap<String, TaskResult>,
) -> Result<ExecutionResult, OrchestratorError> {
    let started = Instant::now();

    if plan.is_empty() {
        return Ok(ExecutionResult::empty(mode));
    }

    let batches = build_batches(plan, mode)?;
    let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent.max(1)));
    let mut failed_or_cancelled: HashSet<String> = HashSet::new();
    let mut emitted_batches: Vec<Vec<String>> = Vec::new();

    'outer: for (batch_index, batch) in batches.iter().enumerate() {
        let live_batch: Vec<&Task> = batch
            .iter()
            .filter(|id| !already_completed.contains(id.as_str()))
            .filter_map(|id| plan.get(id))
            .collect();
        if live_batch.is_empty() {
            continue;
        }

        if cancel.is_cancelled() {
            write_checkpoint(
                ctx,
                execution_id,
                CheckpointStatus::Cancelled,
                &already_completed_plus(&already_completed, &results),
                None,
                None,
            )
            .await?;
            break 'outer;
        }

        ctx.events.emit(Event::BatchStarted {
            execution_id,
            timestamp: Utc::now(),
            batch_index,
            task_ids: live_batch.iter().map(|t| t.id.clone()).collect(),
        });
        emitted_batches.push(live_batch.iter().map(|t| t.id.clone()).collect());

        for band in priority_bands(&live_batch) {
            for chunk in band.chunks(ctx.config.max_concurrent.max(1)) {
                let mut handles = Vec::new();
                for task in chunk {
                    if failed_or_cancelled.iter().any(|id| task.depends_on.contains(id)) {
                        let now = Utc::now();
                        let result = TaskResult {
                            task_id: task.id.clone(),
                            status: TaskStatus::Cancelled,
                            output: String::new(),
                            error: Some("upstream dependency failed".to_string()),
                            started_at: now,
                            finished_at: now,
                            agent: String::new(),
                            final_answer: None,
                        };
                        failed_or_cancelled.insert(task.id.clone());
                        results.insert(task.id.clone(), result);
                        continue;
                    }
                    handles.push(run_one_task(ctx, execution_id, task, &semaphore, cancel.clone()));
                }

                let outcomes = futures::future::join_all(handles).await;
                for (task, result) in chunk.iter().zip(outcomes.into_iter()) {
                    if !result.is_success() {
                        failed_or_cancelled.insert(task.id.clone());
                    }
                    ctx.selector.record_outcome(
                        &result.agent,
                        task.task_type,
                        result.is_success(),
                        (result.finished_at - result.started_at).num_milliseconds() as f64 / 1000.0,
                    );
                    ctx.events.emit(Event::TaskFinished {
                        execution_id,
                        timestamp: Utc::now(),
                        task_id: task.id.clone(),
                        status: format!("{:?}", result.status),
                    });
                    results.insert(task.id.clone(), result);
                }

                // Cancellation is only guaranteed to stop in-flight work at
                // chunk boundaries: tasks already dispatched in this chunk
                // run to their own CANCELLED/whatever outcome (via
                // `invoker::invoke`'s cancel branch), but a later chunk in
                // the same batch must never be dispatched once the token
                // has fired, per Scenario E ("remaining tasks never
                // dispatched").
                if cancel.is_cancelled() {
                    write_checkpoint(
                        ctx,
                        execution_id,
                        CheckpointStatus::Cancelled,
                        &already_completed_plus(&already_completed, &results),
                        None,
                        None,
                    )
                    .await?;
                    break 'outer;
                }
            }
        }

        ctx.events.emit(Event::BatchFinished {
            execution_id,
            timestamp: Utc::now(),
            batch_index,
        });

        let batch_had_nonretriable_failure = batch
            .iter()
            .filter_map(|id| results.get(id))
            .any(|r| matches!(r.status, TaskStatus::Failed | TaskStatus::Timeout));

        if batch_had_nonretriable_failure && !ctx.config.continue_on_error {
            write_checkpoint(
                ctx,
                execution_id,
                CheckpointStatus::Failed,
                &already_completed_plus(&already_completed, &results),
                None,
                Some("non-retriable task failure".to_string()),
            )
            .await?;
            break 'outer;
        }

        write_checkpoint(
            ctx,
            execution_id,
            CheckpointStatus::Running,
            &already_completed_plus(&already_completed, &results),
            None,
            None,
        )
        .await?;
    }

    if !cancel.is_cancelled() {
        let all_handled = batches
            .iter()
            .flatten()
            .all(|id| already_completed.contains(id) || results.contains_key(id));
        if all_handled {
            write_checkpoint(
                ctx,
                execution_id,
                CheckpointStatus::Completed,
                &already_completed_plus(&already_completed, &results),
                None,
                None,
            )
            .await?;
        }
    }

    let success_count = results.values().filter(|r| r.is_success()).count();
    let failure_count = results.len() - success_count;

    ctx.events.emit(Event::ExecutionFinished {
        execution_id,
        timestamp: Utc::now(),
        success_count,
        failure_count,
    });

    Ok(ExecutionResult {
        mode,
        batches: emitted_batches,
        results,
        duration_ms: started.elapsed().as_millis() as u64,
        success_count,
        failure_count,
    })
}

fn already_completed_plus(base: &HashSet<String>, results: &HashMap<String, TaskResult>) -> HashSet<String> {
    let mut out = base.clone();
    out.extend(
        results
            .iter()
            .filter(|(_, r)| r.is_success())
            .map(|(id, _)| id.clone()),
    );
    out
}

fn build_batches(plan: &TaskPlan, mode: ExecutionMode) -> Result<Vec<Vec<String>>, OrchestratorError> {
    match mode {
        ExecutionMode::Parallel => {
            let mut ids: Vec<String> = plan.tasks().iter().map(|t| t.id.clone()).collect();
            ids.sort();
            Ok(vec![ids])
        }
        ExecutionMode::Hybrid => crate::task::topological_batches(plan)
            .map_err(|e| OrchestratorError::InputError(e.to_string())),
        ExecutionMode::Sequential => {
            let batches = crate::task::topological_batches(plan)
                .map_err(|e| OrchestratorError::InputError(e.to_string()))?;
            Ok(batches.into_iter().flatten().map(|id| vec![id]).collect())
        }
    }
}

/// Splits a batch into priority bands (lower value = more urgent = earlier
/// band), each band still internally parallel.
fn priority_bands<'a>(batch: &[&'a Task]) -> Vec<Vec<&'a Task>> {
    let mut by_priority: Vec<(i64, &'a Task)> = batch.iter().map(|t| (t.priority, *t)).collect();
    by_priority.sort_by_key(|(p, t)| (*p, t.id.clone()));

    let mut bands: Vec<Vec<&Task>> = Vec::new();
    let mut current_priority = None;
    for (priority, task) in by_priority {
        if current_priority != Some(priority) {
            bands.push(Vec::new());
            current_priority = Some(priority);
        }
        bands.last_mut().unwrap().push(task);
    }
    bands
}

async fn run_one_task(
    ctx: &SchedulerContext<'_>,
    execution_id: Uuid,
    task: &Task,
    semaphore: &Arc<Semaphore>,
    cancel: CancellationToken,
) -> TaskResult {
    let _permit = semaphore.acquire().await.expect("semaphore not closed");
    let started_at = Utc::now();

    let enabled: Vec<String> = ctx.harnesses.list().iter().map(|s| s.to_string()).collect();
    let agent = match ctx.selector.select(task, &enabled) {
        Ok(a) => a,
        Err(_) => {
            return TaskResult {
                task_id: task.id.clone(),
                status: TaskStatus::Failed,
                output: String::new(),
                error: Some("no agent available".to_string()),
                started_at,
                finished_at: Utc::now(),
                agent: String::new(),
                final_answer: None,
            }
        }
    };

    ctx.events.emit(Event::TaskStarted {
        execution_id,
        timestamp: started_at,
        task_id: task.id.clone(),
        agent: agent.clone(),
    });

    let Some(harness) = ctx.harnesses.get(&agent) else {
        return TaskResult {
            task_id: task.id.clone(),
            status: TaskStatus::Failed,
            output: String::new(),
            error: Some(format!("harness not registered for agent {agent}")),
            started_at,
            finished_at: Utc::now(),
            agent,
            final_answer: None,
        };
    };

    let workspace = ctx.task_workspace(execution_id, &task.id);
    let timeout = ctx.config.effective_timeout(task.timeout_seconds);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = invoker::invoke(harness, &task.prompt, &workspace, timeout, cancel.clone()).await;

        if outcome.success {
            return TaskResult {
                task_id: task.id.clone(),
                status: TaskStatus::Success,
                output: outcome.output,
                error: None,
                started_at,
                finished_at: Utc::now(),
                agent,
                final_answer: None,
            };
        }

        let kind = outcome.error_kind.clone().unwrap_or(AgentErrorKind::StreamIoError);
        if kind == AgentErrorKind::Cancelled {
            return TaskResult {
                task_id: task.id.clone(),
                status: TaskStatus::Cancelled,
                output: outcome.output,
                error: outcome.error,
                started_at,
                finished_at: Utc::now(),
                agent,
                final_answer: None,
            };
        }

        let decision = retry::classify(&kind, attempt, outcome.error.as_deref().unwrap_or(""));
        match decision {
            RetryDecision::Retry { backoff } => {
                tokio::time::sleep(backoff).await;
                continue;
            }
            RetryDecision::Surface | RetryDecision::NotApplicable => {
                let status = if kind == AgentErrorKind::Timeout {
                    TaskStatus::Timeout
                } else {
                    TaskStatus::Failed
                };
                return TaskResult {
                    task_id: task.id.clone(),
                    status,
                    output: outcome.output,
                    error: outcome.error,
                    started_at,
                    finished_at: Utc::now(),
                    agent,
                    final_answer: None,
                };
            }
        }
    }
}

async fn write_checkpoint(
    ctx: &SchedulerContext<'_>,
    execution_id: Uuid,
    status: CheckpointStatus,
    completed: &HashSet<String>,
    pending: Option<HashSet<String>>,
    error: Option<String>,
) -> Result<(), OrchestratorError> {
    let Some(store) = ctx.checkpoint_store else {
        return Ok(());
    };
    let previous_version = store.load(execution_id).await?.map(|c| c.version).unwrap_or(0);

    let mut checkpoint = Checkpoint::new("scheduler", execution_id);
    checkpoint.version = previous_version + 1;
    checkpoint.status = status;
    checkpoint.completed = completed.clone();
    checkpoint.pending = pending.unwrap_or_default();
    checkpoint.error = error;

    match store.save(&checkpoint).await {
        Ok(v) => {
            ctx.events.emit(Event::CheckpointWritten {
                execution_id,
                timestamp: Utc::now(),
                version: v,
            });
            Ok(())
        }
        Err(e) => {
            if ctx.checkpoint_mode == CheckpointMode::Strict {
                Err(e)
            } else {
                tracing::warn!(error = %e, "checkpoint write failed (best-effort mode, continuing)");
                Ok(())
            }
        }
    }
}
