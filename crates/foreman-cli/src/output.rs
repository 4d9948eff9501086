//! Machine-readable command output and the exit-code table from §6's
//! "Orchestrator CLI surface": 0 success, 1 partial failure, 2 total
//! failure, 3 cancelled, 4 invalid input.

use foreman_core::task::{ExecutionResult, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    PartialFailure = 1,
    TotalFailure = 2,
    Cancelled = 3,
    InvalidInput = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Classifies a completed (non-cancelled) run's exit code from its task
/// outcomes: total failure if nothing succeeded and at least one task ran,
/// partial failure if some but not all succeeded, success otherwise.
pub fn exit_code_for(result: &ExecutionResult) -> ExitCode {
    if result
        .results
        .values()
        .any(|r| matches!(r.status, TaskStatus::Cancelled))
    {
        return ExitCode::Cancelled;
    }
    if result.results.is_empty() {
        return ExitCode::Success;
    }
    if result.failure_count == 0 {
        ExitCode::Success
    } else if result.success_count == 0 {
        ExitCode::TotalFailure
    } else {
        ExitCode::PartialFailure
    }
}

/// Prints `result` as the JSON execution summary the CLI writes to stdout.
pub fn print_execution_result(execution_id: uuid::Uuid, result: &ExecutionResult) {
    let summary = serde_json::json!({
        "execution_id": execution_id,
        "mode": result.mode,
        "batches": result.batches,
        "success_count": result.success_count,
        "failure_count": result.failure_count,
        "duration_ms": result.duration_ms,
        "results": result.results,
    });
    println!("{}", serde_json::to_string_pretty(&summary).expect("execution result is serializable"));
}
