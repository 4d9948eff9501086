//! The error taxonomy for the orchestration engine.
//!
//! `OrchestratorError` covers failures that are surfaced immediately to the
//! caller (invalid input, missing config). Per-task failures are not
//! exceptions: they are recorded as a [`crate::task::TaskResult`] status and
//! handled as data by the scheduler (see [`crate::retry`]).

use thiserror::Error;

/// Top-level errors surfaced by the orchestration engine.
///
/// `InputError` and `ConfigError` are raised before any task is dispatched.
/// `CheckpointError` is raised mid-run and its severity depends on the
/// configured [`crate::checkpoint::CheckpointMode`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An invalid plan: a cycle, an unresolved dependency identifier, or a
    /// missing required field. Surfaced immediately, no execution attempted.
    #[error("invalid plan: {0}")]
    InputError(String),

    /// Missing agent binary, unreadable checkpoint directory, or another
    /// environment misconfiguration. Surfaced immediately.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Checkpoint persistence failure. In "best-effort" mode this is logged
    /// as a warning and execution continues; in "strict" mode it aborts the
    /// run.
    #[error("checkpoint error: {0}")]
    CheckpointError(String),

    /// The run was cancelled rather than failed.
    #[error("execution cancelled by {0}")]
    Cancelled(CancelSource),
}

/// Where a cancellation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// An explicit user/operator cancel request.
    User,
    /// A timeout fired at the scheduler or workflow level.
    Timeout,
    /// Propagated from an upstream cancellation token.
    Upstream,
}

impl std::fmt::Display for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancelSource::User => "user",
            CancelSource::Timeout => "timeout",
            CancelSource::Upstream => "upstream",
        };
        f.write_str(s)
    }
}

/// The kind of failure an agent invocation produced, at task granularity.
///
/// This is the classification input to the retry policy (see
/// [`crate::retry::classify`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentErrorKind {
    /// The process exceeded its wall-clock timeout and was terminated.
    Timeout,
    /// The process exited with a non-zero status.
    NonZeroExit {
        /// Process exit code, if the OS reported one (`None` if killed by signal).
        exit_code: Option<i32>,
    },
    /// `Command::spawn` failed — the binary is missing or not executable.
    SpawnFailed,
    /// The working directory could not be created.
    WorkspaceCreationFailed,
    /// An I/O error occurred while reading the child's stdout/stderr streams.
    StreamIoError,
    /// The multi-round executor exhausted its round budget without a
    /// sentinel final answer.
    RoundLimit,
    /// The agent's output matched an authentication-failure pattern for its
    /// harness profile.
    AuthRequired,
    /// The invocation was cancelled before it could complete.
    Cancelled,
}

/// An agent-invocation failure, carrying the classified kind plus a
/// human-readable detail (e.g. the last N bytes of stderr).
#[derive(Debug, Clone, Error)]
#[error("agent error ({kind:?}): {detail}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub detail: String,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// The Meta-Decomposer never surfaces this to its caller; it is used
/// internally to decide whether to fall back to the identity plan.
#[derive(Debug, Clone, Error)]
#[error("decomposition error: {0}")]
pub struct DecompositionError(pub String);
