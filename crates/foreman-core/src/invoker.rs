//! Agent Invoker (§4.1): the single `invoke` operation every task
//! ultimately goes through, whether directly or wrapped by the
//! [`crate::executor`].

use std::path::Path;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, AgentErrorKind};
use crate::harness::{AgentEvent, Harness};

/// The last N bytes of stderr/stdout kept for a FAILED result's `error`
/// field, per §4.1.
const STDERR_SNIPPET_LEN: usize = 4096;

/// Outcome of one `Invoke` call.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    /// Present when `success` is false; drives the retry policy (§4.10).
    pub error_kind: Option<AgentErrorKind>,
}

/// `Invoke(agentName, prompt, workspacePath, timeoutSeconds) -> {success,
/// output, error, durationMs}`.
///
/// On timeout or cancellation, terminates the invocation via
/// [`Harness::kill`] (polite-signal-then-force, process-group wide) and
/// reports `TIMEOUT`/`CANCELLED` respectively.
pub async fn invoke(
    harness: &dyn Harness,
    prompt: &str,
    workspace: &Path,
    timeout: Duration,
    cancel: CancellationToken,
) -> InvokeOutcome {
    let started = Instant::now();

    let handle = match harness.spawn(workspace, prompt).await {
        Ok(h) => h,
        Err(e) => {
            return InvokeOutcome {
                success: false,
                output: String::new(),
                error: Some(e.detail.clone()),
                duration: started.elapsed(),
                error_kind: Some(e.kind),
            }
        }
    };

    let mut output = String::new();
    let mut events = harness.events(handle);

    let collect = async {
        while let Some(event) = events.next().await {
            match event {
                AgentEvent::Output(text) => {
                    output.push_str(&text);
                    output.push('\n');
                }
                AgentEvent::Completed { exit_code } => return Ok(exit_code),
                AgentEvent::Error(message) => return Err(message),
            }
        }
        Ok(None)
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = harness.kill(handle).await;
            InvokeOutcome {
                success: false,
                output,
                error: Some("cancelled".to_string()),
                duration: started.elapsed(),
                error_kind: Some(AgentErrorKind::Cancelled),
            }
        }
        result = tokio::time::timeout(timeout, collect) => {
            match result {
                Err(_elapsed) => {
                    let _ = harness.kill(handle).await;
                    InvokeOutcome {
                        success: false,
                        output,
                        error: Some(format!("timed out after {timeout:?}")),
                        duration: started.elapsed(),
                        error_kind: Some(AgentErrorKind::Timeout),
                    }
                }
                Ok(Err(stream_error)) => InvokeOutcome {
                    success: false,
                    output,
                    error: Some(stream_error),
                    duration: started.elapsed(),
                    error_kind: Some(AgentErrorKind::StreamIoError),
                },
                Ok(Ok(Some(0))) => InvokeOutcome {
                    success: true,
                    output,
                    error: None,
                    duration: started.elapsed(),
                    error_kind: None,
                },
                Ok(Ok(exit_code)) if harness.is_auth_failure(&output) => InvokeOutcome {
                    success: false,
                    output: output.clone(),
                    error: Some(format!("authentication required: {}", tail(&output, STDERR_SNIPPET_LEN))),
                    duration: started.elapsed(),
                    error_kind: Some(AgentErrorKind::AuthRequired),
                },
                Ok(Ok(exit_code)) => {
                    let snippet = tail(&output, STDERR_SNIPPET_LEN);
                    InvokeOutcome {
                        success: false,
                        output,
                        error: Some(format!("exit status {:?}: {snippet}", exit_code)),
                        duration: started.elapsed(),
                        error_kind: Some(AgentErrorKind::NonZeroExit { exit_code }),
                    }
                }
            }
        }
    }
}

fn tail(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let start = s.len() - max_bytes;
    // Never split a multi-byte UTF-8 sequence.
    let mut idx = start;
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    &s[idx..]
}
