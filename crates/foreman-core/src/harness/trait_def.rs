//! The `Harness` trait: the object-safe seam between the Agent Invoker and
//! a concrete agent adapter.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// One occurrence on an invocation's event stream. Output is opaque text
/// per §6 ("the orchestrator does not parse agent output as JSON by
/// default") — only the Multi-Round Executor cares about its structure.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A chunk of combined stdout+stderr output.
    Output(String),
    /// The process exited.
    Completed { exit_code: Option<i32> },
    /// An I/O error occurred reading the process's streams.
    Error(String),
}

/// Identifies one in-flight invocation within a `Harness` implementation's
/// internal process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentHandle {
    pub pid: u32,
}

/// An agent adapter: knows how to launch one named agent CLI, stream its
/// output, feed it further input (for the Multi-Round Executor), and tear
/// it down. Implementations own a process table keyed by [`AgentHandle`]
/// and may be invoked concurrently from many tasks — the only shared state
/// is that table.
#[async_trait]
pub trait Harness: Send + Sync {
    /// The agent name this harness answers to (`claude`, `codex`, `gemini`, ...).
    fn name(&self) -> &str;

    /// Launches the agent in `workspace`, feeding `prompt` per this agent's
    /// profile (argv or stdin). Returns a handle identifying the process.
    async fn spawn(&self, workspace: &Path, prompt: &str) -> Result<AgentHandle, crate::error::AgentError>;

    /// The event stream for a previously spawned invocation. Yields a final
    /// `Completed` (or `Error`) event and then ends.
    fn events(&self, handle: AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

    /// Writes further input to the invocation's stdin, for multi-round
    /// tool-result dialogues.
    async fn send(&self, handle: AgentHandle, text: &str) -> Result<(), crate::error::AgentError>;

    /// Terminates the invocation: polite signal, grace interval, force-kill,
    /// and (on unix) kills the whole process group to avoid orphaned
    /// children.
    async fn kill(&self, handle: AgentHandle) -> Result<(), crate::error::AgentError>;

    /// Whether the process is still alive.
    async fn is_running(&self, handle: AgentHandle) -> bool;

    /// Whether `combined_output` matches this agent's authentication-failure
    /// markers (§6's agent CLI contract). Default: never, for harnesses with
    /// no such profile.
    fn is_auth_failure(&self, _combined_output: &str) -> bool {
        false
    }
}

// Compile-time check that `Harness` can be used as `Box<dyn Harness>`.
#[allow(dead_code)]
fn assert_object_safe(_: &dyn Harness) {}

/// A harness that never actually spawns a process: every invocation
/// "completes" instantly with output equal to the prompt echoed back.
/// Used by unit tests across this crate and re-used (not re-implemented)
/// by `foreman-test-utils`.
pub struct NoopHarness {
    name: String,
}

impl NoopHarness {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Harness for NoopHarness {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, _workspace: &Path, _prompt: &str) -> Result<AgentHandle, crate::error::AgentError> {
        Ok(AgentHandle { pid: 0 })
    }

    fn events(&self, _handle: AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        Box::pin(futures::stream::iter(vec![
            AgentEvent::Output("noop".to_string()),
            AgentEvent::Completed { exit_code: Some(0) },
        ]))
    }

    async fn send(&self, _handle: AgentHandle, _text: &str) -> Result<(), crate::error::AgentError> {
        Ok(())
    }

    async fn kill(&self, _handle: AgentHandle) -> Result<(), crate::error::AgentError> {
        Ok(())
    }

    async fn is_running(&self, _handle: AgentHandle) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn noop_harness_completes_immediately() {
        let h = NoopHarness::new("stub");
        let handle = h.spawn(Path::new("/tmp"), "hello").await.unwrap();
        let events: Vec<_> = h.events(handle).collect().await;
        assert!(matches!(events.last(), Some(AgentEvent::Completed { .. })));
        assert!(!h.is_running(handle).await);
    }
}
