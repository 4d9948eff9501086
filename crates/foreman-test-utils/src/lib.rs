//! Shared test fakes for `foreman-core` and `foreman-cli` integration
//! tests: gives every test its own scripted [`Harness`] and isolated
//! workspace directory without re-implementing one per crate.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use foreman_core::error::{AgentError, AgentErrorKind};
use foreman_core::harness::{AgentEvent, AgentHandle, Harness};
use futures::Stream;

pub use foreman_core::harness::NoopHarness;

/// One pre-scripted outcome for a single `spawn`+`events` call.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Completes successfully with this output.
    Success(String),
    /// Completes with a non-zero exit code.
    NonZeroExit { code: i32, output: String },
    /// Fails at `spawn` time, before any output is produced.
    SpawnFailure,
}

/// A [`Harness`] whose successive invocations replay a fixed script,
/// FIFO. Built for scenarios like mid-run-crash-then-resume: script
/// `[NonZeroExit, Success]` fails the first call and succeeds the second,
/// letting a test drive a real `Resume` path without a real agent binary.
/// Calls past the end of the script repeat the last scripted outcome.
pub struct ScriptedHarness {
    name: String,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    last: Mutex<Option<ScriptedOutcome>>,
    calls: Mutex<u32>,
}

impl ScriptedHarness {
    pub fn new(name: impl Into<String>, script: Vec<ScriptedOutcome>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    /// Convenience constructor for a harness that always succeeds with
    /// `output`.
    pub fn always_succeeds(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self::new(name, vec![ScriptedOutcome::Success(output.into())])
    }

    /// Total number of `spawn` calls observed so far.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        *self.calls.lock().unwrap() += 1;
        let outcome = script
            .pop_front()
            .or_else(|| last.clone())
            .unwrap_or_else(|| ScriptedOutcome::Success(String::new()));
        *last = Some(outcome.clone());
        outcome
    }
}

#[async_trait]
impl Harness for ScriptedHarness {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, _workspace: &Path, _prompt: &str) -> Result<AgentHandle, AgentError> {
        match self.next_outcome() {
            ScriptedOutcome::SpawnFailure => Err(AgentError::new(
                AgentErrorKind::SpawnFailed,
                format!("{} is scripted to fail at spawn", self.name),
            )),
            outcome => {
                let mut pending = self.last.lock().unwrap();
                *pending = Some(outcome);
                Ok(AgentHandle { pid: 0 })
            }
        }
    }

    fn events(&self, _handle: AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let outcome = self
            .last
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ScriptedOutcome::Success(String::new()));
        let events = match outcome {
            ScriptedOutcome::Success(output) => vec![
                AgentEvent::Output(output),
                AgentEvent::Completed { exit_code: Some(0) },
            ],
            ScriptedOutcome::NonZeroExit { code, output } => vec![
                AgentEvent::Output(output),
                AgentEvent::Completed { exit_code: Some(code) },
            ],
            ScriptedOutcome::SpawnFailure => vec![AgentEvent::Completed { exit_code: Some(1) }],
        };
        Box::pin(futures::stream::iter(events))
    }

    async fn send(&self, _handle: AgentHandle, _text: &str) -> Result<(), AgentError> {
        Ok(())
    }

    async fn kill(&self, _handle: AgentHandle) -> Result<(), AgentError> {
        Ok(())
    }

    async fn is_running(&self, _handle: AgentHandle) -> bool {
        false
    }
}

/// A fresh, isolated workspace directory for one test. The returned
/// `TempDir` must be kept alive for as long as the path is in use.
pub fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create test workspace");
    let path = dir.path().to_path_buf();
    (dir, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_harness_replays_fail_then_succeed() {
        let harness = ScriptedHarness::new(
            "claude",
            vec![
                ScriptedOutcome::NonZeroExit {
                    code: 1,
                    output: "boom".to_string(),
                },
                ScriptedOutcome::Success("done".to_string()),
            ],
        );

        let (_dir, workspace_path) = workspace();

        let handle = harness.spawn(&workspace_path, "do it").await.unwrap();
        let events: Vec<_> = harness.events(handle).collect().await;
        assert!(matches!(
            events.last(),
            Some(AgentEvent::Completed { exit_code: Some(1) })
        ));

        let handle = harness.spawn(&workspace_path, "do it").await.unwrap();
        let events: Vec<_> = harness.events(handle).collect().await;
        assert!(matches!(
            events.last(),
            Some(AgentEvent::Completed { exit_code: Some(0) })
        ));

        assert_eq!(harness.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_harness_repeats_final_outcome_past_script_end() {
        let harness = ScriptedHarness::always_succeeds("codex", "ok");
        let (_dir, workspace_path) = workspace();
        for _ in 0..3 {
            let handle = harness.spawn(&workspace_path, "x").await.unwrap();
            let events: Vec<_> = harness.events(handle).collect().await;
            assert!(matches!(
                events.last(),
                Some(AgentEvent::Completed { exit_code: Some(0) })
            ));
        }
        assert_eq!(harness.call_count(), 3);
    }

    #[tokio::test]
    async fn spawn_failure_outcome_errors_before_events() {
        let harness = ScriptedHarness::new("gemini", vec![ScriptedOutcome::SpawnFailure]);
        let (_dir, workspace_path) = workspace();
        let err = harness.spawn(&workspace_path, "x").await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::SpawnFailed);
    }
}
