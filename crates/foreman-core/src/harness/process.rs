//! A generic subprocess-backed `Harness`, driven by an [`AgentProfile`].
//!
//! Every invocation gets its own process group (unix: `setpgid` via
//! [`std::os::unix::process::CommandExt::process_group`]) so termination can
//! target the whole group with `libc::killpg` rather than a single pid,
//! satisfying §4.1's "recursively kill children" requirement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use super::profiles::{AgentProfile, PromptDelivery};
use super::trait_def::{AgentEvent, AgentHandle, Harness};
use crate::error::{AgentError, AgentErrorKind};

struct ProcessState {
    child: Child,
    stdin: Option<ChildStdin>,
    events_rx: Option<tokio::sync::mpsc::UnboundedReceiver<AgentEvent>>,
}

/// A `Harness` implementation that shells out to a real agent binary.
pub struct ProcessHarness {
    profile: AgentProfile,
    binary: PathBuf,
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
}

impl ProcessHarness {
    pub fn new(profile: AgentProfile, binary: PathBuf) -> Self {
        Self {
            profile,
            binary,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Harness for ProcessHarness {
    fn name(&self) -> &str {
        self.profile.name
    }

    async fn spawn(&self, workspace: &Path, prompt: &str) -> Result<AgentHandle, AgentError> {
        tokio::fs::create_dir_all(workspace)
            .await
            .map_err(|e| AgentError::new(AgentErrorKind::WorkspaceCreationFailed, e.to_string()))?;

        let mut command = Command::new(&self.binary);
        command
            .args(self.profile.build_args(prompt))
            .current_dir(workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Makes this process the leader of a new group (pgid == pid),
            // so a later killpg reaches every descendant it spawns.
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::new(AgentErrorKind::SpawnFailed, e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| AgentError::new(AgentErrorKind::SpawnFailed, "child exited immediately"))?;

        let mut stdin = child.stdin.take();
        if matches!(self.profile.delivery, PromptDelivery::Stdin) {
            if let Some(stdin) = stdin.as_mut() {
                stdin
                    .write_all(format!("{prompt}\n").as_bytes())
                    .await
                    .map_err(|e| AgentError::new(AgentErrorKind::StreamIoError, e.to_string()))?;
            }
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        spawn_stream_reader(tx, stdout, stderr, self.processes.clone(), pid);

        let mut processes = self.processes.lock().await;
        processes.insert(
            pid,
            ProcessState {
                child,
                stdin,
                events_rx: Some(rx),
            },
        );
        Ok(AgentHandle { pid })
    }

    fn events(&self, handle: AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let processes = self.processes.clone();
        Box::pin(async_stream::stream! {
            let rx = {
                let mut processes = processes.lock().await;
                processes.get_mut(&handle.pid).and_then(|p| p.events_rx.take())
            };
            let Some(mut rx) = rx else { return; };
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    async fn send(&self, handle: AgentHandle, text: &str) -> Result<(), AgentError> {
        let mut processes = self.processes.lock().await;
        let Some(state) = processes.get_mut(&handle.pid) else {
            return Err(AgentError::new(AgentErrorKind::StreamIoError, "unknown handle"));
        };
        let Some(stdin) = state.stdin.as_mut() else {
            return Err(AgentError::new(AgentErrorKind::StreamIoError, "stdin not open"));
        };
        stdin
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|e| AgentError::new(AgentErrorKind::StreamIoError, e.to_string()))
    }

    async fn kill(&self, handle: AgentHandle) -> Result<(), AgentError> {
        let mut processes = self.processes.lock().await;
        let Some(state) = processes.get_mut(&handle.pid) else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            // SIGTERM to the whole group, a grace interval, then SIGKILL.
            unsafe {
                libc::killpg(handle.pid as i32, libc::SIGTERM);
            }
            let graceful = tokio::time::timeout(
                crate::config::DEFAULT_GRACE_PERIOD,
                state.child.wait(),
            )
            .await;
            if graceful.is_err() {
                unsafe {
                    libc::killpg(handle.pid as i32, libc::SIGKILL);
                }
                let _ = state.child.wait().await;
            }
        }
        #[cfg(not(unix))]
        {
            let _ = state.child.kill().await;
        }

        processes.remove(&handle.pid);
        Ok(())
    }

    async fn is_running(&self, handle: AgentHandle) -> bool {
        let mut processes = self.processes.lock().await;
        let Some(state) = processes.get_mut(&handle.pid) else {
            return false;
        };
        matches!(state.child.try_wait(), Ok(None))
    }

    fn is_auth_failure(&self, combined_output: &str) -> bool {
        self.profile.is_auth_failure(combined_output)
    }
}

fn spawn_stream_reader(
    tx: tokio::sync::mpsc::UnboundedSender<AgentEvent>,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
    pid: u32,
) {
    tokio::spawn(async move {
        let mut out_lines = stdout.map(|s| BufReader::new(s).lines());
        let mut err_lines = stderr.map(|s| BufReader::new(s).lines());

        loop {
            let out_fut = async {
                match out_lines.as_mut() {
                    Some(l) => l.next_line().await,
                    None => std::future::pending().await,
                }
            };
            let err_fut = async {
                match err_lines.as_mut() {
                    Some(l) => l.next_line().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                line = out_fut => match line {
                    Ok(Some(text)) => { let _ = tx.send(AgentEvent::Output(text)); }
                    Ok(None) => out_lines = None,
                    Err(e) => { let _ = tx.send(AgentEvent::Error(e.to_string())); out_lines = None; }
                },
                line = err_fut => match line {
                    Ok(Some(text)) => { let _ = tx.send(AgentEvent::Output(text)); }
                    Ok(None) => err_lines = None,
                    Err(e) => { let _ = tx.send(AgentEvent::Error(e.to_string())); err_lines = None; }
                },
            }

            if out_lines.is_none() && err_lines.is_none() {
                break;
            }
        }

        // stdout/stderr reaching EOF doesn't mean the process has exited;
        // wait() blocks until it actually has, giving the real exit status.
        let exit_code = {
            let mut processes = processes.lock().await;
            match processes.get_mut(&pid) {
                Some(state) => state.child.wait().await.ok().and_then(|status| status.code()),
                None => None,
            }
        };
        let _ = tx.send(AgentEvent::Completed { exit_code });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawning_missing_binary_reports_spawn_failed() {
        let profile = AgentProfile::claude();
        let harness = ProcessHarness::new(profile, PathBuf::from("/nonexistent/definitely-not-a-binary"));
        let dir = tempfile::tempdir().unwrap();
        let err = harness.spawn(dir.path(), "hello").await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::SpawnFailed);
    }

    #[tokio::test]
    async fn echo_binary_produces_output_and_completes() {
        let profile = AgentProfile {
            name: "echo-agent",
            default_binary: "echo",
            delivery: PromptDelivery::Argv,
            non_interactive_args: &[],
            auth_failure_markers: &[],
        };
        let harness = ProcessHarness::new(profile, PathBuf::from("echo"));
        let dir = tempfile::tempdir().unwrap();
        let handle = harness.spawn(dir.path(), "hello world").await.unwrap();

        use futures::StreamExt;
        let events: Vec<_> = harness.events(handle).collect().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Output(s) if s.contains("hello world"))));
        assert!(matches!(events.last(), Some(AgentEvent::Completed { .. })));
    }
}
