//! Runtime configuration, resolved CLI-flag > env-var > default.
//! Config-*file* loading is an explicit Non-goal; only env vars and
//! constructor arguments feed this.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;
pub const DEFAULT_MAX_ROUNDS: u32 = 20;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Resolved engine-wide configuration for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub default_timeout: Duration,
    pub checkpoint_dir: PathBuf,
    /// Per-task continue-past-failure behavior for the DAG Scheduler (§4.6).
    pub continue_on_error: bool,
    /// Agent binary overrides, keyed by agent name (`<AGENT_NAME>_BIN`).
    pub agent_binaries: HashMap<String, PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            checkpoint_dir: default_checkpoint_dir(),
            continue_on_error: false,
            agent_binaries: HashMap::new(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("foreman")
        .join("checkpoints")
}

impl OrchestratorConfig {
    /// Builder-style overrides a CLI flag applies on top of [`Self::resolve`].
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: PathBuf) -> Self {
        self.checkpoint_dir = dir;
        self
    }

    pub fn with_continue_on_error(mut self, v: bool) -> Self {
        self.continue_on_error = v;
        self
    }

    /// Resolves config from the process environment, defaulting anything
    /// unset. CLI flags are applied afterward by the caller (`foreman-cli`)
    /// via the `with_*` builders, giving flag-overrides-env-overrides-default
    /// precedence.
    pub fn resolve() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ORCHESTRATOR_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                cfg.max_concurrent = n;
            } else {
                tracing::warn!(value = %v, "ignoring unparseable ORCHESTRATOR_MAX_CONCURRENT");
            }
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_DEFAULT_TIMEOUT") {
            if let Ok(secs) = v.parse() {
                cfg.default_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %v, "ignoring unparseable ORCHESTRATOR_DEFAULT_TIMEOUT");
            }
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_CHECKPOINT_DIR") {
            cfg.checkpoint_dir = PathBuf::from(v);
        }

        for agent in ["claude", "codex", "gemini"] {
            let var = format!("{}_BIN", agent.to_uppercase());
            if let Ok(path) = std::env::var(&var) {
                cfg.agent_binaries.insert(agent.to_string(), PathBuf::from(path));
            }
        }

        cfg
    }

    pub fn binary_for(&self, agent: &str) -> PathBuf {
        self.agent_binaries
            .get(agent)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(agent))
    }

    /// Effective per-task timeout: `min(task.timeout, config.defaultTimeout)`.
    pub fn effective_timeout(&self, task_timeout_seconds: Option<u64>) -> Duration {
        match task_timeout_seconds {
            Some(secs) => Duration::from_secs(secs).min(self.default_timeout),
            None => self.default_timeout,
        }
    }
}
