//! Per-agent invocation profiles: binary name, argv-vs-stdin contract, and
//! authentication-failure detection, per §6's Agent CLI contract.

/// How a profile feeds the prompt to the child process.
#[derive(Debug, Clone)]
pub enum PromptDelivery {
    /// The prompt is passed as a trailing argv entry.
    Argv,
    /// The prompt is written to stdin and the handle closed/flushed.
    Stdin,
}

/// A named agent's invocation contract.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub name: &'static str,
    pub default_binary: &'static str,
    pub delivery: PromptDelivery,
    /// Flags that request non-interactive single-shot mode, appended before
    /// the prompt argument (or before stdin is opened).
    pub non_interactive_args: &'static [&'static str],
    /// Stderr/stdout substrings that indicate an authentication failure.
    pub auth_failure_markers: &'static [&'static str],
}

impl AgentProfile {
    /// Builds the full argv for one invocation, excluding the binary itself.
    pub fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .non_interactive_args
            .iter()
            .map(|s| s.to_string())
            .collect();
        if matches!(self.delivery, PromptDelivery::Argv) {
            args.push(prompt.to_string());
        }
        args
    }

    pub fn is_auth_failure(&self, combined_output: &str) -> bool {
        self.auth_failure_markers
            .iter()
            .any(|m| combined_output.contains(m))
    }

    pub fn claude() -> Self {
        Self {
            name: "claude",
            default_binary: "claude",
            delivery: PromptDelivery::Stdin,
            non_interactive_args: &["-p", "--output-format", "text"],
            auth_failure_markers: &["Please run", "authentication", "not logged in"],
        }
    }

    pub fn codex() -> Self {
        Self {
            name: "codex",
            default_binary: "codex",
            delivery: PromptDelivery::Argv,
            non_interactive_args: &["exec", "--full-auto"],
            auth_failure_markers: &["Unauthorized", "login required"],
        }
    }

    pub fn gemini() -> Self {
        Self {
            name: "gemini",
            default_binary: "gemini",
            delivery: PromptDelivery::Argv,
            non_interactive_args: &["--yolo"],
            auth_failure_markers: &["API key not valid", "permission denied"],
        }
    }

    /// The three required default agents (§6).
    pub fn defaults() -> Vec<Self> {
        vec![Self::claude(), Self::codex(), Self::gemini()]
    }
}
