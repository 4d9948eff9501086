//! Agent Selector (§4.5): picks an agent for a task by explicit assignment,
//! then a static type-rule map, then a history-weighted score.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::task::{Task, TaskType};

/// Static `type -> preferred agent` mapping, consulted before scoring.
fn type_rule(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Coding => "codex",
        TaskType::Analysis => "claude",
        TaskType::Simple => "gemini",
        TaskType::Testing => "codex",
        TaskType::General => "claude",
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AgentTypeStats {
    attempts: u64,
    successes: u64,
    total_duration_secs: f64,
}

#[derive(Debug, Default)]
struct AgentHistory {
    /// Keyed by (agent, task_type).
    per_type: HashMap<(String, TaskTypeKey), AgentTypeStats>,
}

// `TaskType` isn't `Hash`/`Eq` by derive choice elsewhere in this crate
// (serde needs it renameable); this crate-private key avoids adding those
// derives to the public type just for this map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskTypeKey(u8);

impl From<TaskType> for TaskTypeKey {
    fn from(t: TaskType) -> Self {
        TaskTypeKey(match t {
            TaskType::Coding => 0,
            TaskType::Analysis => 1,
            TaskType::Simple => 2,
            TaskType::General => 3,
            TaskType::Testing => 4,
        })
    }
}

/// Tracks per-agent, per-type history and picks an agent for a task.
/// Mutated only from the scheduler's coordination point after each
/// `TaskResult`, never from inside an in-flight agent invocation — this
/// keeps it lock-free in spirit even though the lock itself is real,
/// per §5's shared-resource policy.
pub struct AgentSelector {
    history: RwLock<AgentHistory>,
}

/// Returned when `enabledAgents` is empty.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no agent available")]
pub struct NoAgentError;

impl Default for AgentSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentSelector {
    pub fn new() -> Self {
        Self {
            history: RwLock::new(AgentHistory::default()),
        }
    }

    /// `Select(task, enabledAgents) -> agentName | Error("no agent")`.
    pub fn select(&self, task: &Task, enabled_agents: &[String]) -> Result<String, NoAgentError> {
        if enabled_agents.is_empty() {
            return Err(NoAgentError);
        }

        if let Some(explicit) = &task.agent {
            if enabled_agents.iter().any(|a| a == explicit) {
                return Ok(explicit.clone());
            }
        }

        let ruled = type_rule(task.task_type);
        if enabled_agents.iter().any(|a| a == ruled) {
            return Ok(ruled.to_string());
        }

        let history = self.history.read().unwrap();
        let mut best: Option<(String, f64)> = None;
        for agent in enabled_agents {
            let score = self.score(&history, agent, task.task_type);
            match &best {
                Some((best_agent, best_score)) => {
                    if score > *best_score || (score == *best_score && agent < best_agent) {
                        best = Some((agent.clone(), score));
                    }
                }
                None => best = Some((agent.clone(), score)),
            }
        }
        Ok(best.map(|(a, _)| a).unwrap_or_else(|| enabled_agents[0].clone()))
    }

    fn score(&self, history: &AgentHistory, agent: &str, task_type: TaskType) -> f64 {
        let key = TaskTypeKey::from(task_type);

        let (success_rate, type_attempts, total_attempts, avg_duration) = {
            let mut agent_attempts = 0u64;
            let mut agent_successes = 0u64;
            let mut agent_duration = 0.0;
            let mut type_specific_attempts = 0u64;

            for ((a, t), stats) in history.per_type.iter() {
                if a == agent {
                    agent_attempts += stats.attempts;
                    agent_successes += stats.successes;
                    agent_duration += stats.total_duration_secs;
                    if *t == key {
                        type_specific_attempts += stats.attempts;
                    }
                }
            }
            (agent_successes, type_specific_attempts, agent_attempts, agent_duration)
        };

        let success_rate = if total_attempts == 0 {
            0.5
        } else {
            success_rate as f64 / total_attempts as f64
        };
        let type_affinity = if total_attempts == 0 {
            0.0
        } else {
            type_attempts as f64 / total_attempts as f64
        };
        let avg_duration_secs = if total_attempts == 0 {
            0.0
        } else {
            avg_duration / total_attempts as f64
        };
        let speed_score = 1.0 / (avg_duration_secs + 0.1);

        0.5 * success_rate + 0.3 * type_affinity + 0.2 * speed_score
    }

    /// Reported by the scheduler after every `TaskResult`:
    /// `(agent, type, success, durationSeconds)`.
    pub fn record_outcome(&self, agent: &str, task_type: TaskType, success: bool, duration_secs: f64) {
        let mut history = self.history.write().unwrap();
        let entry = history
            .per_type
            .entry((agent.to_string(), TaskTypeKey::from(task_type)))
            .or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
        entry.total_duration_secs += duration_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn task(task_type: TaskType) -> Task {
        Task::new("t1", "do it", task_type)
    }

    #[test]
    fn explicit_assignment_wins_when_enabled() {
        let selector = AgentSelector::new();
        let t = task(TaskType::Coding).with_agent("gemini");
        let agent = selector
            .select(&t, &["codex".to_string(), "gemini".to_string()])
            .unwrap();
        assert_eq!(agent, "gemini");
    }

    #[test]
    fn type_rule_applies_when_no_explicit_assignment() {
        let selector = AgentSelector::new();
        let t = task(TaskType::Coding);
        let agent = selector
            .select(&t, &["claude".to_string(), "codex".to_string()])
            .unwrap();
        assert_eq!(agent, "codex");
    }

    #[test]
    fn falls_back_to_scoring_when_type_rule_agent_disabled() {
        let selector = AgentSelector::new();
        let t = task(TaskType::Coding);
        // codex (the type-rule agent) is not enabled; must score among claude/gemini.
        let agent = selector
            .select(&t, &["claude".to_string(), "gemini".to_string()])
            .unwrap();
        assert!(agent == "claude" || agent == "gemini");
    }

    #[test]
    fn empty_enabled_set_errors() {
        let selector = AgentSelector::new();
        let t = task(TaskType::General);
        assert!(selector.select(&t, &[]).is_err());
    }

    #[test]
    fn history_shifts_score_toward_reliable_agent() {
        let selector = AgentSelector::new();
        for _ in 0..10 {
            selector.record_outcome("claude", TaskType::Simple, true, 1.0);
            selector.record_outcome("gemini", TaskType::Simple, false, 1.0);
        }
        // "simple" type-rules to gemini; disable it so scoring decides
        // between claude and gemini directly is not possible (gemini IS the
        // rule target), so use a type with no rule collision: force via
        // explicit-agent-disabled path by using "general", ruled to claude,
        // then disable claude to force scoring between gemini and a third.
        let t = Task::new("t1", "x", TaskType::General);
        let agent = selector
            .select(&t, &["gemini".to_string(), "codex".to_string()])
            .unwrap();
        // Neither has type-specific history for "general"; codex and gemini
        // start even except gemini has worse success-rate history overall.
        assert_eq!(agent, "codex");
    }
}
