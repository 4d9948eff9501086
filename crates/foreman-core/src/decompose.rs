//! Meta-Decomposer (§4.4): turns free-form user text into a [`TaskPlan`] by
//! consulting an LLM via the Agent Invoker, with a single-task fallback
//! plan whenever the response can't be trusted.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::harness::Harness;
use crate::invoker;
use crate::task::{Task, TaskPlan, TaskType};

const MAX_TASKS: usize = 50;

const INSTRUCTION_PREAMBLE: &str = r#"Decompose the following user request into a JSON array of subtasks.
Return ONLY the JSON array, no prose. Each element has fields:
  task_id (string, unique), prompt (string), depends_on (array of string, may be empty),
  priority (integer >= 1), type (one of: coding, analysis, simple, general, testing).

User request:
"#;

#[derive(Debug, Deserialize)]
struct RawTask {
    task_id: String,
    prompt: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(rename = "type")]
    task_type: RawTaskType,
}

fn default_priority() -> i64 {
    1
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum RawTaskType {
    Coding,
    Analysis,
    Simple,
    General,
    Testing,
}

impl From<RawTaskType> for TaskType {
    fn from(v: RawTaskType) -> Self {
        match v {
            RawTaskType::Coding => TaskType::Coding,
            RawTaskType::Analysis => TaskType::Analysis,
            RawTaskType::Simple => TaskType::Simple,
            RawTaskType::General => TaskType::General,
            RawTaskType::Testing => TaskType::Testing,
        }
    }
}

/// The single-task plan returned whenever decomposition can't be trusted.
/// Decomposition failure is never fatal to the caller — it always gets a
/// usable plan back.
fn fallback_plan(user_text: &str) -> TaskPlan {
    let task = Task::new("t1", user_text, TaskType::General);
    TaskPlan::new(vec![task]).expect("single no-dependency task is always a valid plan")
}

/// Attempts to parse `text` as the decomposition JSON array; on outright
/// parse failure, looks for the first balanced `[...]` substring and
/// retries once against that slice.
fn parse_plan_json(text: &str) -> Option<Vec<RawTask>> {
    if let Ok(tasks) = serde_json::from_str::<Vec<RawTask>>(text) {
        return Some(tasks);
    }
    let slice = find_balanced_brackets(text)?;
    serde_json::from_str::<Vec<RawTask>>(slice).ok()
}

fn find_balanced_brackets(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_and_build(tasks: Vec<RawTask>) -> Option<TaskPlan> {
    if tasks.is_empty() || tasks.len() > MAX_TASKS {
        return None;
    }
    let built: Vec<Task> = tasks
        .into_iter()
        .map(|t| {
            Task::new(t.task_id, t.prompt, t.task_type.into())
                .with_depends_on(t.depends_on)
                .with_priority(t.priority)
        })
        .collect();
    TaskPlan::new(built).ok()
}

/// `Decompose(userText) -> TaskPlan`.
///
/// Any failure along the way — the agent call itself, JSON parsing, or
/// validation (duplicate/unknown ids, a cycle, an empty or oversized array)
/// — collapses to the fallback single-task plan. Per the open-question
/// resolution in DESIGN.md, a fallback is logged at `warn` level rather
/// than swallowed silently, since operators debugging a run need to know
/// decomposition didn't happen.
pub async fn decompose(
    harness: &dyn Harness,
    user_text: &str,
    workspace: &Path,
    timeout: Duration,
) -> TaskPlan {
    let prompt = format!("{INSTRUCTION_PREAMBLE}{user_text}");
    let outcome = invoker::invoke(harness, &prompt, workspace, timeout, CancellationToken::new()).await;

    if !outcome.success {
        tracing::warn!(error = ?outcome.error, "meta-decomposer agent call failed, falling back to single-task plan");
        return fallback_plan(user_text);
    }

    let Some(raw_tasks) = parse_plan_json(&outcome.output) else {
        tracing::warn!("meta-decomposer response was not valid JSON, falling back to single-task plan");
        return fallback_plan(user_text);
    };

    match validate_and_build(raw_tasks) {
        Some(plan) => plan,
        None => {
            tracing::warn!("meta-decomposer plan failed validation, falling back to single-task plan");
            fallback_plan(user_text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{AgentEvent, AgentHandle, Harness};
    use async_trait::async_trait;
    use std::pin::Pin;

    struct FixedReplyHarness(String);

    #[async_trait]
    impl Harness for FixedReplyHarness {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn spawn(&self, _w: &Path, _p: &str) -> Result<AgentHandle, crate::error::AgentError> {
            Ok(AgentHandle { pid: 0 })
        }
        fn events(&self, _h: AgentHandle) -> Pin<Box<dyn futures::Stream<Item = AgentEvent> + Send>> {
            Box::pin(futures::stream::iter(vec![
                AgentEvent::Output(self.0.clone()),
                AgentEvent::Completed { exit_code: Some(0) },
            ]))
        }
        async fn send(&self, _h: AgentHandle, _t: &str) -> Result<(), crate::error::AgentError> {
            Ok(())
        }
        async fn kill(&self, _h: AgentHandle) -> Result<(), crate::error::AgentError> {
            Ok(())
        }
        async fn is_running(&self, _h: AgentHandle) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn valid_plan_is_parsed_directly() {
        let json = r#"[{"task_id":"a","prompt":"do a","depends_on":[],"priority":1,"type":"coding"},
                        {"task_id":"b","prompt":"do b","depends_on":["a"],"priority":1,"type":"testing"}]"#;
        let harness = FixedReplyHarness(json.to_string());
        let dir = tempfile::tempdir().unwrap();
        let plan = decompose(&harness, "build and test", dir.path(), Duration::from_secs(5)).await;
        assert_eq!(plan.len(), 2);
    }

    #[tokio::test]
    async fn plan_embedded_in_prose_is_extracted() {
        let json = r#"Sure, here is the plan: [{"task_id":"a","prompt":"do a","depends_on":[],"priority":1,"type":"general"}] Hope that helps!"#;
        let harness = FixedReplyHarness(json.to_string());
        let dir = tempfile::tempdir().unwrap();
        let plan = decompose(&harness, "anything", dir.path(), Duration::from_secs(5)).await;
        assert_eq!(plan.len(), 1);
    }

    #[tokio::test]
    async fn unparseable_response_falls_back_to_single_task() {
        let harness = FixedReplyHarness("not json at all".to_string());
        let dir = tempfile::tempdir().unwrap();
        let plan = decompose(&harness, "do the thing", dir.path(), Duration::from_secs(5)).await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tasks()[0].prompt, "do the thing");
    }

    #[tokio::test]
    async fn cyclic_plan_falls_back_to_single_task() {
        let json = r#"[{"task_id":"a","prompt":"a","depends_on":["b"],"priority":1,"type":"general"},
                        {"task_id":"b","prompt":"b","depends_on":["a"],"priority":1,"type":"general"}]"#;
        let harness = FixedReplyHarness(json.to_string());
        let dir = tempfile::tempdir().unwrap();
        let plan = decompose(&harness, "fallback please", dir.path(), Duration::from_secs(5)).await;
        assert_eq!(plan.len(), 1);
    }

    #[tokio::test]
    async fn empty_array_falls_back() {
        let harness = FixedReplyHarness("[]".to_string());
        let dir = tempfile::tempdir().unwrap();
        let plan = decompose(&harness, "x", dir.path(), Duration::from_secs(5)).await;
        assert_eq!(plan.len(), 1);
    }
}
