//! Resolves the `run` command's single positional argument into a
//! [`TaskPlan`]: a path to a JSON or TOML plan file, or bare user text
//! routed through the Meta-Decomposer (§5). `foreman run` has no
//! database-backed `plan create` step to separate the two, so both forms
//! share one entry point.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use foreman_core::decompose;
use foreman_core::harness::Harness;
use foreman_core::task::{Task, TaskPlan};
use serde::{Deserialize, Serialize};

/// On-disk plan shape for `run <plan.json>` / `run <plan.toml>`, matching
/// `Task`'s own field names field-for-field rather than the Decomposition
/// JSON schema's `task_id`, since this is an authored artifact rather than
/// an LLM's structured output.
#[derive(Debug, Serialize, Deserialize)]
struct PlanFile {
    tasks: Vec<Task>,
}

/// Loads a plan from `input`: a `.json`/`.toml` file path if one exists at
/// that path, otherwise treats `input` as free text and decomposes it via
/// `harness` (§5's Meta-Decomposer).
pub async fn resolve(
    input: &str,
    harness: &dyn Harness,
    workspace: &Path,
    decompose_timeout: Duration,
) -> Result<TaskPlan> {
    let path = Path::new(input);
    if path.is_file() {
        return load_plan_file(path);
    }

    let plan = decompose::decompose(harness, input, workspace, decompose_timeout).await;
    Ok(plan)
}

pub fn load_plan_file(path: &Path) -> Result<TaskPlan> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan file {}", path.display()))?;

    let parsed: PlanFile = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&contents)
            .with_context(|| format!("parsing {} as TOML", path.display()))?,
        _ => serde_json::from_str(&contents)
            .with_context(|| format!("parsing {} as JSON", path.display()))?,
    };

    TaskPlan::new(parsed.tasks).with_context(|| format!("plan file {} is invalid", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::task::TaskType;

    #[test]
    fn loads_json_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let body = serde_json::json!({
            "tasks": [
                {"id": "a", "prompt": "do a", "type": "coding"},
                {"id": "b", "prompt": "do b", "type": "testing", "depends_on": ["a"]}
            ]
        });
        std::fs::write(&path, body.to_string()).unwrap();
        let plan = load_plan_file(&path).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn loads_toml_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        std::fs::write(
            &path,
            r#"
            [[tasks]]
            id = "a"
            prompt = "do a"
            type = "coding"
            "#,
        )
        .unwrap();
        let plan = load_plan_file(&path).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.get("a").unwrap().task_type, TaskType::Coding);
    }

    #[test]
    fn rejects_invalid_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let body = serde_json::json!({
            "tasks": [
                {"id": "a", "prompt": "do a", "type": "coding", "depends_on": ["missing"]}
            ]
        });
        std::fs::write(&path, body.to_string()).unwrap();
        assert!(load_plan_file(&path).is_err());
    }
}
