//! The task data model and the DAG builder: `BuildGraph`, `ValidateAcyclic`,
//! `TopologicalBatches`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of task-type tags the Agent Selector's type-rule map
/// understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Coding,
    Analysis,
    Simple,
    General,
    Testing,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Coding => "coding",
            TaskType::Analysis => "analysis",
            TaskType::Simple => "simple",
            TaskType::General => "general",
            TaskType::Testing => "testing",
        };
        f.write_str(s)
    }
}

/// A unit of agent work, identified by a stable string id within its plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Explicit agent assignment; if set, the Agent Selector picks it
    /// unconditionally (subject to it being enabled).
    #[serde(default)]
    pub agent: Option<String>,
    /// Lower is more urgent. Tasks default to priority 0.
    #[serde(default)]
    pub priority: i64,
    /// Per-task timeout override, in seconds. `None` defers to the
    /// scheduler's configured default.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Task {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            task_type,
            depends_on: Vec::new(),
            agent: None,
            priority: 0,
            timeout_seconds: None,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// A finite set of tasks plus their derived dependency relation.
///
/// `TaskPlan` is immutable once constructed: [`TaskPlan::new`] is the only
/// way to build one, and it validates acyclicity and reference integrity up
/// front so nothing downstream has to re-check them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    tasks: Vec<Task>,
}

/// A cycle found during acyclicity validation, reported as the path that
/// closes it (first and last identifiers are the same node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<String>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cycle detected: {}", self.path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

/// Errors raised building a `TaskPlan` from raw tasks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    #[error("duplicate task id: {0}")]
    DuplicateId(String),
    #[error("task {task} depends on unknown task {dep}")]
    UnknownDependency { task: String, dep: String },
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

impl TaskPlan {
    /// Builds and validates a plan: unique ids, resolved dependencies, no
    /// cycles. This is the only entry point — once constructed a `TaskPlan`
    /// is handed to the scheduler as read-only.
    pub fn new(tasks: Vec<Task>) -> Result<Self, PlanError> {
        let mut seen = HashSet::with_capacity(tasks.len());
        for t in &tasks {
            if !seen.insert(t.id.clone()) {
                return Err(PlanError::DuplicateId(t.id.clone()));
            }
        }
        for t in &tasks {
            for dep in &t.depends_on {
                if !seen.contains(dep) {
                    return Err(PlanError::UnknownDependency {
                        task: t.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }
        let plan = Self { tasks };
        validate_acyclic(&plan)?;
        Ok(plan)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Adjacency views computed from a plan: forward edges, in-degree per node,
/// and reverse (dependent) edges.
pub struct Graph {
    pub adjacency: HashMap<String, Vec<String>>,
    pub in_degree: HashMap<String, usize>,
    pub reverse_adjacency: HashMap<String, Vec<String>>,
}

/// `BuildGraph(plan) -> (adjacency, inDegree, reverseAdj)`.
pub fn build_graph(plan: &TaskPlan) -> Graph {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> = HashMap::new();

    for t in plan.tasks() {
        adjacency.entry(t.id.clone()).or_default();
        reverse_adjacency.entry(t.id.clone()).or_default();
        in_degree.entry(t.id.clone()).or_insert(0);
    }
    for t in plan.tasks() {
        for dep in &t.depends_on {
            adjacency.entry(dep.clone()).or_default().push(t.id.clone());
            reverse_adjacency
                .entry(t.id.clone())
                .or_default()
                .push(dep.clone());
            *in_degree.entry(t.id.clone()).or_insert(0) += 1;
        }
    }

    Graph {
        adjacency,
        in_degree,
        reverse_adjacency,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// `ValidateAcyclic(plan) -> nil | CycleError(path)`.
///
/// Iterative depth-first traversal with a tri-color marker: white (unvisited),
/// gray (on the current path), black (fully explored). Encountering a gray
/// node closes a cycle along the current path.
pub fn validate_acyclic(plan: &TaskPlan) -> Result<(), CycleError> {
    let graph = build_graph(plan);
    let mut color: HashMap<&str, Color> = plan
        .tasks()
        .iter()
        .map(|t| (t.id.as_str(), Color::White))
        .collect();

    for t in plan.tasks() {
        if color[t.id.as_str()] == Color::White {
            dfs_visit(t.id.as_str(), &graph, &mut color)?;
        }
    }
    Ok(())
}

fn dfs_visit<'a>(
    start: &'a str,
    graph: &'a Graph,
    color: &mut HashMap<&'a str, Color>,
) -> Result<(), CycleError> {
    // Explicit stack of (node, next-child-index) frames, mirroring a
    // recursive DFS without risking stack depth on large plans.
    let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
    let mut path: Vec<&str> = vec![start];
    color.insert(start, Color::Gray);

    while let Some((node, idx)) = stack.last().copied() {
        let children = graph
            .adjacency
            .get(node)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        if idx >= children.len() {
            color.insert(node, Color::Black);
            stack.pop();
            path.pop();
            continue;
        }
        stack.last_mut().unwrap().1 += 1;
        let child = children[idx].as_str();
        match color.get(child).copied().unwrap_or(Color::White) {
            Color::White => {
                color.insert(child, Color::Gray);
                stack.push((child, 0));
                path.push(child);
            }
            Color::Gray => {
                let mut cycle_path: Vec<String> =
                    path.iter().map(|s| s.to_string()).collect();
                cycle_path.push(child.to_string());
                if let Some(start_idx) = cycle_path.iter().position(|n| n == child) {
                    cycle_path = cycle_path[start_idx..].to_vec();
                }
                return Err(CycleError { path: cycle_path });
            }
            Color::Black => {}
        }
    }
    Ok(())
}

/// `TopologicalBatches(plan) -> [[identifier]]` via Kahn's algorithm.
///
/// Within a batch, ties are broken by priority (lower = more urgent, so it
/// sorts first) then by identifier, for deterministic test output.
pub fn topological_batches(plan: &TaskPlan) -> Result<Vec<Vec<String>>, CycleError> {
    let graph = build_graph(plan);
    let mut in_degree = graph.in_degree.clone();
    let priority_of: HashMap<&str, i64> =
        plan.tasks().iter().map(|t| (t.id.as_str(), t.priority)).collect();

    let mut remaining = plan.len();
    let mut batches = Vec::new();

    loop {
        let mut ready: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        if ready.is_empty() {
            if remaining == 0 {
                break;
            }
            return Err(CycleError {
                path: in_degree.keys().cloned().collect(),
            });
        }
        ready.sort_by(|a, b| {
            priority_of[a.as_str()]
                .cmp(&priority_of[b.as_str()])
                .then_with(|| a.cmp(b))
        });

        for id in &ready {
            in_degree.remove(id.as_str());
            remaining -= 1;
            if let Some(successors) = graph.adjacency.get(id.as_str()) {
                for succ in successors {
                    if let Some(deg) = in_degree.get_mut(succ.as_str()) {
                        *deg -= 1;
                    }
                }
            }
        }
        batches.push(ready);
    }
    Ok(batches)
}

/// Per-task outcome, produced exactly once and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub output: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub agent: String,
    /// The multi-round loop's final-answer payload, if it produced one.
    pub final_answer: Option<String>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Success)
    }
}

/// The scheduling mode a `DagScheduler` run executed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Hybrid,
}

/// The whole outcome of a scheduler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub mode: ExecutionMode,
    pub batches: Vec<Vec<String>>,
    pub results: HashMap<String, TaskResult>,
    pub duration_ms: u64,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ExecutionResult {
    pub fn empty(mode: ExecutionMode) -> Self {
        Self {
            mode,
            batches: Vec::new(),
            results: HashMap::new(),
            duration_ms: 0,
            success_count: 0,
            failure_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: &str, deps: &[&str]) -> Task {
        Task::new(id, "do it", TaskType::General)
            .with_depends_on(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn linear_chain_batches_one_task_each() {
        let plan = TaskPlan::new(vec![t("t1", &[]), t("t2", &["t1"]), t("t3", &["t2"])]).unwrap();
        let batches = topological_batches(&plan).unwrap();
        assert_eq!(
            batches,
            vec![vec!["t1".to_string()], vec!["t2".to_string()], vec!["t3".to_string()]]
        );
    }

    #[test]
    fn fan_out_then_join_batches() {
        let plan = TaskPlan::new(vec![
            t("t0", &[]),
            t("t1", &["t0"]),
            t("t2", &["t0"]),
            t("t3", &["t0"]),
            t("t4", &["t1", "t2", "t3"]),
        ])
        .unwrap();
        let batches = topological_batches(&plan).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec!["t0".to_string()]);
        assert_eq!(batches[1].len(), 3);
        assert_eq!(batches[2], vec!["t4".to_string()]);
    }

    #[test]
    fn cycle_is_rejected() {
        let err = TaskPlan::new(vec![t("t1", &["t3"]), t("t2", &["t1"]), t("t3", &["t2"])])
            .unwrap_err();
        assert!(matches!(err, PlanError::Cycle(_)));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = TaskPlan::new(vec![t("t1", &["ghost"])]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let err = TaskPlan::new(vec![t("t1", &[]), t("t1", &[])]).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateId(_)));
    }

    #[test]
    fn empty_plan_has_no_batches() {
        let plan = TaskPlan::new(vec![]).unwrap();
        assert!(topological_batches(&plan).unwrap().is_empty());
    }

    #[test]
    fn priority_breaks_ties_within_a_batch() {
        let mut low = t("low", &[]);
        low.priority = 5;
        let mut high = t("high", &[]);
        high.priority = 1;
        let plan = TaskPlan::new(vec![low, high]).unwrap();
        let batches = topological_batches(&plan).unwrap();
        assert_eq!(batches, vec![vec!["high".to_string(), "low".to_string()]]);
    }
}
