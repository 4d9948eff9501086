//! `WorkflowGraph`: the closed sum-type representation of a workflow (§3,
//! §9's "use a closed sum type with a single dispatch function" mapping).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::state::WorkflowState;

/// A node action: given the current state, returns the next state. May
/// invoke an agent via the Agent Invoker internally. Boxed/dyn because the
/// graph holds a heterogeneous set of closures.
pub type Action = Arc<
    dyn Fn(WorkflowState) -> Pin<Box<dyn Future<Output = anyhow::Result<WorkflowState>> + Send>>
        + Send
        + Sync,
>;

/// A CONDITION node's predicate: evaluated against the state, never
/// mutates it.
pub type Predicate = Arc<dyn Fn(&WorkflowState) -> bool + Send + Sync>;

/// One of the eight node kinds §3 defines.
#[derive(Clone)]
pub enum NodeKind {
    Start,
    End,
    Task {
        agent_type: Option<String>,
        action: Action,
    },
    /// Evaluated in order; first true predicate wins, else `default`.
    Condition {
        branches: Vec<(Predicate, String)>,
        default: String,
    },
    Loop {
        /// First node of the body subgraph, re-entered each iteration.
        body_entry: String,
        /// Re-evaluated before each iteration; false or `max_iterations`
        /// reached takes `exit`.
        condition: Predicate,
        max_iterations: u32,
        exit: String,
    },
    Human {
        on_approve: String,
        on_reject: String,
        timeout: Duration,
    },
    /// Fan-out: each branch runs independently from its own first node
    /// down to the matching `join`.
    Parallel {
        branches: Vec<String>,
        join: String,
    },
    Join,
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeKind::Start => "Start",
            NodeKind::End => "End",
            NodeKind::Task { .. } => "Task",
            NodeKind::Condition { .. } => "Condition",
            NodeKind::Loop { .. } => "Loop",
            NodeKind::Human { .. } => "Human",
            NodeKind::Parallel { .. } => "Parallel",
            NodeKind::Join => "Join",
        };
        f.write_str(name)
    }
}

/// A graph node: its kind plus, for kinds with exactly one successor
/// (START, TASK, JOIN), that successor.
#[derive(Clone)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Single-successor edge, meaningful for Start/Task/Join. `None` for
    /// End (terminal) and for kinds that encode their own successors
    /// (Condition/Loop/Human/Parallel).
    pub next: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("graph must have exactly one START node, found {0}")]
    StartNodeCount(usize),
    #[error("no END node is reachable from START")]
    EndUnreachable,
    #[error("unknown node referenced: {0}")]
    UnknownNode(String),
    #[error("PARALLEL node {parallel} has {declared} branches but JOIN {join} expects in-degree {actual}")]
    JoinArityMismatch {
        parallel: String,
        join: String,
        declared: usize,
        actual: usize,
    },
}

/// A labelled DAG of workflow nodes (acyclic outside LOOP bodies, per §3).
pub struct WorkflowGraph {
    pub id: String,
    nodes: HashMap<String, Node>,
    start_id: String,
}

impl WorkflowGraph {
    /// Builds and validates a graph: exactly one START, at least one END
    /// reachable from it, and every PARALLEL's declared branch count
    /// matching its JOIN's expected in-degree.
    pub fn new(id: impl Into<String>, nodes: Vec<Node>) -> Result<Self, GraphError> {
        let mut map = HashMap::with_capacity(nodes.len());
        let mut start_ids = Vec::new();
        for n in nodes {
            if matches!(n.kind, NodeKind::Start) {
                start_ids.push(n.id.clone());
            }
            map.insert(n.id.clone(), n);
        }
        if start_ids.len() != 1 {
            return Err(GraphError::StartNodeCount(start_ids.len()));
        }
        let start_id = start_ids.into_iter().next().unwrap();

        let graph = Self {
            id: id.into(),
            nodes: map,
            start_id,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), GraphError> {
        self.validate_references()?;
        self.validate_end_reachable()?;
        self.validate_join_arity()?;
        Ok(())
    }

    fn validate_references(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for target in self.successors_declared(node) {
                if !self.nodes.contains_key(&target) {
                    return Err(GraphError::UnknownNode(target));
                }
            }
        }
        Ok(())
    }

    fn successors_declared(&self, node: &Node) -> Vec<String> {
        let mut out: Vec<String> = node.next.iter().cloned().collect();
        match &node.kind {
            NodeKind::Condition { branches, default } => {
                out.extend(branches.iter().map(|(_, t)| t.clone()));
                out.push(default.clone());
            }
            NodeKind::Loop {
                body_entry, exit, ..
            } => {
                out.push(body_entry.clone());
                out.push(exit.clone());
            }
            NodeKind::Human {
                on_approve,
                on_reject,
                ..
            } => {
                out.push(on_approve.clone());
                out.push(on_reject.clone());
            }
            NodeKind::Parallel { branches, join } => {
                out.extend(branches.iter().cloned());
                out.push(join.clone());
            }
            _ => {}
        }
        out
    }

    fn validate_end_reachable(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        let mut queue = vec![self.start_id.clone()];
        while let Some(id) = queue.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                if matches!(node.kind, NodeKind::End) {
                    return Ok(());
                }
                queue.extend(self.successors_declared(node));
            }
        }
        Err(GraphError::EndUnreachable)
    }

    fn validate_join_arity(&self) -> Result<(), GraphError> {
        let mut join_in_degree: HashMap<String, usize> = HashMap::new();
        for node in self.nodes.values() {
            if let NodeKind::Parallel { branches, join } = &node.kind {
                *join_in_degree.entry(join.clone()).or_insert(0) += branches.len();
            }
        }
        for node in self.nodes.values() {
            if let NodeKind::Parallel { branches, join } = &node.kind {
                match self.nodes.get(join) {
                    Some(join_node) if !matches!(join_node.kind, NodeKind::Join) => {
                        return Err(GraphError::JoinArityMismatch {
                            parallel: node.id.clone(),
                            join: join.clone(),
                            declared: branches.len(),
                            actual: 0,
                        });
                    }
                    _ => {}
                }
                // `engine::execute` dispatches one PARALLEL per JOIN; if a
                // second PARALLEL targets the same JOIN, its accumulated
                // in-degree no longer matches this node's own declared
                // branch count.
                let actual = join_in_degree.get(join).copied().unwrap_or(0);
                if actual != branches.len() {
                    return Err(GraphError::JoinArityMismatch {
                        parallel: node.id.clone(),
                        join: join.clone(),
                        declared: branches.len(),
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn all_node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// All node ids reachable from `from`, used to compute the checkpoint's
    /// `pending` set (§4.7's "reachable-but-unexecuted-set").
    pub fn reachable_from(&self, from: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = vec![from.to_string()];
        while let Some(id) = queue.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                queue.extend(self.successors_declared(node));
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_task_action() -> Action {
        Arc::new(|state: WorkflowState| Box::pin(async move { Ok(state) }))
    }

    #[test]
    fn accepts_a_minimal_valid_graph() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        assert!(WorkflowGraph::new("g", nodes).is_ok());
    }

    #[test]
    fn rejects_multiple_start_nodes() {
        let nodes = vec![
            Node {
                id: "s1".into(),
                kind: NodeKind::Start,
                next: Some("end".into()),
            },
            Node {
                id: "s2".into(),
                kind: NodeKind::Start,
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        assert!(matches!(
            WorkflowGraph::new("g", nodes),
            Err(GraphError::StartNodeCount(2))
        ));
    }

    #[test]
    fn rejects_unreachable_end() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("start".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        assert!(matches!(
            WorkflowGraph::new("g", nodes),
            Err(GraphError::EndUnreachable)
        ));
    }

    #[test]
    fn rejects_dangling_reference() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("ghost".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        assert!(matches!(
            WorkflowGraph::new("g", nodes),
            Err(GraphError::UnknownNode(_))
        ));
    }

    #[test]
    fn task_node_with_action_builds() {
        let nodes = vec![
            Node {
                id: "start".into(),
                kind: NodeKind::Start,
                next: Some("t".into()),
            },
            Node {
                id: "t".into(),
                kind: NodeKind::Task {
                    agent_type: None,
                    action: simple_task_action(),
                },
                next: Some("end".into()),
            },
            Node {
                id: "end".into(),
                kind: NodeKind::End,
                next: None,
            },
        ];
        assert!(WorkflowGraph::new("g", nodes).is_ok());
    }
}
