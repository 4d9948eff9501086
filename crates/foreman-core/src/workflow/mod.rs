//! Workflow Engine (component 7): generalizes the DAG Scheduler to an
//! explicit graph with conditional edges, fan-out/join barriers, and
//! bounded loops.

pub mod engine;
pub mod graph;
pub mod state;

pub use engine::{execute, EngineContext, EngineError};
pub use graph::{Action, GraphError, Node, NodeKind, Predicate, WorkflowGraph};
pub use state::WorkflowState;
