//! `WorkflowState`: the value flowing through a running workflow, moved
//! (not shared-by-reference) through each node — §9's ownership mapping:
//! "each node receives the state by move and returns an updated state,
//! keeping parallel branches' states fully independent until the JOIN
//! merges them".

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::checkpoint::CheckpointStatus;

#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub data: HashMap<String, Value>,
    pub history: Vec<String>,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub status: CheckpointStatus,
}

impl WorkflowState {
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            data: HashMap::new(),
            history: Vec::new(),
            execution_id,
            started_at: Utc::now(),
            status: CheckpointStatus::Running,
        }
    }

    pub fn push_history(&mut self, node_id: impl Into<String>) {
        self.history.push(node_id.into());
    }
}

/// Merges two branch outcomes' `data` maps key-wise, right-biased: on
/// collision the value from `b` overwrites `a`. The sole JOIN merge
/// policy this repository implements ("later-finishing wins"); see
/// DESIGN.md for why a user-suppliable merge function was left out.
pub fn right_biased_overlay(a: &mut HashMap<String, Value>, b: HashMap<String, Value>) {
    for (k, v) in b {
        a.insert(k, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_biased_overlay_prefers_second_map() {
        let mut a = HashMap::new();
        a.insert("k".to_string(), Value::from(1));
        let mut b = HashMap::new();
        b.insert("k".to_string(), Value::from(2));
        b.insert("other".to_string(), Value::from(3));
        right_biased_overlay(&mut a, b);
        assert_eq!(a["k"], Value::from(2));
        assert_eq!(a["other"], Value::from(3));
    }
}
