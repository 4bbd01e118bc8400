//! Per-run traversal state.
//!
//! [`GraphExecution`] owns the edge and node states the dispatcher mutates
//! while a run progresses. It lives inside
//! [`GraphRuntimeState`](super::GraphRuntimeState) so that a paused or
//! aborted run can be resumed by a later `run()` call.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::dsl::FAIL_BRANCH_HANDLE;
use crate::graph::{Graph, GraphEdge};

use super::events::PauseReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeState {
    #[default]
    Unknown,
    Taken,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Unknown,
    /// Pushed to the ready queue or executing.
    Queued,
    Succeeded,
    Failed,
    /// Failed and absorbed by an error strategy.
    Exception,
    Skipped,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    PartialSucceeded,
    Failed,
    Aborted,
    Paused,
}

impl ExecutionStatus {
    /// A following `run()` continues from the current traversal state.
    pub fn is_resumable(&self) -> bool {
        matches!(self, ExecutionStatus::Paused | ExecutionStatus::Aborted)
    }
}

/// Which outgoing edges of a completed node are taken.
#[derive(Debug, Clone, Copy)]
pub enum EdgeSelection<'a> {
    All,
    AllExceptFailBranch,
    Handle(&'a str),
    FailBranchOnly,
}

impl EdgeSelection<'_> {
    fn takes(&self, edge: &GraphEdge) -> bool {
        match self {
            EdgeSelection::All => true,
            EdgeSelection::AllExceptFailBranch => edge.source_handle != FAIL_BRANCH_HANDLE,
            EdgeSelection::Handle(h) => edge.source_handle == *h,
            EdgeSelection::FailBranchOnly => edge.source_handle == FAIL_BRANCH_HANDLE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphExecution {
    node_states: HashMap<String, NodeState>,
    edge_states: HashMap<String, EdgeState>,
    /// Incoming edges not yet resolved.
    pending_incoming: HashMap<String, usize>,
    /// Incoming edges resolved as taken.
    taken_incoming: HashMap<String, usize>,
    retry_counts: HashMap<String, u32>,
    exceptions_count: u32,
    pause_reasons: Vec<PauseReason>,
    status: ExecutionStatus,
}

impl GraphExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh traversal state for `graph`.
    pub fn reset(&mut self, graph: &Graph) {
        self.node_states.clear();
        self.edge_states.clear();
        self.retry_counts.clear();
        self.pause_reasons.clear();
        self.exceptions_count = 0;
        self.taken_incoming.clear();
        self.pending_incoming = graph
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), graph.in_degree(&n.id)))
            .collect();
        self.status = ExecutionStatus::NotStarted;
    }

    pub fn node_state(&self, node_id: &str) -> NodeState {
        self.node_states.get(node_id).copied().unwrap_or_default()
    }

    pub fn set_node_state(&mut self, node_id: &str, state: NodeState) {
        self.node_states.insert(node_id.to_string(), state);
    }

    pub fn edge_state(&self, edge_id: &str) -> EdgeState {
        self.edge_states.get(edge_id).copied().unwrap_or_default()
    }

    /// Resolve the outgoing edges of `node_id` and return the nodes that
    /// became ready, in resolution order.
    ///
    /// Targets whose incoming edges are all resolved with none taken are
    /// marked skipped and their own outgoing edges are resolved as skipped.
    pub fn resolve_outgoing(
        &mut self,
        graph: &Graph,
        node_id: &str,
        selection: EdgeSelection<'_>,
    ) -> Vec<String> {
        let mut ready = Vec::new();
        let mut work: VecDeque<(&GraphEdge, bool)> = graph
            .get_outgoing_edges(node_id)
            .into_iter()
            .map(|e| (e, selection.takes(e)))
            .collect();

        while let Some((edge, taken)) = work.pop_front() {
            if self.edge_state(&edge.id) != EdgeState::Unknown {
                continue;
            }
            self.edge_states.insert(
                edge.id.clone(),
                if taken { EdgeState::Taken } else { EdgeState::Skipped },
            );

            let pending = self.pending_incoming.entry(edge.target.clone()).or_insert(0);
            *pending = pending.saturating_sub(1);
            let now_resolved = *pending == 0;
            if taken {
                *self.taken_incoming.entry(edge.target.clone()).or_insert(0) += 1;
            }
            if !now_resolved || self.node_state(&edge.target) != NodeState::Unknown {
                continue;
            }

            if self.taken_incoming.get(&edge.target).copied().unwrap_or(0) > 0 {
                ready.push(edge.target.clone());
            } else {
                tracing::debug!(node_id = %edge.target, "Skipping node on unselected branch");
                self.set_node_state(&edge.target, NodeState::Skipped);
                work.extend(
                    graph
                        .get_outgoing_edges(&edge.target)
                        .into_iter()
                        .map(|e| (e, false)),
                );
            }
        }
        ready
    }

    /// Nodes to re-enqueue when resuming, in declaration order.
    pub fn resumable_nodes(&self, graph: &Graph) -> Vec<String> {
        graph
            .nodes()
            .iter()
            .filter(|n| {
                matches!(
                    self.node_state(&n.id),
                    NodeState::Queued | NodeState::Paused
                )
            })
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn retry_count(&self, node_id: &str) -> u32 {
        self.retry_counts.get(node_id).copied().unwrap_or(0)
    }

    /// Bump and return the retry count of `node_id`.
    pub fn increment_retry(&mut self, node_id: &str) -> u32 {
        let count = self.retry_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn exceptions_count(&self) -> u32 {
        self.exceptions_count
    }

    pub fn record_exception(&mut self) {
        self.exceptions_count += 1;
    }

    pub fn pause_reasons(&self) -> &[PauseReason] {
        &self.pause_reasons
    }

    pub fn add_pause_reason(&mut self, reason: PauseReason) {
        self.pause_reasons.push(reason);
    }

    pub fn clear_pause_reasons(&mut self) {
        self.pause_reasons.clear();
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
    }

    pub fn count_in_state(&self, state: NodeState) -> usize {
        self.node_states.values().filter(|s| **s == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{parse_dsl, DslFormat};
    use crate::graph::build_graph;

    fn graph(yaml: &str) -> Graph {
        build_graph(&parse_dsl(yaml, DslFormat::Yaml).unwrap()).unwrap()
    }

    const DIAMOND: &str = r#"
nodes:
  - { id: a, data: { type: start } }
  - { id: b, data: { type: template-transform, template: "" } }
  - { id: c, data: { type: template-transform, template: "" } }
  - { id: d, data: { type: end } }
edges:
  - { source: a, target: b }
  - { source: a, target: c }
  - { source: b, target: d }
  - { source: c, target: d }
"#;

    #[test]
    fn test_join_waits_for_all_incoming() {
        let g = graph(DIAMOND);
        let mut ex = GraphExecution::new();
        ex.reset(&g);
        assert_eq!(ex.resolve_outgoing(&g, "a", EdgeSelection::All), vec!["b", "c"]);
        assert!(ex.resolve_outgoing(&g, "b", EdgeSelection::All).is_empty());
        assert_eq!(ex.resolve_outgoing(&g, "c", EdgeSelection::All), vec!["d"]);
        assert_eq!(ex.edge_state("a-source-b"), EdgeState::Taken);
    }

    const BRANCH: &str = r#"
nodes:
  - { id: s, data: { type: start } }
  - { id: if, data: { type: if-else, cases: [] } }
  - { id: yes, data: { type: answer, answer: "y" } }
  - { id: no, data: { type: answer, answer: "n" } }
  - { id: no_child, data: { type: answer, answer: "nc" } }
  - { id: join, data: { type: end } }
edges:
  - { source: s, target: if }
  - { source: if, target: yes, sourceHandle: "true" }
  - { source: if, target: no, sourceHandle: "false" }
  - { source: no, target: no_child }
  - { source: yes, target: join }
  - { source: no_child, target: join }
"#;

    #[test]
    fn test_unselected_branch_is_skipped_recursively() {
        let g = graph(BRANCH);
        let mut ex = GraphExecution::new();
        ex.reset(&g);
        assert_eq!(ex.resolve_outgoing(&g, "s", EdgeSelection::All), vec!["if"]);
        assert_eq!(
            ex.resolve_outgoing(&g, "if", EdgeSelection::Handle("true")),
            vec!["yes"]
        );
        assert_eq!(ex.node_state("no"), NodeState::Skipped);
        assert_eq!(ex.node_state("no_child"), NodeState::Skipped);
        assert_eq!(ex.edge_state("no_child-source-join"), EdgeState::Skipped);
        // join still waits for the selected side
        assert_eq!(ex.node_state("join"), NodeState::Unknown);
        assert_eq!(ex.resolve_outgoing(&g, "yes", EdgeSelection::All), vec!["join"]);
    }

    #[test]
    fn test_all_skipped_join_is_skipped() {
        let g = graph(BRANCH);
        let mut ex = GraphExecution::new();
        ex.reset(&g);
        ex.resolve_outgoing(&g, "s", EdgeSelection::All);
        let ready = ex.resolve_outgoing(&g, "if", EdgeSelection::Handle("nothing"));
        assert!(ready.is_empty());
        assert_eq!(ex.node_state("join"), NodeState::Skipped);
        assert_eq!(ex.count_in_state(NodeState::Skipped), 4);
    }

    #[test]
    fn test_fail_branch_selection() {
        let yaml = r#"
nodes:
  - { id: s, data: { type: start } }
  - { id: http, data: { type: code, code: "", error_strategy: fail-branch } }
  - { id: ok, data: { type: end } }
  - { id: err, data: { type: end } }
edges:
  - { source: s, target: http }
  - { source: http, target: ok }
  - { source: http, target: err, sourceHandle: fail-branch }
"#;
        let g = graph(yaml);
        let mut ex = GraphExecution::new();
        ex.reset(&g);
        ex.resolve_outgoing(&g, "s", EdgeSelection::All);
        assert_eq!(
            ex.resolve_outgoing(&g, "http", EdgeSelection::FailBranchOnly),
            vec!["err"]
        );
        assert_eq!(ex.node_state("ok"), NodeState::Skipped);
    }

    #[test]
    fn test_resumable_nodes_and_counters() {
        let g = graph(DIAMOND);
        let mut ex = GraphExecution::new();
        ex.reset(&g);
        ex.set_node_state("c", NodeState::Paused);
        ex.set_node_state("b", NodeState::Queued);
        ex.set_node_state("a", NodeState::Succeeded);
        assert_eq!(ex.resumable_nodes(&g), vec!["b", "c"]);
        assert_eq!(ex.increment_retry("b"), 1);
        assert_eq!(ex.increment_retry("b"), 2);
        assert_eq!(ex.retry_count("c"), 0);
        assert!(ExecutionStatus::Paused.is_resumable());
        assert!(!ExecutionStatus::Failed.is_resumable());
    }
}
