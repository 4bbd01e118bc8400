use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;

use crate::dsl::WorkflowSchema;
use crate::error::WorkflowError;

use super::types::{GraphEdge, GraphNode};

/// Reject duplicate node ids and edges pointing at unknown nodes.
pub fn validate_structure(schema: &WorkflowSchema) -> Result<(), WorkflowError> {
    if schema.nodes.is_empty() {
        return Err(WorkflowError::GraphBuildError("No nodes defined".into()));
    }

    let mut ids = HashSet::new();
    for node in &schema.nodes {
        if node.id.is_empty() {
            return Err(WorkflowError::GraphBuildError("Node with empty id".into()));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(WorkflowError::GraphBuildError(format!(
                "Duplicate node id: {}",
                node.id
            )));
        }
    }

    for edge in &schema.edges {
        if !ids.contains(edge.source.as_str()) {
            return Err(WorkflowError::GraphBuildError(format!(
                "Edge source not found: {}",
                edge.source
            )));
        }
        if !ids.contains(edge.target.as_str()) {
            return Err(WorkflowError::GraphBuildError(format!(
                "Edge target not found: {}",
                edge.target
            )));
        }
    }

    Ok(())
}

/// Reject edges sharing an id. Explicit ids must be unique, and two edges
/// with the same source, handle and target collide on their default id.
pub fn check_unique_edge_ids(edges: &[GraphEdge]) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for edge in edges {
        if !seen.insert(edge.id.as_str()) {
            return Err(WorkflowError::GraphBuildError(format!(
                "Duplicate edge id: {}",
                edge.id
            )));
        }
    }
    Ok(())
}

/// DAG check. On failure every node that sits on a cycle is reported, sorted.
pub fn check_acyclic(nodes: &[GraphNode], edges: &[GraphEdge]) -> Result<(), WorkflowError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, _> = nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();
    for edge in edges {
        if let (Some(&s), Some(&t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
            graph.add_edge(s, t, ());
        }
    }

    if !petgraph::algo::is_cyclic_directed(&graph) {
        return Ok(());
    }

    let mut cyclic: Vec<String> = petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(|idx| graph[idx].to_string())
        .collect();
    cyclic.sort();
    Err(WorkflowError::CyclicDependency { nodes: cyclic })
}
