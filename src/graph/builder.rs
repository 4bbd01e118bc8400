use std::collections::{HashMap, HashSet, VecDeque};

use crate::dsl::{
    ConversationVariable, EnvironmentVariable, NodeSchema, WorkflowSchema, DEFAULT_SOURCE_HANDLE,
};
use crate::error::WorkflowError;

use super::types::*;
use super::validator;

/// Immutable workflow graph with edges pre-indexed by source and target.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    node_index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    /// node id → indices into `edges`, declaration order
    out_edges: HashMap<String, Vec<usize>>,
    in_edges: HashMap<String, Vec<usize>>,
    root_node_id: String,
    environment_variables: Vec<EnvironmentVariable>,
    conversation_variables: Vec<ConversationVariable>,
}

impl Graph {
    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.node_index.get(node_id).map(|&i| &self.nodes[i])
    }

    pub fn get_node(&self, node_id: &str) -> Result<&GraphNode, WorkflowError> {
        self.node(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_index.contains_key(node_id)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Outgoing edges of `node_id` in declaration order.
    pub fn get_outgoing_edges(&self, node_id: &str) -> Vec<&GraphEdge> {
        self.out_edges
            .get(node_id)
            .map(|idx| idx.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Incoming edges of `node_id` in declaration order.
    pub fn get_incoming_edges(&self, node_id: &str) -> Vec<&GraphEdge> {
        self.in_edges
            .get(node_id)
            .map(|idx| idx.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    pub fn in_degree(&self, node_id: &str) -> usize {
        self.in_edges.get(node_id).map(Vec::len).unwrap_or(0)
    }

    pub fn root_node_id(&self) -> &str {
        &self.root_node_id
    }

    pub fn root_node(&self) -> &GraphNode {
        // the root always survives pruning
        &self.nodes[self.node_index[&self.root_node_id]]
    }

    /// First outgoing handle of `node_id` that is not the default one.
    pub fn first_branch_handle(&self, node_id: &str) -> Option<&str> {
        self.get_outgoing_edges(node_id)
            .into_iter()
            .map(|e| e.source_handle.as_str())
            .find(|h| *h != DEFAULT_SOURCE_HANDLE)
    }

    pub fn environment_variables(&self) -> &[EnvironmentVariable] {
        &self.environment_variables
    }

    pub fn conversation_variables(&self) -> &[ConversationVariable] {
        &self.conversation_variables
    }
}

/// Build an immutable [`Graph`] from a parsed workflow definition.
///
/// Structural problems (duplicate ids, dangling edges, missing root, cycles)
/// are reported here, before anything runs. Nodes that cannot be reached
/// from the root are dropped.
pub fn build_graph(schema: &WorkflowSchema) -> Result<Graph, WorkflowError> {
    validator::validate_structure(schema)?;

    let root_node_id = select_root(schema)?;

    let mut edges: Vec<GraphEdge> = schema
        .edges
        .iter()
        .map(|e| {
            let handle = e
                .source_handle
                .clone()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE_HANDLE.to_string());
            GraphEdge {
                id: e
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| default_edge_id(&e.source, &handle, &e.target)),
                source: e.source.clone(),
                target: e.target.clone(),
                source_handle: handle,
                target_handle: e.target_handle.clone(),
            }
        })
        .collect();
    validator::check_unique_edge_ids(&edges)?;

    // drop everything the root cannot reach
    let reachable = reachable_from(&root_node_id, &edges);
    let mut nodes = Vec::with_capacity(reachable.len());
    for node in &schema.nodes {
        if reachable.contains(node.id.as_str()) {
            nodes.push(to_graph_node(node));
        } else {
            tracing::debug!(node_id = %node.id, "Dropping node unreachable from root");
        }
    }
    edges.retain(|e| reachable.contains(e.source.as_str()));

    validator::check_acyclic(&nodes, &edges)?;

    let node_index = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();
    let mut out_edges: HashMap<String, Vec<usize>> = HashMap::new();
    let mut in_edges: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, edge) in edges.iter().enumerate() {
        out_edges.entry(edge.source.clone()).or_default().push(i);
        in_edges.entry(edge.target.clone()).or_default().push(i);
    }

    Ok(Graph {
        nodes,
        node_index,
        edges,
        out_edges,
        in_edges,
        root_node_id,
        environment_variables: schema.environment_variables.clone(),
        conversation_variables: schema.conversation_variables.clone(),
    })
}

fn to_graph_node(node: &NodeSchema) -> GraphNode {
    GraphNode {
        id: node.id.clone(),
        node_type: node.data.node_type,
        config: node.data.config(),
        title: if node.data.title.is_empty() {
            node.id.clone()
        } else {
            node.data.title.clone()
        },
        error_strategy: node.data.error_strategy.unwrap_or_default(),
        default_value: node.data.default_value.clone().unwrap_or_default(),
        retry_config: node.data.retry_config.clone(),
    }
}

/// Explicit root id, else the unique root-type node without incoming edges.
fn select_root(schema: &WorkflowSchema) -> Result<String, WorkflowError> {
    if let Some(root) = &schema.root_node_id {
        if !schema.nodes.iter().any(|n| &n.id == root) {
            return Err(WorkflowError::GraphBuildError(format!(
                "Root node not found: {}",
                root
            )));
        }
        return Ok(root.clone());
    }

    let targets: HashSet<&str> = schema.edges.iter().map(|e| e.target.as_str()).collect();
    let candidates: Vec<&str> = schema
        .nodes
        .iter()
        .filter(|n| n.data.node_type.is_root() && !targets.contains(n.id.as_str()))
        .map(|n| n.id.as_str())
        .collect();

    match candidates.as_slice() {
        [] => Err(WorkflowError::NoStartNode),
        [root] => Ok(root.to_string()),
        many => Err(WorkflowError::GraphBuildError(format!(
            "Multiple root nodes: {}",
            many.join(", ")
        ))),
    }
}

fn reachable_from(root: &str, edges: &[GraphEdge]) -> HashSet<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        adjacency
            .entry(e.source.as_str())
            .or_default()
            .push(e.target.as_str());
    }
    let mut seen = HashSet::from([root.to_string()]);
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        for &next in adjacency.get(id).into_iter().flatten() {
            if seen.insert(next.to_string()) {
                queue.push_back(next);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{parse_dsl, DslFormat, NodeType};

    fn build(yaml: &str) -> Result<Graph, WorkflowError> {
        build_graph(&parse_dsl(yaml, DslFormat::Yaml).unwrap())
    }

    const DIAMOND: &str = r#"
nodes:
  - id: a
    data: { type: start }
  - id: b
    data: { type: template-transform, template: "b" }
  - id: c
    data: { type: template-transform, template: "c" }
  - id: d
    data: { type: end }
edges:
  - { source: a, target: b }
  - { source: a, target: c }
  - { source: b, target: d }
  - { id: custom, source: c, target: d }
"#;

    #[test]
    fn test_adjacency_is_indexed_in_declaration_order() {
        let g = build(DIAMOND).unwrap();
        assert_eq!(g.root_node_id(), "a");
        assert_eq!(g.root_node().node_type, NodeType::Start);
        let out: Vec<_> = g.get_outgoing_edges("a").iter().map(|e| e.target.clone()).collect();
        assert_eq!(out, vec!["b", "c"]);
        let incoming = g.get_incoming_edges("d");
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[0].id, "b-source-d");
        assert_eq!(incoming[1].id, "custom");
        assert_eq!(g.in_degree("a"), 0);
        assert!(g.get_outgoing_edges("missing").is_empty());
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let yaml = r#"
nodes:
  - id: a
    data: { type: start }
edges:
  - { source: a, target: ghost }
"#;
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, WorkflowError::GraphBuildError(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let yaml = r#"
nodes:
  - id: a
    data: { type: start }
  - id: a
    data: { type: end }
"#;
        assert!(matches!(build(yaml), Err(WorkflowError::GraphBuildError(_))));
    }

    #[test]
    fn test_repeated_edge_rejected() {
        let yaml = r#"
nodes:
  - id: start
    data: { type: start }
  - id: a
    data: { type: template-transform, template: "a" }
  - id: end
    data: { type: end }
edges:
  - { source: start, target: a }
  - { source: start, target: a }
  - { source: a, target: end }
"#;
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, WorkflowError::GraphBuildError(_)));
        assert!(err.to_string().contains("start-source-a"));

        let explicit = r#"
nodes:
  - id: start
    data: { type: start }
  - id: a
    data: { type: end }
  - id: b
    data: { type: end }
edges:
  - { id: e1, source: start, target: a }
  - { id: e1, source: start, target: b }
"#;
        assert!(matches!(build(explicit), Err(WorkflowError::GraphBuildError(_))));
    }

    #[test]
    fn test_missing_root_rejected() {
        let yaml = r#"
nodes:
  - id: e
    data: { type: end }
"#;
        assert!(matches!(build(yaml), Err(WorkflowError::NoStartNode)));
    }

    #[test]
    fn test_unreachable_nodes_pruned() {
        let yaml = r#"
nodes:
  - id: s
    data: { type: start }
  - id: e
    data: { type: end }
  - id: orphan
    data: { type: answer, answer: "x" }
  - id: orphan_child
    data: { type: end }
edges:
  - { source: s, target: e }
  - { source: orphan, target: orphan_child }
"#;
        let g = build(yaml).unwrap();
        assert_eq!(g.node_count(), 2);
        assert!(!g.contains("orphan"));
        assert_eq!(g.edges().len(), 1);
    }

    #[test]
    fn test_cycle_rejected() {
        let yaml = r#"
nodes:
  - id: s
    data: { type: start }
  - id: x
    data: { type: answer, answer: "x" }
  - id: y
    data: { type: answer, answer: "y" }
edges:
  - { source: s, target: x }
  - { source: x, target: y }
  - { source: y, target: x }
"#;
        match build(yaml) {
            Err(WorkflowError::CyclicDependency { nodes }) => assert_eq!(nodes, vec!["x", "y"]),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_first_branch_handle() {
        let yaml = r#"
nodes:
  - id: s
    data: { type: start }
  - id: h
    data: { type: human-input }
  - id: ok
    data: { type: end }
  - id: no
    data: { type: end }
edges:
  - { source: s, target: h }
  - { source: h, target: ok, sourceHandle: approve }
  - { source: h, target: no, sourceHandle: reject }
"#;
        let g = build(yaml).unwrap();
        assert_eq!(g.first_branch_handle("h"), Some("approve"));
        assert_eq!(g.first_branch_handle("s"), None);
    }
}
