//! Automatic graph construction from a flat list of node declarations.
//!
//! Dependencies come from explicit `depends_on` lists and from
//! `{{#node_id.field#}}` references found anywhere in a node's config.
//! Branch edges come from if-else `true_branch` / `false_branch` and
//! question-classifier `classes[].target`. The builder inserts `start` and
//! `end` nodes and returns a [`WorkflowSchema`] ready for
//! [`build_graph`](super::build_graph).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dsl::{
    EdgeSchema, NodeSchema, NodeType, OutputVariable, StartVariable, WorkflowSchema,
    CURRENT_DSL_VERSION, DEFAULT_SOURCE_HANDLE,
};
use crate::error::WorkflowError;
use crate::template::extract_node_references;

pub const AUTO_START_ID: &str = "start";
pub const AUTO_END_ID: &str = "end";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDeclaration {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl NodeDeclaration {
    pub fn new(id: impl Into<String>, node_type: NodeType, config: Value) -> Self {
        NodeDeclaration {
            id: id.into(),
            node_type,
            title: None,
            config,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeDeclaration>,
    inputs: Vec<StartVariable>,
    outputs: Vec<OutputVariable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Link {
    source: String,
    target: String,
    handle: String,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, decl: NodeDeclaration) -> Self {
        self.nodes.push(decl);
        self
    }

    pub fn nodes(mut self, decls: impl IntoIterator<Item = NodeDeclaration>) -> Self {
        self.nodes.extend(decls);
        self
    }

    /// Input variables declared on the generated start node.
    pub fn inputs(mut self, inputs: Vec<StartVariable>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Outputs declared on the generated end node.
    pub fn outputs(mut self, outputs: Vec<OutputVariable>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn build(self) -> Result<WorkflowSchema, WorkflowError> {
        let declared = self.check_ids()?;
        let mut links = self.collect_links(&declared)?;
        let order = topological_order(&self.nodes, &links)?;

        let has_incoming: HashSet<&str> = links.iter().map(|l| l.target.as_str()).collect();
        let has_outgoing: HashSet<&str> = links.iter().map(|l| l.source.as_str()).collect();
        let mut boundary = Vec::new();
        for id in &order {
            if !has_incoming.contains(id.as_str()) {
                boundary.push(link(AUTO_START_ID, id, DEFAULT_SOURCE_HANDLE));
            }
            if !has_outgoing.contains(id.as_str()) {
                boundary.push(link(id, AUTO_END_ID, DEFAULT_SOURCE_HANDLE));
            }
        }
        if order.is_empty() {
            boundary.push(link(AUTO_START_ID, AUTO_END_ID, DEFAULT_SOURCE_HANDLE));
        }
        links.extend(boundary);

        let by_id: HashMap<&str, &NodeDeclaration> =
            self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut nodes = Vec::with_capacity(order.len() + 2);
        nodes.push(node_schema(
            AUTO_START_ID,
            NodeType::Start,
            "Start",
            json!({ "variables": self.inputs }),
        )?);
        for id in &order {
            let decl = by_id[id.as_str()];
            let title = decl.title.clone().unwrap_or_else(|| decl.id.clone());
            nodes.push(node_schema(&decl.id, decl.node_type, &title, decl.config.clone())?);
        }
        nodes.push(node_schema(
            AUTO_END_ID,
            NodeType::End,
            "End",
            json!({ "outputs": self.outputs }),
        )?);

        let edges = links
            .into_iter()
            .map(|l| EdgeSchema {
                id: None,
                source: l.source,
                target: l.target,
                source_handle: Some(l.handle),
                target_handle: None,
            })
            .collect();

        Ok(WorkflowSchema {
            version: CURRENT_DSL_VERSION.to_string(),
            nodes,
            edges,
            root_node_id: Some(AUTO_START_ID.to_string()),
            environment_variables: Vec::new(),
            conversation_variables: Vec::new(),
        })
    }

    fn check_ids(&self) -> Result<HashSet<&str>, WorkflowError> {
        let mut declared = HashSet::new();
        for decl in &self.nodes {
            if decl.id.is_empty() {
                return Err(WorkflowError::GraphBuildError(
                    "Node declaration with empty id".into(),
                ));
            }
            if decl.id == AUTO_START_ID || decl.id == AUTO_END_ID {
                return Err(WorkflowError::GraphBuildError(format!(
                    "Node id '{}' is reserved",
                    decl.id
                )));
            }
            if !declared.insert(decl.id.as_str()) {
                return Err(WorkflowError::GraphBuildError(format!(
                    "Duplicate node id: {}",
                    decl.id
                )));
            }
        }
        Ok(declared)
    }

    /// Dependency and branch links, in declaration order, without duplicates.
    fn collect_links(&self, declared: &HashSet<&str>) -> Result<Vec<Link>, WorkflowError> {
        let mut branch_links = Vec::new();
        for decl in &self.nodes {
            for (target, handle) in branch_targets(decl) {
                if !declared.contains(target.as_str()) {
                    return Err(WorkflowError::GraphBuildError(format!(
                        "Branch target of '{}' not declared: {}",
                        decl.id, target
                    )));
                }
                branch_links.push(Link {
                    source: decl.id.clone(),
                    target,
                    handle,
                });
            }
        }
        let branch_pairs: HashSet<(&str, &str)> = branch_links
            .iter()
            .map(|l| (l.source.as_str(), l.target.as_str()))
            .collect();

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for decl in &self.nodes {
            for dep in &decl.depends_on {
                if !declared.contains(dep.as_str()) {
                    return Err(WorkflowError::GraphBuildError(format!(
                        "Node '{}' depends on undeclared node '{}'",
                        decl.id, dep
                    )));
                }
            }
            let inferred = extract_node_references(&decl.config)
                .into_iter()
                .filter(|id| declared.contains(id.as_str()));
            for dep in decl.depends_on.iter().cloned().chain(inferred) {
                // a branch edge already orders the pair
                if branch_pairs.contains(&(dep.as_str(), decl.id.as_str())) {
                    continue;
                }
                let l = link(&dep, &decl.id, DEFAULT_SOURCE_HANDLE);
                if seen.insert(l.clone()) {
                    links.push(l);
                }
            }
        }
        for l in branch_links {
            if seen.insert(l.clone()) {
                links.push(l);
            }
        }
        Ok(links)
    }
}

fn link(source: &str, target: &str, handle: &str) -> Link {
    Link {
        source: source.to_string(),
        target: target.to_string(),
        handle: handle.to_string(),
    }
}

/// `(target, handle)` pairs declared inside a branching node's config.
fn branch_targets(decl: &NodeDeclaration) -> Vec<(String, String)> {
    let cfg = &decl.config;
    let target_of = |key: &str| cfg.get(key).and_then(Value::as_str).map(str::to_string);
    match decl.node_type {
        NodeType::IfElse => {
            let true_handle = cfg
                .get("cases")
                .and_then(Value::as_array)
                .and_then(|cases| cases.first())
                .and_then(|c| c.get("case_id"))
                .and_then(Value::as_str)
                .unwrap_or("true")
                .to_string();
            let mut out = Vec::new();
            if let Some(t) = target_of("true_branch") {
                out.push((t, true_handle));
            }
            if let Some(f) = target_of("false_branch") {
                out.push((f, "false".to_string()));
            }
            out
        }
        NodeType::QuestionClassifier => cfg
            .get("classes")
            .and_then(Value::as_array)
            .map(|classes| {
                classes
                    .iter()
                    .filter_map(|c| {
                        let id = c.get("id")?.as_str()?;
                        let target = c.get("target")?.as_str()?;
                        Some((target.to_string(), id.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Kahn's algorithm; ties broken by declaration order.
fn topological_order(
    nodes: &[NodeDeclaration],
    links: &[Link],
) -> Result<Vec<String>, WorkflowError> {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut pairs = HashSet::new();
    for l in links {
        if pairs.insert((l.source.as_str(), l.target.as_str())) {
            *in_degree.entry(l.target.as_str()).or_default() += 1;
            successors
                .entry(l.source.as_str())
                .or_default()
                .push(l.target.as_str());
        }
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for &next in successors.get(id).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let done: HashSet<&str> = order.iter().map(String::as_str).collect();
        let remaining: BTreeSet<String> = nodes
            .iter()
            .filter(|n| !done.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        return Err(WorkflowError::CyclicDependency {
            nodes: remaining.into_iter().collect(),
        });
    }
    Ok(order)
}

fn node_schema(
    id: &str,
    node_type: NodeType,
    title: &str,
    config: Value,
) -> Result<NodeSchema, WorkflowError> {
    let mut data = match config {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(WorkflowError::GraphBuildError(format!(
                "Config of '{}' must be an object, got {}",
                id, other
            )))
        }
    };
    data.insert("type".into(), serde_json::to_value(node_type)?);
    data.insert("title".into(), Value::String(title.to_string()));
    serde_json::from_value(json!({ "id": id, "data": data }))
        .map_err(|e| WorkflowError::GraphBuildError(format!("Invalid config of '{}': {}", id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_graph;

    fn tt(id: &str, template: &str) -> NodeDeclaration {
        NodeDeclaration::new(id, NodeType::TemplateTransform, json!({ "template": template }))
    }

    #[test]
    fn test_cycle_yields_error_and_no_output() {
        let result = GraphBuilder::new()
            .node(tt("a", "x").depends_on(["b"]))
            .node(tt("b", "y").depends_on(["a"]))
            .build();
        match result {
            Err(WorkflowError::CyclicDependency { nodes }) => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_inferred_dependencies_and_boundaries() {
        let schema = GraphBuilder::new()
            .node(tt("fetch", "{{#start.query#}}"))
            .node(tt("summarize", "Summary of {{#fetch.output#}}"))
            .build()
            .unwrap();

        let ids: Vec<_> = schema.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["start", "fetch", "summarize", "end"]);
        let pairs: Vec<_> = schema
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert!(pairs.contains(&("fetch", "summarize")));
        assert!(pairs.contains(&("start", "fetch")));
        assert!(pairs.contains(&("summarize", "end")));
        assert!(!pairs.contains(&("start", "summarize")));

        let graph = build_graph(&schema).unwrap();
        assert_eq!(graph.root_node_id(), "start");
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_if_else_branch_edges() {
        let check = NodeDeclaration::new(
            "check",
            NodeType::IfElse,
            json!({
                "cases": [{
                    "case_id": "long",
                    "conditions": [{
                        "variable_selector": ["start", "q"],
                        "comparison_operator": "not_empty"
                    }]
                }],
                "true_branch": "yes",
                "false_branch": "no"
            }),
        );
        let schema = GraphBuilder::new()
            .node(check)
            .node(tt("yes", "y").depends_on(["check"]))
            .node(tt("no", "n"))
            .build()
            .unwrap();
        let branch: Vec<_> = schema
            .edges
            .iter()
            .filter(|e| e.source == "check")
            .map(|e| (e.target.as_str(), e.source_handle.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(branch, vec![("yes", "long"), ("no", "false")]);
        assert!(build_graph(&schema).is_ok());
    }

    #[test]
    fn test_reserved_and_duplicate_ids() {
        assert!(matches!(
            GraphBuilder::new().node(tt("start", "x")).build(),
            Err(WorkflowError::GraphBuildError(_))
        ));
        assert!(matches!(
            GraphBuilder::new().node(tt("a", "x")).node(tt("a", "y")).build(),
            Err(WorkflowError::GraphBuildError(_))
        ));
        assert!(matches!(
            GraphBuilder::new().node(tt("a", "x").depends_on(["ghost"])).build(),
            Err(WorkflowError::GraphBuildError(_))
        ));
    }

    #[test]
    fn test_empty_builder_links_start_to_end() {
        let schema = GraphBuilder::new().build().unwrap();
        assert_eq!(schema.nodes.len(), 2);
        assert_eq!(schema.edges.len(), 1);
    }
}
