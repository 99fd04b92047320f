/// Node field schema and graph validation
///
/// Mirrors the editor's palette: each node type declares its fields, their
/// defaults and which ones the runtime cannot do without. Validation runs when
/// a flow version is activated and reports issues instead of failing the
/// whole graph, unless the registry is in strict mode.

use crate::flow::{
    index::GraphIndex,
    types::{FlowGraph, Node, NodeType},
};
use crate::runtime::{
    condition::{parse_conditions, ConditionOp},
    template::is_blank,
};
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Description of a single config field
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    /// Whether the runtime refuses to run the node without it
    pub required: bool,
    /// Default used when the editor creates the node
    pub default: FieldDefault,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    None,
    Text(&'static str),
    Number(i64),
}

impl FieldDefault {
    fn to_value(self) -> Option<Value> {
        match self {
            FieldDefault::None => None,
            FieldDefault::Text(text) => Some(json!(text)),
            FieldDefault::Number(n) => Some(json!(n)),
        }
    }
}

const fn field(key: &'static str, required: bool, default: FieldDefault) -> FieldSpec {
    FieldSpec { key, required, default }
}

const NEW_MESSAGE_FIELDS: &[FieldSpec] = &[
    field("matchMode", false, FieldDefault::Text("any")),
    field("keywords", false, FieldDefault::None),
    field("regex", false, FieldDefault::None),
];

const SCHEDULED_FIELDS: &[FieldSpec] = &[
    field("scheduleType", false, FieldDefault::Text("once")),
    field("dateTime", false, FieldDefault::None),
    field("cron", false, FieldDefault::None),
];

const SEND_MESSAGE_FIELDS: &[FieldSpec] = &[
    field("type", false, FieldDefault::Text("text")),
    field("text", true, FieldDefault::Text("Hello {{contact.name}}!")),
];

const API_REQUEST_FIELDS: &[FieldSpec] = &[
    field("method", false, FieldDefault::Text("GET")),
    field("url", true, FieldDefault::None),
    field("headers", false, FieldDefault::None),
    field("query", false, FieldDefault::None),
    field("body", false, FieldDefault::None),
    field("mapResponse", false, FieldDefault::None),
    field("timeoutMs", false, FieldDefault::Number(15_000)),
];

const SET_VARIABLE_FIELDS: &[FieldSpec] = &[
    field("scope", false, FieldDefault::Text("contact")),
    field("name", true, FieldDefault::None),
    field("value", false, FieldDefault::None),
];

const BRANCH_FIELDS: &[FieldSpec] = &[
    field("mode", false, FieldDefault::Text("ALL")),
    field("conditions", true, FieldDefault::Text("contact.name EXISTS")),
];

const DELAY_FIELDS: &[FieldSpec] = &[
    field("ms", true, FieldDefault::Number(5)),
    field("unit", false, FieldDefault::Text("minutes")),
];

/// Field schema for a node type; unknown types have none
pub fn fields_for(node_type: &NodeType) -> &'static [FieldSpec] {
    match node_type {
        NodeType::NewMessageTrigger => NEW_MESSAGE_FIELDS,
        NodeType::ScheduledTrigger => SCHEDULED_FIELDS,
        NodeType::SendMessage => SEND_MESSAGE_FIELDS,
        NodeType::ApiRequest => API_REQUEST_FIELDS,
        NodeType::SetVariable => SET_VARIABLE_FIELDS,
        NodeType::Branch => BRANCH_FIELDS,
        NodeType::Delay => DELAY_FIELDS,
        NodeType::HumanTakeover | NodeType::Unknown(_) => &[],
    }
}

/// Config a freshly dropped node starts with
pub fn default_config_for(node_type: &NodeType) -> Map<String, Value> {
    fields_for(node_type)
        .iter()
        .filter_map(|spec| spec.default.to_value().map(|value| (spec.key.to_string(), value)))
        .collect()
}

/// First required field the node is missing, if any
///
/// A field counts as missing when absent, null, blank text or an empty list.
pub fn missing_required_field(node: &Node) -> Option<&'static str> {
    fields_for(&node.node_type)
        .iter()
        .filter(|spec| spec.required)
        .find(|spec| is_blank(node.field(spec.key)))
        .map(|spec| spec.key)
}

/// Problems found in an authored graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphIssue {
    #[error("graph has no start node")]
    NoStartNode,

    #[error("node id '{0}' is declared more than once")]
    DuplicateNode(String),

    #[error("node '{node_id}' has unknown type '{type_name}'")]
    UnknownNodeType { node_id: String, type_name: String },

    #[error("node '{node_id}' is missing required field '{field}'")]
    MissingField { node_id: String, field: String },

    #[error("node '{node_id}' uses unknown condition operator '{op}'")]
    UnknownOperator { node_id: String, op: String },

    #[error("edge '{from}' -> '{to}' references a missing node")]
    DanglingEdge { from: String, to: String },

    #[error("nodes {0:?} form a cycle")]
    Cycle(Vec<String>),
}

/// Inspect a graph and list every issue found, in a stable order
pub fn validate_graph(graph: &FlowGraph) -> Vec<GraphIssue> {
    let mut issues = Vec::new();
    let index = GraphIndex::build(graph);

    if !graph.nodes.is_empty() && index.start_nodes().is_empty() {
        issues.push(GraphIssue::NoStartNode);
    }

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            issues.push(GraphIssue::DuplicateNode(node.id.clone()));
        }
    }

    for node in &graph.nodes {
        issues.extend(validate_node(node));
    }

    for edge in index.dangling_edges() {
        issues.push(GraphIssue::DanglingEdge {
            from: edge.source.clone(),
            to: edge.target.clone(),
        });
    }

    issues.extend(find_cycles(graph));
    issues
}

/// Node-level checks: type, required fields and branch operators
pub fn validate_node(node: &Node) -> Vec<GraphIssue> {
    let mut issues = Vec::new();
    if let NodeType::Unknown(type_name) = &node.node_type {
        issues.push(GraphIssue::UnknownNodeType {
            node_id: node.id.clone(),
            type_name: type_name.clone(),
        });
        return issues;
    }

    if let Some(field) = missing_required_field(node) {
        issues.push(GraphIssue::MissingField {
            node_id: node.id.clone(),
            field: field.to_string(),
        });
    }

    if node.node_type == NodeType::Branch {
        for condition in parse_conditions(node.field("conditions")) {
            if condition.op.parse::<ConditionOp>().is_err() {
                issues.push(GraphIssue::UnknownOperator {
                    node_id: node.id.clone(),
                    op: condition.op.clone(),
                });
            }
        }
    }
    issues
}

/// Cycles make a traversal loop until the step limit; report each one
fn find_cycles(graph: &FlowGraph) -> Vec<GraphIssue> {
    let mut dag: DiGraph<&str, ()> = DiGraph::new();
    let mut indices = HashMap::new();
    for node in &graph.nodes {
        indices
            .entry(node.id.as_str())
            .or_insert_with(|| dag.add_node(node.id.as_str()));
    }

    let mut self_loops = Vec::new();
    for edge in &graph.edges {
        if let (Some(&from), Some(&to)) = (indices.get(edge.source.as_str()), indices.get(edge.target.as_str())) {
            if from == to {
                self_loops.push(edge.source.clone());
            }
            dag.add_edge(from, to, ());
        }
    }

    let mut cycles: Vec<GraphIssue> = tarjan_scc(&dag)
        .into_iter()
        .filter(|component| component.len() > 1)
        .map(|component| {
            let mut ids: Vec<String> = component.iter().map(|&i| dag[i].to_string()).collect();
            ids.sort();
            GraphIssue::Cycle(ids)
        })
        .collect();

    self_loops.sort();
    self_loops.dedup();
    cycles.extend(self_loops.into_iter().map(|id| GraphIssue::Cycle(vec![id])));
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::Edge;

    #[test]
    fn default_configs_follow_palette() {
        let delay = default_config_for(&NodeType::Delay);
        assert_eq!(delay.get("ms"), Some(&json!(5)));
        assert_eq!(delay.get("unit"), Some(&json!("minutes")));

        let api = default_config_for(&NodeType::ApiRequest);
        assert_eq!(api.get("method"), Some(&json!("GET")));
        assert_eq!(api.get("timeoutMs"), Some(&json!(15000)));
        assert!(api.get("url").is_none());

        assert!(default_config_for(&NodeType::HumanTakeover).is_empty());
    }

    #[test]
    fn defaults_satisfy_required_fields_except_open_ones() {
        let send = Node {
            config: default_config_for(&NodeType::SendMessage),
            ..Node::new("s", NodeType::SendMessage)
        };
        assert_eq!(missing_required_field(&send), None);

        let api = Node {
            config: default_config_for(&NodeType::ApiRequest),
            ..Node::new("a", NodeType::ApiRequest)
        };
        assert_eq!(missing_required_field(&api), Some("url"));
    }

    #[test]
    fn blank_text_counts_as_missing() {
        let node = Node::new("s", NodeType::SendMessage).with("text", "   ");
        assert_eq!(missing_required_field(&node), Some("text"));
    }

    #[test]
    fn reports_each_issue_kind() {
        let graph = FlowGraph {
            nodes: vec![
                Node::new("t", NodeType::NewMessageTrigger),
                Node::new("t", NodeType::NewMessageTrigger),
                Node::new("x", NodeType::from("action:teleport")),
                Node::new("b", NodeType::Branch).with("conditions", "vars.a LT 3"),
                Node::new("s", NodeType::SendMessage),
            ],
            edges: vec![
                Edge::new("t", "b"),
                Edge::with_handle("b", "ghost", "true"),
            ],
        };

        let issues = validate_graph(&graph);
        assert!(issues.contains(&GraphIssue::DuplicateNode("t".into())));
        assert!(issues.contains(&GraphIssue::UnknownNodeType {
            node_id: "x".into(),
            type_name: "action:teleport".into()
        }));
        assert!(issues.contains(&GraphIssue::UnknownOperator {
            node_id: "b".into(),
            op: "LT".into()
        }));
        assert!(issues.contains(&GraphIssue::MissingField {
            node_id: "s".into(),
            field: "text".into()
        }));
        assert!(issues.contains(&GraphIssue::DanglingEdge {
            from: "b".into(),
            to: "ghost".into()
        }));
    }

    #[test]
    fn detects_cycles_and_missing_start() {
        let graph = FlowGraph {
            nodes: vec![
                Node::new("a", NodeType::SetVariable).with("name", "x"),
                Node::new("b", NodeType::SetVariable).with("name", "y"),
            ],
            edges: vec![Edge::new("a", "b"), Edge::new("b", "a")],
        };
        let issues = validate_graph(&graph);
        assert_eq!(
            issues,
            vec![
                GraphIssue::NoStartNode,
                GraphIssue::Cycle(vec!["a".into(), "b".into()]),
            ]
        );
    }

    #[test]
    fn clean_graph_has_no_issues() {
        let graph = FlowGraph {
            nodes: vec![
                Node::new("t", NodeType::NewMessageTrigger),
                Node::new("s", NodeType::SendMessage).with("text", "hi"),
            ],
            edges: vec![Edge::new("t", "s")],
        };
        assert!(validate_graph(&graph).is_empty());
    }
}
