/// Core flow graph type definitions
///
/// Defines the authored graph: nodes, edges and the closed set of node types.
/// Graphs arrive as JSON from the flow editor, either with a flat `config`
/// object per node or with the editor's `data.config` nesting; both shapes
/// deserialize into the same `Node`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Handle emitted by every pass-through node
pub const HANDLE_OUT: &str = "out";
/// Handle emitted by a branch whose conditions hold
pub const HANDLE_TRUE: &str = "true";
/// Handle emitted by a branch whose conditions do not hold
pub const HANDLE_FALSE: &str = "false";

/// A complete flow definition: the immutable snapshot a traversal walks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    /// Nodes keyed by their unique id
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Ordered list of transitions; order decides ties during edge selection
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    /// Parse a graph from the editor's JSON document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Find a node by id with a linear scan (use `GraphIndex` for repeated lookups)
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

/// A single step in the flow
///
/// `config` holds the node's authored fields; strings may contain `{{path}}`
/// placeholders that are resolved against the execution context at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "NodeRepr")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub config: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            config: Map::new(),
        }
    }

    /// Builder-style config setter, mostly used when assembling graphs in code
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    /// Raw config value for a field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Config field as a string slice, ignoring non-string values
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Wire shape accepted for nodes: flat `config` or editor `data.config`
#[derive(Deserialize)]
struct NodeRepr {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    config: Option<Map<String, Value>>,
    #[serde(default)]
    data: Option<NodeData>,
}

#[derive(Deserialize)]
struct NodeData {
    #[serde(default)]
    config: Option<Map<String, Value>>,
}

impl From<NodeRepr> for Node {
    fn from(repr: NodeRepr) -> Self {
        let config = repr
            .config
            .or_else(|| repr.data.and_then(|data| data.config))
            .unwrap_or_default();
        Self {
            id: repr.id,
            node_type: repr.node_type,
            config,
        }
    }
}

/// Directed transition between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    /// Outcome label on the source node this edge is attached to ("true", "false", "out")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Edge {
    /// Unlabeled edge, taken by the default `out` handle
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle: None,
        }
    }

    /// Edge attached to a specific outcome handle
    pub fn with_handle(
        source: impl Into<String>,
        target: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            source_handle: Some(handle.into()),
            ..Self::new(source, target)
        }
    }
}

/// Closed set of node kinds the engine knows how to run
///
/// Serialized as the editor's namespaced strings (`trigger:newMessage`,
/// `action:sendMessage`, ...). Anything else lands in `Unknown` with the
/// original string preserved so it can be reported and round-tripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// Entry point fired by an inbound chat message
    NewMessageTrigger,
    /// Entry point fired by a schedule (one-off date or cron)
    ScheduledTrigger,
    /// Appends an outgoing message to the conversation
    SendMessage,
    /// Calls an external HTTP API and maps the response into the context
    ApiRequest,
    /// Writes a templated value into `contact` or `vars`
    SetVariable,
    /// Evaluates conditions and emits `true` or `false`
    Branch,
    /// Suspends the traversal until a computed time
    Delay,
    /// Hands the conversation over to a human agent
    HumanTakeover,
    /// Unrecognized type string
    Unknown(String),
}

impl NodeType {
    /// Every known node type, in editor palette order
    pub const KNOWN: [NodeType; 8] = [
        NodeType::NewMessageTrigger,
        NodeType::ScheduledTrigger,
        NodeType::SendMessage,
        NodeType::ApiRequest,
        NodeType::SetVariable,
        NodeType::Branch,
        NodeType::Delay,
        NodeType::HumanTakeover,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            NodeType::NewMessageTrigger => "trigger:newMessage",
            NodeType::ScheduledTrigger => "trigger:scheduled",
            NodeType::SendMessage => "action:sendMessage",
            NodeType::ApiRequest => "action:apiRequest",
            NodeType::SetVariable => "action:setVariable",
            NodeType::Branch => "logic:branch",
            NodeType::Delay => "logic:delay",
            NodeType::HumanTakeover => "logic:humanTakeover",
            NodeType::Unknown(raw) => raw,
        }
    }
}

impl From<String> for NodeType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "trigger:newMessage" => NodeType::NewMessageTrigger,
            "trigger:scheduled" => NodeType::ScheduledTrigger,
            "action:sendMessage" => NodeType::SendMessage,
            "action:apiRequest" => NodeType::ApiRequest,
            "action:setVariable" => NodeType::SetVariable,
            "logic:branch" => NodeType::Branch,
            "logic:delay" => NodeType::Delay,
            "logic:humanTakeover" => NodeType::HumanTakeover,
            _ => NodeType::Unknown(raw),
        }
    }
}

impl From<&str> for NodeType {
    fn from(raw: &str) -> Self {
        NodeType::from(raw.to_string())
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_accepts_editor_data_config() {
        let node: Node = serde_json::from_value(json!({
            "id": "n1",
            "type": "action:sendMessage",
            "position": { "x": 10, "y": 20 },
            "data": { "label": "Send", "config": { "text": "hi" } }
        }))
        .unwrap();

        assert_eq!(node.node_type, NodeType::SendMessage);
        assert_eq!(node.str_field("text"), Some("hi"));
    }

    #[test]
    fn flat_config_wins_over_data_config() {
        let node: Node = serde_json::from_value(json!({
            "id": "n1",
            "type": "logic:delay",
            "config": { "ms": 1 },
            "data": { "config": { "ms": 2 } }
        }))
        .unwrap();

        assert_eq!(node.field("ms"), Some(&json!(1)));
    }

    #[test]
    fn unknown_type_round_trips() {
        let node: Node = serde_json::from_value(json!({ "id": "x", "type": "action:teleport" })).unwrap();
        assert_eq!(node.node_type, NodeType::Unknown("action:teleport".into()));
        assert!(node.config.is_empty());

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["type"], "action:teleport");
    }

    #[test]
    fn edge_uses_camel_case_handle() {
        let edge: Edge = serde_json::from_value(json!({
            "id": "e1", "source": "a", "target": "b", "sourceHandle": "true"
        }))
        .unwrap();
        assert_eq!(edge.source_handle.as_deref(), Some("true"));

        let edge: Edge = serde_json::from_value(json!({
            "source": "a", "target": "b", "sourceHandle": null
        }))
        .unwrap();
        assert_eq!(edge, Edge::new("a", "b"));
    }

    #[test]
    fn graph_defaults_missing_lists() {
        let graph = FlowGraph::from_json("{}").unwrap();
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn known_types_round_trip_through_strings() {
        for node_type in NodeType::KNOWN.iter() {
            let raw: String = node_type.clone().into();
            assert_eq!(&NodeType::from(raw), node_type);
        }
    }
}
