/// Flow definition layer
///
/// Graph types as authored in the editor, adjacency indexing, node schema and
/// validation, version storage and the hot-reload registry of active flows.

pub mod index;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod types;

pub use index::GraphIndex;
pub use registry::{ActiveFlow, FlowRegistry};
pub use schema::GraphIssue;
pub use storage::FlowStorage;
pub use types::{Edge, FlowGraph, Node, NodeType};
