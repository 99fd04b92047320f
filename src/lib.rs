/// Convoflow: conversational flow execution engine
///
/// Runs visually authored chat flows (triggers, messages, HTTP calls,
/// variables, branches, delays and human takeover) against a conversation,
/// with durable delays that survive restarts.

// Configuration and environment overrides
pub mod config;

// Engine error types
pub mod error;

// Flow definitions - graph types, validation, version storage and the active registry
pub mod flow;

// Runtime - templates, conditions, node handlers, graph runner, dispatcher, scheduler
pub mod runtime;

// Persistence contracts and their in-memory and SQLite adapters
pub mod store;

// Service wiring and process entry
pub mod service;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use error::FlowError;
pub use flow::{Edge, FlowGraph, FlowRegistry, Node, NodeType};
pub use runtime::{
    ErrorPolicy, ExecutionContext, FlowDispatcher, FlowEngine, FlowEvent, FlowRun, NodeExecutor,
    SuspendRequest, SuspendSink,
};
pub use service::{create_service, start_service, FlowService};
