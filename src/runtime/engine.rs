/// Flow runner
///
/// Walks a flow graph node by node. Each traversal starts at one node, asks
/// the executor for an outcome, follows the edge selected by the outcome's
/// handle, and stops when no edge matches or a delay suspends it.
///
/// A fresh invocation runs every start node (nodes with no incoming edge) in
/// declaration order against one shared context. A resume invocation runs a
/// single traversal from the node stored in the suspension record.

use crate::{
    error::FlowError,
    flow::{
        index::GraphIndex,
        types::{FlowGraph, NodeType},
    },
    runtime::{
        context::ExecutionContext,
        executor::{NodeExecutor, NodeOutcome},
        suspend::SuspendSink,
    },
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Default cap on steps per traversal; authored cycles hit it instead of spinning forever
pub const DEFAULT_MAX_STEPS: usize = 1_000;

/// What triggered an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// Inbound chat message
    NewMessage { text: String },
    /// Scheduled trigger fired
    Scheduled,
    /// Due suspension record being resumed at `node_id`
    Resume { node_id: String },
}

impl FlowEvent {
    pub fn new_message(text: &str) -> Self {
        FlowEvent::NewMessage {
            text: text.to_string(),
        }
    }

    pub fn resume(node_id: &str) -> Self {
        FlowEvent::Resume {
            node_id: node_id.to_string(),
        }
    }
}

/// Where a traversal ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalStatus {
    /// No outgoing edge matched, or the next node does not exist
    Completed,
    /// A delay handed its request to the sink
    Suspended {
        node_id: String,
        resume_at: DateTime<Utc>,
    },
}

/// One traversal of an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    pub start: String,
    /// Node ids in visiting order, including the one the traversal ended at
    pub path: Vec<String>,
    pub status: TraversalStatus,
}

impl Traversal {
    pub fn is_suspended(&self) -> bool {
        matches!(self.status, TraversalStatus::Suspended { .. })
    }
}

/// Result of an invocation: the final context and every traversal it ran
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRun {
    pub context: ExecutionContext,
    pub traversals: Vec<Traversal>,
}

impl FlowRun {
    pub fn suspended(&self) -> impl Iterator<Item = &Traversal> {
        self.traversals.iter().filter(|t| t.is_suspended())
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended().next().is_some()
    }

    /// Every node visited, traversal after traversal
    pub fn visited(&self) -> Vec<&str> {
        self.traversals
            .iter()
            .flat_map(|t| t.path.iter().map(String::as_str))
            .collect()
    }
}

/// Runner state between steps
enum RunnerState {
    Running(String),
    Suspended { node_id: String, resume_at: DateTime<Utc> },
    Completed,
}

#[derive(Debug)]
pub struct FlowEngine {
    executor: Arc<NodeExecutor>,
    max_steps: usize,
}

impl FlowEngine {
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self {
            executor,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn executor(&self) -> &Arc<NodeExecutor> {
        &self.executor
    }

    /// Run the graph for an event
    ///
    /// `Resume` seeds a single traversal at the stored node; every other event
    /// runs all start nodes. The first handler error aborts the invocation.
    pub async fn execute(
        &self,
        graph: &FlowGraph,
        event: &FlowEvent,
        mut context: ExecutionContext,
        sink: &dyn SuspendSink,
    ) -> Result<FlowRun, FlowError> {
        let traversals = self.execute_in(graph, event, &mut context, sink).await?;
        Ok(FlowRun {
            context,
            traversals,
        })
    }

    /// Like `execute`, on a context owned by the caller
    ///
    /// Mutations made before a failing node remain in `context` when an error
    /// is returned.
    pub async fn execute_in(
        &self,
        graph: &FlowGraph,
        event: &FlowEvent,
        context: &mut ExecutionContext,
        sink: &dyn SuspendSink,
    ) -> Result<Vec<Traversal>, FlowError> {
        let flow_start = std::time::Instant::now();
        let index = GraphIndex::build(graph);
        let mut traversals = Vec::new();

        match event {
            FlowEvent::Resume { node_id } => {
                tracing::info!("▶️ Resuming flow at node '{}'", node_id);
                let traversal = self.run_from(&index, node_id, true, context, sink).await?;
                traversals.push(traversal);
            }
            FlowEvent::NewMessage { .. } | FlowEvent::Scheduled => {
                let starts = index.start_nodes();
                tracing::info!(
                    "🚀 Starting flow ({} nodes, {} edges) from {} start node(s)",
                    graph.nodes.len(),
                    graph.edges.len(),
                    starts.len()
                );
                for start in starts {
                    let traversal = self.run_from(&index, &start.id, false, context, sink).await?;
                    traversals.push(traversal);
                }
            }
        }

        tracing::info!(
            "🎉 Flow invocation finished in {:?} ({} traversals, {} suspended)",
            flow_start.elapsed(),
            traversals.len(),
            traversals.iter().filter(|t| t.is_suspended()).count()
        );
        Ok(traversals)
    }

    /// Shorthand for `execute` with a `Resume` event
    pub async fn resume(
        &self,
        graph: &FlowGraph,
        node_id: &str,
        context: ExecutionContext,
        sink: &dyn SuspendSink,
    ) -> Result<FlowRun, FlowError> {
        self.execute(graph, &FlowEvent::resume(node_id), context, sink).await
    }

    async fn run_from(
        &self,
        index: &GraphIndex<'_>,
        start: &str,
        resuming: bool,
        context: &mut ExecutionContext,
        sink: &dyn SuspendSink,
    ) -> Result<Traversal, FlowError> {
        let policy = self.executor.policy();
        let mut path = Vec::new();
        let mut state = RunnerState::Running(start.to_string());
        let mut skip_delay = resuming;

        while let RunnerState::Running(node_id) = state {
            let Some(node) = index.node(&node_id) else {
                // Only reachable for the seed of a resume; edges are checked before moving
                tracing::warn!("⚠️ Node '{}' not found, traversal completes", node_id);
                state = RunnerState::Completed;
                break;
            };

            if path.len() >= self.max_steps {
                return Err(FlowError::StepLimitExceeded {
                    start: start.to_string(),
                    limit: self.max_steps,
                });
            }
            path.push(node_id.clone());
            tracing::info!("📍 Step {}: node '{}' ({})", path.len(), node.id, node.node_type);

            let outcome = if skip_delay && node.node_type == NodeType::Delay {
                tracing::debug!("⏭️ Delay '{}' already elapsed, continuing", node.id);
                NodeOutcome::out()
            } else {
                self.executor.execute_node(node, context, sink).await?
            };
            skip_delay = false;

            state = match outcome {
                NodeOutcome::Suspend { resume_at } => RunnerState::Suspended {
                    node_id: node.id.clone(),
                    resume_at,
                },
                NodeOutcome::Continue(handle) => match index.select_edge(&node.id, &handle) {
                    None => {
                        tracing::debug!("🏁 No edge for handle '{}' on '{}'", handle, node.id);
                        RunnerState::Completed
                    }
                    Some(edge) if !index.contains(&edge.target) => {
                        if policy.is_strict() {
                            return Err(FlowError::DanglingEdge {
                                from: edge.source.clone(),
                                to: edge.target.clone(),
                            });
                        }
                        tracing::warn!(
                            "⚠️ Edge '{}' -> '{}' points at a missing node, traversal completes",
                            edge.source,
                            edge.target
                        );
                        RunnerState::Completed
                    }
                    Some(edge) => RunnerState::Running(edge.target.clone()),
                },
            };
        }

        let status = match state {
            RunnerState::Suspended { node_id, resume_at } => {
                tracing::info!("⏸️ Traversal from '{}' suspended at '{}'", start, node_id);
                TraversalStatus::Suspended { node_id, resume_at }
            }
            RunnerState::Running(_) | RunnerState::Completed => {
                tracing::info!("✅ Traversal from '{}' completed after {} steps", start, path.len());
                TraversalStatus::Completed
            }
        };

        Ok(Traversal {
            start: start.to_string(),
            path,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{Edge, Node};
    use crate::runtime::{clock::FixedClock, suspend::CollectingSink, ErrorPolicy};
    use crate::store::MemoryConversationStore;
    use serde_json::json;

    fn engine(policy: ErrorPolicy) -> FlowEngine {
        let executor = NodeExecutor::new(
            Arc::new(MemoryConversationStore::new()),
            Arc::new(FixedClock::new(Utc::now())),
        )
        .with_policy(policy);
        FlowEngine::new(Arc::new(executor))
    }

    fn set(id: &str, name: &str, value: &str) -> Node {
        Node::new(id, NodeType::SetVariable).with("name", name).with("value", value)
    }

    #[tokio::test]
    async fn failed_invocations_keep_earlier_mutations() {
        let graph = FlowGraph {
            nodes: vec![
                Node::new("t", NodeType::NewMessageTrigger),
                set("set", "step", "before"),
                Node::new("api", NodeType::ApiRequest).with("url", "not a url"),
                set("after", "step", "after"),
            ],
            edges: vec![Edge::new("t", "set"), Edge::new("set", "api"), Edge::new("api", "after")],
        };
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::for_conversation("5511");

        let err = engine(ErrorPolicy::Permissive)
            .execute_in(&graph, &FlowEvent::new_message("hi"), &mut context, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::InvalidUrl { ref node_id, .. } if node_id == "api"));
        assert_eq!(context.get_path("vars.step"), Some(&json!("before")));
    }

    #[tokio::test]
    async fn resume_skips_the_elapsed_delay() {
        let graph = FlowGraph {
            nodes: vec![
                Node::new("d", NodeType::Delay).with("ms", 1),
                set("after", "done", "yes"),
            ],
            edges: vec![Edge::new("d", "after")],
        };
        let sink = CollectingSink::new();
        let run = engine(ErrorPolicy::Permissive)
            .resume(&graph, "d", ExecutionContext::new(), &sink)
            .await
            .unwrap();

        assert!(sink.requests().is_empty());
        assert_eq!(run.visited(), vec!["d", "after"]);
        assert_eq!(run.context.get_path("vars.done"), Some(&json!("yes")));
    }

    #[tokio::test]
    async fn resume_at_missing_node_completes() {
        let graph = FlowGraph::default();
        let sink = CollectingSink::new();
        let run = engine(ErrorPolicy::Strict)
            .resume(&graph, "gone", ExecutionContext::new(), &sink)
            .await
            .unwrap();
        assert_eq!(run.traversals[0].status, TraversalStatus::Completed);
        assert!(run.traversals[0].path.is_empty());
    }

    #[tokio::test]
    async fn dangling_edge_depends_on_policy() {
        let graph = FlowGraph {
            nodes: vec![set("a", "x", "1")],
            edges: vec![Edge::new("a", "ghost")],
        };
        let sink = CollectingSink::new();

        let run = engine(ErrorPolicy::Permissive)
            .execute(&graph, &FlowEvent::Scheduled, ExecutionContext::new(), &sink)
            .await
            .unwrap();
        assert_eq!(run.visited(), vec!["a"]);
        assert_eq!(run.traversals[0].status, TraversalStatus::Completed);

        let err = engine(ErrorPolicy::Strict)
            .execute(&graph, &FlowEvent::Scheduled, ExecutionContext::new(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::DanglingEdge { .. }));
    }

    #[tokio::test]
    async fn cycles_hit_the_step_limit() {
        let graph = FlowGraph {
            nodes: vec![set("a", "x", "1"), set("b", "y", "2")],
            edges: vec![Edge::new("a", "b"), Edge::new("b", "a")],
        };
        let sink = CollectingSink::new();
        let err = engine(ErrorPolicy::Permissive)
            .with_max_steps(10)
            .resume(&graph, "a", ExecutionContext::new(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::StepLimitExceeded { limit: 10, .. }));
    }

    #[tokio::test]
    async fn later_starts_run_after_an_earlier_one_suspends() {
        let graph = FlowGraph {
            nodes: vec![
                Node::new("d", NodeType::Delay).with("ms", 1),
                set("after", "late", "1"),
                set("other", "other", "ran"),
            ],
            edges: vec![Edge::new("d", "after")],
        };
        let sink = CollectingSink::new();
        let run = engine(ErrorPolicy::Permissive)
            .execute(&graph, &FlowEvent::new_message("hi"), ExecutionContext::new(), &sink)
            .await
            .unwrap();

        assert_eq!(run.traversals.len(), 2);
        assert!(run.traversals[0].is_suspended());
        assert_eq!(run.traversals[1].status, TraversalStatus::Completed);
        assert_eq!(run.context.get_path("vars.other"), Some(&json!("ran")));
        assert!(run.context.get_path("vars.late").is_none());
        assert_eq!(sink.requests().len(), 1);
    }
}
