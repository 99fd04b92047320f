/// Flow execution runtime
///
/// Template and condition evaluation, node handlers, the graph runner, the
/// dispatcher that feeds it inbound events and due suspensions, and the cron
/// job that drives resumption.

pub mod clock;
pub mod condition;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod suspend;
pub mod template;

use serde::{Deserialize, Serialize};

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::ExecutionContext;
pub use dispatcher::{FlowDispatcher, SweepReport};
pub use engine::{FlowEngine, FlowEvent, FlowRun, Traversal, TraversalStatus};
pub use executor::{NodeExecutor, NodeOutcome};
pub use scheduler::ResumptionScheduler;
pub use suspend::{CollectingSink, SuspendKind, SuspendRequest, SuspendSink};

/// How the runtime treats authoring mistakes
///
/// `Permissive` keeps conversations flowing: unknown node types and nodes
/// missing required fields pass through, unknown operators are false and
/// dangling edges end the traversal, all with a warning. `Strict` turns each
/// of these into an error and rejects invalid graphs at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    #[default]
    Permissive,
    Strict,
}

impl ErrorPolicy {
    pub fn is_strict(&self) -> bool {
        matches!(self, ErrorPolicy::Strict)
    }
}
