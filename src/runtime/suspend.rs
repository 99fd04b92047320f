/// Suspension hand-off between the delay handler and the caller
///
/// When a traversal pauses, the handler builds a `SuspendRequest` and awaits
/// the caller's `SuspendSink`. The traversal only reports itself suspended
/// after the sink returned successfully.

use crate::runtime::context::ExecutionContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Why a traversal paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuspendKind {
    Delay,
}

/// Everything needed to resume a paused traversal later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendRequest {
    #[serde(rename = "type")]
    pub kind: SuspendKind,
    /// Node that suspended; resumption continues from its `out` edge
    pub node_id: String,
    pub resume_at: DateTime<Utc>,
    /// Snapshot of the context at suspension time
    pub context: ExecutionContext,
}

/// Receiver of suspension requests, usually backed by durable storage
#[async_trait]
pub trait SuspendSink: Send + Sync {
    async fn on_suspend(&self, request: SuspendRequest) -> anyhow::Result<()>;
}

/// Sink that keeps requests in memory, for dry runs where nothing is persisted
#[derive(Debug, Default)]
pub struct CollectingSink {
    requests: Mutex<Vec<SuspendRequest>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<SuspendRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SuspendSink for CollectingSink {
    async fn on_suspend(&self, request: SuspendRequest) -> anyhow::Result<()> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Ok(())
    }
}
