//! Best-effort publication of operation transitions to an external
//! event bus.
//!
//! Publication is fire-and-forget: failures are logged by the caller
//! and never surface to the client whose RPC triggered the transition.

use async_trait::async_trait;
use tracing::info;

use vigil_core::Result;

use crate::operation::OperationSnapshot;

/// Sink for post-commit operation snapshots.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes a snapshot to the sink.
    async fn publish(&self, snapshot: &OperationSnapshot) -> Result<()>;
}

/// Event sink that records transitions as structured log events.
///
/// Stands in for an external event bus in deployments without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, snapshot: &OperationSnapshot) -> Result<()> {
        info!(
            id = %snapshot.id,
            state = %snapshot.state,
            kind = %snapshot.kind,
            "operation transition"
        );
        Ok(())
    }
}
