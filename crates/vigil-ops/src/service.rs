//! The service façade: maps requests to repository calls and fans
//! successful transitions out to watchers and the event sink.
//!
//! The façade guarantees that every committed transition it performs
//! is offered to the watchers of that operation. It does not guarantee
//! ordering between concurrent writers on the fan-out path; the
//! repository orders the commits themselves.

use std::sync::Arc;

use tracing::{Instrument, warn};

use vigil_core::observability::operation_span;
use vigil_core::{OperationId, Result};

use crate::events::EventSink;
use crate::manager::LivenessManager;
use crate::operation::OperationSnapshot;
use crate::repository::{
    CompleteOperation, OperationFilter, RegisterOperation, Repository, UpdateOperation,
};
use crate::watch::{Subscription, WatcherRegistry};

/// Orchestrates the repository, watcher registry, and event sink.
#[derive(Clone)]
pub struct OperationService {
    repo: Arc<dyn Repository>,
    watchers: WatcherRegistry,
    events: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for OperationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationService")
            .field("watchers", &self.watchers)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

impl OperationService {
    /// Creates a service over the given repository.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            watchers: WatcherRegistry::new(),
            events: None,
        }
    }

    /// Attaches an external event sink; transitions are published to it
    /// best-effort.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Registers the watcher fan-out as a lost-callback on the manager
    /// so sweeper-driven transitions reach observers on the same path
    /// as request-driven ones.
    pub fn attach_manager(&self, manager: &LivenessManager) {
        let watchers = self.watchers.clone();
        let events = self.events.clone();

        manager.on_lost(Arc::new(move |snapshot| {
            let watchers = watchers.clone();
            let events = events.clone();
            tokio::spawn(async move {
                watchers.publish(&snapshot).await;
                publish_event(events.as_deref(), &snapshot).await;
            });
        }));
    }

    /// Registers a new operation.
    ///
    /// Returns the registered snapshot and the auth token. This is the
    /// only place the token is ever handed out.
    pub async fn register(
        &self,
        req: RegisterOperation,
    ) -> Result<(OperationSnapshot, String)> {
        let (id, auth_token) = self.repo.register(req).await?;

        // Read back the committed record for its wire-form snapshot.
        let snapshot = self.repo.get(&id).await?;

        self.spawn_event(&snapshot);

        Ok((snapshot, auth_token))
    }

    /// Applies an update ("ping") and notifies watchers.
    pub async fn update(&self, req: UpdateOperation) -> Result<OperationSnapshot> {
        let span = operation_span("update", &req.id.to_hex());
        async {
            let snapshot = self.repo.update(req).await?;
            self.notify(&snapshot).await;
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }

    /// Completes an operation and notifies watchers.
    pub async fn complete(&self, req: CompleteOperation) -> Result<OperationSnapshot> {
        let span = operation_span("complete", &req.id.to_hex());
        async {
            let snapshot = self.repo.complete(req).await?;
            self.notify(&snapshot).await;
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }

    /// Looks up a single operation.
    pub async fn get(&self, id: &OperationId) -> Result<OperationSnapshot> {
        self.repo
            .get(id)
            .instrument(operation_span("get", &id.to_hex()))
            .await
    }

    /// Queries operations matching the filter, newest first.
    pub async fn query(&self, filter: OperationFilter) -> Result<Vec<OperationSnapshot>> {
        self.repo.query(filter).await
    }

    /// Subscribes to the live stream of state transitions for an
    /// operation.
    ///
    /// The subscription ends when the operation reaches a terminal
    /// state; dropping it unsubscribes.
    pub async fn watch(&self, id: OperationId) -> Subscription {
        self.watchers.subscribe(id).await
    }

    /// Delivers a committed snapshot to watchers and the event sink.
    async fn notify(&self, snapshot: &OperationSnapshot) {
        self.watchers.publish(snapshot).await;
        publish_event(self.events.as_deref(), snapshot).await;
    }

    /// Publishes to the event sink in a detached task.
    fn spawn_event(&self, snapshot: &OperationSnapshot) {
        if let Some(events) = self.events.clone() {
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                publish_event(Some(events.as_ref()), &snapshot).await;
            });
        }
    }
}

async fn publish_event(sink: Option<&dyn EventSink>, snapshot: &OperationSnapshot) {
    if let Some(sink) = sink {
        if let Err(err) = sink.publish(snapshot).await {
            warn!(id = %snapshot.id, error = %err, "failed to publish operation event");
        }
    }
}
