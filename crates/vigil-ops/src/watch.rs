//! Per-operation fan-out of state changes to streaming watchers.
//!
//! The registry keeps a set of bounded delivery channels per operation
//! id. Delivery is lossy by design: a send that cannot complete within
//! one second is dropped with a warning so a stuck observer can never
//! wedge the service. When a terminal snapshot is published, every
//! channel registered under that id is closed (the sender half is
//! dropped), which subscribers observe as end-of-stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use vigil_core::OperationId;

use crate::metrics::{labels, names};
use crate::operation::OperationSnapshot;

/// Buffer capacity of each watcher channel.
pub const CHANNEL_CAPACITY: usize = 100;

/// How long a single delivery may block before it is dropped.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

type WatcherMap = HashMap<OperationId, Vec<(u64, mpsc::Sender<OperationSnapshot>)>>;

/// Registry of active watch subscriptions, keyed by operation id.
///
/// Cheap to clone; clones share the same underlying registry.
#[derive(Debug, Clone, Default)]
pub struct WatcherRegistry {
    watchers: Arc<RwLock<WatcherMap>>,
    next_key: Arc<AtomicU64>,
}

impl WatcherRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to state changes of the given operation.
    ///
    /// The subscription yields every published snapshot until a
    /// terminal state closes the channel or the subscription is
    /// dropped. Dropping the subscription unregisters its channel.
    pub async fn subscribe(&self, id: OperationId) -> Subscription {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);

        let mut watchers = self.watchers.write().await;
        watchers.entry(id).or_default().push((key, tx));

        Subscription {
            id,
            key,
            rx,
            registry: self.clone(),
        }
    }

    /// Removes a specific channel from the id's set.
    pub async fn unsubscribe(&self, id: OperationId, key: u64) {
        let mut watchers = self.watchers.write().await;
        if let Some(channels) = watchers.get_mut(&id) {
            channels.retain(|(k, _)| *k != key);
            if channels.is_empty() {
                watchers.remove(&id);
            }
        }
    }

    /// Delivers a snapshot to every watcher of its operation.
    ///
    /// Sends run under the read lock with a bounded timeout. Terminal
    /// snapshots additionally spawn a task that takes the write lock,
    /// removes the id, and drops the senders so subscribers see
    /// end-of-stream.
    pub async fn publish(&self, snapshot: &OperationSnapshot) {
        {
            let watchers = self.watchers.read().await;
            if let Some(channels) = watchers.get(&snapshot.id) {
                for (_, tx) in channels {
                    match tokio::time::timeout(SEND_TIMEOUT, tx.send(snapshot.clone())).await {
                        Ok(Ok(())) => {
                            counter!(names::WATCH_PUBLISHED_TOTAL).increment(1);
                        }
                        Ok(Err(_)) => {
                            counter!(names::WATCH_DROPPED_TOTAL, labels::REASON => "closed")
                                .increment(1);
                            debug!(id = %snapshot.id, "watcher channel already closed");
                        }
                        Err(_) => {
                            counter!(names::WATCH_DROPPED_TOTAL, labels::REASON => "timeout")
                                .increment(1);
                            warn!(id = %snapshot.id, "dropping update for slow watcher");
                        }
                    }
                }
            }
        }

        if snapshot.is_terminal() {
            let registry = self.clone();
            let id = snapshot.id;
            tokio::spawn(async move {
                let mut watchers = registry.watchers.write().await;
                watchers.remove(&id);
            });
        }
    }

    /// Returns the number of channels registered for an id.
    pub async fn watcher_count(&self, id: OperationId) -> usize {
        let watchers = self.watchers.read().await;
        watchers.get(&id).map_or(0, Vec::len)
    }
}

/// A live watch subscription.
///
/// Receives every post-commit snapshot for one operation until a
/// terminal state is reached. Dropping the subscription removes its
/// channel from the registry.
#[derive(Debug)]
pub struct Subscription {
    id: OperationId,
    key: u64,
    rx: mpsc::Receiver<OperationSnapshot>,
    registry: WatcherRegistry,
}

impl Subscription {
    /// Receives the next snapshot.
    ///
    /// Returns `None` at end-of-stream (the operation reached a
    /// terminal state and the registry closed the channel).
    pub async fn recv(&mut self) -> Option<OperationSnapshot> {
        self.rx.recv().await
    }

    /// The operation this subscription watches.
    #[must_use]
    pub const fn operation_id(&self) -> OperationId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let id = self.id;
        let key = self.key;

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.unsubscribe(id, key).await;
            });
        }
    }
}
