//! The liveness manager: a periodic sweeper that converts stale
//! RUNNING operations to LOST.
//!
//! An operation is considered lost when the wall-clock gap since its
//! `last_update` reaches `ttl + grace_period`. The sweeper never
//! surfaces errors; storage failures are logged and the pass
//! continues. Registered lost-callbacks each run in their own task so
//! a slow callback cannot stall the sweeper or block its peers.
//!
//! The elapsed-time function is injectable purely for deterministic
//! tests; production uses the wall clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use vigil_core::observability::sweep_span;

use crate::metrics::names;
use crate::operation::OperationSnapshot;
use crate::repository::Repository;

/// Interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Callback invoked with a copy of every snapshot the sweeper
/// transitions to LOST.
pub type LostCallback = Arc<dyn Fn(OperationSnapshot) + Send + Sync>;

/// Returns how much time has elapsed since the given instant.
///
/// Injectable for deterministic tests; defaults to the wall clock.
pub type ElapsedFn = Arc<dyn Fn(DateTime<Utc>) -> Duration + Send + Sync>;

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweep passes.
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

fn wall_clock_elapsed(since: DateTime<Utc>) -> Duration {
    (Utc::now() - since).to_std().unwrap_or(Duration::ZERO)
}

/// Watches active operations and eventually marks them as lost when no
/// update happens within their TTL and grace period.
pub struct LivenessManager {
    repo: Arc<dyn Repository>,
    config: SweeperConfig,
    elapsed: ElapsedFn,
    on_lost: RwLock<Vec<LostCallback>>,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LivenessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessManager")
            .field("config", &self.config)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LivenessManager {
    /// Creates a manager sweeping the given repository with the default
    /// interval and the wall clock.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self::with_config(repo, SweeperConfig::default())
    }

    /// Creates a manager with a custom sweep interval.
    #[must_use]
    pub fn with_config(repo: Arc<dyn Repository>, config: SweeperConfig) -> Self {
        Self::with_elapsed_fn(repo, config, Arc::new(wall_clock_elapsed))
    }

    /// Creates a manager with a custom elapsed-time function.
    ///
    /// The non-default variant exists purely for deterministic testing.
    #[must_use]
    pub fn with_elapsed_fn(
        repo: Arc<dyn Repository>,
        config: SweeperConfig,
        elapsed: ElapsedFn,
    ) -> Self {
        Self {
            repo,
            config,
            elapsed,
            on_lost: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Registers a callback invoked whenever an operation is marked as
    /// lost.
    ///
    /// Each invocation runs in its own task with its own copy of the
    /// snapshot, so callbacks may block without affecting the sweeper
    /// or each other.
    pub fn on_lost(&self, callback: LostCallback) {
        self.on_lost
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(callback);
    }

    /// Starts the sweep loop.
    ///
    /// Idempotent: a second call is a no-op. The loop sweeps
    /// immediately, then once per interval, and exits when the token
    /// is cancelled.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(interval = ?manager.config.interval, "liveness sweeper started");
            loop {
                manager.sweep().await;

                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("liveness sweeper stopped");
                        break;
                    }
                    () = tokio::time::sleep(manager.config.interval) => {}
                }
            }
        });

        *self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    /// Waits for the sweep loop to return.
    ///
    /// Does not wait for outstanding lost-callbacks; those are
    /// fire-and-forget.
    pub async fn wait(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "sweeper task failed");
            }
        }
    }

    /// Runs a single sweep pass over all RUNNING operations.
    ///
    /// Storage errors are logged and skipped; they never abort the
    /// pass.
    pub async fn sweep(&self) {
        self.sweep_pass().instrument(sweep_span()).await;
    }

    async fn sweep_pass(&self) {
        let start = Instant::now();

        let operations = match self.repo.get_active_operations().await {
            Ok(operations) => operations,
            Err(err) => {
                warn!(error = %err, "failed to query active operations");
                return;
            }
        };

        for operation in operations {
            let gap = (self.elapsed)(operation.last_update);
            if gap < operation.ttl + operation.grace_period {
                continue;
            }

            match self.repo.mark_lost(&operation.id).await {
                Ok(lost) => {
                    info!(
                        id = %lost.id,
                        description = %lost.description,
                        gap = ?gap,
                        "operation lost"
                    );
                    counter!(names::OPERATIONS_LOST_TOTAL).increment(1);
                    self.notify_lost(lost);
                }
                Err(err) if err.is_operation_completed() => {
                    // Another writer won the race; nothing to do.
                    debug!(id = %operation.id, "operation already terminal");
                }
                Err(err) => {
                    warn!(id = %operation.id, error = %err, "failed to mark operation as lost");
                }
            }
        }

        counter!(names::SWEEPS_TOTAL).increment(1);
        histogram!(names::SWEEP_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
    }

    fn notify_lost(&self, snapshot: OperationSnapshot) {
        let callbacks = self
            .on_lost
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for callback in callbacks.iter() {
            let callback = Arc::clone(callback);
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                callback(snapshot);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::operation::OperationState;
    use crate::repository::{MemoryRepository, RegisterOperation, Repository};

    fn register_running(ttl: Duration, grace: Duration) -> RegisterOperation {
        RegisterOperation {
            owner: "svc-a".into(),
            creator: "job-7".into(),
            initial_state: OperationState::Running,
            ttl: Some(ttl),
            grace_period: Some(grace),
            description: "sweep target".into(),
            kind: "test".into(),
            parameters: HashMap::new(),
            annotations: HashMap::new(),
        }
    }

    fn fixed_elapsed(gap: Duration) -> ElapsedFn {
        Arc::new(move |_| gap)
    }

    #[tokio::test]
    async fn sweep_marks_expired_running_operation_as_lost() {
        let repo = Arc::new(MemoryRepository::new());
        let (id, _) = repo
            .register(register_running(
                Duration::from_millis(50),
                Duration::from_millis(50),
            ))
            .await
            .unwrap();

        let manager = LivenessManager::with_elapsed_fn(
            repo.clone(),
            SweeperConfig::default(),
            fixed_elapsed(Duration::from_millis(250)),
        );
        manager.sweep().await;

        let snapshot = repo.get(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Lost);
    }

    #[tokio::test]
    async fn sweep_spares_operations_within_ttl_plus_grace() {
        let repo = Arc::new(MemoryRepository::new());
        let (id, _) = repo
            .register(register_running(
                Duration::from_secs(60),
                Duration::from_secs(60),
            ))
            .await
            .unwrap();

        let manager = LivenessManager::with_elapsed_fn(
            repo.clone(),
            SweeperConfig::default(),
            fixed_elapsed(Duration::from_secs(100)),
        );
        manager.sweep().await;

        let snapshot = repo.get(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Running);
    }

    #[tokio::test]
    async fn sweep_ignores_pending_operations() {
        let repo = Arc::new(MemoryRepository::new());
        let (id, _) = repo
            .register(RegisterOperation {
                initial_state: OperationState::Pending,
                ..register_running(Duration::from_millis(1), Duration::ZERO)
            })
            .await
            .unwrap();

        let manager = LivenessManager::with_elapsed_fn(
            repo.clone(),
            SweeperConfig::default(),
            fixed_elapsed(Duration::from_secs(3600)),
        );
        manager.sweep().await;

        let snapshot = repo.get(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Pending);
    }

    #[tokio::test]
    async fn lost_callbacks_receive_the_snapshot() {
        let repo = Arc::new(MemoryRepository::new());
        repo.register(register_running(Duration::ZERO, Duration::ZERO))
            .await
            .unwrap();

        let manager = LivenessManager::with_elapsed_fn(
            repo,
            SweeperConfig::default(),
            fixed_elapsed(Duration::from_secs(1)),
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.on_lost(Arc::new(move |snapshot| {
            let _ = tx.send(snapshot);
        }));

        manager.sweep().await;

        let lost = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lost.state, OperationState::Lost);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stops_on_cancel() {
        let repo = Arc::new(MemoryRepository::new());
        let manager = Arc::new(LivenessManager::with_config(
            repo,
            SweeperConfig {
                interval: Duration::from_millis(10),
            },
        ));

        let cancel = CancellationToken::new();
        manager.start(cancel.clone());
        manager.start(cancel.clone()); // no-op

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), manager.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_operation_is_lost_within_one_tick() {
        let repo = Arc::new(MemoryRepository::new());
        let (id, _) = repo
            .register(register_running(
                Duration::from_millis(50),
                Duration::from_millis(50),
            ))
            .await
            .unwrap();

        let manager = Arc::new(LivenessManager::with_config(
            repo.clone(),
            SweeperConfig {
                interval: Duration::from_millis(20),
            },
        ));

        let cancel = CancellationToken::new();
        manager.start(cancel.clone());

        // ttl + grace = 100ms; wait past expiry plus one tick.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let snapshot = repo.get(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Lost);

        cancel.cancel();
        manager.wait().await;
    }
}
