//! In-memory repository for tests and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Single-process only**: state dies with the process
//!
//! The single mutex provides the transactional read-validate-write
//! envelope the [`Repository`] contract requires.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use vigil_core::{Error, OperationId, Result};

use super::{
    CompleteOperation, OperationFilter, RegisterOperation, Repository, UpdateField,
    UpdateOperation, generate_auth_token,
};
use crate::operation::{
    DEFAULT_GRACE_PERIOD, DEFAULT_TTL, Operation, OperationSnapshot, OperationState,
};

/// In-memory [`Repository`] implementation.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    operations: Mutex<HashMap<OperationId, Operation>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl MemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn operation_count(&self) -> Result<usize> {
        let count = self.operations.lock().map_err(poison_err)?.len();
        Ok(count)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn register(&self, req: RegisterOperation) -> Result<(OperationId, String)> {
        let auth_token = generate_auth_token()?;
        let id = OperationId::generate();
        let now = Utc::now();

        let operation = Operation {
            id,
            create_time: now,
            last_update: now,
            owner: req.owner,
            creator: req.creator,
            state: req.initial_state.or_pending(),
            ttl: req.ttl.unwrap_or(DEFAULT_TTL),
            grace_period: req.grace_period.unwrap_or(DEFAULT_GRACE_PERIOD),
            description: req.description,
            kind: req.kind,
            parameters: req.parameters,
            annotations: req.annotations,
            outcome: None,
            auth_token: auth_token.clone(),
            percent_done: 0,
            status_message: String::new(),
        };

        self.operations
            .lock()
            .map_err(poison_err)?
            .insert(id, operation);

        Ok((id, auth_token))
    }

    async fn get(&self, id: &OperationId) -> Result<OperationSnapshot> {
        let operations = self.operations.lock().map_err(poison_err)?;
        operations
            .get(id)
            .map(Operation::snapshot)
            .ok_or_else(|| Error::not_found(id))
    }

    async fn query(&self, filter: OperationFilter) -> Result<Vec<OperationSnapshot>> {
        let operations = self.operations.lock().map_err(poison_err)?;

        let state = filter.effective_state();
        let mut matches: Vec<OperationSnapshot> = operations
            .values()
            .filter(|op| {
                filter
                    .creator
                    .as_deref()
                    .is_none_or(|c| c.is_empty() || op.creator == c)
                    && filter
                        .owner
                        .as_deref()
                        .is_none_or(|o| o.is_empty() || op.owner == o)
                    && state.is_none_or(|s| op.state == s)
                    && filter
                        .kind
                        .as_deref()
                        .is_none_or(|k| k.is_empty() || op.kind == k)
            })
            .map(Operation::snapshot)
            .collect();

        matches.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        Ok(matches)
    }

    async fn get_active_operations(&self) -> Result<Vec<OperationSnapshot>> {
        self.query(OperationFilter {
            state: Some(OperationState::Running),
            ..OperationFilter::default()
        })
        .await
    }

    async fn update(&self, req: UpdateOperation) -> Result<OperationSnapshot> {
        let fields = UpdateField::parse_mask(&req.update_mask)?;

        let mut operations = self.operations.lock().map_err(poison_err)?;
        let operation = operations
            .get_mut(&req.id)
            .ok_or_else(|| Error::not_found(req.id))?;

        operation.ensure_updatable(&req.auth_token)?;

        for field in fields {
            match field {
                UpdateField::Running => {
                    operation.state = if req.running {
                        OperationState::Running
                    } else {
                        OperationState::Pending
                    };
                }
                UpdateField::Annotations => {
                    operation.annotations = req.annotations.clone();
                }
            }
        }
        operation.last_update = Utc::now();

        Ok(operation.snapshot())
    }

    async fn complete(&self, req: CompleteOperation) -> Result<OperationSnapshot> {
        let id = req.id;
        let auth_token = req.auth_token.clone();
        let outcome = req.take_outcome()?;

        let mut operations = self.operations.lock().map_err(poison_err)?;
        let operation = operations
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(id))?;

        operation.ensure_updatable(&auth_token)?;

        operation.state = OperationState::Complete;
        operation.outcome = Some(outcome);
        operation.last_update = Utc::now();

        Ok(operation.snapshot())
    }

    async fn mark_lost(&self, id: &OperationId) -> Result<OperationSnapshot> {
        let mut operations = self.operations.lock().map_err(poison_err)?;
        let operation = operations
            .get_mut(id)
            .ok_or_else(|| Error::not_found(id))?;

        if operation.is_terminal() {
            return Err(Error::OperationCompleted { id: id.to_hex() });
        }

        operation.state = OperationState::Lost;
        operation.last_update = Utc::now();

        Ok(operation.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::operation::{ErrorOutcome, OperationOutcome, SuccessOutcome};

    fn register_request() -> RegisterOperation {
        RegisterOperation {
            owner: "svc-a".into(),
            creator: "job-7".into(),
            initial_state: OperationState::Running,
            ttl: Some(Duration::from_secs(60)),
            grace_period: Some(Duration::from_secs(1)),
            description: "d".into(),
            kind: "k".into(),
            parameters: HashMap::from([("p".to_string(), serde_json::json!("v"))]),
            annotations: HashMap::from([("a".to_string(), "b".to_string())]),
        }
    }

    #[tokio::test]
    async fn register_and_read_back() {
        let repo = MemoryRepository::new();
        let (id, token) = repo.register(register_request()).await.unwrap();
        assert!(!token.is_empty());

        let snapshot = repo.get(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Running);
        assert_eq!(snapshot.owner, "svc-a");
        assert_eq!(snapshot.creator, "job-7");
        assert_eq!(snapshot.ttl, Duration::from_secs(60));
        assert_eq!(snapshot.grace_period, Duration::from_secs(1));
        assert_eq!(snapshot.description, "d");
        assert_eq!(snapshot.kind, "k");
        assert_eq!(snapshot.parameters["p"], serde_json::json!("v"));
        assert_eq!(snapshot.annotations["a"], "b");
        assert!(snapshot.outcome.is_none());
        assert!(snapshot.last_update >= snapshot.create_time);
    }

    #[tokio::test]
    async fn register_defaults_ttl_grace_and_state() {
        let repo = MemoryRepository::new();
        let (id, _) = repo
            .register(RegisterOperation::default())
            .await
            .unwrap();

        let snapshot = repo.get(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Pending);
        assert_eq!(snapshot.ttl, DEFAULT_TTL);
        assert_eq!(snapshot.grace_period, DEFAULT_GRACE_PERIOD);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let repo = MemoryRepository::new();
        let err = repo.get(&OperationId::generate()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_running_flag_respects_mask() {
        let repo = MemoryRepository::new();
        let (id, token) = repo.register(register_request()).await.unwrap();

        // Mask {running}: annotations untouched.
        let snapshot = repo
            .update(UpdateOperation {
                id,
                auth_token: token.clone(),
                running: false,
                annotations: HashMap::from([("x".to_string(), "y".to_string())]),
                update_mask: vec!["running".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(snapshot.state, OperationState::Pending);
        assert_eq!(snapshot.annotations["a"], "b");
        assert!(!snapshot.annotations.contains_key("x"));

        // Empty mask: both running and annotations apply.
        let snapshot = repo
            .update(UpdateOperation {
                id,
                auth_token: token,
                running: true,
                annotations: HashMap::from([("x".to_string(), "y".to_string())]),
                update_mask: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(snapshot.state, OperationState::Running);
        assert_eq!(snapshot.annotations["x"], "y");
        assert!(!snapshot.annotations.contains_key("a"));
    }

    #[tokio::test]
    async fn update_with_bad_mask_entry_fails() {
        let repo = MemoryRepository::new();
        let (id, token) = repo.register(register_request()).await.unwrap();

        let err = repo
            .update(UpdateOperation {
                id,
                auth_token: token,
                running: true,
                annotations: HashMap::new(),
                update_mask: vec!["statusMessage".to_string()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn update_without_token_does_not_mutate() {
        let repo = MemoryRepository::new();
        let (id, _) = repo.register(register_request()).await.unwrap();
        let before = repo.get(&id).await.unwrap();

        let err = repo
            .update(UpdateOperation {
                id,
                auth_token: String::new(),
                running: false,
                annotations: HashMap::new(),
                update_mask: vec!["running".to_string()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAuthToken));

        let after = repo.get(&id).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.state, OperationState::Running);
    }

    #[tokio::test]
    async fn completion_is_terminal() {
        let repo = MemoryRepository::new();
        let (id, token) = repo.register(register_request()).await.unwrap();

        let snapshot = repo
            .complete(CompleteOperation {
                id,
                auth_token: token.clone(),
                success: Some(SuccessOutcome {
                    message: "ok".into(),
                    result: None,
                }),
                error: None,
            })
            .await
            .unwrap();
        assert_eq!(snapshot.state, OperationState::Complete);
        assert!(matches!(
            snapshot.outcome,
            Some(OperationOutcome::Success(_))
        ));

        // Further transitions with the correct token are rejected.
        let err = repo
            .update(UpdateOperation {
                id,
                auth_token: token.clone(),
                running: true,
                annotations: HashMap::new(),
                update_mask: vec!["running".to_string()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperationCompleted { .. }));

        let err = repo
            .complete(CompleteOperation {
                id,
                auth_token: token,
                success: None,
                error: Some(ErrorOutcome {
                    message: "late".into(),
                    details: None,
                }),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperationCompleted { .. }));
    }

    #[tokio::test]
    async fn complete_with_no_result_fails() {
        let repo = MemoryRepository::new();
        let (id, token) = repo.register(register_request()).await.unwrap();

        let err = repo
            .complete(CompleteOperation {
                id,
                auth_token: token,
                success: None,
                error: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        // The failed completion must not have transitioned the record.
        let snapshot = repo.get(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Running);
    }

    #[tokio::test]
    async fn query_filters_conjunctively_and_sorts_newest_first() {
        let repo = MemoryRepository::new();

        let (first, _) = repo.register(register_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (second, _) = repo
            .register(RegisterOperation {
                owner: "svc-b".into(),
                ..register_request()
            })
            .await
            .unwrap();

        let all = repo.query(OperationFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second);
        assert_eq!(all[1].id, first);

        let only_b = repo
            .query(OperationFilter {
                owner: Some("svc-b".into()),
                ..OperationFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].id, second);

        let none = repo
            .query(OperationFilter {
                owner: Some("svc-b".into()),
                kind: Some("other-kind".into()),
                ..OperationFilter::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn active_operations_are_running_only() {
        let repo = MemoryRepository::new();
        let (running, _) = repo.register(register_request()).await.unwrap();
        let (_pending, _) = repo
            .register(RegisterOperation {
                initial_state: OperationState::Pending,
                ..register_request()
            })
            .await
            .unwrap();

        let active = repo.get_active_operations().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running);
    }

    #[tokio::test]
    async fn mark_lost_transitions_running_operation() {
        let repo = MemoryRepository::new();
        let (id, _) = repo.register(register_request()).await.unwrap();

        let snapshot = repo.mark_lost(&id).await.unwrap();
        assert_eq!(snapshot.state, OperationState::Lost);

        // Already-terminal records reject a second sweep.
        let err = repo.mark_lost(&id).await.unwrap_err();
        assert!(matches!(err, Error::OperationCompleted { .. }));
    }

    #[tokio::test]
    async fn last_update_is_monotonic() {
        let repo = MemoryRepository::new();
        let (id, token) = repo.register(register_request()).await.unwrap();
        let first = repo.get(&id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = repo
            .update(UpdateOperation {
                id,
                auth_token: token,
                running: true,
                annotations: HashMap::new(),
                update_mask: vec!["running".to_string()],
            })
            .await
            .unwrap();

        assert!(second.last_update >= first.last_update);
    }
}
