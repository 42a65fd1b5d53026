//! Pluggable persistence for tracked operations.
//!
//! The [`Repository`] trait defines the storage contract for the
//! tracker. Mutations follow a read-validate-write sequence that every
//! implementation must make atomic with respect to concurrent callers
//! (a storage transaction in MongoDB, a single lock in memory).
//!
//! ## Contract highlights
//!
//! - Registration mints the auth token and never returns it again.
//! - `update` and `complete` validate the token and the non-terminal
//!   state inside the transaction, so a losing writer observes the
//!   winner's committed state.
//! - `mark_lost` is reserved for the liveness manager and carries no
//!   token; it fails on already-terminal records so that exactly one
//!   sweep wins.

pub mod memory;
pub mod mongo;

pub use memory::MemoryRepository;
pub use mongo::MongoRepository;

use std::collections::HashMap;

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;

use vigil_core::{Error, OperationId, Result};

use crate::operation::{ErrorOutcome, OperationSnapshot, OperationState, SuccessOutcome};

pub use crate::operation::{DEFAULT_GRACE_PERIOD, DEFAULT_TTL};

/// Registration request for a new operation.
#[derive(Debug, Clone, Default)]
pub struct RegisterOperation {
    /// Caller-supplied owner identity.
    pub owner: String,
    /// Caller-supplied creator identity.
    pub creator: String,
    /// Requested initial state; `Unspecified` becomes `Pending`.
    pub initial_state: OperationState,
    /// Max allowed gap between pings; defaults to 5 minutes.
    pub ttl: Option<std::time::Duration>,
    /// Slack before the sweeper declares the operation lost; defaults
    /// to 5 minutes.
    pub grace_period: Option<std::time::Duration>,
    /// Free-text description.
    pub description: String,
    /// Opaque caller-defined category.
    pub kind: String,
    /// Caller-defined parameters; immutable after creation.
    pub parameters: HashMap<String, serde_json::Value>,
    /// Caller-defined annotations.
    pub annotations: HashMap<String, String>,
}

/// Update ("ping") request for an existing operation.
#[derive(Debug, Clone)]
pub struct UpdateOperation {
    /// The operation to update.
    pub id: OperationId,
    /// Proof of ownership.
    pub auth_token: String,
    /// Target state when the mask includes `running`: true → RUNNING,
    /// false → PENDING.
    pub running: bool,
    /// Replacement annotations when the mask includes `annotations`.
    pub annotations: HashMap<String, String>,
    /// Field mask; empty means `{running, annotations}`.
    pub update_mask: Vec<String>,
}

/// Completion request for an existing operation.
#[derive(Debug, Clone)]
pub struct CompleteOperation {
    /// The operation to complete.
    pub id: OperationId,
    /// Proof of ownership.
    pub auth_token: String,
    /// Success result; exactly one of `success`/`error` must be set.
    pub success: Option<SuccessOutcome>,
    /// Error result; exactly one of `success`/`error` must be set.
    pub error: Option<ErrorOutcome>,
}

/// Conjunctive filter for [`Repository::query`].
///
/// Empty / unspecified fields do not constrain the result.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    /// Match on the creator identity.
    pub creator: Option<String>,
    /// Match on the owner identity.
    pub owner: Option<String>,
    /// Match on the lifecycle state; `Unspecified` means no constraint.
    pub state: Option<OperationState>,
    /// Match on the caller-defined kind.
    pub kind: Option<String>,
}

impl OperationFilter {
    /// Returns the effective state constraint, treating `Unspecified`
    /// as absent.
    #[must_use]
    pub fn effective_state(&self) -> Option<OperationState> {
        self.state.filter(|s| *s != OperationState::Unspecified)
    }
}

/// Fields addressable by an update mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateField {
    /// The `running` flag (state transition PENDING ↔ RUNNING).
    Running,
    /// Wholesale replacement of the annotations map.
    Annotations,
}

impl UpdateField {
    /// Parses a wire mask into fields, applying the default mask when
    /// the input is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for unknown mask entries.
    pub fn parse_mask(mask: &[String]) -> Result<Vec<Self>> {
        if mask.is_empty() {
            return Ok(vec![Self::Running, Self::Annotations]);
        }

        mask.iter()
            .map(|entry| match entry.as_str() {
                "running" => Ok(Self::Running),
                "annotations" => Ok(Self::Annotations),
                other => Err(Error::invalid_argument(format!(
                    "invalid field in update mask: '{other}'"
                ))),
            })
            .collect()
    }
}

/// Generates a fresh 32-byte auth token, hex encoded.
///
/// # Errors
///
/// Returns a storage error if the system randomness source fails.
pub fn generate_auth_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::storage(format!("auth token generation failed: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Storage abstraction for tracked operations.
///
/// ## Atomicity
///
/// `update`, `complete`, and `mark_lost` run their read-validate-write
/// sequence atomically with respect to concurrent callers. Per
/// operation id, committed transitions are totally ordered at the
/// storage layer.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Registers a new operation and returns its id and auth token.
    ///
    /// The token is returned exactly once, here.
    async fn register(&self, req: RegisterOperation) -> Result<(OperationId, String)>;

    /// Looks up a single operation.
    async fn get(&self, id: &OperationId) -> Result<OperationSnapshot>;

    /// Queries operations matching the filter, newest first.
    async fn query(&self, filter: OperationFilter) -> Result<Vec<OperationSnapshot>>;

    /// Returns all operations currently in state RUNNING.
    ///
    /// Shorthand used by the liveness manager.
    async fn get_active_operations(&self) -> Result<Vec<OperationSnapshot>>;

    /// Applies an update ("ping") and returns the post-update snapshot.
    async fn update(&self, req: UpdateOperation) -> Result<OperationSnapshot>;

    /// Completes an operation with exactly one result variant and
    /// returns the post-update snapshot.
    async fn complete(&self, req: CompleteOperation) -> Result<OperationSnapshot>;

    /// Transitions an operation to LOST without a token check.
    ///
    /// Reserved for the liveness manager. Fails with
    /// [`Error::OperationCompleted`] when the record is already
    /// terminal.
    async fn mark_lost(&self, id: &OperationId) -> Result<OperationSnapshot>;
}

impl CompleteOperation {
    /// Validates that exactly one result variant is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when neither or both
    /// variants are set.
    pub fn take_outcome(self) -> Result<crate::operation::OperationOutcome> {
        match (self.success, self.error) {
            (Some(success), None) => Ok(crate::operation::OperationOutcome::Success(success)),
            (None, Some(error)) => Ok(crate::operation::OperationOutcome::Error(error)),
            (None, None) => Err(Error::invalid_argument(
                "complete request is missing a result value",
            )),
            (Some(_), Some(_)) => Err(Error::invalid_argument(
                "complete request carries both success and error results",
            )),
        }
    }
}
