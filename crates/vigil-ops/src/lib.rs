//! # vigil-ops
//!
//! The operation-tracking domain for vigil:
//!
//! - **Operation model**: the tracked entity, its state machine, and
//!   the token-guarded transition rules
//! - **Repository**: transactional persistence of operations (MongoDB
//!   for production, in-memory for tests and development)
//! - **Liveness manager**: the background sweeper that converts stale
//!   RUNNING operations to LOST
//! - **Watcher registry**: bounded, lossy fan-out of state changes to
//!   streaming subscribers
//! - **Service façade**: ties the pieces together for the API layer
//!
//! ## Lifecycle
//!
//! An operation is registered in PENDING or RUNNING, moves between the
//! two via updates ("pings"), and ends in COMPLETE (explicit) or LOST
//! (sweeper expiry). Terminal states accept no further transitions.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod events;
pub mod manager;
pub mod metrics;
pub mod operation;
pub mod repository;
pub mod service;
pub mod watch;

pub use events::{EventSink, TracingEventSink};
pub use manager::{LivenessManager, SweeperConfig};
pub use operation::{
    ErrorOutcome, Operation, OperationOutcome, OperationSnapshot, OperationState, SuccessOutcome,
};
pub use repository::{
    CompleteOperation, MemoryRepository, MongoRepository, OperationFilter, RegisterOperation,
    Repository, UpdateOperation,
};
pub use service::OperationService;
pub use watch::{Subscription, WatcherRegistry};
