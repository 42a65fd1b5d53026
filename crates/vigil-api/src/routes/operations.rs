//! Operation tracking endpoints.
//!
//! ## Routes
//!
//! - `POST /v1/operations` - register a new operation
//! - `GET /v1/operations` - query operations
//! - `GET /v1/operations/{id}` - fetch a single operation
//! - `PATCH /v1/operations/{id}` - update ("ping")
//! - `POST /v1/operations/{id}/complete` - complete with a result
//! - `GET /v1/operations/{id}/watch` - SSE stream of snapshots
//!
//! The auth token is returned only from registration; every snapshot
//! is token-free by construction.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vigil_core::OperationId;
use vigil_ops::operation::{ErrorOutcome, OperationSnapshot, OperationState, SuccessOutcome};
use vigil_ops::repository::{
    CompleteOperation, OperationFilter, RegisterOperation, UpdateOperation,
};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Request body for `POST /v1/operations`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOperationRequest {
    /// Caller-supplied owner identity.
    #[serde(default)]
    pub owner: String,
    /// Caller-supplied creator identity.
    #[serde(default)]
    pub creator: String,
    /// Requested initial state; unset or `unspecified` becomes
    /// `pending`.
    #[serde(default)]
    pub initial_state: Option<OperationState>,
    /// Max allowed gap between pings, in milliseconds; defaults to 5
    /// minutes.
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Grace period in milliseconds; defaults to 5 minutes.
    #[serde(default)]
    pub grace_period: Option<u64>,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Opaque caller-defined category.
    #[serde(default)]
    pub kind: String,
    /// Caller-defined parameters; immutable after creation.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Caller-defined annotations.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// Response body for `POST /v1/operations`.
///
/// The only place the auth token is ever returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOperationResponse {
    /// The registered operation.
    pub operation: OperationSnapshot,
    /// Proof of ownership for subsequent mutations.
    pub auth_token: String,
}

/// Request body for `PATCH /v1/operations/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOperationRequest {
    /// Proof of ownership.
    #[serde(default)]
    pub auth_token: String,
    /// Target state when the mask includes `running`.
    #[serde(default)]
    pub running: bool,
    /// Replacement annotations when the mask includes `annotations`.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Field mask; empty means `{running, annotations}`.
    #[serde(default)]
    pub update_mask: Vec<String>,
}

/// Request body for `POST /v1/operations/{id}/complete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOperationRequest {
    /// Proof of ownership.
    #[serde(default)]
    pub auth_token: String,
    /// Success result; exactly one of `success`/`error` must be set.
    #[serde(default)]
    pub success: Option<SuccessOutcome>,
    /// Error result; exactly one of `success`/`error` must be set.
    #[serde(default)]
    pub error: Option<ErrorOutcome>,
}

/// Query parameters for `GET /v1/operations`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOperationsParams {
    /// Match on the creator identity.
    #[serde(default)]
    pub creator: Option<String>,
    /// Match on the owner identity.
    #[serde(default)]
    pub owner: Option<String>,
    /// Match on the lifecycle state (snake_case name).
    #[serde(default)]
    pub state: Option<String>,
    /// Match on the caller-defined kind.
    #[serde(default)]
    pub kind: Option<String>,
}

/// Response body for `GET /v1/operations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOperationsResponse {
    /// Matching operations, newest first.
    pub operations: Vec<OperationSnapshot>,
    /// Number of matching operations.
    pub total_count: u64,
}

fn parse_id(id: &str) -> ApiResult<OperationId> {
    id.parse().map_err(ApiError::from)
}

/// `POST /v1/operations`
pub async fn register_operation(
    State(state): State<AppState>,
    Json(body): Json<RegisterOperationRequest>,
) -> ApiResult<Json<RegisterOperationResponse>> {
    let request = RegisterOperation {
        owner: body.owner,
        creator: body.creator,
        initial_state: body.initial_state.unwrap_or_default(),
        ttl: body.ttl.map(Duration::from_millis),
        grace_period: body.grace_period.map(Duration::from_millis),
        description: body.description,
        kind: body.kind,
        parameters: body.parameters,
        annotations: body.annotations,
    };

    let (operation, auth_token) = state.service.register(request).await?;

    Ok(Json(RegisterOperationResponse {
        operation,
        auth_token,
    }))
}

/// `GET /v1/operations/{id}`
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OperationSnapshot>> {
    let id = parse_id(&id)?;
    let snapshot = state.service.get(&id).await?;
    Ok(Json(snapshot))
}

/// `GET /v1/operations`
pub async fn query_operations(
    State(state): State<AppState>,
    Query(params): Query<QueryOperationsParams>,
) -> ApiResult<Json<QueryOperationsResponse>> {
    let state_filter = params
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<OperationState>)
        .transpose()
        .map_err(ApiError::from)?;

    let operations = state
        .service
        .query(OperationFilter {
            creator: params.creator,
            owner: params.owner,
            state: state_filter,
            kind: params.kind,
        })
        .await?;

    let total_count = operations.len() as u64;
    Ok(Json(QueryOperationsResponse {
        operations,
        total_count,
    }))
}

/// `PATCH /v1/operations/{id}`
pub async fn update_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateOperationRequest>,
) -> ApiResult<Json<OperationSnapshot>> {
    let id = parse_id(&id)?;

    let snapshot = state
        .service
        .update(UpdateOperation {
            id,
            auth_token: body.auth_token,
            running: body.running,
            annotations: body.annotations,
            update_mask: body.update_mask,
        })
        .await?;

    Ok(Json(snapshot))
}

/// `POST /v1/operations/{id}/complete`
pub async fn complete_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteOperationRequest>,
) -> ApiResult<Json<OperationSnapshot>> {
    let id = parse_id(&id)?;

    let snapshot = state
        .service
        .complete(CompleteOperation {
            id,
            auth_token: body.auth_token,
            success: body.success,
            error: body.error,
        })
        .await?;

    Ok(Json(snapshot))
}

/// `GET /v1/operations/{id}/watch`
///
/// Streams one SSE event per committed snapshot until the operation
/// reaches a terminal state (end-of-stream) or the client disconnects.
/// Dropping the stream unsubscribes the watcher.
pub async fn watch_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = parse_id(&id)?;
    let subscription = state.service.watch(id).await;

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        subscription
            .recv()
            .await
            .map(|snapshot| (snapshot, subscription))
    })
    .filter_map(|snapshot| async move {
        match Event::default().json_data(&snapshot) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                // Undeliverable snapshot; drop it rather than kill the
                // stream.
                warn!(id = %snapshot.id, error = %err, "failed to encode watch event");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
