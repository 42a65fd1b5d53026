//! Router and application state.
//!
//! Provides health, ready, and operation endpoints.

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vigil_ops::repository::memory::MemoryRepository;
use vigil_ops::service::OperationService;

use crate::routes::operations;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
}

/// Shared application state for all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The operation service façade.
    pub service: OperationService,
}

impl AppState {
    /// Creates application state over the given service.
    #[must_use]
    pub fn new(service: OperationService) -> Self {
        Self { service }
    }

    /// Creates application state over the in-memory repository (for
    /// testing and development).
    #[must_use]
    pub fn with_memory_repository() -> Self {
        Self::new(OperationService::new(Arc::new(MemoryRepository::new())))
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn ready_handler() -> Json<ReadyResponse> {
    Json(ReadyResponse { ready: true })
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Builds the CORS layer from the configured origins.
///
/// An empty list disables CORS entirely; `*` allows any origin.
fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }

    let layer = if allowed_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Some(layer)
}

/// Creates the application router.
#[must_use]
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route(
            "/v1/operations",
            axum::routing::post(operations::register_operation)
                .get(operations::query_operations),
        )
        .route(
            "/v1/operations/{id}",
            get(operations::get_operation).patch(operations::update_operation),
        )
        .route(
            "/v1/operations/{id}/complete",
            axum::routing::post(operations::complete_operation),
        )
        .route(
            "/v1/operations/{id}/watch",
            get(operations::watch_operation),
        )
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if let Some(cors) = cors_layer(allowed_origins) {
        router = router.layer(cors);
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_creation_with_wildcard_cors() {
        let state = AppState::with_memory_repository();
        let _router = router(state, &["*".to_string()]);
    }

    #[test]
    fn router_creation_without_cors() {
        let state = AppState::with_memory_repository();
        let _router = router(state, &[]);
    }

    #[test]
    fn cors_layer_with_explicit_origins() {
        let layer = cors_layer(&["https://app.example".to_string()]);
        assert!(layer.is_some());
    }
}
