//! API integration tests.
//!
//! Tests the complete request flow: HTTP → routes → service →
//! repository, over the in-memory repository.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use tower::ServiceExt;

use vigil_api::server::AppState;

fn test_router() -> axum::Router {
    vigil_api::server::router(AppState::with_memory_repository(), &["*".to_string()])
}

fn register_body() -> serde_json::Value {
    serde_json::json!({
        "owner": "svc-a",
        "creator": "job-7",
        "initialState": "running",
        "ttl": 60_000,
        "gracePeriod": 1_000,
        "description": "d",
        "kind": "k",
        "parameters": {"p": "v"},
        "annotations": {"a": "b"}
    })
}

#[tokio::test]
async fn register_and_read_back() -> Result<()> {
    let router = test_router();

    let (status, registered): (_, serde_json::Value) =
        helpers::post_json(router.clone(), "/v1/operations", register_body()).await?;
    assert_eq!(status, StatusCode::OK);

    let id = registered["operation"]["id"].as_str().context("id")?;
    let token = registered["authToken"].as_str().context("authToken")?;
    assert!(!id.is_empty());
    assert!(!token.is_empty());

    let (status, fetched): (_, serde_json::Value) =
        helpers::get_json(router, &format!("/v1/operations/{id}")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["state"], "running");
    assert_eq!(fetched["ttl"], 60_000);
    assert_eq!(fetched["gracePeriod"], 1_000);
    assert_eq!(fetched["parameters"]["p"], "v");
    assert_eq!(fetched["annotations"]["a"], "b");
    assert!(fetched.get("outcome").is_none());

    // The token never appears in snapshots.
    assert!(fetched.get("authToken").is_none());

    Ok(())
}

#[tokio::test]
async fn update_transitions_running_and_pending() -> Result<()> {
    let router = test_router();

    let (_, registered): (_, serde_json::Value) =
        helpers::post_json(router.clone(), "/v1/operations", register_body()).await?;
    let id = registered["operation"]["id"].as_str().context("id")?;
    let token = registered["authToken"].as_str().context("token")?;

    let (status, updated): (_, serde_json::Value) = helpers::patch_json(
        router.clone(),
        &format!("/v1/operations/{id}"),
        serde_json::json!({
            "authToken": token,
            "running": false,
            "updateMask": ["running"]
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["state"], "pending");
    // Mask {running}: annotations untouched.
    assert_eq!(updated["annotations"]["a"], "b");

    let (status, updated): (_, serde_json::Value) = helpers::patch_json(
        router,
        &format!("/v1/operations/{id}"),
        serde_json::json!({
            "authToken": token,
            "running": true,
            "annotations": {"x": "y"}
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["state"], "running");
    assert_eq!(updated["annotations"]["x"], "y");

    Ok(())
}

#[tokio::test]
async fn update_without_token_is_rejected() -> Result<()> {
    let router = test_router();

    let (_, registered): (_, serde_json::Value) =
        helpers::post_json(router.clone(), "/v1/operations", register_body()).await?;
    let id = registered["operation"]["id"].as_str().context("id")?;

    let (status, error): (_, serde_json::Value) = helpers::patch_json(
        router.clone(),
        &format!("/v1/operations/{id}"),
        serde_json::json!({
            "running": false,
            "updateMask": ["running"]
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "INVALID_AUTH_TOKEN");

    // Storage unchanged.
    let (_, fetched): (_, serde_json::Value) =
        helpers::get_json(router, &format!("/v1/operations/{id}")).await?;
    assert_eq!(fetched["state"], "running");

    Ok(())
}

#[tokio::test]
async fn completion_is_terminal() -> Result<()> {
    let router = test_router();

    let (_, registered): (_, serde_json::Value) =
        helpers::post_json(router.clone(), "/v1/operations", register_body()).await?;
    let id = registered["operation"]["id"].as_str().context("id")?;
    let token = registered["authToken"].as_str().context("token")?;

    let (status, completed): (_, serde_json::Value) = helpers::post_json(
        router.clone(),
        &format!("/v1/operations/{id}/complete"),
        serde_json::json!({
            "authToken": token,
            "success": {"message": "ok"}
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["state"], "complete");
    assert_eq!(completed["outcome"]["success"]["message"], "ok");

    // A further mutation with the correct token fails.
    let (status, error): (_, serde_json::Value) = helpers::patch_json(
        router,
        &format!("/v1/operations/{id}"),
        serde_json::json!({
            "authToken": token,
            "running": true,
            "updateMask": ["running"]
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(error["code"], "OPERATION_COMPLETED");

    Ok(())
}

#[tokio::test]
async fn complete_without_result_is_invalid() -> Result<()> {
    let router = test_router();

    let (_, registered): (_, serde_json::Value) =
        helpers::post_json(router.clone(), "/v1/operations", register_body()).await?;
    let id = registered["operation"]["id"].as_str().context("id")?;
    let token = registered["authToken"].as_str().context("token")?;

    let (status, error): (_, serde_json::Value) = helpers::post_json(
        router,
        &format!("/v1/operations/{id}/complete"),
        serde_json::json!({"authToken": token}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "BAD_REQUEST");

    Ok(())
}

#[tokio::test]
async fn query_filters_and_counts() -> Result<()> {
    let router = test_router();

    helpers::post_json::<serde_json::Value>(
        router.clone(),
        "/v1/operations",
        register_body(),
    )
    .await?;
    helpers::post_json::<serde_json::Value>(
        router.clone(),
        "/v1/operations",
        serde_json::json!({
            "owner": "svc-b",
            "creator": "job-7",
            "initialState": "pending",
            "kind": "other"
        }),
    )
    .await?;

    let (status, all): (_, serde_json::Value) =
        helpers::get_json(router.clone(), "/v1/operations").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["totalCount"], 2);

    let (_, running): (_, serde_json::Value) =
        helpers::get_json(router.clone(), "/v1/operations?state=running").await?;
    assert_eq!(running["totalCount"], 1);
    assert_eq!(running["operations"][0]["owner"], "svc-a");

    let (_, none): (_, serde_json::Value) =
        helpers::get_json(router, "/v1/operations?owner=svc-b&kind=k").await?;
    assert_eq!(none["totalCount"], 0);

    Ok(())
}

#[tokio::test]
async fn malformed_id_is_bad_request() -> Result<()> {
    let router = test_router();

    let (status, error): (_, serde_json::Value) =
        helpers::get_json(router, "/v1/operations/not-an-id").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "BAD_REQUEST");

    Ok(())
}

#[tokio::test]
async fn unknown_id_is_not_found() -> Result<()> {
    let router = test_router();

    let (status, error): (_, serde_json::Value) =
        helpers::get_json(router, "/v1/operations/65f000000000000000000001").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "NOT_FOUND");

    Ok(())
}

#[tokio::test]
async fn watch_endpoint_streams_events() -> Result<()> {
    let router = test_router();

    let (_, registered): (_, serde_json::Value) =
        helpers::post_json(router.clone(), "/v1/operations", register_body()).await?;
    let id = registered["operation"]["id"].as_str().context("id")?;

    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/v1/operations/{id}/watch"))
        .body(Body::empty())?;
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .context("content type")?;
    assert_eq!(content_type, "text/event-stream");

    Ok(())
}

#[tokio::test]
async fn health_and_ready() -> Result<()> {
    let router = test_router();

    let (status, health): (_, serde_json::Value) =
        helpers::get_json(router.clone(), "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let (status, ready): (_, serde_json::Value) = helpers::get_json(router, "/ready").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["ready"], true);

    Ok(())
}

mod helpers {
    use super::*;
    use serde::de::DeserializeOwned;

    fn make_request(
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Request<Body>> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");

        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).context("serialize request body")?),
            None => Body::empty(),
        };

        builder.body(body).context("build request")
    }

    async fn send_json<T: DeserializeOwned>(
        router: axum::Router,
        request: Request<Body>,
    ) -> Result<(StatusCode, T)> {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .context("read response body")?;
        let json = serde_json::from_slice(&body).with_context(|| {
            format!(
                "parse JSON response (status={status}): {}",
                String::from_utf8_lossy(&body)
            )
        })?;
        Ok((status, json))
    }

    pub async fn get_json<T: DeserializeOwned>(
        router: axum::Router,
        uri: &str,
    ) -> Result<(StatusCode, T)> {
        send_json(router, make_request(Method::GET, uri, None)?).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        router: axum::Router,
        uri: &str,
        body: serde_json::Value,
    ) -> Result<(StatusCode, T)> {
        send_json(router, make_request(Method::POST, uri, Some(body))?).await
    }

    pub async fn patch_json<T: DeserializeOwned>(
        router: axum::Router,
        uri: &str,
        body: serde_json::Value,
    ) -> Result<(StatusCode, T)> {
        send_json(router, make_request(Method::PATCH, uri, Some(body))?).await
    }
}
