//! Tracked execution of a caller-supplied closure.
//!
//! [`track`] registers an operation, keeps it alive with a ping per
//! TTL while the closure runs, and completes it from the closure's
//! `Result`. The closure's failure channel is its return value; there
//! is no panic-to-result conversion here.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vigil_ops::operation::{ErrorOutcome, SuccessOutcome};

use crate::client::{ApiClient, RegisterRequest};

/// Options for a tracked execution.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Caller-supplied owner identity.
    pub owner: String,
    /// Caller-supplied creator identity.
    pub creator: String,
    /// Opaque caller-defined category.
    pub kind: String,
    /// Free-text description.
    pub description: String,
    /// Max allowed gap between pings; server default when unset.
    pub ttl: Option<Duration>,
    /// Slack before the sweeper declares the operation lost; server
    /// default when unset.
    pub grace_period: Option<Duration>,
    /// Caller-defined parameters.
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Runs `work` under a tracked operation.
///
/// Registers the operation in RUNNING, pings it once per TTL until the
/// closure returns, then completes it with a success or error result
/// derived from the closure's `Result`. The closure's value is
/// returned unchanged; completion failures are logged, not surfaced.
///
/// # Examples
///
/// ```no_run
/// use vigil_cli::client::ApiClient;
/// use vigil_cli::track::{TrackOptions, track};
/// use vigil_cli::Config;
///
/// # async fn run() -> anyhow::Result<()> {
/// let client = ApiClient::new(&Config {
///     api_url: "http://localhost:8081".into(),
///     ..Config::default()
/// })?;
///
/// let rows = track(
///     &client,
///     TrackOptions {
///         owner: "reports".into(),
///         kind: "monthly-rollup".into(),
///         ..TrackOptions::default()
///     },
///     || async { Ok(42_u32) },
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the registration error if the operation cannot be created,
/// otherwise whatever `work` returns.
pub async fn track<T, F, Fut>(client: &ApiClient, options: TrackOptions, work: F) -> Result<T>
where
    T: serde::Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let registered = client
        .register(RegisterRequest {
            owner: options.owner,
            creator: options.creator,
            initial_state: Some("running".to_string()),
            ttl: options.ttl.map(|d| d.as_millis() as u64),
            grace_period: options.grace_period.map(|d| d.as_millis() as u64),
            description: options.description,
            kind: options.kind,
            parameters: options.parameters,
            annotations: HashMap::new(),
        })
        .await?;

    let id = registered.operation.id.to_hex();
    let auth_token = registered.auth_token;
    let ttl = registered.operation.ttl;
    info!(id = %id, "operation registered");

    let cancel = CancellationToken::new();
    let ping_task = {
        let cancel = cancel.clone();
        let id = id.clone();
        let auth_token = auth_token.clone();
        let client = client.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(ttl) => {}
                }

                if let Err(err) = client.ping(&id, &auth_token).await {
                    error!(id = %id, error = %err, "failed to ping operation");
                }
            }
        })
    };

    let result = work().await;

    cancel.cancel();
    let _ = ping_task.await;

    let completion = match &result {
        Ok(value) => {
            let payload = serde_json::to_value(value).ok();
            client
                .complete_success(
                    &id,
                    &auth_token,
                    SuccessOutcome {
                        message: String::new(),
                        result: payload,
                    },
                )
                .await
        }
        Err(err) => {
            client
                .complete_error(
                    &id,
                    &auth_token,
                    ErrorOutcome {
                        message: err.to_string(),
                        details: None,
                    },
                )
                .await
        }
    };

    if let Err(err) = completion {
        error!(id = %id, error = %err, "failed to complete operation");
    }

    result
}
