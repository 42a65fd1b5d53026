//! HTTP client for the vigil API.

use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use vigil_ops::operation::{ErrorOutcome, OperationSnapshot, SuccessOutcome};

use crate::Config;

/// Registration request body.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Caller-supplied owner identity.
    pub owner: String,
    /// Caller-supplied creator identity.
    pub creator: String,
    /// Requested initial state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<String>,
    /// TTL in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Grace period in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<u64>,
    /// Free-text description.
    pub description: String,
    /// Opaque caller-defined category.
    pub kind: String,
    /// Caller-defined parameters.
    pub parameters: HashMap<String, serde_json::Value>,
    /// Caller-defined annotations.
    pub annotations: HashMap<String, String>,
}

/// Registration response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// The registered operation.
    pub operation: OperationSnapshot,
    /// Proof of ownership for subsequent calls.
    pub auth_token: String,
}

/// Query response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    /// Matching operations, newest first.
    pub operations: Vec<OperationSnapshot>,
    /// Number of matching operations.
    pub total_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    auth_token: &'a str,
    running: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    annotations: HashMap<String, String>,
    update_mask: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    auth_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<SuccessOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorOutcome>,
}

/// API client for the vigil tracker endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a new API client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Registers a new operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be
    /// parsed.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        let url = format!("{}/v1/operations", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }

    /// Fetches a single operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be
    /// parsed.
    pub async fn get(&self, id: &str) -> Result<OperationSnapshot> {
        let url = format!("{}/v1/operations/{id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }

    /// Queries operations matching the filter fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be
    /// parsed.
    pub async fn query(
        &self,
        creator: Option<&str>,
        owner: Option<&str>,
        state: Option<&str>,
        kind: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!("{}/v1/operations", self.base_url);

        let mut request = self.client.get(&url);
        for (name, value) in [
            ("creator", creator),
            ("owner", owner),
            ("state", state),
            ("kind", kind),
        ] {
            if let Some(value) = value {
                request = request.query(&[(name, value)]);
            }
        }

        let response = request.send().await.context("Failed to send request")?;
        parse_response(response).await
    }

    /// Sends a ping: sets the running flag, refreshing `lastUpdate`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be
    /// parsed.
    pub async fn ping(&self, id: &str, auth_token: &str) -> Result<OperationSnapshot> {
        let url = format!("{}/v1/operations/{id}", self.base_url);
        let response = self
            .client
            .patch(&url)
            .json(&UpdateRequest {
                auth_token,
                running: true,
                annotations: HashMap::new(),
                update_mask: vec!["running"],
            })
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }

    /// Completes an operation with a success result.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be
    /// parsed.
    pub async fn complete_success(
        &self,
        id: &str,
        auth_token: &str,
        success: SuccessOutcome,
    ) -> Result<OperationSnapshot> {
        self.complete(id, auth_token, Some(success), None).await
    }

    /// Completes an operation with an error result.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be
    /// parsed.
    pub async fn complete_error(
        &self,
        id: &str,
        auth_token: &str,
        error: ErrorOutcome,
    ) -> Result<OperationSnapshot> {
        self.complete(id, auth_token, None, Some(error)).await
    }

    async fn complete(
        &self,
        id: &str,
        auth_token: &str,
        success: Option<SuccessOutcome>,
        error: Option<ErrorOutcome>,
    ) -> Result<OperationSnapshot> {
        let url = format!("{}/v1/operations/{id}/complete", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CompleteRequest {
                auth_token,
                success,
                error,
            })
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }

    /// Streams snapshots for an operation, invoking `handler` per
    /// snapshot, until the server closes the stream (terminal state)
    /// or the connection drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails; stream decode problems
    /// on individual events are skipped.
    pub async fn watch(
        &self,
        id: &str,
        mut handler: impl FnMut(OperationSnapshot),
    ) -> Result<()> {
        let url = format!("{}/v1/operations/{id}/watch", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}");
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read event stream")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE events are separated by a blank line.
            while let Some(boundary) = buffer.find("\n\n") {
                let event: String = buffer.drain(..boundary + 2).collect();
                for line in event.lines() {
                    if let Some(data) = line.strip_prefix("data:") {
                        match serde_json::from_str::<OperationSnapshot>(data.trim()) {
                            Ok(snapshot) => handler(snapshot),
                            Err(err) => {
                                tracing::warn!(error = %err, "skipping undecodable event");
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if response.status().is_success() {
        response.json().await.context("Failed to parse response")
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("API error ({status}): {body}")
    }
}
