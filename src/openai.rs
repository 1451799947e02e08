//! OpenAI REST client implementing the remote capability traits.
//!
//! Covers the three resource families the engine needs:
//!
//! | Trait | Endpoints |
//! |-------|-----------|
//! | [`RemoteFileStore`] | `GET/POST /files`, `DELETE /files/{id}` |
//! | [`RemoteIndex`] | `/vector_stores`, `/vector_stores/{id}/file_batches`, `/vector_stores/{id}/files` |
//! | [`RemoteAssistants`] | `/assistants` |
//!
//! Listing is cursor-paginated (`limit` + `after`); the client returns one
//! [`Page`] per call.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) → retry
//! - HTTP 5xx (server error) and network errors → retry `GET` and `DELETE`
//!   only; a create the server may already have applied is never resent
//! - Connection failures (request never sent) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Backoff: `retry_base_ms`, doubled per attempt (capped at 2^5)
//!
//! A `404` on any `DELETE` is reported as success.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OpenAiConfig;
use crate::models::{
    Assistant, AssistantRequest, FileBatch, FilePurpose, Page, RemoteFile, VectorStore,
    VectorStoreFile,
};
use crate::traits::{RemoteAssistants, RemoteFileStore, RemoteIndex};

/// Non-success response from the API, after retries were exhausted or
/// skipped.
#[derive(Debug, Error)]
#[error("OpenAI API error {status} on {endpoint}: {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub endpoint: String,
    pub body: String,
}

/// Which failures a request may be resent after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Listing and deleting: any transient failure.
    Safe,
    /// Creating: only when the server cannot have acted on the request.
    Undelivered,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    retry_base: Duration,
    page_size: u32,
}

impl OpenAiClient {
    /// Create a client, reading the API key from the environment variable
    /// named by `api_key_env`.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &OpenAiConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
            page_size: config.page_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// `build` is called once per attempt since request bodies (multipart
    /// forms in particular) cannot be replayed.
    async fn send<F>(&self, endpoint: &str, replay: Replay, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base * (1u32 << (attempt - 1).min(5));
                debug!(endpoint, attempt, ?delay, "retrying OpenAI request");
                tokio::time::sleep(delay).await;
            }

            let resp = build(&self.http)
                .bearer_auth(&self.api_key)
                .header("OpenAI-Beta", "assistants=v2")
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    let body = response.text().await.unwrap_or_default();
                    let err = ApiError {
                        status,
                        endpoint: endpoint.to_string(),
                        body,
                    };

                    let transient = status == StatusCode::TOO_MANY_REQUESTS
                        || (replay == Replay::Safe && status.is_server_error());
                    if transient {
                        warn!(endpoint, %status, "transient OpenAI API error");
                        last_err = Some(anyhow::Error::new(err));
                        continue;
                    }

                    return Err(err.into());
                }
                Err(e) => {
                    warn!(endpoint, error = %e, "OpenAI request failed");
                    let resend = replay == Replay::Safe || e.is_connect();
                    let err = anyhow::Error::new(e)
                        .context(format!("OpenAI request to {} failed", endpoint));
                    if !resend {
                        return Err(err);
                    }
                    last_err = Some(err);
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow!("OpenAI request to {} failed after retries", endpoint)))
    }

    async fn send_json<T, F>(&self, endpoint: &str, replay: Replay, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = self.send(endpoint, replay, build).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid OpenAI response from {}", endpoint))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &[(&str, &str)],
        after: Option<&str>,
    ) -> Result<Page<T>> {
        let url = self.url(path);
        let limit = self.page_size.to_string();

        self.send_json(path, Replay::Safe, |http| {
            let mut req = http
                .get(&url)
                .query(&[("limit", limit.as_str())])
                .query(filters);
            if let Some(after) = after {
                req = req.query(&[("after", after)]);
            }
            req
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);

        match self.send(path, Replay::Safe, |http| http.delete(&url)).await {
            Ok(_) => Ok(()),
            Err(e) => match e.downcast_ref::<ApiError>() {
                Some(api) if api.status == StatusCode::NOT_FOUND => {
                    debug!(path, "delete of missing resource");
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }
}

#[async_trait]
impl RemoteFileStore for OpenAiClient {
    async fn list_files(
        &self,
        purpose: FilePurpose,
        after: Option<&str>,
    ) -> Result<Page<RemoteFile>> {
        self.get_page("/files", &[("purpose", purpose.as_str())], after)
            .await
    }

    async fn create_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
        purpose: FilePurpose,
    ) -> Result<RemoteFile> {
        let url = self.url("/files");

        self.send_json("/files", Replay::Undelivered, |http| {
            let part = reqwest::multipart::Part::bytes(contents.clone())
                .file_name(filename.to_string());
            let form = reqwest::multipart::Form::new()
                .text("purpose", purpose.as_str())
                .part("file", part);
            http.post(&url).multipart(form)
        })
        .await
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.delete(&format!("/files/{}", file_id)).await
    }
}

#[async_trait]
impl RemoteIndex for OpenAiClient {
    async fn list_vector_stores(&self, after: Option<&str>) -> Result<Page<VectorStore>> {
        self.get_page("/vector_stores", &[], after).await
    }

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore> {
        let url = self.url("/vector_stores");
        let body = serde_json::json!({ "name": name });

        self.send_json("/vector_stores", Replay::Undelivered, |http| {
            http.post(&url).json(&body)
        })
            .await
    }

    async fn delete_vector_store(&self, vector_store_id: &str) -> Result<()> {
        self.delete(&format!("/vector_stores/{}", vector_store_id))
            .await
    }

    async fn create_file_batch(
        &self,
        vector_store_id: &str,
        file_ids: &[String],
    ) -> Result<FileBatch> {
        let path = format!("/vector_stores/{}/file_batches", vector_store_id);
        let url = self.url(&path);
        let body = serde_json::json!({ "file_ids": file_ids });

        self.send_json(&path, Replay::Undelivered, |http| http.post(&url).json(&body))
            .await
    }

    async fn list_vector_store_files(
        &self,
        vector_store_id: &str,
        after: Option<&str>,
    ) -> Result<Page<VectorStoreFile>> {
        let path = format!("/vector_stores/{}/files", vector_store_id);
        self.get_page(&path, &[], after).await
    }
}

#[async_trait]
impl RemoteAssistants for OpenAiClient {
    async fn list_assistants(&self, after: Option<&str>) -> Result<Page<Assistant>> {
        self.get_page("/assistants", &[], after).await
    }

    async fn create_assistant(&self, request: &AssistantRequest) -> Result<Assistant> {
        let url = self.url("/assistants");
        let body = assistant_body(request);

        self.send_json("/assistants", Replay::Undelivered, |http| {
            http.post(&url).json(&body)
        })
            .await
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        self.delete(&format!("/assistants/{}", assistant_id)).await
    }
}

fn assistant_body(request: &AssistantRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "name": request.name,
        "model": request.model,
        "tools": [{ "type": "file_search" }],
        "tool_resources": {
            "file_search": { "vector_store_ids": [request.vector_store_id] }
        },
    });
    if let Some(instructions) = &request.instructions {
        body["instructions"] = serde_json::Value::String(instructions.clone());
    }
    body
}
