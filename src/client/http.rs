//! JSON-over-HTTP [`RemoteTaskClient`].
//!
//! Routes, relative to the configured base URL:
//!
//! | Call | Route |
//! |------|-------|
//! | enroll | `POST /tasks/{id}/enroll` |
//! | report progress | `POST /tasks/{id}/progress` with `{"value": n \| null, "final": bool}` |
//! | get task | `GET /tasks/{id}` (404 means the task is gone) |
//!
//! A progress report acknowledged with an empty body (204 or an empty 200)
//! decodes as a report without progress.

use crate::client::{ProgressReport, RemoteTaskClient};
use crate::config::RemoteConfig;
use crate::error::{Result, TrackerError};
use crate::scheduler::tasks::Task;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ProgressBody {
    value: Option<f64>,
    #[serde(rename = "final")]
    is_final: bool,
}

/// HTTP client for the remote task API.
#[derive(Debug, Clone)]
pub struct HttpTaskClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpTaskClient {
    /// Create a client with a 10 second request timeout and no auth.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::build(base_url.into(), Duration::from_secs(10), None)
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        Self::build(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs.max(1)),
            config.auth_token.clone(),
        )
    }

    fn build(base_url: String, timeout: Duration, auth_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::Client(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth_token,
        })
    }

    fn task_url(&self, task_id: &str, suffix: &str) -> String {
        format!(
            "{}/tasks/{}{suffix}",
            self.base_url,
            urlencoding::encode(task_id)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| TrackerError::Client(format!("request failed: {e}")))
    }
}

async fn error_for_status(response: reqwest::Response) -> TrackerError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    TrackerError::Client(format!(
        "HTTP {status}: {}",
        body.chars().take(200).collect::<String>()
    ))
}

fn decode_progress(body: &str) -> Result<ProgressReport> {
    if body.trim().is_empty() {
        return Ok(ProgressReport::default());
    }
    serde_json::from_str(body)
        .map_err(|e| TrackerError::Client(format!("cannot decode progress response: {e}")))
}

#[async_trait]
impl RemoteTaskClient for HttpTaskClient {
    async fn enroll(&self, task_id: &str) -> Result<()> {
        let url = self.task_url(task_id, "/enroll");
        debug!(task_id, %url, "enrolling");
        let response = self.send(self.http.post(&url)).await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        Ok(())
    }

    async fn report_progress(
        &self,
        task_id: &str,
        value: Option<f64>,
        is_final: bool,
    ) -> Result<ProgressReport> {
        let url = self.task_url(task_id, "/progress");
        let body = ProgressBody { value, is_final };
        let response = self.send(self.http.post(&url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(ProgressReport::default());
        }
        let text = response
            .text()
            .await
            .map_err(|e| TrackerError::Client(format!("cannot read progress response: {e}")))?;
        decode_progress(&text)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let url = self.task_url(task_id, "");
        let response = self.send(self.http.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        response
            .json::<Task>()
            .await
            .map(Some)
            .map_err(|e| TrackerError::Client(format!("cannot decode task: {e}")))
    }
}
