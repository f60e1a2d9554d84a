//! HTTP client for the scribe-pipeline job service
//!
//! Response classification:
//! - connect error, timeout, interrupted body, 5xx → [`FetchError::Transient`]
//! - 404 → [`FetchError::NotFound`]
//! - any other non-success or an undecodable body → [`FetchError::Fatal`]

use async_trait::async_trait;
use reqwest::StatusCode;
use scribe_common::api::{
    CancelResponse, ErrorResponse, JobResults, JobStatusResponse, UploadResponse,
};
use scribe_common::JobId;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::error::FetchError;
use crate::source::StatusSource;

const USER_AGENT: &str = concat!("scribe-client/", env!("CARGO_PKG_VERSION"));

/// Job service client
#[derive(Clone)]
pub struct HttpJobClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpJobClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Fatal(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload an audio file and start a job
    pub async fn upload(
        &self,
        path: &Path,
        num_speakers: Option<u32>,
    ) -> Result<UploadResponse, FetchError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FetchError::Fatal(format!("cannot read {}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();

        let mut query = vec![("filename", filename)];
        if let Some(n) = num_speakers {
            query.push(("num_speakers", n.to_string()));
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Uploading audio");

        let response = self
            .http_client
            .post(format!("{}/jobs", self.base_url))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(classify_send_error)?;

        decode(response).await
    }

    /// All jobs known to the service
    pub async fn list_jobs(&self) -> Result<Vec<JobStatusResponse>, FetchError> {
        self.get_json(format!("{}/jobs", self.base_url)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, FetchError> {
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(classify_send_error)?;
        decode(response).await
    }
}

/// Transport failures (connect, timeout, interrupted body) are worth retrying
fn classify_send_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        FetchError::Transient(err.to_string())
    } else {
        FetchError::Fatal(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FetchError> {
    let status = response.status();

    if status.is_success() {
        // Read first so a stalled body is told apart from a malformed one
        let body = response.bytes().await.map_err(classify_send_error)?;
        return serde_json::from_slice(&body)
            .map_err(|e| FetchError::Fatal(format!("undecodable response body: {}", e)));
    }

    // Prefer the service's error message when the body carries one
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.error.message)
        .unwrap_or_else(|_| text.trim().to_string());

    if status == StatusCode::NOT_FOUND {
        Err(FetchError::NotFound(message))
    } else if status.is_server_error() {
        Err(FetchError::Transient(format!("{}: {}", status.as_u16(), message)))
    } else {
        Err(FetchError::Fatal(format!("{}: {}", status.as_u16(), message)))
    }
}

#[async_trait]
impl StatusSource for HttpJobClient {
    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusResponse, FetchError> {
        self.get_json(format!("{}/jobs/{}", self.base_url, job_id)).await
    }

    async fn fetch_results(&self, job_id: &JobId) -> Result<JobResults, FetchError> {
        self.get_json(format!("{}/jobs/{}/results", self.base_url, job_id))
            .await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, FetchError> {
        let response = self
            .http_client
            .post(format!("{}/jobs/{}/cancel", self.base_url, job_id))
            .send()
            .await
            .map_err(classify_send_error)?;
        decode(response).await
    }
}
