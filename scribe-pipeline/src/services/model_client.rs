//! HTTP client for the transcription/diarization model server
//!
//! - `POST {base_url}/transcribe[?language=xx]` with the raw audio body
//! - `POST {base_url}/diarize[?num_speakers=N]` with the raw audio body
//!
//! Both endpoints answer JSON matching [`Transcription`] and [`Diarization`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use super::{Diarizer, StageError, TranscribeOptions, Transcriber};
use crate::models::{Diarization, Transcription};

const USER_AGENT: &str = concat!("scribe-pipeline/", env!("CARGO_PKG_VERSION"));

/// Model server client
pub struct RemoteModelClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl RemoteModelClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StageError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| StageError::Unavailable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn audio_request(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
    ) -> reqwest::RequestBuilder {
        self.http_client
            .post(format!("{}/{}", self.base_url, endpoint))
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
    }

    async fn post_audio<T: DeserializeOwned>(
        &self,
        model: &str,
        endpoint: &str,
        query: &[(&str, String)],
        audio: &Path,
    ) -> Result<T, StageError> {
        let body = tokio::fs::read(audio).await?;

        tracing::debug!(model, endpoint, bytes = body.len(), "Calling model server");

        let response = self
            .audio_request(endpoint, query, body)
            .send()
            .await
            .map_err(|e| StageError::Unavailable(format!("{} model unavailable: {}", model, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StageError::Unavailable(format!(
                "{} model returned {}: {}",
                model,
                status.as_u16(),
                error_text.trim()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StageError::InvalidResponse(format!("{}: {}", model, e)))
    }
}

#[async_trait]
impl Transcriber for RemoteModelClient {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
    ) -> Result<Transcription, StageError> {
        let mut query = Vec::new();
        if let Some(language) = &options.language {
            query.push(("language", language.clone()));
        }
        self.post_audio("transcription", "transcribe", &query, audio)
            .await
    }
}

#[async_trait]
impl Diarizer for RemoteModelClient {
    async fn diarize(
        &self,
        audio: &Path,
        num_speakers: Option<u32>,
    ) -> Result<Diarization, StageError> {
        let mut query = Vec::new();
        if let Some(n) = num_speakers {
            query.push(("num_speakers", n.to_string()));
        }
        self.post_audio("diarization", "diarize", &query, audio)
            .await
    }
}
