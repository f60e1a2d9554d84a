//! Pipeline services
//!
//! The Stage Runner plus the model collaborators it drives. Transcription
//! and diarization happen behind async traits so the runner can be pointed
//! at a remote model server or at the simulated models.

pub mod aligner;
pub mod model_client;
pub mod simulated;
pub mod stage_runner;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::models::{Diarization, Transcription};

pub use model_client::RemoteModelClient;
pub use simulated::SimulatedModels;
pub use stage_runner::{JobHandle, StageRunner};

/// Failure of a single pipeline stage
///
/// The `Display` text is stored verbatim as the job's `error_message`.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("uploaded file is empty")]
    EmptyUpload,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Collaborator could not be reached or refused the work
    #[error("{0}")]
    Unavailable(String),

    /// Collaborator answered but the answer was unusable
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Options forwarded to the transcription model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeOptions {
    /// Language code, or `None` for auto-detection
    pub language: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
    ) -> Result<Transcription, StageError>;
}

#[async_trait]
pub trait Diarizer: Send + Sync {
    async fn diarize(
        &self,
        audio: &Path,
        num_speakers: Option<u32>,
    ) -> Result<Diarization, StageError>;
}
