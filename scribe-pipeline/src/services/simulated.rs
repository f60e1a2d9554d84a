//! Simulated models for local runs and tests
//!
//! Produces deterministic output derived from the file size, sleeps for a
//! configurable latency per stage and can be told to fail a stage.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use super::{Diarizer, StageError, TranscribeOptions, Transcriber};
use crate::models::{Diarization, SpeakerTurn, TimedText, Transcription};

/// Bytes per second of 16 kHz 16-bit mono PCM
const BYTES_PER_SECOND: f64 = 32_000.0;

const SCRIPT: [&str; 4] = [
    "Thanks for joining the call.",
    "Happy to be here.",
    "Let's start with the quarterly numbers.",
    "Sounds good.",
];

/// Stage the simulated models should fail
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedFailure {
    Transcription(String),
    Diarization(String),
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedModels {
    transcribe_latency: Duration,
    diarize_latency: Duration,
    failure: Option<SimulatedFailure>,
}

impl SimulatedModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, transcribe: Duration, diarize: Duration) -> Self {
        self.transcribe_latency = transcribe;
        self.diarize_latency = diarize;
        self
    }

    pub fn with_failure(mut self, failure: SimulatedFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    async fn audio_duration(audio: &Path) -> Result<f64, StageError> {
        let len = tokio::fs::metadata(audio).await?.len() as f64;
        Ok((len / BYTES_PER_SECOND).max(1.0))
    }
}

#[async_trait]
impl Transcriber for SimulatedModels {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
    ) -> Result<Transcription, StageError> {
        tokio::time::sleep(self.transcribe_latency).await;
        if let Some(SimulatedFailure::Transcription(message)) = &self.failure {
            return Err(StageError::Unavailable(message.clone()));
        }

        let duration = Self::audio_duration(audio).await?;
        let step = duration / SCRIPT.len() as f64;
        let segments = SCRIPT
            .iter()
            .enumerate()
            .map(|(i, text)| TimedText {
                start: step * i as f64,
                end: step * (i + 1) as f64,
                text: text.to_string(),
            })
            .collect();

        Ok(Transcription {
            language: options.language.clone().unwrap_or_else(|| "en".to_string()),
            duration,
            segments,
        })
    }
}

#[async_trait]
impl Diarizer for SimulatedModels {
    async fn diarize(
        &self,
        audio: &Path,
        num_speakers: Option<u32>,
    ) -> Result<Diarization, StageError> {
        tokio::time::sleep(self.diarize_latency).await;
        if let Some(SimulatedFailure::Diarization(message)) = &self.failure {
            return Err(StageError::Unavailable(message.clone()));
        }

        let duration = Self::audio_duration(audio).await?;
        let speakers = num_speakers.unwrap_or(2).max(1) as usize;
        let step = duration / SCRIPT.len() as f64;
        let turns = (0..SCRIPT.len())
            .map(|i| SpeakerTurn {
                speaker: format!("SPEAKER_{:02}", i % speakers),
                start: step * i as f64,
                end: step * (i + 1) as f64,
            })
            .collect();

        Ok(Diarization { turns })
    }
}
