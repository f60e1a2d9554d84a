//! Shared API request/response types
//!
//! Types used by the pipeline service endpoints and by the polling client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{JobId, JobStatus};

// ========================================
// Job Status Types
// ========================================

/// GET /jobs/{job_id} response
///
/// # Examples
///
/// ```
/// use scribe_common::api::JobStatusResponse;
/// use scribe_common::JobStatus;
///
/// let json = r#"{"job_id":"job-1","status":"diarizing","progress":50,"step":"Identifying speakers","updated_at":"2026-01-05T12:00:00Z"}"#;
/// let response: JobStatusResponse = serde_json::from_str(json).unwrap();
/// assert_eq!(response.status, JobStatus::Diarizing);
/// assert!(response.error.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Percentage complete (0 - 100)
    pub progress: u8,
    /// UI label for `status`
    pub step: String,
    /// Present only when `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusResponse {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// POST /jobs response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// POST /jobs/{job_id}/cancel response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    /// True if a running job was signalled; the job stops at its next
    /// stage boundary
    pub cancel_requested: bool,
}

// ========================================
// Results Types
// ========================================

/// One speaker-attributed piece of the aligned transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: String,
    pub text: String,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
}

/// Timing record for one processed job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Wall-clock seconds across all stages
    pub total_time: f64,
    /// Seconds of audio, as reported by the transcription model
    pub audio_duration: f64,
    pub upload_time: f64,
    pub transcription_time: f64,
    pub diarization_time: f64,
    pub alignment_time: f64,
    /// Real-time factor (total_time / audio_duration), 0 when duration unknown
    pub rtf: f64,
    pub num_segments: usize,
    pub num_speakers: usize,
}

/// GET /jobs/{job_id}/results response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub transcript: Vec<TranscriptSegment>,
    pub metrics: PerformanceMetrics,
}

// ========================================
// Error Response Types
// ========================================

/// Error body returned by every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Machine code plus human-readable message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_response_omits_error_unless_failed() {
        let response = JobStatusResponse {
            job_id: JobId::from("job-1"),
            status: JobStatus::Transcribing,
            progress: 25,
            step: JobStatus::Transcribing.step_label().to_string(),
            error: None,
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["job_id"], "job-1");
        assert_eq!(json["status"], "transcribing");
        assert_eq!(json["progress"], 25);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_response_shape() {
        let body = ErrorResponse::new("NOT_FOUND", "Job not found: x");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Job not found: x");
    }

    #[test]
    fn test_results_deserialization() {
        let json = r#"{
            "job_id": "job-9",
            "transcript": [{"speaker": "SPEAKER_00", "text": "hello", "start": 0.0, "end": 1.5}],
            "metrics": {
                "total_time": 3.0, "audio_duration": 1.5, "upload_time": 0.1,
                "transcription_time": 2.0, "diarization_time": 0.8, "alignment_time": 0.1,
                "rtf": 2.0, "num_segments": 1, "num_speakers": 1
            }
        }"#;
        let results: JobResults = serde_json::from_str(json).unwrap();
        assert_eq!(results.transcript.len(), 1);
        assert_eq!(results.transcript[0].speaker, "SPEAKER_00");
        assert_eq!(results.metrics.num_speakers, 1);
    }
}
