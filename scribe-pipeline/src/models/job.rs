//! Job record and mutation rules
//!
//! # State Progression
//! UPLOADING → TRANSCRIBING → DIARIZING → ALIGNING → PROCESSED, with FAILED
//! reachable from any non-terminal state.
//!
//! Every mutation goes through [`Job::apply`], so the record invariants hold
//! no matter which store backs it:
//! - `progress` never decreases and is 100 at PROCESSED
//! - `error_message` is present iff status is FAILED
//! - `result_ref` is present iff status is PROCESSED
//! - terminal records accept no further patches

use chrono::{DateTime, Utc};
use scribe_common::api::JobStatusResponse;
use scribe_common::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque pointer to a stored results payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Creation parameters supplied with the upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Original file name as sent by the client
    pub filename: String,
    /// Expected speaker count hint for diarization
    pub num_speakers: Option<u32>,
}

/// One job per uploaded audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Percentage complete (0 - 100)
    pub progress: u8,
    pub error_message: Option<String>,
    pub result_ref: Option<ResultRef>,
    pub filename: String,
    pub num_speakers: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by the stage runner
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
    pub result_ref: Option<ResultRef>,
}

impl JobPatch {
    /// Enter a new stage, keeping current progress
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Advance progress within the current stage
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Move to FAILED with a human-readable message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Move to PROCESSED pointing at the stored results
    pub fn processed(result_ref: ResultRef) -> Self {
        Self {
            status: Some(JobStatus::Processed),
            progress: Some(100),
            result_ref: Some(result_ref),
            ..Default::default()
        }
    }
}

/// Why a patch was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// Requested status not reachable from the current one
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Patch violates a record invariant
    #[error("{0}")]
    Invalid(String),
}

impl Job {
    /// Fresh record in UPLOADING at 0%
    pub fn new(id: JobId, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Uploading,
            progress: 0,
            error_message: None,
            result_ref: None,
            filename: spec.filename,
            num_speakers: spec.num_speakers,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate `patch` against the current record and apply it
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, patch: &JobPatch, now: DateTime<Utc>) -> Result<(), PatchError> {
        let target = patch.status.unwrap_or(self.status);

        if !self.status.can_transition_to(target) {
            return Err(PatchError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let error_message = match (target, patch.error_message.as_deref()) {
            (JobStatus::Failed, Some(message)) if !message.trim().is_empty() => {
                Some(message.to_string())
            }
            (JobStatus::Failed, _) => {
                return Err(PatchError::Invalid(
                    "failed status requires an error message".to_string(),
                ))
            }
            (_, Some(_)) => {
                return Err(PatchError::Invalid(format!(
                    "error message not allowed with status {}",
                    target
                )))
            }
            (_, None) => None,
        };

        let result_ref = match (target, &patch.result_ref) {
            (JobStatus::Processed, Some(result_ref)) => Some(result_ref.clone()),
            (JobStatus::Processed, None) => {
                return Err(PatchError::Invalid(
                    "processed status requires a result reference".to_string(),
                ))
            }
            (_, Some(_)) => {
                return Err(PatchError::Invalid(format!(
                    "result reference not allowed with status {}",
                    target
                )))
            }
            (_, None) => None,
        };

        let progress = match target {
            JobStatus::Processed => 100,
            _ => patch.progress.unwrap_or(self.progress),
        };
        if progress > 100 {
            return Err(PatchError::Invalid(format!(
                "progress {} out of range 0-100",
                progress
            )));
        }
        if progress < self.progress {
            return Err(PatchError::Invalid(format!(
                "progress may not decrease ({} -> {})",
                self.progress, progress
            )));
        }

        self.status = target;
        self.progress = progress;
        self.error_message = error_message;
        self.result_ref = result_ref;
        self.updated_at = now.max(self.updated_at);
        Ok(())
    }

    /// Status Endpoint view of this record
    pub fn to_status_response(&self) -> JobStatusResponse {
        JobStatusResponse {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            step: self.status.step_label().to_string(),
            error: self.error_message.clone(),
            updated_at: self.updated_at,
        }
    }
}
