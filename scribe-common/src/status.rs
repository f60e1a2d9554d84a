//! Job status state machine
//!
//! Shared vocabulary for the pipeline service and its polling clients.
//!
//! # State Progression
//! UPLOADING → TRANSCRIBING → DIARIZING → ALIGNING → PROCESSED
//!
//! `FAILED` is absorbing and reachable from every non-terminal state.
//! No transition leaves a terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier
///
/// Minted by the pipeline service as a UUIDv4 string, but treated as an
/// opaque string everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Mint a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Job workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Upload received, audio being persisted
    Uploading,
    /// Speech-to-text running on the external model
    Transcribing,
    /// Speaker diarization running on the external model
    Diarizing,
    /// Merging transcript and speaker turns
    Aligning,
    /// Results available
    Processed,
    /// Job stopped with an error message
    Failed,
}

impl JobStatus {
    /// All states in pipeline order, `Failed` last
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Uploading,
        JobStatus::Transcribing,
        JobStatus::Diarizing,
        JobStatus::Aligning,
        JobStatus::Processed,
        JobStatus::Failed,
    ];

    /// Check if state is terminal (finished)
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Processed | JobStatus::Failed)
    }

    /// Position along the success path; `None` for `Failed`
    fn rank(self) -> Option<u8> {
        match self {
            JobStatus::Uploading => Some(0),
            JobStatus::Transcribing => Some(1),
            JobStatus::Diarizing => Some(2),
            JobStatus::Aligning => Some(3),
            JobStatus::Processed => Some(4),
            JobStatus::Failed => None,
        }
    }

    /// Whether `next` is reachable from `self`
    ///
    /// Staying in the same non-terminal state is allowed (progress-only
    /// updates). Forward moves are allowed, backward moves are not.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next >= current,
            (None, Some(_)) => false,
        }
    }

    /// True if `self` comes strictly before `other` on the success path
    ///
    /// Used by observers to detect stale snapshots. `Failed` never precedes
    /// anything and nothing precedes it.
    pub fn precedes(self, other: JobStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Human label shown next to the progress bar
    pub fn step_label(self) -> &'static str {
        match self {
            JobStatus::Uploading => "Uploading audio",
            JobStatus::Transcribing => "Transcribing speech",
            JobStatus::Diarizing => "Identifying speakers",
            JobStatus::Aligning => "Aligning transcript",
            JobStatus::Processed => "Complete",
            JobStatus::Failed => "Failed",
        }
    }

    /// Wire name (matches serde representation)
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Uploading => "uploading",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Diarizing => "diarizing",
            JobStatus::Aligning => "aligning",
            JobStatus::Processed => "processed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown job status: {}", s)))
    }
}
