//! Job Store
//!
//! Authoritative map from job id to its status record, plus the results
//! payloads that processed jobs point at. The Stage Runner task of a job is
//! its only writer; the Status Endpoint and listing are readers.
//!
//! All patch validation lives in [`Job::apply`], so both backends enforce
//! the same lifecycle rules.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use scribe_common::api::JobResults;
use scribe_common::{JobId, JobStatus};
use thiserror::Error;

use crate::models::{Job, JobPatch, JobSpec, PatchError, ResultRef};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Job Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job already exists: {0}")]
    DuplicateId(JobId),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Update addressed to an id that was never created
    #[error("Unknown job id: {0}")]
    UnknownId(JobId),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Invalid patch for job {id}: {reason}")]
    InvalidPatch { id: JobId, reason: String },

    #[error("Results not found: {0}")]
    ResultsNotFound(ResultRef),

    /// Stored row could not be turned back into a record
    #[error("Corrupt job record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn from_patch(id: &JobId, err: PatchError) -> Self {
        match err {
            PatchError::InvalidTransition { from, to } => StoreError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            },
            PatchError::Invalid(reason) => StoreError::InvalidPatch {
                id: id.clone(),
                reason,
            },
        }
    }

    /// True for errors that indicate a lifecycle bug in the caller
    pub fn is_lifecycle_violation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidTransition { .. } | StoreError::InvalidPatch { .. }
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result reference minted for a job's payload
pub(crate) fn result_ref_for(id: &JobId) -> ResultRef {
    ResultRef::new(format!("results/{}", id))
}

/// Storage backend for job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record in UPLOADING at 0%
    async fn create(&self, id: JobId, spec: JobSpec) -> StoreResult<Job>;

    /// Snapshot of the current record
    async fn get(&self, id: &JobId) -> StoreResult<Job>;

    /// Validate and apply a patch atomically, returning the new record
    async fn update(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job>;

    /// All records, oldest first
    async fn list(&self) -> StoreResult<Vec<Job>>;

    /// Persist the results payload for `id` and return its reference
    async fn save_results(&self, id: &JobId, results: &JobResults) -> StoreResult<ResultRef>;

    async fn load_results(&self, result_ref: &ResultRef) -> StoreResult<JobResults>;
}
