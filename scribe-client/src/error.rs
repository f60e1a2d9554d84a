//! Error types for scribe-client

use scribe_common::JobId;
use thiserror::Error;

/// Failure of a single request to the job service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Service answered 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection error, timeout or 5xx; worth retrying
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Any other non-success answer or an undecodable body
    #[error("Request failed: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Why a poll loop ended without an outcome
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Gave up on job {job_id} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        job_id: JobId,
        attempts: u32,
        last_error: String,
    },

    #[error("Polling failed: {0}")]
    Fatal(String),

    /// This poller already follows the job
    #[error("Job {0} is already being polled")]
    AlreadyPolling(JobId),
}
