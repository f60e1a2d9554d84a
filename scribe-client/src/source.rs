//! Where the poller reads job state from

use async_trait::async_trait;
use scribe_common::api::{CancelResponse, JobResults, JobStatusResponse};
use scribe_common::JobId;
use std::sync::Arc;

use crate::error::FetchError;

/// Read access to the job service
///
/// [`crate::HttpJobClient`] is the production implementation; tests script
/// their own.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusResponse, FetchError>;

    async fn fetch_results(&self, job_id: &JobId) -> Result<JobResults, FetchError>;

    /// Ask the service to stop the job (best effort)
    async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, FetchError>;
}

#[async_trait]
impl<S: StatusSource + ?Sized> StatusSource for Arc<S> {
    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusResponse, FetchError> {
        (**self).fetch_status(job_id).await
    }

    async fn fetch_results(&self, job_id: &JobId) -> Result<JobResults, FetchError> {
        (**self).fetch_results(job_id).await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, FetchError> {
        (**self).cancel_job(job_id).await
    }
}
