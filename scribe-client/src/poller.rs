//! Client Poller
//!
//! Follows one job on the job service until it reaches a terminal state,
//! the caller cancels, or the service stays unreachable for longer than the
//! retry policy allows.
//!
//! **Loop:**
//! 1. Fetch the status (transient failures retried under [`RetryPolicy`])
//! 2. Drop stale snapshots (earlier stage, or same stage with lower progress)
//! 3. Emit [`PollEvent::Status`] when status or progress changed
//! 4. `processed`: fetch results, emit [`PollEvent::Completed`], stop
//! 5. `failed`: emit [`PollEvent::Failed`], stop
//! 6. Otherwise sleep `interval` and go again
//!
//! Every wait is raced against the loop's [`CancellationToken`].

use scribe_common::api::{JobResults, JobStatusResponse};
use scribe_common::{JobId, JobStatus};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchError, PollError};
use crate::retry::{RetryFailure, RetryPolicy};
use crate::source::StatusSource;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Pause between two status requests
    pub interval: Duration,
    pub retry: RetryPolicy,
    /// Ask the service to cancel the job when polling is cancelled
    pub cancel_remote: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            cancel_remote: false,
        }
    }
}

/// Progress notifications from one poll loop
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// A newer snapshot than the last one emitted
    Status(JobStatusResponse),
    /// Results fetched for a processed job (sent once)
    Completed { job_id: JobId },
    /// The job failed on the service
    Failed { error_message: String },
}

/// How a poll loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Processed(JobResults),
    Failed { error_message: String },
    Cancelled,
}

/// Polls jobs through a [`StatusSource`]
///
/// Each poller tracks the ids it is following; asking it to follow the same
/// id twice concurrently fails with [`PollError::AlreadyPolling`].
pub struct JobPoller<S: ?Sized> {
    source: Arc<S>,
    config: PollerConfig,
    active: Arc<Mutex<HashSet<JobId>>>,
}

impl<S: ?Sized> Clone for JobPoller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: self.config,
            active: Arc::clone(&self.active),
        }
    }
}

/// Removes the job id from the active set when the loop ends
struct ActiveGuard {
    active: Arc<Mutex<HashSet<JobId>>>,
    job_id: JobId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// One spawned poll loop
pub struct PollHandle {
    job_id: JobId,
    cancel_token: CancellationToken,
    events: mpsc::UnboundedReceiver<PollEvent>,
    task: JoinHandle<Result<PollOutcome, PollError>>,
}

impl PollHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Stop polling; the loop resolves to [`PollOutcome::Cancelled`]
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<PollEvent> {
        &mut self.events
    }

    /// Wait for the loop to finish
    pub async fn join(self) -> Result<PollOutcome, PollError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PollError::Fatal(format!("poll task aborted: {}", e))),
        }
    }
}

/// Why an individual request was not answered
enum Interrupted {
    Cancelled,
    Failed(PollError),
}

impl<S> JobPoller<S>
where
    S: StatusSource + ?Sized + 'static,
{
    pub fn new(source: Arc<S>, config: PollerConfig) -> Self {
        Self {
            source,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Number of jobs this poller is following right now
    pub fn active_polls(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Start following `job_id` on a new task
    pub fn spawn(&self, job_id: JobId) -> Result<PollHandle, PollError> {
        let guard = self.register(&job_id)?;
        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let poller = self.clone();
        let token = cancel_token.clone();
        let id = job_id.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            poller.poll_loop(&id, &token, &tx).await
        });

        Ok(PollHandle {
            job_id,
            cancel_token,
            events: rx,
            task,
        })
    }

    /// Follow `job_id` on the current task
    pub async fn run(
        &self,
        job_id: JobId,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<PollEvent>,
    ) -> Result<PollOutcome, PollError> {
        let _guard = self.register(&job_id)?;
        self.poll_loop(&job_id, &cancel, &events).await
    }

    fn register(&self, job_id: &JobId) -> Result<ActiveGuard, PollError> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !active.insert(job_id.clone()) {
            return Err(PollError::AlreadyPolling(job_id.clone()));
        }
        Ok(ActiveGuard {
            active: Arc::clone(&self.active),
            job_id: job_id.clone(),
        })
    }

    async fn poll_loop(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<PollEvent>,
    ) -> Result<PollOutcome, PollError> {
        info!(job_id = %job_id, interval_ms = self.config.interval.as_millis() as u64, "Polling job");

        let mut last: Option<(JobStatus, u8)> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(job_id).await);
            }

            let snapshot = match self
                .request(job_id, "fetch_status", cancel, || self.source.fetch_status(job_id))
                .await
            {
                Ok(snapshot) => snapshot,
                Err(Interrupted::Cancelled) => return Ok(self.cancelled(job_id).await),
                Err(Interrupted::Failed(e)) => return Err(e),
            };

            if is_stale(last, &snapshot) {
                debug!(
                    job_id = %job_id,
                    status = %snapshot.status,
                    progress = snapshot.progress,
                    "Ignoring stale status snapshot"
                );
            } else {
                let current = (snapshot.status, snapshot.progress);
                if last != Some(current) {
                    last = Some(current);
                    let _ = events.send(PollEvent::Status(snapshot.clone()));
                }

                match snapshot.status {
                    JobStatus::Processed => {
                        let results = match self
                            .request(job_id, "fetch_results", cancel, || {
                                self.source.fetch_results(job_id)
                            })
                            .await
                        {
                            Ok(results) => results,
                            Err(Interrupted::Cancelled) => {
                                return Ok(self.cancelled(job_id).await)
                            }
                            Err(Interrupted::Failed(e)) => return Err(e),
                        };
                        info!(
                            job_id = %job_id,
                            segments = results.transcript.len(),
                            "Job processed"
                        );
                        let _ = events.send(PollEvent::Completed {
                            job_id: job_id.clone(),
                        });
                        return Ok(PollOutcome::Processed(results));
                    }
                    JobStatus::Failed => {
                        let error_message = snapshot.error.unwrap_or_default();
                        info!(job_id = %job_id, error = %error_message, "Job failed");
                        let _ = events.send(PollEvent::Failed {
                            error_message: error_message.clone(),
                        });
                        return Ok(PollOutcome::Failed { error_message });
                    }
                    _ => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(self.cancelled(job_id).await),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// One request under the retry policy, abandoned on cancellation
    async fn request<T, F, Fut>(
        &self,
        job_id: &JobId,
        operation_name: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, Interrupted>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        let attempt = self.config.retry.run(operation_name, cancel, operation);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
            result = attempt => result,
        };

        match result {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Interrupted::Cancelled),
            Err(RetryFailure::Permanent(FetchError::NotFound(_))) => {
                Err(Interrupted::Failed(PollError::NotFound(job_id.clone())))
            }
            Err(RetryFailure::Permanent(e)) => {
                Err(Interrupted::Failed(PollError::Fatal(e.to_string())))
            }
            Err(RetryFailure::Exhausted { attempts, last }) => {
                Err(Interrupted::Failed(PollError::RetriesExhausted {
                    job_id: job_id.clone(),
                    attempts,
                    last_error: last.to_string(),
                }))
            }
        }
    }

    async fn cancelled(&self, job_id: &JobId) -> PollOutcome {
        info!(job_id = %job_id, "Polling cancelled");

        if self.config.cancel_remote {
            match self.source.cancel_job(job_id).await {
                Ok(response) => info!(
                    job_id = %job_id,
                    cancel_requested = response.cancel_requested,
                    "Remote cancel sent"
                ),
                Err(e) => warn!(job_id = %job_id, error = %e, "Remote cancel failed"),
            }
        }

        PollOutcome::Cancelled
    }
}

/// True if `snapshot` is older than the last accepted one
fn is_stale(last: Option<(JobStatus, u8)>, snapshot: &JobStatusResponse) -> bool {
    match last {
        None => false,
        Some((status, progress)) => {
            snapshot.status.precedes(status)
                || (snapshot.status == status && snapshot.progress < progress)
        }
    }
}
