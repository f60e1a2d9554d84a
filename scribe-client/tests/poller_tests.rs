//! Client Poller behavior against a scripted status source
//!
//! All tests run on a paused tokio clock, so interval and backoff sleeps
//! complete instantly while `Instant::elapsed` still reports virtual time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scribe_common::api::{
    CancelResponse, JobResults, JobStatusResponse, PerformanceMetrics, TranscriptSegment,
};
use scribe_common::{JobId, JobStatus};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use scribe_client::{
    FetchError, JobPoller, PollError, PollEvent, PollOutcome, PollerConfig, RetryPolicy,
    StatusSource,
};

const INTERVAL: Duration = Duration::from_secs(2);

/// Replays a fixed list of status answers; the last one repeats forever
struct ScriptedSource {
    statuses: Mutex<VecDeque<Result<JobStatusResponse, FetchError>>>,
    results: Mutex<VecDeque<Result<JobResults, FetchError>>>,
    cancel_answer: Result<(), FetchError>,
    status_calls: AtomicU32,
    results_calls: AtomicU32,
    cancel_calls: AtomicU32,
    fetch_times: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    fn new(statuses: Vec<Result<JobStatusResponse, FetchError>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            results: Mutex::new(VecDeque::new()),
            cancel_answer: Ok(()),
            status_calls: AtomicU32::new(0),
            results_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
            fetch_times: Mutex::new(Vec::new()),
        }
    }

    fn with_results(self, results: Vec<Result<JobResults, FetchError>>) -> Self {
        *self.results.lock().unwrap() = results.into();
        self
    }

    fn with_cancel_failure(mut self) -> Self {
        self.cancel_answer = Err(FetchError::Transient("connection reset".to_string()));
        self
    }

    fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch_status(&self, _job_id: &JobId) -> Result<JobStatusResponse, FetchError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_times.lock().unwrap().push(Instant::now());
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses.front().cloned().unwrap()
        }
    }

    async fn fetch_results(&self, job_id: &JobId) -> Result<JobResults, FetchError> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(results(job_id)))
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, FetchError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_answer.clone().map(|_| CancelResponse {
            job_id: job_id.clone(),
            cancel_requested: true,
        })
    }
}

fn job_id() -> JobId {
    JobId::from("job-1")
}

fn status(status: JobStatus, progress: u8) -> Result<JobStatusResponse, FetchError> {
    Ok(JobStatusResponse {
        job_id: job_id(),
        status,
        progress,
        step: status.step_label().to_string(),
        error: None,
        updated_at: Utc::now(),
    })
}

fn failed(message: &str, progress: u8) -> Result<JobStatusResponse, FetchError> {
    status(JobStatus::Failed, progress).map(|mut s| {
        s.error = Some(message.to_string());
        s
    })
}

fn transient() -> Result<JobStatusResponse, FetchError> {
    Err(FetchError::Transient("503: model server busy".to_string()))
}

fn results(job_id: &JobId) -> JobResults {
    JobResults {
        job_id: job_id.clone(),
        transcript: vec![TranscriptSegment {
            speaker: "SPEAKER_00".to_string(),
            text: "hello".to_string(),
            start: 0.0,
            end: 1.0,
        }],
        metrics: PerformanceMetrics {
            num_segments: 1,
            num_speakers: 1,
            ..Default::default()
        },
    }
}

fn poller(source: Arc<ScriptedSource>, cancel_remote: bool) -> JobPoller<ScriptedSource> {
    JobPoller::new(
        source,
        PollerConfig {
            interval: INTERVAL,
            retry: RetryPolicy::default(),
            cancel_remote,
        },
    )
}

async fn drain(handle: &mut scribe_client::PollHandle) -> Vec<PollEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.events().recv().await {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_below_limit_are_invisible() {
    let source = Arc::new(ScriptedSource::new(vec![
        transient(),
        transient(),
        status(JobStatus::Transcribing, 25),
        transient(),
        status(JobStatus::Processed, 100),
    ]));
    let mut handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    let events = drain(&mut handle).await;
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, PollOutcome::Processed(_)));
    assert_eq!(source.status_calls(), 5);
    assert!(events
        .iter()
        .all(|e| !matches!(e, PollEvent::Failed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_resolves_once() {
    let source = Arc::new(ScriptedSource::new(vec![
        status(JobStatus::Transcribing, 25),
        transient(),
    ]));
    let mut handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    let events = drain(&mut handle).await;
    let err = handle.join().await.unwrap_err();

    match err {
        PollError::RetriesExhausted {
            job_id: id,
            attempts,
            last_error,
        } => {
            assert_eq!(id, job_id());
            assert_eq!(attempts, 3);
            assert!(last_error.contains("503"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // One good poll, then three failed attempts at the next one
    assert_eq!(source.status_calls(), 4);
    assert_eq!(events.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminates_within_polls_times_interval() {
    let source = Arc::new(ScriptedSource::new(vec![
        status(JobStatus::Uploading, 0),
        status(JobStatus::Transcribing, 25),
        status(JobStatus::Diarizing, 50),
        status(JobStatus::Aligning, 75),
        status(JobStatus::Processed, 100),
    ]));
    let start = Instant::now();
    let handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    let outcome = handle.join().await.unwrap();
    let elapsed = start.elapsed();

    assert!(matches!(outcome, PollOutcome::Processed(_)));
    assert!(elapsed >= INTERVAL * 4);
    assert!(elapsed < INTERVAL * 4 + Duration::from_millis(100));

    // Never faster than the interval
    let times = source.fetch_times.lock().unwrap().clone();
    assert_eq!(times.len(), 5);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= INTERVAL);
    }
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_fatal_without_retry() {
    let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::NotFound(
        "Job not found: job-1".to_string(),
    ))]));
    let handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    assert_eq!(handle.join().await.unwrap_err(), PollError::NotFound(job_id()));
    assert_eq!(source.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_fatal_without_retry() {
    let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::Fatal(
        "400: bad request".to_string(),
    ))]));
    let handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    assert!(matches!(handle.join().await.unwrap_err(), PollError::Fatal(_)));
    assert_eq!(source.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_reports_message_and_skips_results() {
    let source = Arc::new(ScriptedSource::new(vec![
        status(JobStatus::Diarizing, 50),
        failed("diarization model unavailable", 50),
    ]));
    let mut handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    let events = drain(&mut handle).await;
    let outcome = handle.join().await.unwrap();

    assert_eq!(
        outcome,
        PollOutcome::Failed {
            error_message: "diarization model unavailable".to_string()
        }
    );
    assert_eq!(
        events.last(),
        Some(&PollEvent::Failed {
            error_message: "diarization model unavailable".to_string()
        })
    );
    assert_eq!(source.results_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_snapshots_ignored_and_completed_once() {
    let source = Arc::new(ScriptedSource::new(vec![
        status(JobStatus::Diarizing, 50),
        status(JobStatus::Transcribing, 25),
        status(JobStatus::Diarizing, 50),
        status(JobStatus::Aligning, 75),
        status(JobStatus::Processed, 100),
    ]));
    let mut handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    let events = drain(&mut handle).await;
    handle.join().await.unwrap();

    let statuses: Vec<JobStatus> = events
        .iter()
        .filter_map(|e| match e {
            PollEvent::Status(s) => Some(s.status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Diarizing, JobStatus::Aligning, JobStatus::Processed]
    );

    let completed = events
        .iter()
        .filter(|e| matches!(e, PollEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert!(matches!(events.last(), Some(PollEvent::Completed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_results_fetch_is_retried() {
    let source = Arc::new(
        ScriptedSource::new(vec![status(JobStatus::Processed, 100)]).with_results(vec![
            Err(FetchError::Transient("timeout".to_string())),
            Ok(results(&job_id())),
        ]),
    );
    let handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    match handle.join().await.unwrap() {
        PollOutcome::Processed(results) => assert_eq!(results.transcript.len(), 1),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(source.results_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling_without_remote_cancel() {
    let source = Arc::new(ScriptedSource::new(vec![status(JobStatus::Transcribing, 25)]));
    let handle = poller(source.clone(), false).spawn(job_id()).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.cancel();
    let calls_at_cancel = source.status_calls();

    assert_eq!(handle.join().await.unwrap(), PollOutcome::Cancelled);
    assert_eq!(source.status_calls(), calls_at_cancel);
    assert_eq!(source.cancel_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_remote_failure_is_only_logged() {
    let source = Arc::new(
        ScriptedSource::new(vec![status(JobStatus::Transcribing, 25)]).with_cancel_failure(),
    );
    let handle = poller(source.clone(), true).spawn(job_id()).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();

    assert_eq!(handle.join().await.unwrap(), PollOutcome::Cancelled);
    assert_eq!(source.cancel_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let source = Arc::new(ScriptedSource::new(vec![transient()]));
    let poller = JobPoller::new(
        source.clone(),
        PollerConfig {
            interval: INTERVAL,
            retry: RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(30),
            },
            cancel_remote: true,
        },
    );
    let token = CancellationToken::new();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let outcome = poller.run(job_id(), token, tx).await.unwrap();

    assert_eq!(outcome, PollOutcome::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(source.status_calls(), 1);
    assert_eq!(source.cancel_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_poll_per_job_id() {
    let source = Arc::new(ScriptedSource::new(vec![status(JobStatus::Transcribing, 25)]));
    let poller = poller(source, false);

    let first = poller.spawn(job_id()).unwrap();
    assert_eq!(
        poller.spawn(job_id()).err(),
        Some(PollError::AlreadyPolling(job_id()))
    );
    let other = poller.spawn(JobId::from("job-2")).unwrap();
    assert_eq!(poller.active_polls(), 2);

    first.cancel();
    first.join().await.unwrap();
    other.cancel();
    other.join().await.unwrap();
    assert_eq!(poller.active_polls(), 0);

    // Free again once the earlier loop has ended
    let again = poller.spawn(job_id()).unwrap();
    again.cancel();
    assert_eq!(again.join().await.unwrap(), PollOutcome::Cancelled);
}
