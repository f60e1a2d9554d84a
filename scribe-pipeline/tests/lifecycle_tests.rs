//! Job lifecycle tests against the Stage Runner and both store backends

use std::sync::Arc;
use std::time::Duration;

use scribe_common::events::{EventBus, ScribeEvent};
use scribe_common::{JobId, JobStatus};
use tempfile::TempDir;

use scribe_pipeline::models::{AudioUpload, Job, JobPatch, JobSpec, ResultRef};
use scribe_pipeline::services::simulated::{SimulatedFailure, SimulatedModels};
use scribe_pipeline::services::stage_runner::RunnerSettings;
use scribe_pipeline::services::{StageRunner, TranscribeOptions};
use scribe_pipeline::store::{JobStore, MemoryJobStore, SqliteJobStore, StoreError};

fn runner_with(store: Arc<dyn JobStore>, models: SimulatedModels, storage: &TempDir) -> (StageRunner, EventBus) {
    let models = Arc::new(models);
    let event_bus = EventBus::new(256);
    let runner = StageRunner::new(
        store,
        models.clone(),
        models,
        event_bus.clone(),
        RunnerSettings {
            storage_dir: storage.path().to_path_buf(),
            transcribe_options: TranscribeOptions::default(),
        },
    );
    (runner, event_bus)
}

/// Collect every record published on the job's watch channel
async fn run_and_observe(runner: &StageRunner, upload: AudioUpload) -> (Job, Vec<Job>) {
    let handle = runner.submit(upload).await.unwrap();
    let mut updates = handle.subscribe();
    let observer = tokio::spawn(async move {
        let mut seen = vec![updates.borrow().clone()];
        while updates.changed().await.is_ok() {
            seen.push(updates.borrow_and_update().clone());
        }
        seen
    });
    let final_job = handle.wait().await.unwrap();
    (final_job, observer.await.unwrap())
}

fn status_rank(status: JobStatus) -> usize {
    JobStatus::ALL.iter().position(|s| *s == status).unwrap()
}

#[tokio::test]
async fn test_observed_history_is_monotonic() {
    let storage = TempDir::new().unwrap();
    let (runner, _) = runner_with(Arc::new(MemoryJobStore::new()), SimulatedModels::new(), &storage);

    let (final_job, history) =
        run_and_observe(&runner, AudioUpload::new("call.wav", Some(3), vec![1u8; 96_000])).await;

    assert_eq!(final_job.status, JobStatus::Processed);
    for pair in history.windows(2) {
        assert!(pair[0].progress <= pair[1].progress);
        assert!(status_rank(pair[0].status) <= status_rank(pair[1].status));
        assert!(pair[0].updated_at <= pair[1].updated_at);
    }
    // result_ref appears only on the processed record
    for job in &history {
        assert_eq!(job.result_ref.is_some(), job.status == JobStatus::Processed);
    }
}

#[tokio::test]
async fn test_failure_mid_pipeline() {
    let storage = TempDir::new().unwrap();
    let models = SimulatedModels::new().with_failure(SimulatedFailure::Diarization(
        "diarization model unavailable".to_string(),
    ));
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let (runner, _) = runner_with(Arc::clone(&store), models, &storage);

    let (final_job, history) =
        run_and_observe(&runner, AudioUpload::new("call.wav", None, vec![1u8; 1000])).await;

    assert_eq!(final_job.status, JobStatus::Failed);
    assert_eq!(
        final_job.error_message.as_deref(),
        Some("diarization model unavailable")
    );
    assert!(final_job.result_ref.is_none());
    assert!(history.iter().any(|j| j.status == JobStatus::Diarizing));
    assert!(history.iter().all(|j| j.status != JobStatus::Aligning));

    // Terminal record rejects every further patch
    let err = store
        .update(&final_job.id, JobPatch::status(JobStatus::Aligning))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
    assert_eq!(store.get(&final_job.id).await.unwrap(), final_job);
}

#[tokio::test]
async fn test_processed_job_is_absorbing() {
    let storage = TempDir::new().unwrap();
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let (runner, _) = runner_with(Arc::clone(&store), SimulatedModels::new(), &storage);

    let (final_job, _) =
        run_and_observe(&runner, AudioUpload::new("call.wav", None, vec![1u8; 1000])).await;
    assert_eq!(final_job.status, JobStatus::Processed);

    for patch in [
        JobPatch::failed("late failure"),
        JobPatch::processed(ResultRef::new("results/other")),
        JobPatch::progress(100),
    ] {
        assert!(matches!(
            store.update(&final_job.id, patch).await.unwrap_err(),
            StoreError::InvalidTransition { .. }
        ));
    }
}

#[tokio::test]
async fn test_duplicate_creation_rejected() {
    let store = MemoryJobStore::new();
    let id = JobId::generate();
    let spec = JobSpec {
        filename: "a.wav".to_string(),
        num_speakers: None,
    };

    store.create(id.clone(), spec.clone()).await.unwrap();
    assert!(matches!(
        store.create(id.clone(), spec).await.unwrap_err(),
        StoreError::DuplicateId(_)
    ));
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_jobs_each_finish() {
    let storage = TempDir::new().unwrap();
    let latency = Duration::from_millis(20);
    let (runner, _) = runner_with(
        Arc::new(MemoryJobStore::new()),
        SimulatedModels::new().with_latency(latency, latency),
        &storage,
    );

    let mut handles = Vec::new();
    for i in 0..5 {
        let upload = AudioUpload::new(format!("call-{}.wav", i), None, vec![1u8; 1000]);
        handles.push(runner.submit(upload).await.unwrap());
    }

    let mut ids = Vec::new();
    for handle in handles {
        let job = handle.wait().await.unwrap();
        assert_eq!(job.status, JobStatus::Processed);
        ids.push(job.id);
    }
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(runner.active_jobs().await, 0);
}

#[tokio::test]
async fn test_events_published_in_order() {
    let storage = TempDir::new().unwrap();
    let (runner, event_bus) =
        runner_with(Arc::new(MemoryJobStore::new()), SimulatedModels::new(), &storage);
    let mut rx = event_bus.subscribe();

    let handle = runner
        .submit(AudioUpload::new("call.wav", None, vec![1u8; 1000]))
        .await
        .unwrap();
    let job_id = handle.job_id().clone();
    handle.wait().await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id(), &job_id);
        events.push(event);
    }

    assert!(matches!(events.first(), Some(ScribeEvent::JobCreated { .. })));
    assert!(matches!(events.last(), Some(ScribeEvent::JobProcessed { .. })));
    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            ScribeEvent::JobUpdated { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_sqlite_backed_runner() {
    let storage = TempDir::new().unwrap();
    let store: Arc<dyn JobStore> =
        Arc::new(SqliteJobStore::connect(&storage.path().join("jobs.db")).await.unwrap());
    let (runner, _) = runner_with(Arc::clone(&store), SimulatedModels::new(), &storage);

    let handle = runner
        .submit(AudioUpload::new("call.wav", Some(2), vec![1u8; 64_000]))
        .await
        .unwrap();
    let job = handle.wait().await.unwrap();

    assert_eq!(job.status, JobStatus::Processed);
    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Processed);
    assert_eq!(stored.progress, 100);

    let results = store
        .load_results(stored.result_ref.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(results.metrics.num_speakers, 2);
    assert_eq!(results.metrics.num_segments, results.transcript.len());
}
