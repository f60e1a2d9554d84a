//! Stage Runner
//!
//! Drives one job through `upload → transcribe → diarize → align → complete`
//! on its own tokio task. The task is the only writer of its job record.
//!
//! # Progress checkpoints
//! | stage      | status on entry | progress on success |
//! |------------|-----------------|---------------------|
//! | upload     | uploading       | 25                  |
//! | transcribe | transcribing    | 50                  |
//! | diarize    | diarizing       | 75                  |
//! | align      | aligning        | 100 (processed)     |
//!
//! Cancellation is honoured at stage boundaries only. A stage that has
//! started runs to completion (or failure) before the token is checked.

use chrono::Utc;
use scribe_common::api::{JobResults, PerformanceMetrics, TranscriptSegment};
use scribe_common::events::{EventBus, ScribeEvent};
use scribe_common::{JobId, JobStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::{aligner, Diarizer, StageError, TranscribeOptions, Transcriber};
use crate::models::{AudioUpload, Job, JobPatch};
use crate::store::{JobStore, StoreError, StoreResult};

/// Message recorded when a job is stopped by request
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Handle to one submitted job
pub struct JobHandle {
    job_id: JobId,
    updates: watch::Receiver<Job>,
    cancel_token: CancellationToken,
    task: JoinHandle<Job>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Receiver that sees every committed change to the job record
    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.updates.clone()
    }

    /// Request cancellation at the next stage boundary
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for the job task and return the final record
    pub async fn wait(self) -> Result<Job, JoinError> {
        self.task.await
    }
}

/// Runner settings taken from the service configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Uploaded audio lands in `<storage_dir>/<job_id>/<filename>`
    pub storage_dir: PathBuf,
    pub transcribe_options: TranscribeOptions,
}

struct RunnerInner {
    store: Arc<dyn JobStore>,
    transcriber: Arc<dyn Transcriber>,
    diarizer: Arc<dyn Diarizer>,
    event_bus: EventBus,
    settings: RunnerSettings,
    /// Tokens of jobs whose task is still running
    cancellation_tokens: RwLock<HashMap<JobId, CancellationToken>>,
}

/// Spawns and tracks job tasks
#[derive(Clone)]
pub struct StageRunner {
    inner: Arc<RunnerInner>,
}

/// Why a run stopped before PROCESSED
enum RunAbort {
    Stage(StageError),
    Cancelled,
    Store(StoreError),
}

impl From<StoreError> for RunAbort {
    fn from(err: StoreError) -> Self {
        RunAbort::Store(err)
    }
}

impl From<StageError> for RunAbort {
    fn from(err: StageError) -> Self {
        RunAbort::Stage(err)
    }
}

/// Per-job state owned by the job task
struct JobRun {
    job_id: JobId,
    updates: watch::Sender<Job>,
    cancel_token: CancellationToken,
}

impl StageRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        transcriber: Arc<dyn Transcriber>,
        diarizer: Arc<dyn Diarizer>,
        event_bus: EventBus,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                store,
                transcriber,
                diarizer,
                event_bus,
                settings,
                cancellation_tokens: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    /// Create the job record and start its pipeline task
    pub async fn submit(&self, upload: AudioUpload) -> StoreResult<JobHandle> {
        let job_id = JobId::generate();
        let job = self.inner.store.create(job_id.clone(), upload.spec.clone()).await?;

        tracing::info!(
            job_id = %job_id,
            filename = %job.filename,
            bytes = upload.bytes.len(),
            "Job created"
        );
        self.inner.event_bus.emit_lossy(ScribeEvent::JobCreated {
            job_id: job_id.clone(),
            filename: job.filename.clone(),
            timestamp: Utc::now(),
        });

        let (tx, rx) = watch::channel(job);
        let cancel_token = CancellationToken::new();
        self.inner
            .cancellation_tokens
            .write()
            .await
            .insert(job_id.clone(), cancel_token.clone());

        let run = JobRun {
            job_id: job_id.clone(),
            updates: tx,
            cancel_token: cancel_token.clone(),
        };
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let job_id = run.job_id.clone();
            inner.run_job(&run, upload.bytes).await;
            inner.cancellation_tokens.write().await.remove(&job_id);
            let final_job = run.updates.borrow().clone();
            final_job
        });

        Ok(JobHandle {
            job_id,
            updates: rx,
            cancel_token,
            task,
        })
    }

    /// Trip the cancellation token of a running job
    ///
    /// Returns false when no task for `job_id` is running.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        match self.inner.cancellation_tokens.read().await.get(job_id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                tracing::info!(job_id = %job_id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Number of job tasks still running
    pub async fn active_jobs(&self) -> usize {
        self.inner.cancellation_tokens.read().await.len()
    }
}

impl RunnerInner {
    async fn run_job(&self, run: &JobRun, bytes: Vec<u8>) {
        tracing::info!(job_id = %run.job_id, "Pipeline task started");

        let abort = match self.drive(run, bytes).await {
            Ok(()) => return,
            Err(abort) => abort,
        };

        let message = match abort {
            RunAbort::Stage(e) => {
                tracing::warn!(job_id = %run.job_id, error = %e, "Stage failed");
                e.to_string()
            }
            RunAbort::Cancelled => {
                tracing::info!(job_id = %run.job_id, "Job cancelled at stage boundary");
                CANCELLED_MESSAGE.to_string()
            }
            RunAbort::Store(e) => {
                if e.is_lifecycle_violation() {
                    tracing::error!(job_id = %run.job_id, error = %e, "Lifecycle violation in stage runner");
                } else {
                    tracing::error!(job_id = %run.job_id, error = %e, "Job store error");
                }
                format!("internal error: {}", e)
            }
        };

        match self.commit(run, JobPatch::failed(message.clone())).await {
            Ok(_) => {
                self.event_bus.emit_lossy(ScribeEvent::JobFailed {
                    job_id: run.job_id.clone(),
                    error_message: message,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!(
                    job_id = %run.job_id,
                    error = %e,
                    "Could not record job failure"
                );
            }
        }
    }

    async fn drive(&self, run: &JobRun, bytes: Vec<u8>) -> Result<(), RunAbort> {
        let started = Instant::now();
        let mut metrics = PerformanceMetrics::default();

        // Upload (status already UPLOADING from create)
        self.checkpoint(run)?;
        let stage_start = Instant::now();
        let filename = run.updates.borrow().filename.clone();
        let audio_path = self.persist_upload(&run.job_id, &filename, &bytes).await?;
        drop(bytes);
        metrics.upload_time = stage_start.elapsed().as_secs_f64();
        self.advance(run, 25).await?;

        // Transcribe
        self.checkpoint(run)?;
        self.enter(run, JobStatus::Transcribing).await?;
        let stage_start = Instant::now();
        let transcription = self
            .transcriber
            .transcribe(&audio_path, &self.settings.transcribe_options)
            .await?;
        metrics.transcription_time = stage_start.elapsed().as_secs_f64();
        metrics.audio_duration = transcription.duration;
        tracing::debug!(
            job_id = %run.job_id,
            segments = transcription.segments.len(),
            language = %transcription.language,
            "Transcription complete"
        );
        self.advance(run, 50).await?;

        // Diarize
        self.checkpoint(run)?;
        self.enter(run, JobStatus::Diarizing).await?;
        let stage_start = Instant::now();
        let num_speakers = run.updates.borrow().num_speakers;
        let diarization = self.diarizer.diarize(&audio_path, num_speakers).await?;
        metrics.diarization_time = stage_start.elapsed().as_secs_f64();
        tracing::debug!(
            job_id = %run.job_id,
            turns = diarization.turns.len(),
            speakers = diarization.speaker_count(),
            "Diarization complete"
        );
        self.advance(run, 75).await?;

        // Align and complete
        self.checkpoint(run)?;
        self.enter(run, JobStatus::Aligning).await?;
        let stage_start = Instant::now();
        let transcript = aligner::align(&transcription, &diarization);
        metrics.alignment_time = stage_start.elapsed().as_secs_f64();

        metrics.total_time = started.elapsed().as_secs_f64();
        metrics.rtf = if metrics.audio_duration > 0.0 {
            metrics.total_time / metrics.audio_duration
        } else {
            0.0
        };
        metrics.num_segments = transcript.len();
        metrics.num_speakers = distinct_speakers(&transcript);

        let results = JobResults {
            job_id: run.job_id.clone(),
            transcript,
            metrics,
        };
        let result_ref = self.store.save_results(&run.job_id, &results).await?;
        self.commit(run, JobPatch::processed(result_ref)).await?;

        tracing::info!(
            job_id = %run.job_id,
            segments = results.metrics.num_segments,
            total_time = results.metrics.total_time,
            rtf = results.metrics.rtf,
            "Job processed"
        );
        self.event_bus.emit_lossy(ScribeEvent::JobProcessed {
            job_id: run.job_id.clone(),
            num_segments: results.metrics.num_segments,
            total_time: results.metrics.total_time,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn checkpoint(&self, run: &JobRun) -> Result<(), RunAbort> {
        if run.cancel_token.is_cancelled() {
            Err(RunAbort::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn enter(&self, run: &JobRun, status: JobStatus) -> StoreResult<Job> {
        tracing::info!(job_id = %run.job_id, status = %status, "Entering stage");
        self.commit_and_announce(run, JobPatch::status(status)).await
    }

    async fn advance(&self, run: &JobRun, progress: u8) -> StoreResult<Job> {
        self.commit_and_announce(run, JobPatch::progress(progress)).await
    }

    async fn commit_and_announce(&self, run: &JobRun, patch: JobPatch) -> StoreResult<Job> {
        let job = self.commit(run, patch).await?;
        self.event_bus.emit_lossy(ScribeEvent::JobUpdated {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            timestamp: job.updated_at,
        });
        Ok(job)
    }

    /// Write to the store, then publish on the job's watch channel
    async fn commit(&self, run: &JobRun, patch: JobPatch) -> StoreResult<Job> {
        let job = self.store.update(&run.job_id, patch).await?;
        run.updates.send_replace(job.clone());
        Ok(job)
    }

    async fn persist_upload(
        &self,
        job_id: &JobId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StageError> {
        if bytes.is_empty() {
            return Err(StageError::EmptyUpload);
        }

        let job_dir = self.settings.storage_dir.join(job_id.as_str());
        tokio::fs::create_dir_all(&job_dir).await?;
        let path = job_dir.join(sanitize_filename(filename));
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(job_id = %job_id, path = %path.display(), "Upload stored");
        Ok(path)
    }
}

fn distinct_speakers(transcript: &[TranscriptSegment]) -> usize {
    let mut speakers: Vec<&str> = transcript.iter().map(|s| s.speaker.as_str()).collect();
    speakers.sort_unstable();
    speakers.dedup();
    speakers.len()
}

/// Reduce a client-supplied name to a safe single path component
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "audio".to_string()
    } else {
        cleaned
    }
}
