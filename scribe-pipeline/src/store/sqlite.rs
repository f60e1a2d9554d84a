//! SQLite Job Store
//!
//! Durable backend selected when `database_path` is configured. Writes are
//! serialized through a mutex around a read-validate-write transaction;
//! reads go straight to the pool.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use scribe_common::api::JobResults;
use scribe_common::{JobId, JobStatus};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tokio::sync::Mutex;

use super::{result_ref_for, JobStore, StoreError, StoreResult};
use crate::models::{Job, JobPatch, JobSpec, ResultRef};

pub struct SqliteJobStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables
    pub async fn connect(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Corrupt(format!(
                        "Cannot create database folder {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        // mode=rwc: read, write, create
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to database: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database (single connection so every query sees it)
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        init_tables(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Fail every job left non-terminal by a previous process
    ///
    /// Job tasks die with the process, so nothing would ever advance these
    /// records again. Call once at startup, before accepting requests.
    /// Returns the number of jobs failed.
    pub async fn fail_interrupted_jobs(&self) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, error_message = ?, result_ref = NULL, updated_at = ?
            WHERE status NOT IN (?, ?)
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(INTERRUPTED_MESSAGE)
        .bind(timestamp(&Utc::now()))
        .bind(JobStatus::Processed.as_str())
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Error message recorded on jobs cut off by a restart
pub const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

async fn init_tables(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            result_ref TEXT,
            filename TEXT NOT NULL,
            num_speakers INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_results (
            result_ref TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (jobs, job_results)");
    Ok(())
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    // Fixed width so lexical order matches time order
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> StoreResult<DateTime<Utc>> {
    let raw: String = row.get(column);
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("Failed to parse {}: {}", column, e)))
}

fn job_from_row(row: &SqliteRow) -> StoreResult<Job> {
    let status: String = row.get("status");
    let status: JobStatus = status
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("Failed to parse status: {}", e)))?;

    let progress: i64 = row.get("progress");
    let progress = u8::try_from(progress)
        .map_err(|_| StoreError::Corrupt(format!("Progress out of range: {}", progress)))?;

    let num_speakers: Option<i64> = row.get("num_speakers");
    let result_ref: Option<String> = row.get("result_ref");

    Ok(Job {
        id: JobId::from(row.get::<String, _>("job_id")),
        status,
        progress,
        error_message: row.get("error_message"),
        result_ref: result_ref.map(ResultRef::new),
        filename: row.get("filename"),
        num_speakers: num_speakers.and_then(|n| u32::try_from(n).ok()),
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

const SELECT_JOB: &str = r#"
    SELECT job_id, status, progress, error_message, result_ref,
           filename, num_speakers, created_at, updated_at
    FROM jobs
"#;

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, id: JobId, spec: JobSpec) -> StoreResult<Job> {
        let job = Job::new(id.clone(), spec, Utc::now());
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, status, progress, error_message, result_ref,
                filename, num_speakers, created_at, updated_at
            ) VALUES (?, ?, ?, NULL, NULL, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(&job.filename)
        .bind(job.num_speakers.map(i64::from))
        .bind(timestamp(&job.created_at))
        .bind(timestamp(&job.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let row = sqlx::query(&format!("{} WHERE job_id = ?", SELECT_JOB))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn update(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("{} WHERE job_id = ?", SELECT_JOB))
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::UnknownId(id.clone()))?;

        let mut job = job_from_row(&row)?;
        job.apply(&patch, Utc::now())
            .map_err(|e| StoreError::from_patch(id, e))?;

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?, progress = ?, error_message = ?, result_ref = ?,
                updated_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(&job.error_message)
        .bind(job.result_ref.as_ref().map(ResultRef::as_str))
        .bind(timestamp(&job.updated_at))
        .bind(job.id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at, job_id", SELECT_JOB))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn save_results(&self, id: &JobId, results: &JobResults) -> StoreResult<ResultRef> {
        let payload = serde_json::to_string(results)?;
        let result_ref = result_ref_for(id);
        let _guard = self.write_lock.lock().await;

        let exists: Option<String> = sqlx::query_scalar("SELECT job_id FROM jobs WHERE job_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::UnknownId(id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO job_results (result_ref, job_id, payload) VALUES (?, ?, ?)
            ON CONFLICT(result_ref) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(result_ref.as_str())
        .bind(id.as_str())
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        Ok(result_ref)
    }

    async fn load_results(&self, result_ref: &ResultRef) -> StoreResult<JobResults> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM job_results WHERE result_ref = ?")
                .bind(result_ref.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(StoreError::ResultsNotFound(result_ref.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_common::api::{PerformanceMetrics, TranscriptSegment};
    use tempfile::TempDir;

    fn spec(name: &str) -> JobSpec {
        JobSpec {
            filename: name.to_string(),
            num_speakers: Some(2),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let id = JobId::from("persisted");

        {
            let store = SqliteJobStore::connect(&db_path).await.unwrap();
            store.create(id.clone(), spec("a.wav")).await.unwrap();
            store
                .update(&id, JobPatch::status(JobStatus::Transcribing))
                .await
                .unwrap();
            store.update(&id, JobPatch::progress(50)).await.unwrap();
        }

        let store = SqliteJobStore::connect(&db_path).await.unwrap();
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Transcribing);
        assert_eq!(job.progress, 50);
        assert_eq!(job.num_speakers, Some(2));
        assert!(job.updated_at >= job.created_at);
    }

    #[tokio::test]
    async fn test_interrupted_jobs_failed_after_restart() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let running = JobId::from("running");
        let done = JobId::from("done");

        let before = {
            let store = SqliteJobStore::connect(&db_path).await.unwrap();
            store.create(running.clone(), spec("a.wav")).await.unwrap();
            store.update(&running, JobPatch::progress(25)).await.unwrap();
            let job = store
                .update(&running, JobPatch::status(JobStatus::Transcribing))
                .await
                .unwrap();

            store.create(done.clone(), spec("b.wav")).await.unwrap();
            store.update(&done, JobPatch::failed("boom")).await.unwrap();
            job
        };

        let store = SqliteJobStore::connect(&db_path).await.unwrap();
        assert_eq!(store.fail_interrupted_jobs().await.unwrap(), 1);

        let job = store.get(&running).await.unwrap();
        assert!(job.status.is_terminal());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(job.progress, 25);
        assert!(job.result_ref.is_none());
        assert!(job.updated_at >= before.updated_at);

        // Already-terminal jobs keep their record
        let finished = store.get(&done).await.unwrap();
        assert_eq!(finished.error_message.as_deref(), Some("boom"));

        // Second pass finds nothing left to fail
        assert_eq!(store.fail_interrupted_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        let id = JobId::from("dup");
        store.create(id.clone(), spec("a.wav")).await.unwrap();

        assert!(matches!(
            store.create(id.clone(), spec("b.wav")).await.unwrap_err(),
            StoreError::DuplicateId(_)
        ));
        assert_eq!(store.get(&id).await.unwrap().filename, "a.wav");

        let other = JobId::from("other");
        assert!(matches!(
            store.get(&other).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.update(&other, JobPatch::progress(1)).await.unwrap_err(),
            StoreError::UnknownId(_)
        ));
    }

    #[tokio::test]
    async fn test_terminal_state_is_absorbing() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        let id = JobId::from("t");
        store.create(id.clone(), spec("a.wav")).await.unwrap();
        store.update(&id, JobPatch::failed("boom")).await.unwrap();

        let err = store
            .update(&id, JobPatch::status(JobStatus::Transcribing))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_processed_with_results() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        let id = JobId::from("p");
        store.create(id.clone(), spec("a.wav")).await.unwrap();

        let results = JobResults {
            job_id: id.clone(),
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
        };
        let result_ref = store.save_results(&id, &results).await.unwrap();
        let job = store
            .update(&id, JobPatch::processed(result_ref.clone()))
            .await
            .unwrap();

        assert_eq!(job.progress, 100);
        assert_eq!(job.result_ref.as_ref(), Some(&result_ref));
        assert_eq!(store.load_results(&result_ref).await.unwrap(), results);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_creation() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        for name in ["first", "second", "third"] {
            store
                .create(JobId::from(name), spec(&format!("{}.wav", name)))
                .await
                .unwrap();
        }

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id.to_string())
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }
}
