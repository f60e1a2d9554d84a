//! In-memory Job Store (records live as long as the server)

use async_trait::async_trait;
use chrono::Utc;
use scribe_common::api::JobResults;
use scribe_common::JobId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{result_ref_for, JobStore, StoreError, StoreResult};
use crate::models::{Job, JobPatch, JobSpec, ResultRef};

/// `RwLock<HashMap>` backed store
///
/// Reads hold the read lock only long enough to clone a record. Updates
/// validate and write under the write lock, so updates to one id are
/// totally ordered.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    results: RwLock<HashMap<ResultRef, JobResults>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: JobId, spec: JobSpec) -> StoreResult<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }
        let job = Job::new(id.clone(), spec, Utc::now());
        jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownId(id.clone()))?;

        // Apply to a copy so a rejected patch leaves the stored record intact
        let mut next = job.clone();
        next.apply(&patch, Utc::now())
            .map_err(|e| StoreError::from_patch(id, e))?;
        *job = next.clone();
        Ok(next)
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(all)
    }

    async fn save_results(&self, id: &JobId, results: &JobResults) -> StoreResult<ResultRef> {
        {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            if !jobs.contains_key(id) {
                return Err(StoreError::UnknownId(id.clone()));
            }
        }
        let result_ref = result_ref_for(id);
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result_ref.clone(), results.clone());
        Ok(result_ref)
    }

    async fn load_results(&self, result_ref: &ResultRef) -> StoreResult<JobResults> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(result_ref)
            .cloned()
            .ok_or_else(|| StoreError::ResultsNotFound(result_ref.clone()))
    }
}
