use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::assessment::pipeline::{AssessmentContext, JobPipeline, PipelineOutcome};
use crate::errors::AppError;
use crate::models::job::{QualificationRecord, QuarantineRecord};
use crate::store::AssessmentStore;

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentStatus {
    pub job_id: String,
    pub records: Vec<QualificationRecord>,
    pub quarantine: Option<QuarantineRecord>,
}

/// Assesses one job on request. Runs for the same job are serialized by a per-job
/// lock, so overlapping requests assess once and the later one sees the records.
/// Different jobs never wait on each other.
#[derive(Clone)]
pub struct AssessmentTrigger {
    pipeline: JobPipeline,
    store: Arc<dyn AssessmentStore>,
    running: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AssessmentTrigger {
    pub fn new(pipeline: JobPipeline, store: Arc<dyn AssessmentStore>) -> Self {
        Self {
            pipeline,
            store,
            running: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Returns the job's qualification records, running the pipeline only if there are none.
    /// An empty list means the pipeline failed; the reason is in the job's quarantine record.
    pub async fn assess(&self, job_id: &str) -> Result<Vec<QualificationRecord>, AppError> {
        if let Some(existing) = self.existing_records(job_id).await? {
            return Ok(existing);
        }

        let lock = self.job_lock(job_id);
        let result = {
            let _guard = lock.lock().await;
            self.assess_locked(job_id).await
        };
        self.release_lock(job_id, lock);
        result
    }

    async fn assess_locked(&self, job_id: &str) -> Result<Vec<QualificationRecord>, AppError> {
        // A request for the same job may have finished while this one waited.
        if let Some(existing) = self.existing_records(job_id).await? {
            return Ok(existing);
        }

        let job = self
            .store
            .get_job(job_id)
            .await
            .map_err(AppError::store)?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?
            .into_job()
            .ok_or_else(|| AppError::Validation(format!("job {job_id} has no description")))?;

        let ctx = AssessmentContext::load(self.store.as_ref()).await?;

        match self.pipeline.run(&job, &ctx).await? {
            PipelineOutcome::Completed { records } => {
                self.store
                    .delete_quarantine(job_id)
                    .await
                    .map_err(AppError::store)?;
                Ok(records)
            }
            PipelineOutcome::Quarantined { reason, .. } => {
                info!("On-demand assessment of {job_id} ended in quarantine ({reason})");
                Ok(Vec::new())
            }
        }
    }

    /// Existing records, after dropping any quarantine they make stale.
    async fn existing_records(
        &self,
        job_id: &str,
    ) -> Result<Option<Vec<QualificationRecord>>, AppError> {
        let existing = self
            .store
            .qualifications_for_job(job_id)
            .await
            .map_err(AppError::store)?;
        if existing.is_empty() {
            return Ok(None);
        }
        let stale = self
            .store
            .delete_quarantine(job_id)
            .await
            .map_err(AppError::store)?;
        if stale > 0 {
            info!("Removed stale quarantine for {job_id}");
        }
        Ok(Some(existing))
    }

    fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.entry(job_id.to_string()).or_default().clone()
    }

    fn release_lock(&self, job_id: &str, lock: Arc<Mutex<()>>) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        // The map's handle plus ours: nobody else is waiting on this job.
        if Arc::strong_count(&lock) <= 2 {
            running.remove(job_id);
        }
    }

    pub async fn status(&self, job_id: &str) -> Result<AssessmentStatus, AppError> {
        if self
            .store
            .get_job(job_id)
            .await
            .map_err(AppError::store)?
            .is_none()
        {
            return Err(AppError::NotFound(format!("job {job_id}")));
        }

        let records = self
            .store
            .qualifications_for_job(job_id)
            .await
            .map_err(AppError::store)?;
        let quarantine = self
            .store
            .latest_quarantine(job_id)
            .await
            .map_err(AppError::store)?;

        Ok(AssessmentStatus {
            job_id: job_id.to_string(),
            records,
            quarantine,
        })
    }
}
