use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::assessment::pipeline::{AssessmentContext, JobPipeline, PipelineOutcome};
use crate::errors::AppError;
use crate::models::job::Job;
use crate::store::{AssessmentStore, CandidateQuery, SelectionMode};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Tasks that ended in an error or a panic rather than a pipeline outcome.
    pub exceptions: usize,
    pub quarantine_removed: u64,
    pub stale_quarantine_cleaned: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

enum TaskResult {
    Completed { quarantine_removed: u64 },
    Quarantined,
}

/// Runs the pipeline over a selection of jobs, at most `concurrency` at a time.
#[derive(Clone)]
pub struct BatchOrchestrator {
    pipeline: JobPipeline,
    store: Arc<dyn AssessmentStore>,
}

impl BatchOrchestrator {
    pub fn new(pipeline: JobPipeline, store: Arc<dyn AssessmentStore>) -> Self {
        Self { pipeline, store }
    }

    pub async fn run(
        &self,
        query: CandidateQuery,
        concurrency: usize,
    ) -> Result<BatchSummary, AppError> {
        let ctx = Arc::new(AssessmentContext::load(self.store.as_ref()).await?);

        let stale = self
            .store
            .cleanup_stale_quarantine()
            .await
            .map_err(AppError::store)?;
        if stale > 0 {
            info!("Removed {stale} stale quarantine records");
        }

        let jobs = self
            .store
            .candidate_jobs(&query)
            .await
            .map_err(AppError::store)?;
        if jobs.is_empty() {
            info!("No {:?} jobs within {} days", query.mode, query.days_back);
            return Ok(BatchSummary {
                stale_quarantine_cleaned: stale,
                message: Some("No jobs need assessment".to_string()),
                ..Default::default()
            });
        }

        let limit = concurrency.max(1);
        info!(
            "Assessing {} jobs ({:?}), concurrency {limit}",
            jobs.len(),
            query.mode
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut handles = Vec::with_capacity(jobs.len());

        // Every candidate is spawned before anything is awaited, so dropping the
        // caller mid-batch still lets all of them run to completion.
        for job in jobs {
            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            let store = self.store.clone();
            let ctx = ctx.clone();
            let retrying = query.mode == SelectionMode::Quarantined;

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(AppError::Internal(e.into())),
                };
                assess_job(&pipeline, store.as_ref(), &job, &ctx, retrying).await
            });
            handles.push(handle);
        }

        let mut summary = BatchSummary {
            total_processed: handles.len(),
            stale_quarantine_cleaned: stale,
            ..Default::default()
        };

        for handle in handles {
            match handle.await {
                Ok(Ok(TaskResult::Completed { quarantine_removed })) => {
                    summary.successful += 1;
                    summary.quarantine_removed += quarantine_removed;
                }
                Ok(Ok(TaskResult::Quarantined)) => summary.failed += 1,
                Ok(Err(e)) => {
                    error!("Assessment task failed: {e}");
                    summary.exceptions += 1;
                }
                Err(e) => {
                    error!("Assessment task panicked: {e}");
                    summary.exceptions += 1;
                }
            }
        }

        if summary.failed > 0 || summary.exceptions > 0 {
            warn!(
                "Batch finished: {} succeeded, {} quarantined, {} exceptions",
                summary.successful, summary.failed, summary.exceptions
            );
        } else {
            info!("Batch finished: {} succeeded", summary.successful);
        }
        Ok(summary)
    }
}

async fn assess_job(
    pipeline: &JobPipeline,
    store: &dyn AssessmentStore,
    job: &Job,
    ctx: &AssessmentContext,
    retrying: bool,
) -> Result<TaskResult, AppError> {
    match pipeline.run(job, ctx).await? {
        PipelineOutcome::Completed { .. } if retrying => {
            let removed = store
                .delete_quarantine(&job.job_id)
                .await
                .map_err(AppError::store)?;
            Ok(TaskResult::Completed {
                quarantine_removed: removed,
            })
        }
        PipelineOutcome::Completed { .. } => Ok(TaskResult::Completed {
            quarantine_removed: 0,
        }),
        PipelineOutcome::Quarantined { .. } => Ok(TaskResult::Quarantined),
    }
}
