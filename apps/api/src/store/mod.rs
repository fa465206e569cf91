//! Persistence contract consumed by the assessment pipeline.
//!
//! The pipeline only reads jobs, prompts and the resume, and writes audit runs,
//! qualification records and quarantine markers. Every write is an independent
//! statement; nothing spans a whole pipeline run.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::audit::AuditRun;
use crate::models::job::{Job, JobRow, QualificationRecord, QuarantineRecord};
use crate::models::prompt::PromptConfiguration;
use crate::models::resume::ResumeSnapshot;

#[cfg(test)]
pub mod memory;
pub mod postgres;

/// Which jobs a batch works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Jobs with no qualification records and no active quarantine.
    Unassessed,
    /// Quarantined jobs that still have no qualification records.
    Quarantined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateQuery {
    pub mode: SelectionMode,
    /// Only jobs created within this many days.
    pub days_back: u32,
    pub limit: u32,
}

/// Carried in `AppState` as `Arc<dyn AssessmentStore>`.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRow>>;

    /// Jobs with a non-blank description matching `query`, newest first.
    async fn candidate_jobs(&self, query: &CandidateQuery) -> Result<Vec<Job>>;

    async fn latest_prompt(&self, run_type: &str) -> Result<Option<PromptConfiguration>>;

    async fn latest_resume(&self) -> Result<Option<ResumeSnapshot>>;

    async fn qualifications_for_job(&self, job_id: &str) -> Result<Vec<QualificationRecord>>;

    async fn insert_audit_run(&self, run: &AuditRun) -> Result<()>;

    async fn upsert_qualification(&self, record: &QualificationRecord) -> Result<()>;

    /// Replaces any existing quarantine for the same job.
    async fn upsert_quarantine(&self, record: &QuarantineRecord) -> Result<()>;

    /// Returns the number of rows removed.
    async fn delete_quarantine(&self, job_id: &str) -> Result<u64>;

    async fn latest_quarantine(&self, job_id: &str) -> Result<Option<QuarantineRecord>>;

    /// Deletes quarantine rows of jobs that already have qualification records.
    async fn cleanup_stale_quarantine(&self) -> Result<u64>;

    /// Distinct run types that have at least one prompt row.
    async fn prompt_run_types(&self) -> Result<Vec<String>>;

    async fn insert_prompt(&self, prompt: &PromptConfiguration) -> Result<()>;
}
