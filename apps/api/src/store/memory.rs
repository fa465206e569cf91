//! In-memory `AssessmentStore` for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{AssessmentStore, CandidateQuery, SelectionMode};
use crate::models::audit::AuditRun;
use crate::models::job::{Job, JobRow, QualificationRecord, QuarantineRecord};
use crate::models::prompt::PromptConfiguration;
use crate::models::resume::ResumeSnapshot;

#[derive(Default)]
struct Tables {
    jobs: Vec<JobRow>,
    prompts: Vec<PromptConfiguration>,
    resumes: Vec<ResumeSnapshot>,
    qualifications: Vec<QualificationRecord>,
    quarantine: Vec<QuarantineRecord>,
    audit_runs: Vec<AuditRun>,
    failing_qualification_writes: HashSet<String>,
    fail_audit_writes: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().unwrap();
        f(&mut tables)
    }

    pub fn add_job(&self, job_id: &str, description: Option<&str>) {
        self.add_job_aged(job_id, description, 0);
    }

    pub fn add_job_aged(&self, job_id: &str, description: Option<&str>, days_old: i64) {
        self.with(|t| {
            t.jobs.push(JobRow {
                job_id: job_id.to_string(),
                job_title: None,
                job_company: None,
                job_description: description.map(String::from),
                created_at: Utc::now() - Duration::days(days_old),
            })
        });
    }

    pub fn add_resume(&self, resume: ResumeSnapshot) {
        self.with(|t| t.resumes.push(resume));
    }

    pub fn add_prompt(&self, prompt: PromptConfiguration) {
        self.with(|t| t.prompts.push(prompt));
    }

    pub fn add_qualification(&self, record: QualificationRecord) {
        self.with(|t| t.qualifications.push(record));
    }

    pub fn add_quarantine(&self, job_id: &str, reason: &str) {
        self.with(|t| t.quarantine.push(QuarantineRecord::new(job_id, reason)));
    }

    /// Makes every qualification write for `job_id` fail.
    pub fn fail_qualification_writes_for(&self, job_id: &str) {
        self.with(|t| t.failing_qualification_writes.insert(job_id.to_string()));
    }

    pub fn fail_audit_writes(&self) {
        self.with(|t| t.fail_audit_writes = true);
    }

    pub fn qualifications(&self, job_id: &str) -> Vec<QualificationRecord> {
        self.with(|t| {
            t.qualifications
                .iter()
                .filter(|q| q.job_id == job_id)
                .cloned()
                .collect()
        })
    }

    pub fn quarantine_reason(&self, job_id: &str) -> Option<String> {
        self.with(|t| {
            t.quarantine
                .iter()
                .find(|q| q.job_id == job_id)
                .map(|q| q.reason.clone())
        })
    }

    pub fn quarantine_count(&self) -> usize {
        self.with(|t| t.quarantine.len())
    }

    pub fn audit_runs(&self) -> Vec<AuditRun> {
        self.with(|t| t.audit_runs.clone())
    }

    pub fn prompts(&self) -> Vec<PromptConfiguration> {
        self.with(|t| t.prompts.clone())
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRow>> {
        Ok(self.with(|t| t.jobs.iter().find(|j| j.job_id == job_id).cloned()))
    }

    async fn candidate_jobs(&self, query: &CandidateQuery) -> Result<Vec<Job>> {
        let cutoff = Utc::now() - Duration::days(query.days_back as i64);
        Ok(self.with(|t| {
            let assessed: HashSet<&str> =
                t.qualifications.iter().map(|q| q.job_id.as_str()).collect();
            let quarantined: HashSet<&str> =
                t.quarantine.iter().map(|q| q.job_id.as_str()).collect();

            let mut rows: Vec<&JobRow> = t
                .jobs
                .iter()
                .filter(|j| j.created_at >= cutoff)
                .filter(|j| !assessed.contains(j.job_id.as_str()))
                .filter(|j| match query.mode {
                    SelectionMode::Unassessed => !quarantined.contains(j.job_id.as_str()),
                    SelectionMode::Quarantined => quarantined.contains(j.job_id.as_str()),
                })
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            rows.into_iter()
                .filter_map(|j| j.clone().into_job())
                .take(query.limit as usize)
                .collect()
        }))
    }

    async fn latest_prompt(&self, run_type: &str) -> Result<Option<PromptConfiguration>> {
        Ok(self.with(|t| {
            t.prompts
                .iter()
                .filter(|p| p.run_type == run_type)
                .max_by_key(|p| p.created_at)
                .cloned()
        }))
    }

    async fn latest_resume(&self) -> Result<Option<ResumeSnapshot>> {
        Ok(self.with(|t| t.resumes.iter().max_by_key(|r| r.created_at).cloned()))
    }

    async fn qualifications_for_job(&self, job_id: &str) -> Result<Vec<QualificationRecord>> {
        let mut rows = self.qualifications(job_id);
        rows.sort_by_key(|q| (q.created_at, q.qualification_id));
        Ok(rows)
    }

    async fn insert_audit_run(&self, run: &AuditRun) -> Result<()> {
        self.with(|t| {
            if t.fail_audit_writes {
                bail!("audit_runs is read-only");
            }
            t.audit_runs.push(run.clone());
            Ok(())
        })
    }

    async fn upsert_qualification(&self, record: &QualificationRecord) -> Result<()> {
        self.with(|t| {
            if t.failing_qualification_writes.contains(&record.job_id) {
                bail!("job_qualifications write rejected for {}", record.job_id);
            }
            match t
                .qualifications
                .iter_mut()
                .find(|q| q.qualification_id == record.qualification_id)
            {
                Some(existing) => *existing = record.clone(),
                None => t.qualifications.push(record.clone()),
            }
            Ok(())
        })
    }

    async fn upsert_quarantine(&self, record: &QuarantineRecord) -> Result<()> {
        self.with(|t| {
            t.quarantine.retain(|q| q.job_id != record.job_id);
            t.quarantine.push(record.clone());
        });
        Ok(())
    }

    async fn delete_quarantine(&self, job_id: &str) -> Result<u64> {
        Ok(self.with(|t| {
            let before = t.quarantine.len();
            t.quarantine.retain(|q| q.job_id != job_id);
            (before - t.quarantine.len()) as u64
        }))
    }

    async fn latest_quarantine(&self, job_id: &str) -> Result<Option<QuarantineRecord>> {
        Ok(self.with(|t| {
            t.quarantine
                .iter()
                .filter(|q| q.job_id == job_id)
                .max_by_key(|q| q.quarantined_at)
                .cloned()
        }))
    }

    async fn cleanup_stale_quarantine(&self) -> Result<u64> {
        Ok(self.with(|t| {
            let assessed: HashSet<String> =
                t.qualifications.iter().map(|q| q.job_id.clone()).collect();
            let before = t.quarantine.len();
            t.quarantine.retain(|q| !assessed.contains(&q.job_id));
            (before - t.quarantine.len()) as u64
        }))
    }

    async fn prompt_run_types(&self) -> Result<Vec<String>> {
        Ok(self.with(|t| {
            let mut run_types: Vec<String> = t.prompts.iter().map(|p| p.run_type.clone()).collect();
            run_types.sort();
            run_types.dedup();
            run_types
        }))
    }

    async fn insert_prompt(&self, prompt: &PromptConfiguration) -> Result<()> {
        self.add_prompt(prompt.clone());
        Ok(())
    }
}
