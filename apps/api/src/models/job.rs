use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A job posting as stored by the ingestion side. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub job_id: String,
    pub job_title: Option<String>,
    pub job_company: Option<String>,
    pub job_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobRow {
    /// Returns the assessable job, or `None` if the description is missing or blank.
    pub fn into_job(self) -> Option<Job> {
        let description = self.job_description?;
        if description.trim().is_empty() {
            return None;
        }
        Some(Job {
            job_id: self.job_id,
            job_description: description,
        })
    }
}

/// Pipeline input: a job with a non-empty description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub job_id: String,
    pub job_description: String,
}

/// One requirement of a job, with the resume match when it was assessed.
/// `classification` holds the stage-3 class; `is_match`/`match_reasoning` are null
/// for evaluated qualifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QualificationRecord {
    pub qualification_id: Uuid,
    pub job_id: String,
    pub requirement_string: String,
    pub classification: Option<String>,
    pub match_reasoning: Option<String>,
    pub is_match: Option<bool>,
    pub resume_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Marks a job whose pipeline failed. At most one per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QuarantineRecord {
    pub quarantine_id: Uuid,
    pub job_id: String,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantineRecord {
    pub fn new(job_id: &str, reason: &str) -> Self {
        Self {
            quarantine_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            reason: reason.to_string(),
            quarantined_at: Utc::now(),
        }
    }
}
