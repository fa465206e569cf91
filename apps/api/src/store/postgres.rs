use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::{AssessmentStore, CandidateQuery, SelectionMode};
use crate::models::audit::AuditRun;
use crate::models::job::{Job, JobRow, QualificationRecord, QuarantineRecord};
use crate::models::prompt::PromptConfiguration;
use crate::models::resume::ResumeSnapshot;

/// Creates the PostgreSQL pool and applies pending migrations.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("PostgreSQL connection pool established, migrations applied");
    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UNASSESSED_JOBS: &str = r#"
    SELECT j.job_id, j.job_description
    FROM jobs j
    WHERE j.job_description IS NOT NULL
      AND btrim(j.job_description) <> ''
      AND j.created_at >= now() - make_interval(days => $1)
      AND NOT EXISTS (SELECT 1 FROM job_qualifications q WHERE q.job_id = j.job_id)
      AND NOT EXISTS (SELECT 1 FROM job_quarantine z WHERE z.job_id = j.job_id)
    ORDER BY j.created_at DESC
    LIMIT $2
"#;

const QUARANTINED_JOBS: &str = r#"
    SELECT j.job_id, j.job_description
    FROM jobs j
    WHERE j.job_description IS NOT NULL
      AND btrim(j.job_description) <> ''
      AND j.created_at >= now() - make_interval(days => $1)
      AND NOT EXISTS (SELECT 1 FROM job_qualifications q WHERE q.job_id = j.job_id)
      AND EXISTS (SELECT 1 FROM job_quarantine z WHERE z.job_id = j.job_id)
    ORDER BY j.created_at DESC
    LIMIT $2
"#;

#[async_trait]
impl AssessmentStore for PgStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRow>> {
        Ok(sqlx::query_as::<_, JobRow>(
            "SELECT job_id, job_title, job_company, job_description, created_at FROM jobs WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn candidate_jobs(&self, query: &CandidateQuery) -> Result<Vec<Job>> {
        let sql = match query.mode {
            SelectionMode::Unassessed => UNASSESSED_JOBS,
            SelectionMode::Quarantined => QUARANTINED_JOBS,
        };
        let days_back =
            i32::try_from(query.days_back).context("days_back out of range for make_interval")?;
        Ok(sqlx::query_as::<_, Job>(sql)
            .bind(days_back)
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn latest_prompt(&self, run_type: &str) -> Result<Option<PromptConfiguration>> {
        Ok(sqlx::query_as::<_, PromptConfiguration>(
            r#"
            SELECT * FROM prompts
            WHERE run_type = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(run_type)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn latest_resume(&self) -> Result<Option<ResumeSnapshot>> {
        Ok(sqlx::query_as::<_, ResumeSnapshot>(
            "SELECT * FROM resumes ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn qualifications_for_job(&self, job_id: &str) -> Result<Vec<QualificationRecord>> {
        Ok(sqlx::query_as::<_, QualificationRecord>(
            "SELECT * FROM job_qualifications WHERE job_id = $1 ORDER BY created_at, qualification_id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_audit_run(&self, run: &AuditRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_runs
                (audit_run_id, job_id, run_type, model_id, prompt_id, input, output,
                 input_tokens, output_tokens, thinking_tokens, total_tokens,
                 started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(run.audit_run_id)
        .bind(&run.job_id)
        .bind(&run.run_type)
        .bind(&run.model_id)
        .bind(run.prompt_id)
        .bind(&run.input)
        .bind(&run.output)
        .bind(run.input_tokens)
        .bind(run.output_tokens)
        .bind(run.thinking_tokens)
        .bind(run.total_tokens)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_qualification(&self, record: &QualificationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_qualifications
                (qualification_id, job_id, requirement_string, classification,
                 match_reasoning, is_match, resume_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (qualification_id) DO UPDATE SET
                job_id = EXCLUDED.job_id,
                requirement_string = EXCLUDED.requirement_string,
                classification = EXCLUDED.classification,
                match_reasoning = EXCLUDED.match_reasoning,
                is_match = EXCLUDED.is_match,
                resume_id = EXCLUDED.resume_id
            "#,
        )
        .bind(record.qualification_id)
        .bind(&record.job_id)
        .bind(&record.requirement_string)
        .bind(&record.classification)
        .bind(&record.match_reasoning)
        .bind(record.is_match)
        .bind(record.resume_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_quarantine(&self, record: &QuarantineRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_quarantine (quarantine_id, job_id, reason, quarantined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id) DO UPDATE SET
                quarantine_id = EXCLUDED.quarantine_id,
                reason = EXCLUDED.reason,
                quarantined_at = EXCLUDED.quarantined_at
            "#,
        )
        .bind(record.quarantine_id)
        .bind(&record.job_id)
        .bind(&record.reason)
        .bind(record.quarantined_at)
        .execute(&self.pool)
        .await?;
        info!("Quarantined job {} ({})", record.job_id, record.reason);
        Ok(())
    }

    async fn delete_quarantine(&self, job_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_quarantine WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn latest_quarantine(&self, job_id: &str) -> Result<Option<QuarantineRecord>> {
        Ok(sqlx::query_as::<_, QuarantineRecord>(
            "SELECT * FROM job_quarantine WHERE job_id = $1 ORDER BY quarantined_at DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn cleanup_stale_quarantine(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_quarantine z
            WHERE EXISTS (SELECT 1 FROM job_qualifications q WHERE q.job_id = z.job_id)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn prompt_run_types(&self) -> Result<Vec<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT DISTINCT run_type FROM prompts ORDER BY run_type")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn insert_prompt(&self, prompt: &PromptConfiguration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prompts
                (prompt_id, run_type, model_id, system_prompt, template,
                 temperature, thinking_budget, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(prompt.prompt_id)
        .bind(&prompt.run_type)
        .bind(&prompt.model_id)
        .bind(&prompt.system_prompt)
        .bind(&prompt.template)
        .bind(prompt.temperature)
        .bind(prompt.thinking_budget)
        .bind(prompt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
