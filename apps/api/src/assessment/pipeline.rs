//! Single-job pipeline: tagging → atomizing → classifying → assessing → persisting.
//!
//! Each stage returns `Result<_, StageError>`. The first failure ends the run and is
//! turned into a quarantine marker tagged with the failing stage; qualification records
//! are only written after all four stages succeeded. Errors escaping `run` are
//! persistence failures, not stage failures.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assessment::executor::{merge_usage, ModelUsage, StageExecutor};
use crate::assessment::prompts::{
    render_assessing, render_atomizing, render_classifying, render_tagging, tagging_examples,
    Stage, StagePrompts,
};
use crate::assessment::schema::{
    AssessedObjects, AssessedRequirement, AtomicObjects, ClassifiedObjects, ClassifiedRequirement,
    TaggedList,
};
use crate::errors::AppError;
use crate::llm_client::{ChatMessage, LlmError, ModelGateway};
use crate::models::job::{Job, QualificationRecord, QuarantineRecord};
use crate::models::prompt::PromptConfiguration;
use crate::models::resume::ResumeSnapshot;
use crate::store::AssessmentStore;

/// Extra stage-4 attempts after a response that decodes badly or has the wrong shape.
pub const MAX_ASSESSMENT_RETRIES: u32 = 2;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("unexpected output shape: {0}")]
    Shape(String),
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: StageError,
}

impl StageFailure {
    fn at(stage: Stage) -> impl FnOnce(StageError) -> StageFailure {
        move |error| StageFailure { stage, error }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed { records: Vec<QualificationRecord> },
    Quarantined { stage: Stage, reason: &'static str },
}

/// Read-only inputs shared by every pipeline in a run.
#[derive(Debug, Clone)]
pub struct AssessmentContext {
    pub resume: ResumeSnapshot,
    pub prompts: StagePrompts,
}

impl AssessmentContext {
    /// Fetches the latest resume and all four stage configurations.
    /// Fails with `DependencyMissing` if any of them is absent.
    pub async fn load(store: &dyn AssessmentStore) -> Result<Self, AppError> {
        let resume = store
            .latest_resume()
            .await
            .map_err(AppError::store)?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppError::DependencyMissing("no resume on file".to_string()))?;

        let prompts = StagePrompts {
            tagging: latest_prompt(store, Stage::Tagging).await?,
            atomizing: latest_prompt(store, Stage::Atomizing).await?,
            classifying: latest_prompt(store, Stage::Classifying).await?,
            assessing: latest_prompt(store, Stage::Assessing).await?,
        };

        Ok(Self { resume, prompts })
    }
}

async fn latest_prompt(
    store: &dyn AssessmentStore,
    stage: Stage,
) -> Result<PromptConfiguration, AppError> {
    store
        .latest_prompt(stage.run_type())
        .await
        .map_err(AppError::store)?
        .ok_or_else(|| {
            AppError::DependencyMissing(format!(
                "no prompt configuration for run type {}",
                stage.run_type()
            ))
        })
}

struct StageResults {
    classified: Vec<ClassifiedRequirement>,
    assessed: Vec<AssessedRequirement>,
}

#[derive(Clone)]
pub struct JobPipeline {
    executor: StageExecutor,
    store: Arc<dyn AssessmentStore>,
    tagging_examples: Arc<[ChatMessage]>,
}

impl JobPipeline {
    pub fn new(gateway: ModelGateway, store: Arc<dyn AssessmentStore>) -> Self {
        Self {
            executor: StageExecutor::new(gateway, store.clone()),
            store,
            tagging_examples: tagging_examples().into(),
        }
    }

    pub async fn run(
        &self,
        job: &Job,
        ctx: &AssessmentContext,
    ) -> Result<PipelineOutcome, AppError> {
        let span = info_span!("pipeline", job_id = %job.job_id);
        self.run_job(job, ctx).instrument(span).await
    }

    async fn run_job(
        &self,
        job: &Job,
        ctx: &AssessmentContext,
    ) -> Result<PipelineOutcome, AppError> {
        let mut usage = ModelUsage::new();

        let results = match self.run_stages(job, ctx, &mut usage).await {
            Ok(results) => results,
            Err(failure) => return self.quarantine(job, failure).await,
        };

        let records = build_records(
            &job.job_id,
            ctx.resume.resume_id,
            &results.classified,
            results.assessed,
        );
        for record in &records {
            self.store
                .upsert_qualification(record)
                .await
                .map_err(AppError::store)?;
        }

        for (model, tokens) in &usage {
            info!(
                "{model}: {} input, {} output, {} thinking tokens",
                tokens.input_tokens, tokens.output_tokens, tokens.thinking_tokens
            );
        }
        info!("Persisted {} qualification records", records.len());
        Ok(PipelineOutcome::Completed { records })
    }

    async fn run_stages(
        &self,
        job: &Job,
        ctx: &AssessmentContext,
        usage: &mut ModelUsage,
    ) -> Result<StageResults, StageFailure> {
        info!("Tagging qualifications");
        let tagged = self
            .tag(job, &ctx.prompts.tagging, usage)
            .await
            .map_err(StageFailure::at(Stage::Tagging))?;

        info!("Atomizing {} tagged qualifications", tagged.tagged_list.len());
        let atomic = self
            .atomize(job, &ctx.prompts.atomizing, &tagged, usage)
            .await
            .map_err(StageFailure::at(Stage::Atomizing))?;

        info!("Classifying {} atomic requirements", atomic.atomic_objects.len());
        let classified = self
            .classify(job, &ctx.prompts.classifying, &atomic, usage)
            .await
            .map_err(StageFailure::at(Stage::Classifying))?;

        let filtered: Vec<ClassifiedRequirement> = classified
            .classified_objects
            .iter()
            .filter(|c| c.is_assessable())
            .cloned()
            .collect();

        let assessed = if filtered.is_empty() {
            info!("No assessable requirements, skipping assessment");
            Vec::new()
        } else {
            info!("Assessing {} requirements against the resume", filtered.len());
            self.assess(job, ctx, &filtered, usage)
                .await
                .map_err(StageFailure::at(Stage::Assessing))?
        };

        Ok(StageResults {
            classified: classified.classified_objects,
            assessed,
        })
    }

    async fn tag(
        &self,
        job: &Job,
        config: &PromptConfiguration,
        usage: &mut ModelUsage,
    ) -> Result<TaggedList, StageError> {
        let prompt = render_tagging(&config.template, &job.job_description);
        let output = self
            .executor
            .execute::<TaggedList>(
                Stage::Tagging,
                config,
                &prompt,
                &job.job_id,
                &self.tagging_examples,
            )
            .await?;
        merge_usage(usage, &output.tokens);
        output.data.validate().map_err(StageError::Shape)?;
        Ok(output.data)
    }

    async fn atomize(
        &self,
        job: &Job,
        config: &PromptConfiguration,
        tagged: &TaggedList,
        usage: &mut ModelUsage,
    ) -> Result<AtomicObjects, StageError> {
        let prompt = render_atomizing(&config.template, tagged);
        let output = self
            .executor
            .execute::<AtomicObjects>(Stage::Atomizing, config, &prompt, &job.job_id, &[])
            .await?;
        merge_usage(usage, &output.tokens);
        output.data.validate().map_err(StageError::Shape)?;
        Ok(output.data)
    }

    async fn classify(
        &self,
        job: &Job,
        config: &PromptConfiguration,
        atomic: &AtomicObjects,
        usage: &mut ModelUsage,
    ) -> Result<ClassifiedObjects, StageError> {
        let prompt = render_classifying(&config.template, atomic);
        let output = self
            .executor
            .execute::<ClassifiedObjects>(Stage::Classifying, config, &prompt, &job.job_id, &[])
            .await?;
        merge_usage(usage, &output.tokens);
        output
            .data
            .validate(atomic.atomic_objects.len())
            .map_err(StageError::Shape)?;
        Ok(output.data)
    }

    /// Stage 4. Retries the same call up to `MAX_ASSESSMENT_RETRIES` times when the
    /// response cannot be decoded or has the wrong shape. Transport failures were
    /// already retried by the gateway and end the stage immediately.
    async fn assess(
        &self,
        job: &Job,
        ctx: &AssessmentContext,
        filtered: &[ClassifiedRequirement],
        usage: &mut ModelUsage,
    ) -> Result<Vec<AssessedRequirement>, StageError> {
        let config = &ctx.prompts.assessing;
        let prompt = render_assessing(&config.template, filtered, &ctx.resume);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self
                .executor
                .execute::<AssessedObjects>(Stage::Assessing, config, &prompt, &job.job_id, &[])
                .await
            {
                Ok(output) => {
                    merge_usage(usage, &output.tokens);
                    match output.data.validate(filtered.len()) {
                        Ok(assessed) => return Ok(assessed),
                        Err(detail) => StageError::Shape(detail),
                    }
                }
                Err(e @ (LlmError::Schema { .. } | LlmError::EmptyContent)) => StageError::Llm(e),
                Err(e) => return Err(e.into()),
            };

            if attempt > MAX_ASSESSMENT_RETRIES {
                return Err(error);
            }
            warn!(
                "Assessment attempt {}/{} rejected: {error}. Retrying",
                attempt,
                MAX_ASSESSMENT_RETRIES + 1
            );
        }
    }

    async fn quarantine(
        &self,
        job: &Job,
        failure: StageFailure,
    ) -> Result<PipelineOutcome, AppError> {
        let reason = failure.stage.quarantine_reason();
        warn!("Quarantining job ({reason}): {failure}");
        self.store
            .upsert_quarantine(&QuarantineRecord::new(&job.job_id, reason))
            .await
            .map_err(AppError::store)?;
        Ok(PipelineOutcome::Quarantined {
            stage: failure.stage,
            reason,
        })
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// One record per classified requirement. Assessable requirements take their answer
/// from `assessed`, matched by requirement text first and by position in the filtered
/// batch otherwise. Evaluated (or unclassified) requirements carry no match data.
fn build_records(
    job_id: &str,
    resume_id: Uuid,
    classified: &[ClassifiedRequirement],
    assessed: Vec<AssessedRequirement>,
) -> Vec<QualificationRecord> {
    let filtered: Vec<&ClassifiedRequirement> =
        classified.iter().filter(|c| c.is_assessable()).collect();

    let mut by_text: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, answer) in assessed.iter().enumerate().rev() {
        by_text
            .entry(normalize(&answer.requirement_string))
            .or_default()
            .push(i);
    }

    let mut used = vec![false; assessed.len()];
    let mut assignment: Vec<Option<usize>> = filtered
        .iter()
        .map(|item| {
            let i = by_text
                .get_mut(&normalize(&item.requirement_string))
                .and_then(|slots| slots.pop())?;
            used[i] = true;
            Some(i)
        })
        .collect();

    for (position, slot) in assignment.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        let fallback = if used.get(position) == Some(&false) {
            Some(position)
        } else {
            used.iter().position(|u| !u)
        };
        if let Some(i) = fallback {
            used[i] = true;
            *slot = Some(i);
        }
    }

    // One microsecond apart (the timestamptz resolution) so reads return the
    // records in requirement order.
    let base = Utc::now();
    let mut answers = assignment.into_iter();
    classified
        .iter()
        .zip(0i64..)
        .map(|(item, ordinal)| {
            let answer = if item.is_assessable() {
                answers.next().flatten().map(|i| &assessed[i])
            } else {
                None
            };
            QualificationRecord {
                qualification_id: Uuid::new_v4(),
                job_id: job_id.to_string(),
                requirement_string: item.requirement_string.clone(),
                classification: item.classification.map(|c| c.as_str().to_string()),
                match_reasoning: answer.map(|a| a.match_reasoning.clone()),
                is_match: answer.map(|a| a.is_match),
                resume_id,
                created_at: base + Duration::microseconds(ordinal),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::schema::Classification;
    use crate::assessment::testing::{
        self, ScriptedTransport, ASSESSED, ATOMIC, CLASSIFIED, TAGGED,
    };
    use crate::store::memory::MemoryStore;

    fn pipeline(transport: &Arc<ScriptedTransport>, store: &Arc<MemoryStore>) -> JobPipeline {
        JobPipeline::new(testing::gateway(transport), store.clone())
    }

    fn context() -> AssessmentContext {
        AssessmentContext {
            resume: testing::resume(),
            prompts: testing::stage_prompts(),
        }
    }

    fn job() -> Job {
        Job {
            job_id: "job-1".to_string(),
            job_description: "Requires 5+ years SQL. Python preferred.".to_string(),
        }
    }

    fn ok(reply: &str) -> Result<String, LlmError> {
        Ok(reply.to_string())
    }

    async fn run_script(
        replies: Vec<Result<String, LlmError>>,
    ) -> (PipelineOutcome, Arc<MemoryStore>, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::sequence(replies));
        let store = Arc::new(MemoryStore::new());
        let outcome = pipeline(&transport, &store)
            .run(&job(), &context())
            .await
            .unwrap();
        (outcome, store, transport)
    }

    fn assert_quarantined(outcome: &PipelineOutcome, store: &MemoryStore, reason: &str) {
        assert!(
            matches!(outcome, PipelineOutcome::Quarantined { reason: r, .. } if *r == reason),
            "unexpected outcome: {outcome:?}"
        );
        assert!(store.qualifications("job-1").is_empty());
        assert_eq!(store.quarantine_count(), 1);
        assert_eq!(store.quarantine_reason("job-1").as_deref(), Some(reason));
    }

    #[tokio::test]
    async fn test_sql_python_example_persists_two_records() {
        let (outcome, store, transport) =
            run_script(vec![ok(TAGGED), ok(ATOMIC), ok(CLASSIFIED), ok(ASSESSED)]).await;

        let PipelineOutcome::Completed { records } = outcome else {
            panic!("pipeline did not complete");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].requirement_string, "5+ years SQL");
        assert_eq!(
            records[0].classification.as_deref(),
            Some("required_qualification")
        );
        assert_eq!(
            records[1].classification.as_deref(),
            Some("additional_qualification")
        );
        assert!(records.iter().all(|r| r.is_match == Some(true)));
        assert_eq!(store.qualifications("job-1").len(), 2);
        assert_eq!(store.quarantine_count(), 0);
        assert_eq!(transport.calls(), 4);

        let run_types: Vec<String> = store.audit_runs().into_iter().map(|r| r.run_type).collect();
        assert_eq!(
            run_types,
            vec![
                "ja_2_1_assessment",
                "ja_2_2_assessment",
                "ja_2_3_assessment",
                "ja_3_1_assessment"
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_outputs_feed_the_next_prompt() {
        let (_, _, transport) =
            run_script(vec![ok(TAGGED), ok(ATOMIC), ok(CLASSIFIED), ok(ASSESSED)]).await;
        let requests = transport.requests();

        // system + few-shot pair + user
        assert_eq!(requests[0].messages.len(), 4);
        assert!(testing::user_content(&requests[0]).contains("Python preferred."));
        assert!(testing::user_content(&requests[1]).contains("\"raw_string\": \"5+ years SQL\""));
        assert!(testing::user_content(&requests[2]).contains("\"requirement_string\": \"Python\""));
        let assessing = testing::user_content(&requests[3]);
        assert!(assessing.contains("additional_qualification"));
        assert!(assessing.contains("Eight years of SQL, three of Python."));
    }

    #[tokio::test]
    async fn test_tagging_failure_quarantines() {
        let (outcome, store, _) = run_script(vec![ok("Sorry, I cannot help with that.")]).await;
        assert_quarantined(&outcome, &store, "failed_generate_jobdesc_tagging");
        assert_eq!(store.audit_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_tagged_list_quarantines_at_tagging() {
        let (outcome, store, _) = run_script(vec![ok(r#"{"tagged_list": []}"#)]).await;
        assert_quarantined(&outcome, &store, "failed_generate_jobdesc_tagging");
    }

    #[tokio::test]
    async fn test_atomizing_transport_failure_quarantines_without_audit() {
        let (outcome, store, _) = run_script(vec![
            ok(TAGGED),
            Err(LlmError::Api {
                status: 400,
                message: "context length exceeded".to_string(),
            }),
        ])
        .await;
        assert_quarantined(&outcome, &store, "failed_generate_jobdesc_atomizing");
        assert_eq!(store.audit_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_classification_count_mismatch_quarantines() {
        let short = r#"{"classified_objects": [
            {"requirement_string": "5+ years SQL", "classification": "required_qualification"}
        ]}"#;
        let (outcome, store, _) = run_script(vec![ok(TAGGED), ok(ATOMIC), ok(short)]).await;
        assert_quarantined(&outcome, &store, "failed_generate_jobdesc_final");
    }

    #[tokio::test]
    async fn test_assessment_retries_null_match_then_succeeds() {
        let null_match = r#"{"assessed_objects": [
            {"requirement_string": "5+ years SQL", "match_reasoning": "Eight years.", "match": null},
            {"requirement_string": "Python", "match_reasoning": "Three years.", "match": true}
        ]}"#;
        let (outcome, store, transport) = run_script(vec![
            ok(TAGGED),
            ok(ATOMIC),
            ok(CLASSIFIED),
            ok(null_match),
            ok("not json at all"),
            ok(ASSESSED),
        ])
        .await;

        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
        assert_eq!(transport.calls(), 6);
        assert_eq!(store.qualifications("job-1").len(), 2);
        assert_eq!(store.audit_runs().len(), 6);
    }

    #[tokio::test]
    async fn test_assessment_gives_up_after_three_attempts() {
        let one_item = r#"{"assessed_objects": [
            {"requirement_string": "5+ years SQL", "match_reasoning": "Eight years.", "match": true}
        ]}"#;
        let (outcome, store, transport) = run_script(vec![
            ok(TAGGED),
            ok(ATOMIC),
            ok(CLASSIFIED),
            ok(one_item),
            ok(one_item),
            ok(one_item),
        ])
        .await;

        assert_quarantined(&outcome, &store, "failed_generate_assessment");
        assert_eq!(transport.calls(), 3 + 1 + MAX_ASSESSMENT_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_assessment_transport_failure_is_not_retried() {
        let (outcome, store, transport) = run_script(vec![
            ok(TAGGED),
            ok(ATOMIC),
            ok(CLASSIFIED),
            Err(LlmError::Api {
                status: 401,
                message: "invalid api key".to_string(),
            }),
        ])
        .await;

        assert_quarantined(&outcome, &store, "failed_generate_assessment");
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_all_evaluated_skips_assessment() {
        let evaluated = r#"{"classified_objects": [
            {"requirement_string": "5+ years SQL", "classification": "evaluated_qualification"},
            {"requirement_string": "Python", "classification": ""}
        ]}"#;
        let (outcome, store, transport) =
            run_script(vec![ok(TAGGED), ok(ATOMIC), ok(evaluated)]).await;

        let PipelineOutcome::Completed { records } = outcome else {
            panic!("pipeline did not complete");
        };
        assert_eq!(transport.calls(), 3);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_match.is_none() && r.match_reasoning.is_none()));
        assert_eq!(
            records[0].classification.as_deref(),
            Some("evaluated_qualification")
        );
        assert!(records[1].classification.is_none());
        assert_eq!(store.qualifications("job-1").len(), 2);
    }

    #[tokio::test]
    async fn test_persist_failure_surfaces_as_error() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![
            ok(TAGGED),
            ok(ATOMIC),
            ok(CLASSIFIED),
            ok(ASSESSED),
        ]));
        let store = Arc::new(MemoryStore::new());
        store.fail_qualification_writes_for("job-1");

        let result = pipeline(&transport, &store).run(&job(), &context()).await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(store.quarantine_count(), 0);
    }

    fn classified(text: &str, class: Classification) -> ClassifiedRequirement {
        ClassifiedRequirement {
            requirement_string: text.to_string(),
            classification: Some(class),
        }
    }

    fn answer(text: &str, is_match: bool) -> AssessedRequirement {
        AssessedRequirement {
            requirement_string: text.to_string(),
            match_reasoning: format!("about {text}"),
            is_match,
        }
    }

    #[test]
    fn test_build_records_joins_by_text_regardless_of_order() {
        let items = vec![
            classified("SQL", Classification::RequiredQualification),
            classified("Teamwork", Classification::EvaluatedQualification),
            classified("Python", Classification::AdditionalQualification),
        ];
        let answers = vec![answer("python ", false), answer("SQL", true)];

        let records = build_records("job-1", Uuid::new_v4(), &items, answers);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].is_match, Some(true));
        assert_eq!(records[1].is_match, None);
        assert_eq!(records[2].is_match, Some(false));
        assert_eq!(records[2].match_reasoning.as_deref(), Some("about python "));
    }

    #[test]
    fn test_build_records_falls_back_to_position() {
        let items = vec![
            classified("Fluency in SQL", Classification::RequiredQualification),
            classified("Python", Classification::AdditionalQualification),
        ];
        let answers = vec![answer("SQL fluency", true), answer("Python", false)];

        let records = build_records("job-1", Uuid::new_v4(), &items, answers);

        assert_eq!(records[0].match_reasoning.as_deref(), Some("about SQL fluency"));
        assert_eq!(records[1].is_match, Some(false));
    }

    #[test]
    fn test_build_records_timestamps_follow_requirement_order() {
        let items = vec![
            classified("SQL", Classification::RequiredQualification),
            classified("Teamwork", Classification::EvaluatedQualification),
            classified("Python", Classification::AdditionalQualification),
        ];

        let records = build_records("job-1", Uuid::new_v4(), &items, Vec::new());

        assert!(records
            .windows(2)
            .all(|pair| pair[0].created_at < pair[1].created_at));
    }

    #[tokio::test]
    async fn test_context_requires_resume_and_prompts() {
        let store = MemoryStore::new();
        let missing_resume = AssessmentContext::load(&store).await.unwrap_err();
        assert!(matches!(missing_resume, AppError::DependencyMissing(_)));

        store.add_resume(testing::resume());
        store.add_prompt(testing::prompt_config(Stage::Tagging));
        let missing_prompt = AssessmentContext::load(&store).await.unwrap_err();
        assert!(
            matches!(missing_prompt, AppError::DependencyMissing(ref m) if m.contains("ja_2_2_assessment"))
        );

        for stage in [Stage::Atomizing, Stage::Classifying, Stage::Assessing] {
            store.add_prompt(testing::prompt_config(stage));
        }
        assert!(AssessmentContext::load(&store).await.is_ok());
    }
}
