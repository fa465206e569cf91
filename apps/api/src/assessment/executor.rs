use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::assessment::prompts::Stage;
use crate::llm_client::{
    ChatCompletion, ChatMessage, GatewayCall, LlmError, ModelGateway, StructuredOutput, TokenUsage,
};
use crate::models::audit::AuditRun;
use crate::models::prompt::PromptConfiguration;
use crate::store::AssessmentStore;

/// Token usage keyed by model id.
pub type ModelUsage = BTreeMap<String, TokenUsage>;

/// Adds `other` into `into`, model by model.
pub fn merge_usage(into: &mut ModelUsage, other: &ModelUsage) {
    for (model, usage) in other {
        into.entry(model.clone()).or_default().add(*usage);
    }
}

#[derive(Debug)]
pub struct StageOutput<T> {
    pub data: T,
    pub tokens: ModelUsage,
}

/// Runs one stage call and records it.
///
/// Every completion the gateway returns produces exactly one audit row, written before
/// the payload is validated, so a schema failure is still audited. A transport failure
/// has no completion and therefore no audit row.
#[derive(Clone)]
pub struct StageExecutor {
    gateway: ModelGateway,
    store: Arc<dyn AssessmentStore>,
}

impl StageExecutor {
    pub fn new(gateway: ModelGateway, store: Arc<dyn AssessmentStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn execute<T: StructuredOutput>(
        &self,
        stage: Stage,
        config: &PromptConfiguration,
        rendered_prompt: &str,
        job_id: &str,
        examples: &[ChatMessage],
    ) -> Result<StageOutput<T>, LlmError> {
        let call = GatewayCall {
            content: rendered_prompt,
            system_instructions: &config.system_prompt,
            model: &config.model_id,
            temperature: config.temperature as f32,
            reasoning_budget: config.thinking_budget,
            examples,
        };

        let completion = self.gateway.request::<T>(&call).await?;
        debug!(
            "{stage} call for {job_id} used {} tokens",
            completion.usage.total()
        );
        self.record(job_id, stage, config, rendered_prompt, &completion)
            .await;

        let data = ModelGateway::decode::<T>(&completion.content)?;
        let mut tokens = ModelUsage::new();
        tokens.insert(config.model_id.clone(), completion.usage);
        Ok(StageOutput { data, tokens })
    }

    async fn record(
        &self,
        job_id: &str,
        stage: Stage,
        config: &PromptConfiguration,
        input: &str,
        completion: &ChatCompletion,
    ) {
        let usage = completion.usage;
        let run = AuditRun {
            audit_run_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            run_type: stage.run_type().to_string(),
            model_id: config.model_id.clone(),
            prompt_id: Some(config.prompt_id),
            input: input.to_string(),
            output: completion.content.clone(),
            input_tokens: clamp(usage.input_tokens),
            output_tokens: clamp(usage.output_tokens),
            thinking_tokens: clamp(usage.thinking_tokens),
            total_tokens: clamp(usage.total()),
            started_at: completion.started_at,
            finished_at: completion.finished_at,
        };

        if let Err(e) = self.store.insert_audit_run(&run).await {
            warn!("Failed to record {stage} audit run for {job_id}: {e:#}");
        }
    }
}

fn clamp(tokens: u32) -> i32 {
    i32::try_from(tokens).unwrap_or(i32::MAX)
}
