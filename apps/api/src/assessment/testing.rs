//! Test doubles shared by the assessment tests: a scripted chat transport and fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use uuid::Uuid;

use crate::assessment::prompts::{default_prompts, Stage, StagePrompts};
use crate::llm_client::{ChatCompletion, ChatRequest, ChatTransport, LlmError, ModelGateway, TokenUsage};
use crate::models::prompt::PromptConfiguration;
use crate::models::resume::{ResumeProfile, ResumeSnapshot, SkillExperience};
use crate::store::memory::MemoryStore;

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync>;

/// Answers chat requests from a closure. Counts calls and the peak number of
/// concurrent in-flight calls.
pub struct ScriptedTransport {
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies in order; panics when the script runs out.
    pub fn sequence(replies: Vec<Result<String, LlmError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted transport ran out of replies")
        })
    }

    /// Answers by response schema name, the same reply for every job.
    pub fn by_schema(tagged: &str, atomic: &str, classified: &str, assessed: &str) -> Self {
        let (tagged, atomic, classified, assessed) = (
            tagged.to_string(),
            atomic.to_string(),
            classified.to_string(),
            assessed.to_string(),
        );
        Self::new(move |request| {
            Ok(match request.response_format.json_schema.name {
                "tagged_list" => tagged.clone(),
                "atomic_objects" => atomic.clone(),
                "classified_objects" => classified.clone(),
                _ => assessed.clone(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let started_at = Utc::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = (self.responder)(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        reply.map(|content| ChatCompletion {
            content,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
                thinking_tokens: 5,
            },
            started_at,
            finished_at: Utc::now(),
        })
    }
}

pub fn gateway(transport: &Arc<ScriptedTransport>) -> ModelGateway {
    ModelGateway::new(transport.clone())
}

/// The user message of a request: the rendered stage template.
pub fn user_content(request: &ChatRequest) -> &str {
    request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

pub fn resume() -> ResumeSnapshot {
    ResumeSnapshot {
        resume_id: Uuid::new_v4(),
        profile: Json(ResumeProfile {
            skills: vec![
                SkillExperience { name: "SQL".to_string(), years: Some(8.0) },
                SkillExperience { name: "Python".to_string(), years: Some(3.0) },
            ],
            education: vec![],
            domain_experience: vec![],
        }),
        markdown: "# Jane Doe\n\nAnalytics engineer. Eight years of SQL, three of Python.".to_string(),
        created_at: Utc::now(),
    }
}

pub fn prompt_config(stage: Stage) -> PromptConfiguration {
    let default = default_prompts()
        .into_iter()
        .find(|p| p.stage == stage)
        .expect("every stage has a default prompt");
    PromptConfiguration {
        prompt_id: Uuid::new_v4(),
        run_type: stage.run_type().to_string(),
        model_id: "test-model".to_string(),
        system_prompt: default.system_prompt,
        template: default.template.to_string(),
        temperature: 0.0,
        thinking_budget: Some(default.thinking_budget),
        created_at: Utc::now(),
    }
}

pub fn stage_prompts() -> StagePrompts {
    StagePrompts {
        tagging: prompt_config(Stage::Tagging),
        atomizing: prompt_config(Stage::Atomizing),
        classifying: prompt_config(Stage::Classifying),
        assessing: prompt_config(Stage::Assessing),
    }
}

/// A store with a resume and all four prompt configurations.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_resume(resume());
    for stage in Stage::ALL {
        store.add_prompt(prompt_config(stage));
    }
    store
}

// Replies for "Requires 5+ years SQL. Python preferred."

pub const TAGGED: &str = r#"{"tagged_list": [
    {"raw_string": "5+ years SQL", "category": "required"},
    {"raw_string": "Python", "category": "additional"}
]}"#;

pub const ATOMIC: &str = r#"{"atomic_objects": [
    {"requirement_string": "5+ years SQL", "category": "required"},
    {"requirement_string": "Python", "category": "additional"}
]}"#;

pub const CLASSIFIED: &str = r#"{"classified_objects": [
    {"requirement_string": "5+ years SQL", "classification": "required_qualification"},
    {"requirement_string": "Python", "classification": "additional_qualification"}
]}"#;

pub const ASSESSED: &str = r#"{"assessed_objects": [
    {"requirement_string": "5+ years SQL", "match_reasoning": "Eight years of SQL.", "match": true},
    {"requirement_string": "Python", "match_reasoning": "Three years of Python.", "match": true}
]}"#;

pub fn happy_transport() -> ScriptedTransport {
    ScriptedTransport::by_schema(TAGGED, ATOMIC, CLASSIFIED, ASSESSED)
}
