//! Stage identities, prompt rendering, and the default prompt catalogue.
//!
//! Templates are stored per stage in the prompts table (see `seed.rs`) and rendered here by
//! plain `{placeholder}` substitution. Unknown placeholders are left untouched.

use std::fmt;

use serde::Serialize;

use crate::assessment::schema::{AtomicObjects, ClassifiedRequirement, TaggedList};
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, PRESERVE_TEXT_INSTRUCTION};
use crate::llm_client::ChatMessage;
use crate::models::prompt::PromptConfiguration;
use crate::models::resume::ResumeSnapshot;

/// The four model-call stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Tagging,
    Atomizing,
    Classifying,
    Assessing,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Tagging,
        Stage::Atomizing,
        Stage::Classifying,
        Stage::Assessing,
    ];

    /// Key of the stage's configuration in the prompts table.
    pub fn run_type(&self) -> &'static str {
        match self {
            Stage::Tagging => "ja_2_1_assessment",
            Stage::Atomizing => "ja_2_2_assessment",
            Stage::Classifying => "ja_2_3_assessment",
            Stage::Assessing => "ja_3_1_assessment",
        }
    }

    /// Reason recorded when a job is quarantined at this stage.
    pub fn quarantine_reason(&self) -> &'static str {
        match self {
            Stage::Tagging => "failed_generate_jobdesc_tagging",
            Stage::Atomizing => "failed_generate_jobdesc_atomizing",
            Stage::Classifying => "failed_generate_jobdesc_final",
            Stage::Assessing => "failed_generate_assessment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Tagging => "tagging",
            Stage::Atomizing => "atomizing",
            Stage::Classifying => "classifying",
            Stage::Assessing => "assessing",
        };
        f.write_str(name)
    }
}

/// The configuration of all four stages, fetched once per run.
#[derive(Debug, Clone)]
pub struct StagePrompts {
    pub tagging: PromptConfiguration,
    pub atomizing: PromptConfiguration,
    pub classifying: PromptConfiguration,
    pub assessing: PromptConfiguration,
}

// ────────────────────────────────────────────────────────────────────────────
// Rendering
// ────────────────────────────────────────────────────────────────────────────

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

pub fn render_tagging(template: &str, job_description: &str) -> String {
    fill(template, &[("job_description", job_description)])
}

pub fn render_atomizing(template: &str, tagged: &TaggedList) -> String {
    fill(template, &[("tagged_list", &to_json(&tagged.tagged_list))])
}

pub fn render_classifying(template: &str, atomic: &AtomicObjects) -> String {
    fill(template, &[("atomic_objects", &to_json(&atomic.atomic_objects))])
}

pub fn render_assessing(
    template: &str,
    filtered: &[ClassifiedRequirement],
    resume: &ResumeSnapshot,
) -> String {
    fill(
        template,
        &[
            ("classified_objects", &to_json(filtered)),
            ("resume_profile", &to_json(&resume.profile.0)),
            ("resume_markdown", &resume.markdown),
        ],
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Default catalogue (seeded when a run type has no prompt yet)
// ────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// A seedable default configuration for one stage.
pub struct DefaultPrompt {
    pub stage: Stage,
    pub system_prompt: String,
    pub template: &'static str,
    pub temperature: f64,
    pub thinking_budget: i32,
}

pub fn default_prompts() -> Vec<DefaultPrompt> {
    vec![
        DefaultPrompt {
            stage: Stage::Tagging,
            system_prompt: format!("{TAGGING_SYSTEM} {JSON_ONLY_SYSTEM}"),
            template: TAGGING_TEMPLATE,
            temperature: 0.0,
            thinking_budget: 1024,
        },
        DefaultPrompt {
            stage: Stage::Atomizing,
            system_prompt: format!("{ATOMIZING_SYSTEM} {JSON_ONLY_SYSTEM}"),
            template: ATOMIZING_TEMPLATE,
            temperature: 0.0,
            thinking_budget: 1024,
        },
        DefaultPrompt {
            stage: Stage::Classifying,
            system_prompt: format!("{CLASSIFYING_SYSTEM} {PRESERVE_TEXT_INSTRUCTION} {JSON_ONLY_SYSTEM}"),
            template: CLASSIFYING_TEMPLATE,
            temperature: 0.0,
            thinking_budget: 2048,
        },
        DefaultPrompt {
            stage: Stage::Assessing,
            system_prompt: format!("{ASSESSING_SYSTEM} {PRESERVE_TEXT_INSTRUCTION} {JSON_ONLY_SYSTEM}"),
            template: ASSESSING_TEMPLATE,
            temperature: 0.0,
            thinking_budget: 4096,
        },
    ]
}

const TAGGING_SYSTEM: &str = "You are an expert recruiter reading job postings. \
    Extract every qualification the employer lists for a candidate and tag each one \
    as required or additional.";

/// Replace `{job_description}` before sending.
const TAGGING_TEMPLATE: &str = r#"Extract the candidate qualifications from the job description below.

Return a JSON object with this EXACT schema:
{
  "tagged_list": [
    {"raw_string": "Minimum of 5 years of SQL experience", "category": "required"}
  ]
}

Rules:
- raw_string is copied from the posting, not paraphrased.
- category is "required" unless the posting marks it as optional ("preferred", "a plus", "nice to have", "bonus", "desired"), in which case it is "additional".
- Ignore company descriptions, benefits, and equal-opportunity statements.

<job_description>
{job_description}
</job_description>"#;

const ATOMIZING_SYSTEM: &str = "You split job qualifications into atomic, independently \
    verifiable requirements without changing their meaning.";

/// Replace `{tagged_list}` before sending.
const ATOMIZING_TEMPLATE: &str = r#"Split each tagged qualification below into atomic requirements.

Return a JSON object with this EXACT schema:
{
  "atomic_objects": [
    {"requirement_string": "Fluency in SQL", "category": "required"}
  ]
}

DECOMPOSITION RULES:
1. NEVER split an exclusive-choice list ("Python, R, or Scala", "Bachelor's or Master's degree"). Keep it as one requirement with the full original text.
2. NEVER split an exemplar list ("BI tools such as Tableau, Power BI", "e.g. AWS, GCP"). Keep it as one requirement with the full original text.
3. Split ONLY when independent requirements are joined by "and" (or a comma list with "and"), e.g. "Fluency in SQL and a strong background in data visualization".
4. Every split fragment must be rewritten as a grammatically complete, standalone requirement ("Fluency in SQL", "Strong background in data visualization").
5. Every fragment keeps the category of the qualification it came from.
6. A qualification that needs no split is returned unchanged.

TAGGED QUALIFICATIONS:
{tagged_list}"#;

const CLASSIFYING_SYSTEM: &str = "You classify atomic job requirements for automated \
    resume matching.";

/// Replace `{atomic_objects}` before sending.
const CLASSIFYING_TEMPLATE: &str = r#"Classify every atomic requirement below. Return exactly one entry per input requirement.

Return a JSON object with this EXACT schema:
{
  "classified_objects": [
    {"requirement_string": "Fluency in SQL", "classification": "required_qualification"}
  ]
}

Apply these rules IN ORDER and stop at the first that matches:
1. Behavioral or soft-skill content (communication, leadership style, teamwork, attitude) OR logistical/legal/conditional content (work authorization, location, travel, schedule, background checks, willingness to learn) → "evaluated_qualification", regardless of its category.
2. The text contains optional language ("preferred", "a plus", "nice to have", "bonus", "or equivalent") → "additional_qualification", even when the category is "required".
3. Otherwise use the category: "required" → "required_qualification", "additional" → "additional_qualification".

ATOMIC REQUIREMENTS:
{atomic_objects}"#;

const ASSESSING_SYSTEM: &str = "You are a rigorous hiring screener. You decide whether a \
    candidate's resume demonstrates each requirement, citing resume evidence.";

/// Replace `{classified_objects}`, `{resume_profile}`, `{resume_markdown}` before sending.
const ASSESSING_TEMPLATE: &str = r#"Assess the candidate against EVERY requirement below. Return exactly one entry per requirement, in the same order.

Return a JSON object with this EXACT schema:
{
  "assessed_objects": [
    {"requirement_string": "Fluency in SQL", "match_reasoning": "Eight years of daily SQL across two roles.", "match": true}
  ]
}

Rules:
- match is true only if the resume demonstrates the requirement; years of experience must meet the stated minimum.
- match_reasoning is one or two sentences citing the resume. It is never empty.
- match is never null.

REQUIREMENTS:
{classified_objects}

CANDIDATE PROFILE:
{resume_profile}

<resume>
{resume_markdown}
</resume>"#;

/// Few-shot pair sent ahead of every tagging request.
pub fn tagging_examples() -> Vec<ChatMessage> {
    vec![
        ChatMessage::user(render_tagging(
            TAGGING_TEMPLATE,
            "Senior Analyst. Requirements include 6+ years of analytics experience. \
             Fluency in SQL and a strong background in data visualization. \
             Hands-on experience with Python or R is preferred. \
             We offer a hybrid schedule and full benefits.",
        )),
        ChatMessage::assistant(
            r#"{
  "tagged_list": [
    {"raw_string": "6+ years of analytics experience", "category": "required"},
    {"raw_string": "Fluency in SQL and a strong background in data visualization.", "category": "required"},
    {"raw_string": "Hands-on experience with Python or R is preferred.", "category": "additional"}
  ]
}"#,
        ),
    ]
}
