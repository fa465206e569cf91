use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// The resume the assessment matches against: a structured profile plus the full
/// markdown text. Read once per batch and shared by every pipeline in it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeSnapshot {
    pub resume_id: Uuid,
    pub profile: Json<ResumeProfile>,
    pub markdown: String,
    pub created_at: DateTime<Utc>,
}

impl ResumeSnapshot {
    /// A snapshot with no profile content and no markdown is as good as missing.
    pub fn is_empty(&self) -> bool {
        self.markdown.trim().is_empty() && self.profile.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeProfile {
    #[serde(default)]
    pub skills: Vec<SkillExperience>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub domain_experience: Vec<DomainExperience>,
}

impl ResumeProfile {
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty() && self.education.is_empty() && self.domain_experience.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillExperience {
    pub name: String,
    #[serde(default)]
    pub years: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EducationEntry {
    pub degree: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainExperience {
    pub domain: String,
    #[serde(default)]
    pub years: Option<f32>,
}
