use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm_client::{RetryPolicy, Timeouts};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub seed_prompts: bool,
    pub llm: LlmConfig,
    pub batch: BatchDefaults,
}

/// Model Gateway settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
}

/// Defaults for batch runs when the caller does not override them.
#[derive(Debug, Clone, Copy)]
pub struct BatchDefaults {
    pub concurrency: usize,
    pub days_back: u32,
    pub limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            seed_prompts: parse_env("SEED_PROMPTS", true)?,
            llm: LlmConfig {
                base_url: std::env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: require_env("LLM_API_KEY")?,
                timeouts: Timeouts {
                    connect: Duration::from_secs(parse_env("LLM_CONNECT_TIMEOUT_SECS", 10)?),
                    read: Duration::from_secs(parse_env("LLM_READ_TIMEOUT_SECS", 300)?),
                    write: Duration::from_secs(parse_env("LLM_WRITE_TIMEOUT_SECS", 30)?),
                },
                retry: RetryPolicy {
                    max_retries: parse_env("LLM_MAX_RETRIES", 3)?,
                    base_delay: Duration::from_millis(parse_env("LLM_BACKOFF_BASE_MS", 1000)?),
                },
            },
            batch: BatchDefaults {
                concurrency: parse_env::<usize>("ASSESSMENT_CONCURRENCY", 5)?.max(1),
                days_back: parse_env("ASSESSMENT_DAYS_BACK", 14)?,
                limit: parse_env("ASSESSMENT_LIMIT", 100)?,
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid value, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
