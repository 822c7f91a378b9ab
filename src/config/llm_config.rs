//! LLM provider configuration (§4.3, §6).

use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub default_temperature: f64,
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        let call_timeout_secs: u64 = super::parse_env("LLM_CALL_TIMEOUT_SECS", 30u64)?;
        let base_backoff_ms: u64 = super::parse_env("LLM_BASE_BACKOFF_MS", 500u64)?;
        let max_backoff_ms: u64 = super::parse_env("LLM_MAX_BACKOFF_MS", 8_000u64)?;

        Ok(Self {
            api_base_url: std::env::var("LLM_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            default_model: std::env::var("LLM_DEFAULT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            default_temperature: super::parse_env("LLM_DEFAULT_TEMPERATURE", 0.2)?,
            call_timeout: Duration::from_secs(call_timeout_secs),
            max_retries: super::parse_env("LLM_MAX_RETRIES", 3u32)?,
            base_backoff: Duration::from_millis(base_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        })
    }

    /// No API key configured at all -> the engine always falls back and
    /// labels its decisions `Source::Simulated` rather than `Fallback`
    /// (§9 Open Question 4).
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
