//! OpenAI-compatible chat-completion `LLMClient` adapter (§4.3, §6), built
//! on the teacher's `HttpClientFactory` (`infrastructure/http_client_factory.rs`):
//! one shared `ClientWithMiddleware` with transport-level retry, a single
//! request per `complete()` call. The call-level retry/backoff loop against
//! `TransientError` already lives in `ai_decision_engine::call_with_retry`,
//! so this adapter does not retry a second time at its own layer.

use crate::config::LlmConfig;
use crate::domain::errors::TransientError;
use crate::domain::ports::LLMClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One instance is shared across all agents (they all draw from the same
/// `TokenBucket` anyway — see `ai_decision_engine`).
pub struct OpenAiCompatibleClient {
    http: ClientWithMiddleware,
    config: LlmConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: LlmConfig) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);

        let inner = Client::builder()
            .pool_max_idle_per_host(8)
            .timeout(config.call_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let http = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { http, config }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl LLMClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
        max_tokens: u32,
        deadline: DateTime<Utc>,
    ) -> Result<String, TransientError> {
        let remaining = (deadline - Utc::now())
            .to_std()
            .map_err(|_| TransientError::Timeout(self.config.call_timeout))?;

        let body = ChatRequest {
            model,
            temperature,
            max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!(
            "{}/chat/completions",
            self.config.api_base_url.trim_end_matches('/')
        );
        let mut request = self.http.post(&url).json(&body).timeout(remaining);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransientError::Upstream(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(TransientError::RateLimited { retry_after_secs });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(TransientError::Upstream(format!(
                "status {status}: {body_text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransientError::Upstream(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TransientError::Upstream("empty choices array".into()))
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_base_url: "https://example.invalid/v1".to_string(),
            api_key: None,
            default_model: "gpt-4o-mini".to_string(),
            default_temperature: 0.2,
            call_timeout: StdDuration::from_secs(30),
            max_retries: 3,
            base_backoff: StdDuration::from_millis(500),
            max_backoff: StdDuration::from_millis(8_000),
        }
    }

    #[test]
    fn unconfigured_client_reports_not_configured() {
        let client = OpenAiCompatibleClient::new(test_config());
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn past_deadline_fails_without_a_network_call() {
        let client = OpenAiCompatibleClient::new(test_config());
        let past = Utc::now() - chrono::Duration::seconds(1);
        let result = client.complete("prompt", "gpt-4o-mini", 0.2, 64, past).await;
        assert!(matches!(result, Err(TransientError::Timeout(_))));
    }
}
