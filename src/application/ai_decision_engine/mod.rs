//! AI Decision Engine (§4.3): turns one market snapshot into one normalised
//! [`AIDecision`]. The pipeline is cache -> LLM call (rate-limited, retried,
//! bounded by a deadline) -> parse/validate (one repair retry) -> fallback ->
//! normalise. No step can fail the caller; every path terminates in a valid
//! decision.

mod cache;
mod fallback;
mod parser;
mod prompt;

use crate::application::agent_manager::TokenBucket;
use crate::config::LlmConfig;
use crate::domain::errors::DecisionParseError;
use crate::domain::ports::LLMClient;
use crate::domain::types::{AIDecision, MarketSnapshot, Source, StrategyConfig};
use cache::DecisionCache;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct AIDecisionEngine {
    cache: DecisionCache,
    llm: Arc<LlmConfig>,
}

/// What actually happened, surfaced to the caller so it can be recorded in
/// the decision log's audit trail alongside the decision itself.
pub struct EngineOutcome {
    pub decision: AIDecision,
    pub raw_response: Option<String>,
}

impl AIDecisionEngine {
    pub fn new(llm: Arc<LlmConfig>) -> Self {
        Self {
            cache: DecisionCache::new(256, chrono::Duration::seconds(60)),
            llm,
        }
    }

    #[instrument(skip(self, llm_client, llm_budget, snapshot), fields(symbol = %snapshot.symbol))]
    pub async fn decide(
        &self,
        config: &StrategyConfig,
        snapshot: &MarketSnapshot,
        llm_client: &dyn LLMClient,
        llm_budget: &TokenBucket,
        now: DateTime<Utc>,
    ) -> EngineOutcome {
        let key = prompt::cache_key(config, snapshot);
        if let Some(decision) = self.cache.get(&key, now) {
            debug!("decision cache hit");
            return EngineOutcome {
                decision,
                raw_response: None,
            };
        }

        if !self.llm.is_configured() || !llm_client.is_configured() {
            let decision = fallback::decide(snapshot, now, Source::Simulated);
            return EngineOutcome {
                decision,
                raw_response: None,
            };
        }

        if !llm_budget.try_acquire(now) {
            warn!("LLM rate limit exhausted, using fallback");
            let decision = fallback::decide(snapshot, now, Source::Fallback);
            return EngineOutcome {
                decision,
                raw_response: None,
            };
        }

        let text = prompt::build(config, snapshot);
        match self.call_with_retry(&text, config, llm_client, now).await {
            Some(raw) => match parser::parse(&raw, &snapshot.symbol, now) {
                Ok(decision) => {
                    let decision = decision.normalise();
                    self.cache.put(key, decision.clone(), now);
                    EngineOutcome {
                        decision,
                        raw_response: Some(raw),
                    }
                }
                Err(parse_err) => {
                    warn!(error = %parse_err, "LLM reply failed validation, requesting one repair");
                    self.repair_and_finish(&text, &raw, parse_err, config, snapshot, llm_client, key, now)
                        .await
                }
            },
            None => EngineOutcome {
                decision: fallback::decide(snapshot, now, Source::Fallback),
                raw_response: None,
            },
        }
    }

    /// §4.3 step 3's "one repair retry": re-invokes the LLM with the
    /// original prompt plus a message quoting the parse error and the
    /// offending reply, asking for a corrected JSON object only. A second
    /// failure — parse error or exhausted call retries — falls through to
    /// the deterministic fallback rule.
    #[allow(clippy::too_many_arguments)]
    async fn repair_and_finish(
        &self,
        original_prompt: &str,
        offending_reply: &str,
        parse_err: DecisionParseError,
        config: &StrategyConfig,
        snapshot: &MarketSnapshot,
        llm_client: &dyn LLMClient,
        key: String,
        now: DateTime<Utc>,
    ) -> EngineOutcome {
        let repair_prompt = prompt::build_repair(original_prompt, offending_reply, &parse_err);
        match self.call_with_retry(&repair_prompt, config, llm_client, now).await {
            Some(raw) => match parser::parse(&raw, &snapshot.symbol, now) {
                Ok(decision) => {
                    let decision = decision.normalise();
                    self.cache.put(key, decision.clone(), now);
                    EngineOutcome {
                        decision,
                        raw_response: Some(raw),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "repaired LLM reply still unusable, using fallback");
                    EngineOutcome {
                        decision: fallback::decide(snapshot, now, Source::Fallback),
                        raw_response: Some(raw),
                    }
                }
            },
            None => EngineOutcome {
                decision: fallback::decide(snapshot, now, Source::Fallback),
                raw_response: None,
            },
        }
    }

    async fn call_with_retry(
        &self,
        prompt_text: &str,
        config: &StrategyConfig,
        llm_client: &dyn LLMClient,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let deadline = now + chrono::Duration::from_std(self.llm.call_timeout).ok()?;
        let mut attempt = 0u32;
        let mut backoff = self.llm.base_backoff;

        loop {
            let result = llm_client
                .complete(
                    prompt_text,
                    &config.ai_model,
                    config.ai_temperature,
                    1024,
                    deadline,
                )
                .await;

            match result {
                Ok(reply) => return Some(reply),
                Err(e) if attempt < self.llm.max_retries => {
                    warn!(error = %e, attempt, "LLM call failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.llm.max_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "LLM call exhausted retries");
                    return None;
                }
            }
        }
    }

}
