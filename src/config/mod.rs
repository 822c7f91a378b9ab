//! Configuration for the orchestrator, loaded from environment variables and
//! a commodity-pool TOML file, organized by domain (broker-agnostic here
//! since execution is an external collaborator): scheduling, risk limits, and
//! the LLM provider.

mod llm_config;
mod risk_limits_config;

pub use llm_config::LlmConfig;
pub use risk_limits_config::RiskLimitsConfig;

use crate::domain::commodity_pool::CommodityPools;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub manager_tick_interval: Duration,
    pub max_agents: usize,
    pub llm_requests_per_minute: u32,
    pub llm: LlmConfig,
    pub risk: RiskLimitsConfig,
    pub commodity_pools: CommodityPools,
    pub decision_log_path: String,
    pub decision_log_flush_interval: Duration,
    pub decision_log_flush_threshold: usize,
    pub correlation_refresh_interval: Duration,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let manager_tick_ms = parse_env("MANAGER_TICK_INTERVAL_MS", 250u64)?;
        let max_agents = parse_env("MAX_AGENTS", 64usize)?;
        let llm_rpm = parse_env("LLM_REQUESTS_PER_MINUTE", 60u32)?;
        let decision_log_path =
            std::env::var("DECISION_LOG_DB_URL").unwrap_or_else(|_| "sqlite://decisions.db".into());
        let flush_interval_ms = parse_env("DECISION_LOG_FLUSH_INTERVAL_MS", 2_000u64)?;
        let flush_threshold = parse_env("DECISION_LOG_FLUSH_THRESHOLD", 256usize)?;
        let correlation_refresh_ms = parse_env("CORRELATION_REFRESH_INTERVAL_MS", 30_000u64)?;

        let pools_path = std::env::var("COMMODITY_POOLS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/commodity_pools.toml"));
        let commodity_pools =
            CommodityPools::load(&pools_path).context("failed to load commodity pools")?;

        Ok(Self {
            manager_tick_interval: Duration::from_millis(manager_tick_ms),
            max_agents,
            llm_requests_per_minute: llm_rpm,
            llm: LlmConfig::from_env()?,
            risk: RiskLimitsConfig::from_env()?,
            commodity_pools,
            decision_log_path,
            decision_log_flush_interval: Duration::from_millis(flush_interval_ms),
            decision_log_flush_threshold: flush_threshold,
            correlation_refresh_interval: Duration::from_millis(correlation_refresh_ms),
        })
    }
}

#[cfg(test)]
impl OrchestratorConfig {
    /// Fixed, environment-independent configuration for unit tests.
    pub fn test_default() -> Self {
        Self {
            manager_tick_interval: Duration::from_millis(250),
            max_agents: 64,
            llm_requests_per_minute: 60,
            llm: LlmConfig {
                api_base_url: "https://example.invalid/v1".to_string(),
                api_key: None,
                default_model: "gpt-4o-mini".to_string(),
                default_temperature: 0.2,
                call_timeout: Duration::from_secs(30),
                max_retries: 3,
                base_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_millis(8_000),
            },
            risk: RiskLimitsConfig::default(),
            commodity_pools: CommodityPools::default(),
            decision_log_path: "sqlite::memory:".to_string(),
            decision_log_flush_interval: Duration::from_millis(2_000),
            decision_log_flush_threshold: 256,
            correlation_refresh_interval: Duration::from_millis(30_000),
        }
    }
}

pub(crate) fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
