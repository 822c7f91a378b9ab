//! Shared wiring for the scenario suite: a minimal but complete
//! [`OrchestratorConfig`] plus a helper that spawns all three long-lived
//! actors (Decision Logger, Portfolio Risk Manager, Agent Manager) the same
//! way `bootstrap::init` does, but with per-scenario fakes swapped in.

use cherryquant_orchestrator::application::agent_manager::{AgentManager, AgentManagerHandle};
use cherryquant_orchestrator::application::decision_logger::{self, DecisionLoggerHandle};
use cherryquant_orchestrator::application::portfolio_risk_manager::{
    self, LoggingAlertSink, PortfolioRiskManagerHandle,
};
use cherryquant_orchestrator::application::strategy_agent::{DecisionLogClient, RiskClient};
use cherryquant_orchestrator::config::{LlmConfig, OrchestratorConfig, RiskLimitsConfig};
use cherryquant_orchestrator::domain::commodity_pool::CommodityPools;
use cherryquant_orchestrator::domain::ports::{Broker, LLMClient, MarketDataSource};
use cherryquant_orchestrator::domain::types::{
    DecisionRecord, SelectionMode, StrategyConfig, SymbolSelector,
};
use cherryquant_orchestrator::infrastructure::persistence::Database;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

/// A fixed, environment-independent configuration — every duration is short
/// enough for a real-time `tokio::test` to observe a full tick within a
/// couple of seconds, and the LLM is marked configured so the AI Decision
/// Engine actually calls out to whatever [`LLMClient`] a scenario supplies.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        manager_tick_interval: Duration::from_millis(20),
        max_agents: 10,
        llm_requests_per_minute: 600,
        llm: LlmConfig {
            api_base_url: "https://example.invalid/v1".to_string(),
            api_key: Some("test-key".to_string()),
            default_model: "gpt-4o-mini".to_string(),
            default_temperature: 0.2,
            call_timeout: Duration::from_secs(5),
            max_retries: 1,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        risk: RiskLimitsConfig::default(),
        commodity_pools: CommodityPools::default(),
        decision_log_path: "sqlite::memory:".to_string(),
        decision_log_flush_interval: Duration::from_secs(3600),
        decision_log_flush_threshold: 256,
        correlation_refresh_interval: Duration::from_secs(3600),
    }
}

pub fn sample_strategy(id: &str, symbol_selector: SymbolSelector) -> StrategyConfig {
    StrategyConfig {
        strategy_id: id.to_string(),
        strategy_name: format!("scenario-{id}"),
        version: 1,
        symbol_selector,
        max_symbols: 2,
        selection_mode: SelectionMode::AiDriven,
        initial_capital: dec!(100_000),
        max_position_size: 10,
        max_positions: 3,
        leverage: 2,
        risk_per_trade: 0.02,
        decision_interval: chrono::Duration::seconds(1),
        confidence_threshold: 0.6,
        ai_model: "gpt-4o-mini".to_string(),
        ai_temperature: 0.2,
        is_active: true,
        manual_override: false,
    }
}

pub struct Harness {
    pub agent_manager: AgentManagerHandle,
    pub risk_manager: PortfolioRiskManagerHandle,
    pub decision_logger: DecisionLoggerHandle,
}

/// Wires the three long-lived actors together exactly as
/// `bootstrap::init` does, but taking the market data/broker/LLM fakes as
/// parameters so each scenario can script its own collaborators.
pub async fn wire(
    config: &OrchestratorConfig,
    market_data: Arc<dyn MarketDataSource>,
    broker: Arc<dyn Broker>,
    llm_client: Arc<dyn LLMClient>,
) -> Harness {
    let db = Database::new(&config.decision_log_path).await.unwrap();
    let decision_logger_handle = decision_logger::spawn(
        db,
        config.decision_log_flush_interval,
        config.decision_log_flush_threshold,
    );
    let decision_log: Arc<dyn DecisionLogClient> = Arc::new(decision_logger_handle.clone());

    let (agent_tx, agent_rx) = mpsc::channel(64);
    let agent_manager_handle = AgentManagerHandle::new(agent_tx);

    let risk_manager_handle = portfolio_risk_manager::spawn(
        config.risk,
        config.commodity_pools.clone(),
        Arc::new(LoggingAlertSink),
        agent_manager_handle.clone(),
        market_data.clone(),
        config.correlation_refresh_interval,
    );
    let risk_client: Arc<dyn RiskClient> = Arc::new(risk_manager_handle.clone());

    let manager = AgentManager::new(
        config,
        chrono::Utc::now(),
        market_data,
        broker,
        llm_client,
        risk_client,
        decision_log,
    );
    tokio::spawn(manager.run(agent_rx, config.manager_tick_interval));

    Harness {
        agent_manager: agent_manager_handle,
        risk_manager: risk_manager_handle,
        decision_logger: decision_logger_handle,
    }
}

/// Drains the decision log broadcast until it sees a record for
/// `strategy_id`, ignoring records from other agents ticking concurrently in
/// the same harness.
pub async fn next_record_for(
    events: &mut broadcast::Receiver<DecisionRecord>,
    strategy_id: &str,
    timeout: Duration,
) -> DecisionRecord {
    tokio::time::timeout(timeout, async {
        loop {
            let record = events.recv().await.expect("decision log sender dropped");
            if record.strategy_id == strategy_id {
                return record;
            }
        }
    })
    .await
    .expect("no matching decision record within timeout")
}
