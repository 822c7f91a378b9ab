//! Composition root (§6 "Operator-facing API surface"): wires the five core
//! components into one running [`Orchestrator`], grounded on the teacher's
//! `ServicesBootstrap::init` (`application/bootstrap/services.rs`) — channel
//! creation, then actor construction in dependency order, then `tokio::spawn`,
//! returning clonable handles rather than the actors themselves.

use crate::application::agent_manager::{AgentManager, AgentManagerHandle};
use crate::application::decision_logger::{self, DecisionLoggerHandle};
use crate::application::portfolio_risk_manager::{self, LoggingAlertSink, PortfolioRiskManagerHandle};
use crate::application::strategy_agent::{DecisionLogClient, RiskClient};
use crate::config::OrchestratorConfig;
use crate::domain::ports::{Broker, LLMClient, MarketDataSource};
use crate::infrastructure::llm_client::OpenAiCompatibleClient;
use crate::infrastructure::mock::{InMemoryBroker, InMemoryMarketDataSource};
use crate::infrastructure::persistence::Database;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Every handle an operator-facing layer (a CLI, a thin HTTP shim — both out
/// of scope here per §6) would need. Cloning an `Orchestrator` is cheap: each
/// field is itself a clonable channel handle.
#[derive(Clone)]
pub struct Orchestrator {
    pub agent_manager: AgentManagerHandle,
    pub risk_manager: PortfolioRiskManagerHandle,
    pub decision_logger: DecisionLoggerHandle,
}

/// Builds and spawns every component, wiring the Agent Manager's own command
/// channel through the Portfolio Risk Manager first (the risk manager needs
/// an [`AgentManagerHandle`] to fan out kill-switch halts, and the agent
/// manager needs the risk manager's handle as its `RiskClient` — the channel
/// is created before either actor so there's no construction cycle).
pub async fn init(config: &OrchestratorConfig) -> Result<Orchestrator> {
    let market_data: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketDataSource::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let llm_client: Arc<dyn LLMClient> = Arc::new(OpenAiCompatibleClient::new(config.llm.clone()));

    let db = Database::new(&config.decision_log_path).await?;
    let decision_logger_handle = decision_logger::spawn(
        db,
        config.decision_log_flush_interval,
        config.decision_log_flush_threshold,
    );
    let decision_log: Arc<dyn DecisionLogClient> = Arc::new(decision_logger_handle.clone());

    let (agent_tx, agent_rx) = mpsc::channel(256);
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
        Utc::now(),
        market_data,
        broker,
        llm_client,
        risk_client,
        decision_log,
    );
    tokio::spawn(manager.run(agent_rx, config.manager_tick_interval));

    Ok(Orchestrator {
        agent_manager: agent_manager_handle,
        risk_manager: risk_manager_handle,
        decision_logger: decision_logger_handle,
    })
}
