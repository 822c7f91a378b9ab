//! Agent Manager (§4.1): owns the table of running strategy agents, ticks
//! each due agent on a fixed schedule, and gates every agent's access to the
//! single shared LLM rate-limit budget.
//!
//! The manager is the only writer of its own agent table; every external
//! operation arrives as an [`AgentManagerCommand`] over an `mpsc` mailbox, and
//! every agent is driven through its own [`StrategyAgentHandle`] rather than
//! through a shared lock.

pub mod commands;
pub mod token_bucket;

pub use commands::{AgentManagerCommand, AgentManagerError};
pub use token_bucket::TokenBucket;

use crate::application::strategy_agent::{self, StrategyAgentHandle};
use crate::config::{LlmConfig, OrchestratorConfig};
use crate::domain::commodity_pool::CommodityPools;
use crate::domain::errors::ConfigError;
use crate::domain::ports::{Broker, LLMClient, MarketDataSource};
use crate::domain::types::{
    AgentId, AgentState, DecisionRecord, InputSummary, StrategyConfig, StrategyId, SymbolSelector,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

/// A zero-decision marker record for a tick abandoned by the scheduler
/// before it ever reached the AI Decision Engine — the synthesized
/// `decision_id` still gives this tick exactly one logger record per
/// Testable Property 4 (§8), even though no `AIDecision` was produced.
fn throttled_record(strategy_id: StrategyId, now: DateTime<Utc>) -> DecisionRecord {
    use crate::domain::types::{AIDecision, SubmissionOutcome};

    DecisionRecord {
        decision_id: uuid::Uuid::new_v4(),
        strategy_id,
        input_summary: InputSummary {
            symbol: String::new(),
            as_of: now,
            indicators: Default::default(),
        },
        raw_ai_response: None,
        decision: AIDecision::fallback_hold(String::new(), now, crate::domain::types::Source::Fallback),
        risk_verdict: None,
        submission_outcome: Some(SubmissionOutcome::NotSubmitted {
            reason: "throttled".to_string(),
        }),
        fill_price: None,
        realized_pnl: None,
        invalidation_triggered: None,
        logged_at: now,
    }
}

struct AgentSlot {
    config: StrategyConfig,
    handle: StrategyAgentHandle,
    /// Insertion order, used to break ties when more agents are due than the
    /// token bucket can admit in one round (§4.1: earliest-registered wins).
    registered_at: DateTime<Utc>,
    last_tick: Option<DateTime<Utc>>,
    cached_state: AgentState,
    /// When this agent first became due but found the LLM budget empty.
    /// Cleared once the agent is admitted into a round. Once `now -
    /// due_since` exceeds the agent's own `decision_interval`, the deferred
    /// tick is abandoned rather than deferred again (§5 back-pressure).
    due_since: Option<DateTime<Utc>>,
}

pub struct AgentManager {
    agents: HashMap<AgentId, AgentSlot>,
    max_agents: usize,
    commodity_pools: CommodityPools,
    llm_budget: Arc<TokenBucket>,
    llm_config: Arc<LlmConfig>,
    market_data: Arc<dyn MarketDataSource>,
    broker: Arc<dyn Broker>,
    llm_client: Arc<dyn LLMClient>,
    risk_client: Arc<dyn strategy_agent::RiskClient>,
    decision_log: Arc<dyn strategy_agent::DecisionLogClient>,
    halted: bool,
}

impl AgentManager {
    pub fn new(
        config: &OrchestratorConfig,
        now: DateTime<Utc>,
        market_data: Arc<dyn MarketDataSource>,
        broker: Arc<dyn Broker>,
        llm_client: Arc<dyn LLMClient>,
        risk_client: Arc<dyn strategy_agent::RiskClient>,
        decision_log: Arc<dyn strategy_agent::DecisionLogClient>,
    ) -> Self {
        Self {
            agents: HashMap::new(),
            max_agents: config.max_agents,
            commodity_pools: config.commodity_pools.clone(),
            llm_budget: Arc::new(TokenBucket::new(config.llm_requests_per_minute, now)),
            llm_config: Arc::new(config.llm.clone()),
            market_data,
            broker,
            llm_client,
            risk_client,
            decision_log,
            halted: false,
        }
    }

    pub fn llm_budget(&self) -> Arc<TokenBucket> {
        self.llm_budget.clone()
    }

    #[instrument(skip(self), fields(agent_count = self.agents.len()))]
    fn create_agent(
        &mut self,
        mut config: StrategyConfig,
        now: DateTime<Utc>,
    ) -> Result<AgentId, ConfigError> {
        config.validate()?;
        if self.agents.contains_key(&config.strategy_id) {
            return Err(ConfigError::DuplicateId(config.strategy_id.clone()));
        }
        if self.agents.len() >= self.max_agents {
            return Err(ConfigError::CapacityExceeded {
                current: self.agents.len(),
                limit: self.max_agents,
            });
        }

        // A `Pool` selector is resolved to its member commodities once, here,
        // at registration time — every other stage downstream (agent tick,
        // symbol selection, sector-exposure bucketing) only ever sees
        // `Explicit` or `Commodities` (§4.2 step 1, §6, §9).
        if let SymbolSelector::Pool(name) = &config.symbol_selector {
            let members = self.commodity_pools.expand(name)?;
            config.symbol_selector = SymbolSelector::Commodities(members);
        }

        let id = config.strategy_id.clone();
        let handle = strategy_agent::spawn(
            config.clone(),
            now,
            self.market_data.clone(),
            self.broker.clone(),
            self.llm_client.clone(),
            self.llm_config.clone(),
            self.llm_budget.clone(),
            self.risk_client.clone(),
            self.decision_log.clone(),
        );

        self.agents.insert(
            id.clone(),
            AgentSlot {
                config,
                handle,
                registered_at: now,
                last_tick: None,
                cached_state: AgentState::Initializing,
                due_since: None,
            },
        );
        info!(agent_id = %id, "agent registered");

        let risk_client = self.risk_client.clone();
        let registered_id = id.clone();
        let initial_capital = self.agents[&id].config.initial_capital;
        tokio::spawn(async move {
            risk_client.register_agent(registered_id, initial_capital).await;
        });

        Ok(id)
    }

    /// One scheduling round: every agent whose `decision_interval` has
    /// elapsed since its last tick is "due". Due agents are admitted into the
    /// round in registration order until the LLM token bucket has no tokens
    /// left; the rest are deferred to the next round (§4.1, §5).
    #[instrument(skip(self))]
    pub async fn tick_once(&mut self, now: DateTime<Utc>) {
        if self.halted {
            return;
        }

        let mut due: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(_, slot)| {
                slot.cached_state != AgentState::Paused
                    && slot.cached_state != AgentState::Halted
                    && slot.cached_state != AgentState::Terminated
                    && slot
                        .last_tick
                        .map(|t| now.signed_duration_since(t) >= slot.config.decision_interval)
                        .unwrap_or(true)
            })
            .map(|(id, _)| id.clone())
            .collect();
        due.sort_by_key(|id| self.agents[id].registered_at);

        let mut admitted = Vec::new();
        let mut abandoned = Vec::new();
        for id in due {
            if self.llm_budget.try_acquire(now) {
                admitted.push(id.clone());
                continue;
            }

            let slot = self.agents.get_mut(&id).expect("id came from self.agents");
            let due_since = *slot.due_since.get_or_insert(now);
            if now.signed_duration_since(due_since) >= slot.config.decision_interval {
                warn!(agent_id = %id, "tick throttled: deferred past one full decision interval");
                abandoned.push((id.clone(), slot.config.strategy_id.clone()));
            } else {
                warn!(agent_id = %id, "tick deferred: LLM rate limit exhausted");
            }
        }

        for (id, strategy_id) in abandoned {
            self.decision_log.log(throttled_record(strategy_id, now)).await;
            if let Some(slot) = self.agents.get_mut(&id) {
                slot.last_tick = Some(now);
                slot.due_since = None;
            }
        }

        // Each due agent runs as its own `tokio::spawn`ed task: a panic inside
        // one agent's tick is caught by the task's `JoinHandle` and can never
        // unwind into the manager or into a sibling agent (Testable Property
        // 5, §8).
        let mut tasks = Vec::with_capacity(admitted.len());
        for id in &admitted {
            let handle = self.agents[id].handle.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let state = handle.request_tick(now).await;
                (id, state)
            }));
        }

        for task in tasks {
            match task.await {
                Ok((id, Ok(state))) => {
                    if let Some(slot) = self.agents.get_mut(&id) {
                        slot.last_tick = Some(now);
                        slot.due_since = None;
                        slot.cached_state = state;
                    }
                }
                Ok((id, Err(fault))) => {
                    warn!(agent_id = %id, error = %fault, "agent tick faulted, isolating to Halted");
                    if let Some(slot) = self.agents.get_mut(&id) {
                        slot.cached_state = AgentState::Halted;
                        slot.last_tick = Some(now);
                        slot.due_since = None;
                    }
                }
                Err(join_err) if join_err.is_panic() => {
                    warn!(error = %join_err, "agent tick task panicked, isolating to Halted");
                }
                Err(join_err) => {
                    warn!(error = %join_err, "agent tick task was cancelled");
                }
            }
        }
    }

    async fn halt_all(&mut self) {
        self.halted = true;
        for slot in self.agents.values_mut() {
            if slot.cached_state != AgentState::Terminated {
                let _ = slot.handle.halt().await;
                slot.cached_state = AgentState::Halted;
            }
        }
    }

    async fn resume_all(&mut self) {
        self.halted = false;
        for slot in self.agents.values_mut() {
            if slot.cached_state == AgentState::Halted {
                slot.cached_state = slot.handle.force_resume().await;
            }
        }
    }

    async fn handle_command(&mut self, cmd: AgentManagerCommand, now: DateTime<Utc>) {
        match cmd {
            AgentManagerCommand::CreateAgent { config, reply } => {
                let _ = reply.send(self.create_agent(config, now));
            }
            AgentManagerCommand::Start { id, reply } => {
                let result = match self.agents.get_mut(&id) {
                    Some(slot) => match slot.handle.start().await {
                        Ok(state) => {
                            slot.cached_state = state;
                            Ok(())
                        }
                        Err(_) => Err(AgentManagerError::UnknownAgent(id.clone())),
                    },
                    None => Err(AgentManagerError::UnknownAgent(id.clone())),
                };
                let _ = reply.send(result);
            }
            AgentManagerCommand::Stop { id, reply } => {
                let result = match self.agents.get_mut(&id) {
                    Some(slot) => match slot.handle.stop().await {
                        Ok(state) => {
                            slot.cached_state = state;
                            Ok(())
                        }
                        Err(_) => Err(AgentManagerError::UnknownAgent(id.clone())),
                    },
                    None => Err(AgentManagerError::UnknownAgent(id.clone())),
                };
                let _ = reply.send(result);
            }
            AgentManagerCommand::Pause { id, reply } => {
                let result = match self.agents.get_mut(&id) {
                    Some(slot) => match slot.handle.pause().await {
                        Ok(state) => {
                            slot.cached_state = state;
                            Ok(())
                        }
                        Err(_) => Err(AgentManagerError::UnknownAgent(id.clone())),
                    },
                    None => Err(AgentManagerError::UnknownAgent(id.clone())),
                };
                let _ = reply.send(result);
            }
            AgentManagerCommand::Resume { id, reply } => {
                let result = match self.agents.get_mut(&id) {
                    Some(slot) => match slot.handle.resume().await {
                        Ok(state) => {
                            slot.cached_state = state;
                            Ok(())
                        }
                        Err(_) => Err(AgentManagerError::UnknownAgent(id.clone())),
                    },
                    None => Err(AgentManagerError::UnknownAgent(id.clone())),
                };
                let _ = reply.send(result);
            }
            AgentManagerCommand::Remove { id, reply } => {
                // §4.1: remove() transitions to TERMINATED, closes any open
                // positions via the designated flatten path, then reclaims
                // resources. The flatten and the state transition both run
                // before the slot is erased from the table, so a failed
                // flatten never silently loses a position's paper trail.
                let handle = match self.agents.get(&id) {
                    Some(slot)
                        if matches!(
                            slot.cached_state,
                            AgentState::Idle | AgentState::Paused | AgentState::Halted
                        ) =>
                    {
                        Some(slot.handle.clone())
                    }
                    Some(_) => None,
                    None => None,
                };
                let result = match (self.agents.contains_key(&id), handle) {
                    (_, Some(handle)) => {
                        handle.flatten().await;
                        let _ = handle.stop().await;
                        self.agents.remove(&id);
                        Ok(())
                    }
                    (true, None) => Err(AgentManagerError::InvalidRemoveState(id.clone())),
                    (false, None) => Err(AgentManagerError::UnknownAgent(id.clone())),
                };
                let _ = reply.send(result);
            }
            AgentManagerCommand::HaltAll => {
                self.halt_all().await;
            }
            AgentManagerCommand::ResumeAll => {
                self.resume_all().await;
            }
            AgentManagerCommand::GetState { id, reply } => {
                let _ = reply.send(self.agents.get(&id).map(|slot| slot.cached_state));
            }
        }
    }

    /// The manager's event loop: ticks on a fixed interval while draining
    /// pending commands between ticks. Runs until `cmd_rx` is closed.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<AgentManagerCommand>,
        tick_interval: std::time::Duration,
    ) {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once(Utc::now()).await;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, Utc::now()).await,
                        None => break,
                    }
                }
            }
        }
    }
}

/// A clonable, cheap-to-share front for sending [`AgentManagerCommand`]s into
/// a running [`AgentManager`] task.
#[derive(Clone)]
pub struct AgentManagerHandle {
    tx: mpsc::Sender<AgentManagerCommand>,
}

impl AgentManagerHandle {
    pub fn new(tx: mpsc::Sender<AgentManagerCommand>) -> Self {
        Self { tx }
    }

    pub async fn create_agent(&self, config: StrategyConfig) -> Result<AgentId, ConfigError> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(AgentManagerCommand::CreateAgent { config, reply })
            .await;
        rx.await
            .unwrap_or(Err(ConfigError::Invalid {
                field: "agent_manager",
                reason: "manager task is no longer running".into(),
            }))
    }

    pub async fn start(&self, id: AgentId) -> Result<(), AgentManagerError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AgentManagerCommand::Start { id, reply }).await;
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn pause(&self, id: AgentId) -> Result<(), AgentManagerError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AgentManagerCommand::Pause { id, reply }).await;
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn resume(&self, id: AgentId) -> Result<(), AgentManagerError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AgentManagerCommand::Resume { id, reply }).await;
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn stop(&self, id: AgentId) -> Result<(), AgentManagerError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AgentManagerCommand::Stop { id, reply }).await;
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn remove(&self, id: AgentId) -> Result<(), AgentManagerError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AgentManagerCommand::Remove { id, reply }).await;
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn halt_all(&self) {
        let _ = self.tx.send(AgentManagerCommand::HaltAll).await;
    }

    pub async fn resume_all(&self) {
        let _ = self.tx.send(AgentManagerCommand::ResumeAll).await;
    }

    pub async fn get_state(&self, id: AgentId) -> Option<AgentState> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(AgentManagerCommand::GetState { id, reply })
            .await;
        rx.await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::strategy_agent::tests_support::{
        noop_broker, noop_decision_log, noop_llm, noop_market_data, noop_risk_client,
    };
    use crate::domain::types::{SelectionMode, SymbolSelector};
    use rust_decimal_macros::dec;

    fn sample_config(id: &str) -> StrategyConfig {
        StrategyConfig {
            strategy_id: id.to_string(),
            strategy_name: "test".to_string(),
            version: 1,
            symbol_selector: SymbolSelector::Explicit(vec!["rb2501".to_string()]),
            max_symbols: 1,
            selection_mode: SelectionMode::Manual,
            initial_capital: dec!(100_000),
            max_position_size: 10,
            max_positions: 3,
            leverage: 2,
            risk_per_trade: 0.02,
            decision_interval: chrono::Duration::seconds(60),
            confidence_threshold: 0.6,
            ai_model: "gpt-4o-mini".to_string(),
            ai_temperature: 0.2,
            is_active: true,
            manual_override: false,
        }
    }

    fn test_manager(now: DateTime<Utc>, max_agents: usize) -> AgentManager {
        let mut config = OrchestratorConfig::test_default();
        config.max_agents = max_agents;
        AgentManager::new(
            &config,
            now,
            noop_market_data(),
            noop_broker(),
            noop_llm(),
            noop_risk_client(),
            noop_decision_log(),
        )
    }

    #[derive(Default, Clone)]
    struct CapturingDecisionLog {
        records: Arc<std::sync::Mutex<Vec<DecisionRecord>>>,
    }

    #[async_trait::async_trait]
    impl strategy_agent::DecisionLogClient for CapturingDecisionLog {
        async fn log(&self, record: DecisionRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    #[tokio::test]
    async fn throttles_and_logs_an_agent_starved_of_budget_past_one_interval() {
        let now = Utc::now();
        let mut config = OrchestratorConfig::test_default();
        config.max_agents = 10;
        config.llm_requests_per_minute = 60; // 1 token/sec

        let capture = CapturingDecisionLog::default();
        let mut manager = AgentManager::new(
            &config,
            now,
            noop_market_data(),
            noop_broker(),
            noop_llm(),
            noop_risk_client(),
            Arc::new(capture.clone()),
        );

        let mut starved = sample_config("starved");
        starved.decision_interval = chrono::Duration::seconds(5);
        manager.create_agent(sample_config("greedy"), now).unwrap();
        manager.create_agent(starved, now).unwrap();

        // Drain the budget so "starved" is deferred on every round.
        for _ in 0..60 {
            manager.llm_budget.try_acquire(now);
        }

        manager.tick_once(now).await;
        assert!(capture.records.lock().unwrap().is_empty());

        let past_interval = now + chrono::Duration::seconds(10);
        for _ in 0..600 {
            manager.llm_budget.try_acquire(past_interval);
        }
        manager.tick_once(past_interval).await;

        let records = capture.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].strategy_id, "starved");
        assert!(matches!(
            records[0].submission_outcome,
            Some(crate::domain::types::SubmissionOutcome::NotSubmitted { ref reason }) if reason == "throttled"
        ));
    }

    #[tokio::test]
    async fn rejects_duplicate_agent_ids() {
        let now = Utc::now();
        let mut manager = test_manager(now, 10);
        manager.create_agent(sample_config("a"), now).unwrap();
        let err = manager.create_agent(sample_config("a"), now).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateId("a".to_string()));
    }

    #[tokio::test]
    async fn remove_flattens_and_terminates_before_erasing_the_slot() {
        let now = Utc::now();
        let mut manager = test_manager(now, 10);
        let id = manager.create_agent(sample_config("a"), now).unwrap();

        let (start_reply, start_rx) = oneshot::channel();
        manager
            .handle_command(AgentManagerCommand::Start { id: id.clone(), reply: start_reply }, now)
            .await;
        assert!(start_rx.await.unwrap().is_ok());

        let (remove_reply, remove_rx) = oneshot::channel();
        manager
            .handle_command(
                AgentManagerCommand::Remove { id: id.clone(), reply: remove_reply },
                now,
            )
            .await;
        assert!(remove_rx.await.unwrap().is_ok());
        assert!(!manager.agents.contains_key(&id));
    }

    #[tokio::test]
    async fn remove_rejects_an_agent_that_never_started() {
        let now = Utc::now();
        let mut manager = test_manager(now, 10);
        let id = manager.create_agent(sample_config("a"), now).unwrap();

        let (remove_reply, remove_rx) = oneshot::channel();
        manager
            .handle_command(
                AgentManagerCommand::Remove { id: id.clone(), reply: remove_reply },
                now,
            )
            .await;
        assert_eq!(
            remove_rx.await.unwrap().unwrap_err(),
            AgentManagerError::InvalidRemoveState(id)
        );
    }

    #[tokio::test]
    async fn enforces_capacity_limit() {
        let now = Utc::now();
        let mut manager = test_manager(now, 1);
        manager.create_agent(sample_config("a"), now).unwrap();
        let err = manager.create_agent(sample_config("b"), now).unwrap_err();
        assert_eq!(
            err,
            ConfigError::CapacityExceeded {
                current: 1,
                limit: 1
            }
        );
    }
}
