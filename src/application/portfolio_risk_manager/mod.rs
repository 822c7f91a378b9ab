//! Portfolio Risk Manager (§4.4): the single cross-agent gatekeeper for every
//! order intent and the owner of the system-wide kill-switch. Consumed by
//! strategy agents through the narrow [`strategy_agent::RiskClient`]
//! interface; agents never see this actor's internal state directly.
//!
//! Single-writer actor over an `mpsc` mailbox, grounded on the teacher's
//! `RiskManager` (`application/risk_management/risk_manager.rs`).

pub mod state;
pub mod validators;

use crate::application::agent_manager::AgentManagerHandle;
use crate::application::strategy_agent::RiskClient;
use crate::config::RiskLimitsConfig;
use crate::domain::commodity_pool::CommodityPools;
use crate::domain::ports::MarketDataSource;
use crate::domain::types::{
    AgentId, Alert, OrderIntent, PortfolioView, RiskReasonCode, RiskVerdict, Severity, Symbol,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use state::PortfolioState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use validators::{PortfolioRiskPipeline, PortfolioRiskValidator};

/// Sample Pearson correlation of two equal-length return series, `None` when
/// either series has no variance or the two windows don't overlap (§4.4
/// PortfolioView: "pairwise correlation matrix over recent returns").
fn pearson_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Pluggable alert delivery (§4.4), grounded on the teacher's
/// `ConnectionHealthService` status-broadcast pattern but kept synchronous
/// since alerts here are fire-and-forget notifications, not a subscribable
/// stream.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: Alert);
}

pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn emit(&self, alert: Alert) {
        match alert.severity {
            Severity::Critical => error!(source = %alert.source, "{}", alert.message),
            Severity::Warning => warn!(source = %alert.source, "{}", alert.message),
            Severity::Info => info!(source = %alert.source, "{}", alert.message),
        }
    }
}

enum RiskManagerCommand {
    Evaluate {
        intent: OrderIntent,
        now: DateTime<Utc>,
        reply: oneshot::Sender<RiskVerdict>,
    },
    RegisterAgent {
        agent_id: AgentId,
        initial_capital: Decimal,
    },
    CloseAgentSymbol {
        agent_id: AgentId,
        symbol: Symbol,
    },
    RecordPnl {
        delta: Decimal,
    },
    Resume,
    GetView {
        reply: oneshot::Sender<PortfolioView>,
    },
}

pub struct PortfolioRiskManager {
    state: PortfolioState,
    limits: RiskLimitsConfig,
    commodity_pools: CommodityPools,
    pipeline: PortfolioRiskPipeline,
    alert_sink: Arc<dyn AlertSink>,
    agent_manager: AgentManagerHandle,
    market_data: Arc<dyn MarketDataSource>,
}

impl PortfolioRiskManager {
    pub fn new(
        limits: RiskLimitsConfig,
        commodity_pools: CommodityPools,
        alert_sink: Arc<dyn AlertSink>,
        agent_manager: AgentManagerHandle,
        market_data: Arc<dyn MarketDataSource>,
    ) -> Self {
        let validators: Vec<Box<dyn PortfolioRiskValidator>> = vec![
            Box::new(validators::PortfolioStopLossValidator),
            Box::new(validators::DailyLossLimitValidator),
            Box::new(validators::LeverageValidator),
            Box::new(validators::SectorConcentrationValidator),
            Box::new(validators::CorrelationValidator),
            Box::new(validators::TotalCapitalUsageValidator),
            Box::new(validators::PositionSizeValidator),
        ];
        Self {
            state: PortfolioState::default(),
            limits,
            commodity_pools,
            pipeline: PortfolioRiskPipeline::new(validators),
            alert_sink,
            agent_manager,
            market_data,
        }
    }

    /// Recomputes the pairwise correlation matrix over every symbol any agent
    /// currently holds, pulling `recent_returns` from the market data source
    /// (§4.4 PortfolioView). Symbols with too little return history simply
    /// keep no entry rather than block the refresh.
    async fn refresh_correlations(&mut self, now: DateTime<Utc>) {
        let mut symbols: HashSet<String> = HashSet::new();
        for agent in self.state.agents.values() {
            symbols.extend(agent.positions.keys().cloned());
        }
        let symbols: Vec<String> = symbols.into_iter().collect();
        if symbols.len() < 2 {
            return;
        }

        let mut returns = std::collections::HashMap::with_capacity(symbols.len());
        for symbol in &symbols {
            match self
                .market_data
                .recent_returns(symbol, self.limits.correlation_window)
                .await
            {
                Ok(series) => {
                    returns.insert(symbol.clone(), series);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "failed to fetch recent returns for correlation refresh"),
            }
        }

        for i in 0..symbols.len() {
            for j in (i + 1)..symbols.len() {
                let (a, b) = (&symbols[i], &symbols[j]);
                let (Some(ra), Some(rb)) = (returns.get(a), returns.get(b)) else {
                    continue;
                };
                if let Some(corr) = pearson_correlation(ra, rb) {
                    let severity_alert = corr.abs() > self.limits.max_correlation_threshold;
                    self.state
                        .correlation_matrix
                        .insert((a.clone(), b.clone()), corr);
                    self.state
                        .correlation_matrix
                        .insert((b.clone(), a.clone()), corr);
                    if severity_alert {
                        self.alert_sink.emit(Alert {
                            severity: Severity::Warning,
                            source: "portfolio_risk_manager".to_string(),
                            message: format!("correlation spike between {a} and {b}: {corr:.2}"),
                            at: now,
                        });
                    }
                }
            }
        }
    }

    async fn evaluate(&mut self, intent: OrderIntent, now: DateTime<Utc>) -> RiskVerdict {
        let verdict = match self
            .pipeline
            .evaluate(&intent, &self.state, &self.limits, &self.commodity_pools)
            .await
        {
            Ok(quantity) => {
                self.state.apply_intent(
                    &intent.strategy_id,
                    &intent.symbol,
                    intent.direction,
                    quantity,
                    intent.price,
                );
                let adjusted_quantity = (quantity != intent.quantity).then_some(quantity);
                RiskVerdict::Approved { adjusted_quantity }
            }
            Err((reason, detail)) => RiskVerdict::Vetoed { reason, detail },
        };

        self.check_kill_switch(now).await;
        verdict
    }

    /// Crossing the portfolio stop-loss or the daily loss limit latches the
    /// halt flag and fans out a kill-switch halt to every agent (§4.4
    /// Testable Property 6). Only an explicit `Resume` lifts it.
    async fn check_kill_switch(&mut self, now: DateTime<Utc>) {
        if self.state.halted {
            return;
        }
        self.state.refresh_drawdown();

        let total_capital = self.state.total_capital();
        let drawdown_triggered = self.state.rolling_drawdown >= self.limits.portfolio_stop_loss;
        let daily_loss_triggered = total_capital > Decimal::ZERO
            && self.state.daily_pnl
                <= -(total_capital * Decimal::try_from(self.limits.daily_loss_limit).unwrap_or_default());

        if !drawdown_triggered && !daily_loss_triggered {
            return;
        }

        self.state.halted = true;
        let reason = if drawdown_triggered {
            "rolling drawdown reached the portfolio stop-loss"
        } else {
            "daily pnl reached the daily loss limit"
        };
        warn!(reason, "portfolio kill-switch engaged");
        self.alert_sink.emit(Alert {
            severity: Severity::Critical,
            source: "portfolio_risk_manager".to_string(),
            message: format!("kill-switch engaged: {reason}"),
            at: now,
        });
        self.agent_manager.halt_all().await;
    }

    async fn handle_command(&mut self, cmd: RiskManagerCommand) {
        match cmd {
            RiskManagerCommand::Evaluate { intent, now, reply } => {
                let verdict = self.evaluate(intent, now).await;
                let _ = reply.send(verdict);
            }
            RiskManagerCommand::RegisterAgent {
                agent_id,
                initial_capital,
            } => {
                info!(agent_id = %agent_id, %initial_capital, "agent registered with portfolio risk manager");
                self.state.register_agent(agent_id, initial_capital);
            }
            RiskManagerCommand::CloseAgentSymbol { agent_id, symbol } => {
                self.state.clear_position(&agent_id, &symbol);
            }
            RiskManagerCommand::RecordPnl { delta } => {
                self.state.daily_pnl += delta;
            }
            RiskManagerCommand::Resume => {
                info!("portfolio kill-switch cleared by operator resume");
                self.state.halted = false;
                self.state.rolling_drawdown = 0.0;
                self.agent_manager.resume_all().await;
            }
            RiskManagerCommand::GetView { reply } => {
                let _ = reply.send(self.state.to_view(&self.commodity_pools, Utc::now()));
            }
        }
    }

    /// Single-writer event loop: drains the mailbox, refreshing the
    /// correlation matrix on a fixed interval in between. Runs until every
    /// handle is dropped.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<RiskManagerCommand>, correlation_refresh_interval: Duration) {
        let mut ticker = tokio::time::interval(correlation_refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_correlations(Utc::now()).await;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
            }
        }
    }
}

/// Clonable front for a running [`PortfolioRiskManager`]. Implements
/// [`RiskClient`] directly so agents can hold it behind an `Arc<dyn
/// RiskClient>` with no adapter shim in between.
#[derive(Clone)]
pub struct PortfolioRiskManagerHandle {
    tx: mpsc::Sender<RiskManagerCommand>,
}

impl PortfolioRiskManagerHandle {
    pub async fn record_pnl(&self, delta: Decimal) {
        let _ = self.tx.send(RiskManagerCommand::RecordPnl { delta }).await;
    }

    /// Operator-facing: lifts the kill-switch and resumes every halted
    /// agent. Routed through the Agent Manager's own `ForceResume` path
    /// (§4.4), never a direct state write on the agents.
    pub async fn resume(&self) {
        let _ = self.tx.send(RiskManagerCommand::Resume).await;
    }

    pub async fn get_view(&self) -> Option<PortfolioView> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(RiskManagerCommand::GetView { reply }).await;
        rx.await.ok()
    }
}

#[async_trait]
impl RiskClient for PortfolioRiskManagerHandle {
    async fn evaluate(&self, intent: OrderIntent, now: DateTime<Utc>) -> RiskVerdict {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(RiskManagerCommand::Evaluate { intent, now, reply })
            .await
            .is_err()
        {
            return RiskVerdict::Vetoed {
                reason: RiskReasonCode::UnknownSymbol,
                detail: "portfolio risk manager is no longer running".to_string(),
            };
        }
        rx.await.unwrap_or(RiskVerdict::Vetoed {
            reason: RiskReasonCode::UnknownSymbol,
            detail: "portfolio risk manager dropped the reply".to_string(),
        })
    }

    async fn register_agent(&self, agent_id: AgentId, initial_capital: Decimal) {
        let _ = self
            .tx
            .send(RiskManagerCommand::RegisterAgent {
                agent_id,
                initial_capital,
            })
            .await;
    }

    async fn close(&self, agent_id: AgentId, symbol: Symbol) {
        let _ = self
            .tx
            .send(RiskManagerCommand::CloseAgentSymbol { agent_id, symbol })
            .await;
    }

    async fn report_realized_pnl(&self, delta: Decimal) {
        self.record_pnl(delta).await;
    }
}

pub fn spawn(
    limits: RiskLimitsConfig,
    commodity_pools: CommodityPools,
    alert_sink: Arc<dyn AlertSink>,
    agent_manager: AgentManagerHandle,
    market_data: Arc<dyn MarketDataSource>,
    correlation_refresh_interval: Duration,
) -> PortfolioRiskManagerHandle {
    let (tx, rx) = mpsc::channel(256);
    let manager = PortfolioRiskManager::new(limits, commodity_pools, alert_sink, agent_manager, market_data);
    tokio::spawn(manager.run(rx, correlation_refresh_interval));
    PortfolioRiskManagerHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent_manager::AgentManagerCommand;
    use crate::domain::types::{Direction, TimeInForce};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_intent(strategy_id: &str, symbol: &str, quantity: u32, price: Decimal) -> OrderIntent {
        OrderIntent {
            strategy_id: strategy_id.to_string(),
            decision_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction: Direction::Long,
            quantity,
            price,
            stop_loss: None,
            take_profit: None,
            time_in_force: TimeInForce::Day,
        }
    }

    fn test_manager_handle() -> (PortfolioRiskManagerHandle, mpsc::Receiver<AgentManagerCommand>) {
        let (agent_tx, agent_rx) = mpsc::channel(16);
        let handle = spawn(
            RiskLimitsConfig::default(),
            CommodityPools::default(),
            Arc::new(LoggingAlertSink),
            AgentManagerHandle::new(agent_tx),
            Arc::new(crate::infrastructure::mock::InMemoryMarketDataSource::new()),
            Duration::from_secs(3600),
        );
        (handle, agent_rx)
    }

    #[tokio::test]
    async fn approves_order_within_limits() {
        let (handle, _agent_rx) = test_manager_handle();
        handle.register_agent("a".to_string(), dec!(100_000)).await;
        let verdict = handle
            .evaluate(sample_intent("a", "rb2501", 2, dec!(3500)), Utc::now())
            .await;
        assert!(verdict.is_approved());
    }

    #[tokio::test]
    async fn vetoes_sector_concentration_across_agents() {
        let (handle, _agent_rx) = test_manager_handle();
        handle.register_agent("a".to_string(), dec!(100_000)).await;
        handle.register_agent("b".to_string(), dec!(100_000)).await;
        // First agent takes a large black-sector position.
        let verdict_a = handle
            .evaluate(sample_intent("a", "rb2501", 20, dec!(3500)), Utc::now())
            .await;
        assert!(verdict_a.is_approved());
        // Second agent's own-sector order would push black-sector exposure
        // past the configured concentration limit.
        let verdict_b = handle
            .evaluate(sample_intent("b", "hc2501", 20, dec!(3700)), Utc::now())
            .await;
        assert!(matches!(
            verdict_b,
            RiskVerdict::Vetoed {
                reason: RiskReasonCode::SectorConcentration,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn refresh_correlations_populates_the_matrix_symmetrically() {
        let (agent_tx, _agent_rx) = mpsc::channel(16);
        let market_data = crate::infrastructure::mock::InMemoryMarketDataSource::new();
        market_data
            .set_recent_returns("rb2501", vec![0.01, 0.02, -0.01, 0.015, 0.03])
            .await;
        market_data
            .set_recent_returns("hc2501", vec![0.012, 0.018, -0.012, 0.016, 0.028])
            .await;

        let mut manager = PortfolioRiskManager::new(
            RiskLimitsConfig::default(),
            CommodityPools::default(),
            Arc::new(LoggingAlertSink),
            AgentManagerHandle::new(agent_tx),
            Arc::new(market_data),
        );
        manager.state.register_agent("a".to_string(), dec!(100_000));
        manager
            .state
            .apply_intent("a", "rb2501", Direction::Long, 10, dec!(3500));
        manager
            .state
            .apply_intent("a", "hc2501", Direction::Long, 10, dec!(3700));

        manager.refresh_correlations(Utc::now()).await;

        let forward = manager
            .state
            .correlation_matrix
            .get(&("rb2501".to_string(), "hc2501".to_string()))
            .copied();
        let backward = manager
            .state
            .correlation_matrix
            .get(&("hc2501".to_string(), "rb2501".to_string()))
            .copied();
        assert!(forward.is_some());
        assert_eq!(forward, backward);
        assert!(forward.unwrap() > 0.9);
    }

    #[tokio::test]
    async fn kill_switch_halts_agent_manager_on_daily_loss() {
        let (handle, mut agent_rx) = test_manager_handle();
        handle.register_agent("a".to_string(), dec!(100_000)).await;
        handle.record_pnl(dec!(-6_000)).await;

        // Any evaluation re-checks the kill-switch; daily loss limit is 5%.
        let _ = handle
            .evaluate(sample_intent("a", "rb2501", 1, dec!(3500)), Utc::now())
            .await;

        let cmd = agent_rx.recv().await.expect("expected a HaltAll command");
        assert!(matches!(cmd, AgentManagerCommand::HaltAll));
    }
}
