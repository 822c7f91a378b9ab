//! Cross-agent portfolio state (§4.4): the consistent snapshot every
//! validator in one evaluation round sees, owned single-writer by
//! [`super::PortfolioRiskManager`].
//!
//! `OrderIntent` (§3) carries no close/action flag, so there is no
//! fills-based ledger to replay here. Exposure per (agent, symbol) is
//! tracked as an idempotent upsert of the last approved intent instead — a
//! deliberate simplification, recorded in `DESIGN.md`.

use crate::domain::commodity_pool::{commodity_of_symbol, CommodityPools};
use crate::domain::types::{AgentId, Direction, PortfolioView, Symbol};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PositionExposure {
    pub symbol: Symbol,
    pub direction: Direction,
    pub quantity: u32,
    pub price: Decimal,
}

impl PositionExposure {
    pub fn notional(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone)]
pub struct AgentContribution {
    pub initial_capital: Decimal,
    pub positions: HashMap<Symbol, PositionExposure>,
}

impl AgentContribution {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            positions: HashMap::new(),
        }
    }

    pub fn total_notional(&self) -> Decimal {
        self.positions.values().map(|p| p.notional()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    pub version: u64,
    pub agents: HashMap<AgentId, AgentContribution>,
    pub correlation_matrix: HashMap<(Symbol, Symbol), f64>,
    pub daily_pnl: Decimal,
    pub rolling_drawdown: f64,
    pub halted: bool,
}

impl PortfolioState {
    pub fn register_agent(&mut self, agent_id: AgentId, initial_capital: Decimal) {
        self.agents
            .entry(agent_id)
            .or_insert_with(|| AgentContribution::new(initial_capital));
        self.version += 1;
    }

    pub fn apply_intent(
        &mut self,
        strategy_id: &str,
        symbol: &Symbol,
        direction: Direction,
        quantity: u32,
        price: Decimal,
    ) {
        if let Some(contribution) = self.agents.get_mut(strategy_id) {
            contribution.positions.insert(
                symbol.clone(),
                PositionExposure {
                    symbol: symbol.clone(),
                    direction,
                    quantity,
                    price,
                },
            );
        }
        self.version += 1;
    }

    /// Drops a single (agent, symbol) exposure entry once the agent has gone
    /// flat there, so a `Close` doesn't leave a stale upsert behind for the
    /// rest of the portfolio to see as still-open exposure.
    pub fn clear_position(&mut self, agent_id: &str, symbol: &str) {
        if let Some(contribution) = self.agents.get_mut(agent_id) {
            contribution.positions.remove(symbol);
        }
        self.version += 1;
    }

    pub fn total_capital(&self) -> Decimal {
        self.agents.values().map(|a| a.initial_capital).sum()
    }

    pub fn total_exposure(&self) -> Decimal {
        self.agents.values().map(|a| a.total_notional()).sum()
    }

    pub fn agent_exposure(&self, agent_id: &str) -> Decimal {
        self.agents
            .get(agent_id)
            .map(|a| a.total_notional())
            .unwrap_or_default()
    }

    pub fn agent_capital(&self, agent_id: &str) -> Option<Decimal> {
        self.agents.get(agent_id).map(|a| a.initial_capital)
    }

    pub fn sector_exposure(&self, commodity_pools: &CommodityPools) -> HashMap<String, Decimal> {
        let mut out: HashMap<String, Decimal> = HashMap::new();
        for agent in self.agents.values() {
            for pos in agent.positions.values() {
                let commodity = commodity_of_symbol(&pos.symbol);
                if let Some(sector) = commodity_pools.sector_of(&commodity) {
                    *out.entry(sector).or_insert(Decimal::ZERO) += pos.notional();
                }
            }
        }
        out
    }

    pub fn per_agent_exposure(&self) -> HashMap<AgentId, Decimal> {
        self.agents
            .iter()
            .map(|(id, a)| (id.clone(), a.total_notional()))
            .collect()
    }

    /// Positions held by any agent other than `exclude_strategy_id`, used by
    /// `CorrelationValidator` to check a new symbol against what's already
    /// on the book elsewhere in the portfolio.
    pub fn other_positions(&self, exclude_strategy_id: &str) -> Vec<&PositionExposure> {
        self.agents
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_strategy_id)
            .flat_map(|(_, a)| a.positions.values())
            .collect()
    }

    /// Widens `rolling_drawdown` to the worst daily-loss-to-capital ratio
    /// seen so far; never shrinks, matching `AgentRuntime::refresh_drawdown`'s
    /// high-water-mark shape.
    pub fn refresh_drawdown(&mut self) {
        let total_capital = self.total_capital();
        if total_capital <= Decimal::ZERO {
            return;
        }
        let current = (-self.daily_pnl / total_capital).max(Decimal::ZERO);
        let current = current.to_f64().unwrap_or(0.0);
        if current > self.rolling_drawdown {
            self.rolling_drawdown = current;
        }
    }

    pub fn to_view(
        &self,
        commodity_pools: &CommodityPools,
        now: chrono::DateTime<chrono::Utc>,
    ) -> PortfolioView {
        let total_exposure = self.total_exposure();
        PortfolioView {
            version: self.version,
            captured_at: Some(now),
            total_exposure,
            total_margin_used: total_exposure,
            sector_exposure: self.sector_exposure(commodity_pools),
            per_agent_exposure: self.per_agent_exposure(),
            correlation_matrix: self.correlation_matrix.clone(),
            rolling_drawdown: self.rolling_drawdown,
            daily_pnl: self.daily_pnl,
            halted: self.halted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sector_exposure_buckets_by_commodity() {
        let mut state = PortfolioState::default();
        state.register_agent("a".to_string(), dec!(100_000));
        state.apply_intent("a", &"rb2501".to_string(), Direction::Long, 2, dec!(3500));
        state.apply_intent("a", &"hc2501".to_string(), Direction::Long, 1, dec!(3700));
        let pools = CommodityPools::default();
        let sectors = state.sector_exposure(&pools);
        assert_eq!(sectors.get("black"), Some(&dec!(10700)));
    }

    #[test]
    fn drawdown_is_a_high_water_mark() {
        let mut state = PortfolioState::default();
        state.register_agent("a".to_string(), dec!(100_000));
        state.daily_pnl = dec!(-10_000);
        state.refresh_drawdown();
        assert!((state.rolling_drawdown - 0.1).abs() < 1e-9);
        state.daily_pnl = dec!(-1_000);
        state.refresh_drawdown();
        assert!((state.rolling_drawdown - 0.1).abs() < 1e-9);
    }
}
