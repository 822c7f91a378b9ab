//! Shared data types that flow between the orchestrator's components.
//!
//! Every payload that crosses a component boundary is a tagged variant or a
//! plain struct with `serde` derives, never a dynamically shaped map — this is
//! deliberate (see `DESIGN.md`, "dynamic dict-shaped records").

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type Symbol = String;
pub type CommodityCode = String;
pub type PoolName = String;
pub type StrategyId = String;
/// One agent per strategy config; the agent is addressed by its strategy id.
pub type AgentId = StrategyId;
pub type DecisionId = Uuid;

/// Staleness threshold multiplier applied to `decision_interval` (§4.2 step 2).
/// A plausible reading of the source, not a stated constant — pinned here and
/// documented in `DESIGN.md`.
pub const STALE_MULTIPLIER: i64 = 2;

// ---------------------------------------------------------------------------
// Strategy configuration (immutable after creation, versioned)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    AiDriven,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolSelector {
    Explicit(Vec<Symbol>),
    Commodities(Vec<CommodityCode>),
    Pool(PoolName),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: StrategyId,
    pub strategy_name: String,
    pub version: u32,
    pub symbol_selector: SymbolSelector,
    pub max_symbols: usize,
    pub selection_mode: SelectionMode,
    pub initial_capital: Decimal,
    pub max_position_size: u32,
    pub max_positions: usize,
    pub leverage: u32,
    pub risk_per_trade: f64,
    pub decision_interval: chrono::Duration,
    pub confidence_threshold: f64,
    pub ai_model: String,
    pub ai_temperature: f64,
    pub is_active: bool,
    pub manual_override: bool,
}

impl StrategyConfig {
    /// Synchronous validation — a Validation error never reaches an agent (§7).
    pub fn validate(&self) -> Result<(), crate::domain::errors::ConfigError> {
        use crate::domain::errors::ConfigError;

        if self.strategy_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "strategy_id",
                reason: "must not be empty".into(),
            });
        }
        if self.max_symbols == 0 {
            return Err(ConfigError::Invalid {
                field: "max_symbols",
                reason: "must be at least 1".into(),
            });
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                field: "initial_capital",
                reason: "must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.risk_per_trade) {
            return Err(ConfigError::Invalid {
                field: "risk_per_trade",
                reason: "must be within 0.0..=1.0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid {
                field: "confidence_threshold",
                reason: "must be within 0.0..=1.0".into(),
            });
        }
        if self.decision_interval <= chrono::Duration::zero() {
            return Err(ConfigError::Invalid {
                field: "decision_interval",
                reason: "must be positive".into(),
            });
        }
        if self.leverage == 0 {
            return Err(ConfigError::Invalid {
                field: "leverage",
                reason: "must be at least 1".into(),
            });
        }
        if let SymbolSelector::Pool(name) = &self.symbol_selector {
            crate::domain::commodity_pool::BASELINE_POOLS
                .iter()
                .find(|p| p.0 == name)
                .ok_or_else(|| ConfigError::UnknownPool(name.clone()))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Agent state (per running agent, mutable)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Initializing,
    Idle,
    Thinking,
    Ordering,
    Paused,
    Halted,
    Terminated,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl AgentState {
    /// Legal transitions per the state machine in `spec.md` §4.2. `any -> X`
    /// edges (Paused/Halted/Terminated) are checked separately by the caller.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Initializing, Idle)
                | (Idle, Thinking)
                | (Thinking, Ordering)
                | (Thinking, Idle)
                | (Ordering, Idle)
                | (Paused, Idle)
        ) || matches!(next, Paused | Halted)
            || (next == Terminated && matches!(self, Idle | Paused | Halted))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub direction: Direction,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub entry_time: DateTime<Utc>,
    pub max_favorable_move: Decimal,
    pub max_adverse_move: Decimal,
    pub decision_id: DecisionId,
}

impl Position {
    pub fn new(
        symbol: Symbol,
        direction: Direction,
        quantity: u32,
        entry_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        entry_time: DateTime<Utc>,
        decision_id: DecisionId,
    ) -> Self {
        Self {
            symbol,
            direction,
            quantity,
            entry_price,
            stop_loss,
            take_profit,
            entry_time,
            max_favorable_move: Decimal::ZERO,
            max_adverse_move: Decimal::ZERO,
            decision_id,
        }
    }

    /// Single code path for the favorable/adverse excursion invariant so it
    /// can never drift out of sync between call sites.
    pub fn update_excursion(&mut self, mark_price: Decimal) {
        let move_ = match self.direction {
            Direction::Long => mark_price - self.entry_price,
            Direction::Short => self.entry_price - mark_price,
        };
        if move_ > self.max_favorable_move {
            self.max_favorable_move = move_;
        }
        if move_ < self.max_adverse_move {
            self.max_adverse_move = move_;
        }
    }

    pub fn notional(&self) -> Decimal {
        self.entry_price * Decimal::from(self.quantity)
    }

    pub fn unrealized_pnl(&self, mark_price: Decimal) -> Decimal {
        let move_ = match self.direction {
            Direction::Long => mark_price - self.entry_price,
            Direction::Short => self.entry_price - mark_price,
        };
        move_ * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntime {
    pub state: AgentState,
    pub available_cash: Decimal,
    pub used_margin: Decimal,
    pub positions: HashMap<Symbol, Position>,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub max_drawdown: Decimal,
    pub peak_equity: Decimal,
    pub last_decision_time: Option<DateTime<Utc>>,
    pub last_decision_outcome: Option<String>,
}

impl AgentRuntime {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            state: AgentState::Initializing,
            available_cash: initial_capital,
            used_margin: Decimal::ZERO,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            peak_equity: initial_capital,
            last_decision_time: None,
            last_decision_outcome: None,
        }
    }

    /// Invariant 1 (§3): `used_margin + available_cash == initial_capital +
    /// realized_pnl` within rounding tolerance.
    pub fn accounting_closure_holds(&self, initial_capital: Decimal, tolerance: Decimal) -> bool {
        let lhs = self.used_margin + self.available_cash;
        let rhs = initial_capital + self.realized_pnl;
        (lhs - rhs).abs() <= tolerance
    }

    pub fn equity(&self) -> Decimal {
        self.available_cash + self.used_margin + self.unrealized_pnl
    }

    pub fn refresh_drawdown(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > Decimal::ZERO {
            let drawdown = (self.peak_equity - equity) / self.peak_equity;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Market snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Macd {
    pub line: Option<f64>,
    pub signal: Option<f64>,
    pub histogram: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Bollinger {
    pub upper: Option<f64>,
    pub middle: Option<f64>,
    pub lower: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Kdj {
    pub k: Option<f64>,
    pub d: Option<f64>,
    pub j: Option<f64>,
}

/// All indicator values are optional: the engine must tolerate partial
/// snapshots (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Indicators {
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub ema12: Option<f64>,
    pub ema26: Option<f64>,
    pub macd: Macd,
    pub rsi: Option<f64>,
    pub bollinger: Bollinger,
    pub atr: Option<f64>,
    pub kdj: Kdj,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub as_of: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_interest: Option<Decimal>,
    pub indicators: Indicators,
}

impl MarketSnapshot {
    /// Staleness rule from §4.2 step 2: snapshots older than
    /// `2 * decision_interval` are rejected.
    pub fn is_stale(&self, now: DateTime<Utc>, decision_interval: chrono::Duration) -> bool {
        let threshold = decision_interval * STALE_MULTIPLIER as i32;
        now.signed_duration_since(self.as_of) > threshold
    }
}

// ---------------------------------------------------------------------------
// AI decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    BuyToEnter,
    SellToEnter,
    Close,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Llm,
    Fallback,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIDecision {
    pub decision_id: DecisionId,
    pub decision_time: DateTime<Utc>,
    pub symbol: Symbol,
    pub action: Action,
    pub quantity: u32,
    pub leverage: u32,
    pub entry_price: Option<Decimal>,
    pub profit_target: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub confidence: f64,
    pub opportunity_score: f64,
    pub rationale: String,
    pub source: Source,
    pub market_regime: Option<String>,
    pub invalidation_condition: Option<String>,
}

impl AIDecision {
    /// The engine never throws: this is the always-valid degenerate decision
    /// used when essential indicators are missing or nothing else applies.
    pub fn fallback_hold(symbol: Symbol, decision_time: DateTime<Utc>, source: Source) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            decision_time,
            symbol,
            action: Action::Hold,
            quantity: 0,
            leverage: 1,
            entry_price: None,
            profit_target: None,
            stop_loss: None,
            confidence: 0.0,
            opportunity_score: 0.0,
            rationale: "insufficient indicator data".to_string(),
            source,
            market_regime: None,
            invalidation_condition: None,
        }
    }

    /// Clamp/coerce so every path (LLM, repaired, fallback) returns an
    /// equally well-formed value. Called unconditionally as the final step.
    pub fn normalise(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.opportunity_score = self.opportunity_score.clamp(0.0, 100.0);
        self.leverage = self.leverage.clamp(1, 20);
        if self.action == Action::Hold {
            self.quantity = 0;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Order intent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub strategy_id: StrategyId,
    pub decision_id: DecisionId,
    pub symbol: Symbol,
    pub direction: Direction,
    pub quantity: u32,
    pub price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

// ---------------------------------------------------------------------------
// Risk verdicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskReasonCode {
    SectorConcentration,
    Correlation,
    TotalCapitalUsage,
    LeverageLimit,
    DailyLossLimit,
    PortfolioStopLoss,
    UnknownSymbol,
}

impl fmt::Display for RiskReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskVerdict {
    Approved { adjusted_quantity: Option<u32> },
    Vetoed { reason: RiskReasonCode, detail: String },
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Portfolio view (risk manager's cross-agent aggregate)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioView {
    pub version: u64,
    pub captured_at: Option<DateTime<Utc>>,
    pub total_exposure: Decimal,
    pub total_margin_used: Decimal,
    pub sector_exposure: HashMap<String, Decimal>,
    pub per_agent_exposure: HashMap<AgentId, Decimal>,
    pub correlation_matrix: HashMap<(Symbol, Symbol), f64>,
    pub rolling_drawdown: f64,
    pub daily_pnl: Decimal,
    pub halted: bool,
}

// ---------------------------------------------------------------------------
// Broker-facing events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerEvent {
    Ack {
        order_id: String,
        decision_id: Option<DecisionId>,
    },
    Fill {
        order_id: String,
        decision_id: Option<DecisionId>,
        symbol: Symbol,
        price: Decimal,
        quantity: u32,
        direction: Direction,
        ts: DateTime<Utc>,
    },
    Reject {
        order_id: String,
        decision_id: Option<DecisionId>,
        reason: String,
    },
    PositionSnapshot {
        strategy_id: StrategyId,
        symbol: Symbol,
        quantity: u32,
        avg_price: Decimal,
    },
}

// ---------------------------------------------------------------------------
// Decision log record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubmissionOutcome {
    Submitted { order_id: String },
    NotSubmitted { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSummary {
    pub symbol: Symbol,
    pub as_of: DateTime<Utc>,
    pub indicators: Indicators,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: DecisionId,
    pub strategy_id: StrategyId,
    pub input_summary: InputSummary,
    pub raw_ai_response: Option<String>,
    pub decision: AIDecision,
    pub risk_verdict: Option<RiskVerdict>,
    pub submission_outcome: Option<SubmissionOutcome>,
    pub fill_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub invalidation_triggered: Option<bool>,
    pub logged_at: DateTime<Utc>,
}
