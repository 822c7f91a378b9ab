//! Portfolio-level validator pipeline (§4.4), generalized from the teacher's
//! per-order `RiskValidator`/`RiskValidationPipeline` pair
//! (`domain/risk/filters/validator_trait.rs`,
//! `application/risk_management/pipeline/validation_pipeline.rs`) from a
//! single-portfolio check to a cross-agent aggregate one.

use crate::config::RiskLimitsConfig;
use crate::domain::commodity_pool::{commodity_of_symbol, CommodityPools};
use crate::domain::types::{Direction, OrderIntent, RiskReasonCode};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::state::PortfolioState;

#[derive(Debug, Clone, PartialEq)]
pub enum PortfolioCheckOutcome {
    Pass,
    /// Only `TotalCapitalUsageValidator` and `PositionSizeValidator` may
    /// return this (§4.4 Open Question resolution); every other validator is
    /// veto-only.
    Shrink(u32),
    Veto(RiskReasonCode, String),
}

pub struct PortfolioValidationContext<'a> {
    pub intent: &'a OrderIntent,
    pub quantity: u32,
    pub state: &'a PortfolioState,
    pub limits: &'a RiskLimitsConfig,
    pub commodity_pools: &'a CommodityPools,
}

impl PortfolioValidationContext<'_> {
    pub fn proposal_notional(&self) -> Decimal {
        self.intent.price * Decimal::from(self.quantity)
    }
}

#[async_trait]
pub trait PortfolioRiskValidator: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first. Default: 100 (medium priority).
    fn priority(&self) -> u8 {
        100
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome;
}

/// Orchestrates the pipeline: fail-fast on the first `Veto`; a `Shrink`
/// narrows the working quantity and later validators see the shrunk order.
pub struct PortfolioRiskPipeline {
    validators: Vec<Box<dyn PortfolioRiskValidator>>,
}

impl PortfolioRiskPipeline {
    pub fn new(validators: Vec<Box<dyn PortfolioRiskValidator>>) -> Self {
        let mut validators = validators;
        validators.sort_by_key(|v| v.priority());
        Self { validators }
    }

    pub fn list_active_validators(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Returns the approved (possibly shrunk) quantity, or the first veto.
    pub async fn evaluate(
        &self,
        intent: &OrderIntent,
        state: &PortfolioState,
        limits: &RiskLimitsConfig,
        commodity_pools: &CommodityPools,
    ) -> Result<u32, (RiskReasonCode, String)> {
        let mut quantity = intent.quantity;
        let mut shrunk_from_original = false;

        for validator in &self.validators {
            let ctx = PortfolioValidationContext {
                intent,
                quantity,
                state,
                limits,
                commodity_pools,
            };
            match validator.validate(&ctx).await {
                PortfolioCheckOutcome::Pass => {
                    debug!(validator = validator.name(), "portfolio validator passed");
                }
                PortfolioCheckOutcome::Shrink(q) => {
                    debug!(validator = validator.name(), from = quantity, to = q, "portfolio validator shrank order");
                    quantity = q;
                    shrunk_from_original = true;
                }
                PortfolioCheckOutcome::Veto(reason, detail) => {
                    warn!(validator = validator.name(), %reason, %detail, "portfolio validator vetoed order");
                    return Err((reason, detail));
                }
            }
        }

        if quantity == 0 {
            return Err((
                RiskReasonCode::TotalCapitalUsage,
                "shrunk quantity reached zero".to_string(),
            ));
        }
        let _ = shrunk_from_original;
        Ok(quantity)
    }
}

/// Priority 0: the global kill state. Checked first so nothing else runs
/// while the portfolio is halted.
pub struct PortfolioStopLossValidator;

#[async_trait]
impl PortfolioRiskValidator for PortfolioStopLossValidator {
    fn name(&self) -> &str {
        "portfolio_stop_loss"
    }

    fn priority(&self) -> u8 {
        0
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome {
        if ctx.state.halted {
            return PortfolioCheckOutcome::Veto(
                RiskReasonCode::PortfolioStopLoss,
                "portfolio is halted by the kill-switch".to_string(),
            );
        }
        if ctx.state.rolling_drawdown >= ctx.limits.portfolio_stop_loss {
            return PortfolioCheckOutcome::Veto(
                RiskReasonCode::PortfolioStopLoss,
                format!(
                    "rolling drawdown {:.4} at or beyond stop-loss {:.4}",
                    ctx.state.rolling_drawdown, ctx.limits.portfolio_stop_loss
                ),
            );
        }
        PortfolioCheckOutcome::Pass
    }
}

pub struct DailyLossLimitValidator;

#[async_trait]
impl PortfolioRiskValidator for DailyLossLimitValidator {
    fn name(&self) -> &str {
        "daily_loss_limit"
    }

    fn priority(&self) -> u8 {
        10
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome {
        let total_capital = ctx.state.total_capital();
        if total_capital <= Decimal::ZERO {
            return PortfolioCheckOutcome::Pass;
        }
        let floor = -(total_capital * Decimal::try_from(ctx.limits.daily_loss_limit).unwrap_or_default());
        if ctx.state.daily_pnl <= floor {
            return PortfolioCheckOutcome::Veto(
                RiskReasonCode::DailyLossLimit,
                format!("daily pnl {} at or below floor {}", ctx.state.daily_pnl, floor),
            );
        }
        PortfolioCheckOutcome::Pass
    }
}

pub struct LeverageValidator;

#[async_trait]
impl PortfolioRiskValidator for LeverageValidator {
    fn name(&self) -> &str {
        "leverage"
    }

    fn priority(&self) -> u8 {
        20
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome {
        let total_capital = ctx.state.total_capital();
        if total_capital <= Decimal::ZERO {
            return PortfolioCheckOutcome::Pass;
        }
        let projected = ctx.state.total_exposure() + ctx.proposal_notional();
        let ratio = projected / total_capital;
        if ratio > Decimal::from(ctx.limits.max_leverage_total) {
            return PortfolioCheckOutcome::Veto(
                RiskReasonCode::LeverageLimit,
                format!(
                    "projected leverage {:.2}x exceeds limit {}x",
                    ratio, ctx.limits.max_leverage_total
                ),
            );
        }
        PortfolioCheckOutcome::Pass
    }
}

/// Grounded on the teacher's `sector_exposure_validator.rs`: bucket exposure
/// by a symbol's named sector and reject once the sector would exceed its
/// share of total capital.
pub struct SectorConcentrationValidator;

#[async_trait]
impl PortfolioRiskValidator for SectorConcentrationValidator {
    fn name(&self) -> &str {
        "sector_concentration"
    }

    fn priority(&self) -> u8 {
        30
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome {
        let total_capital = ctx.state.total_capital();
        if total_capital <= Decimal::ZERO {
            return PortfolioCheckOutcome::Pass;
        }
        let commodity = commodity_of_symbol(&ctx.intent.symbol);
        let Some(sector) = ctx.commodity_pools.sector_of(&commodity) else {
            return PortfolioCheckOutcome::Veto(
                RiskReasonCode::UnknownSymbol,
                format!("symbol {} is not a member of any commodity pool", ctx.intent.symbol),
            );
        };
        let sector_exposure = ctx.state.sector_exposure(ctx.commodity_pools);
        let current = sector_exposure.get(&sector).copied().unwrap_or_default();
        let projected = current + ctx.proposal_notional();
        if projected / total_capital > Decimal::try_from(ctx.limits.max_sector_concentration).unwrap_or_default() {
            return PortfolioCheckOutcome::Veto(
                RiskReasonCode::SectorConcentration,
                format!("sector {sector} projected exposure {projected} exceeds concentration limit"),
            );
        }
        PortfolioCheckOutcome::Pass
    }
}

/// Grounded on the teacher's `correlation_filter.rs`: reject a new same-side
/// position whose correlation with an existing position (held by any agent)
/// exceeds the configured threshold.
pub struct CorrelationValidator;

#[async_trait]
impl PortfolioRiskValidator for CorrelationValidator {
    fn name(&self) -> &str {
        "correlation"
    }

    fn priority(&self) -> u8 {
        35
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome {
        for other in ctx.state.other_positions(&ctx.intent.strategy_id) {
            if other.symbol == ctx.intent.symbol || other.direction != ctx.intent.direction {
                continue;
            }
            let key_a = (ctx.intent.symbol.clone(), other.symbol.clone());
            let key_b = (other.symbol.clone(), ctx.intent.symbol.clone());
            let correlation = ctx
                .state
                .correlation_matrix
                .get(&key_a)
                .or_else(|| ctx.state.correlation_matrix.get(&key_b));
            if let Some(&correlation) = correlation
                && correlation.abs() > ctx.limits.max_correlation_threshold
            {
                return PortfolioCheckOutcome::Veto(
                    RiskReasonCode::Correlation,
                    format!(
                        "{} correlates {:.2} with existing position {}",
                        ctx.intent.symbol, correlation, other.symbol
                    ),
                );
            }
        }
        PortfolioCheckOutcome::Pass
    }
}

/// May shrink (§4.4 Open Question resolution): reduces the order to whatever
/// fits under the portfolio-wide capital usage cap rather than vetoing
/// outright.
pub struct TotalCapitalUsageValidator;

#[async_trait]
impl PortfolioRiskValidator for TotalCapitalUsageValidator {
    fn name(&self) -> &str {
        "total_capital_usage"
    }

    fn priority(&self) -> u8 {
        40
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome {
        let total_capital = ctx.state.total_capital();
        if total_capital <= Decimal::ZERO || ctx.intent.price <= Decimal::ZERO {
            return PortfolioCheckOutcome::Pass;
        }
        let cap = total_capital * Decimal::try_from(ctx.limits.max_total_capital_usage).unwrap_or_default();
        let current = ctx.state.total_exposure();
        let headroom = cap - current;
        if headroom <= Decimal::ZERO {
            return PortfolioCheckOutcome::Veto(
                RiskReasonCode::TotalCapitalUsage,
                format!("no capital headroom left ({current} already deployed against a {cap} cap)"),
            );
        }
        let max_qty = (headroom / ctx.intent.price).floor().to_u32().unwrap_or(0);
        if max_qty < ctx.quantity {
            return PortfolioCheckOutcome::Shrink(max_qty);
        }
        PortfolioCheckOutcome::Pass
    }
}

/// Lowest priority (§4.4): a per-agent sanity clamp so a single order can
/// never alone exceed the submitting agent's own registered capital. May
/// shrink rather than veto.
pub struct PositionSizeValidator;

#[async_trait]
impl PortfolioRiskValidator for PositionSizeValidator {
    fn name(&self) -> &str {
        "position_size"
    }

    fn priority(&self) -> u8 {
        90
    }

    async fn validate(&self, ctx: &PortfolioValidationContext<'_>) -> PortfolioCheckOutcome {
        let Some(agent_capital) = ctx.state.agent_capital(&ctx.intent.strategy_id) else {
            return PortfolioCheckOutcome::Pass;
        };
        if agent_capital <= Decimal::ZERO || ctx.intent.price <= Decimal::ZERO {
            return PortfolioCheckOutcome::Pass;
        }
        let proposal = ctx.proposal_notional();
        if proposal <= agent_capital {
            return PortfolioCheckOutcome::Pass;
        }
        let max_qty = (agent_capital / ctx.intent.price).floor().to_u32().unwrap_or(0);
        PortfolioCheckOutcome::Shrink(max_qty)
    }
}
