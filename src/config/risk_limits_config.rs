//! Portfolio risk manager configuration (§4.4), loaded from environment
//! variables.

use super::parse_env;
use anyhow::Result;

#[derive(Debug, Clone, Copy)]
pub struct RiskLimitsConfig {
    /// Fraction of total capital the portfolio may have deployed at once.
    pub max_total_capital_usage: f64,
    /// Two highly-correlated same-direction positions count against
    /// concentration once the pairwise correlation exceeds this.
    pub max_correlation_threshold: f64,
    /// Fraction of total exposure permitted within one commodity sector.
    pub max_sector_concentration: f64,
    /// Rolling portfolio drawdown that triggers a global halt.
    pub portfolio_stop_loss: f64,
    /// Realized + unrealized PnL floor for the trading day.
    pub daily_loss_limit: f64,
    pub max_leverage_total: u32,
    /// Rounding tolerance for the accounting-closure invariant (§3).
    pub accounting_tolerance: f64,
    /// Number of recent return observations used to refresh the pairwise
    /// correlation matrix (§4.4 PortfolioView).
    pub correlation_window: usize,
}

impl RiskLimitsConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_total_capital_usage: parse_env("MAX_TOTAL_CAPITAL_USAGE", 0.8)?,
            max_correlation_threshold: parse_env("MAX_CORRELATION_THRESHOLD", 0.75)?,
            max_sector_concentration: parse_env("MAX_SECTOR_CONCENTRATION", 0.35)?,
            portfolio_stop_loss: parse_env("PORTFOLIO_STOP_LOSS", 0.10)?,
            daily_loss_limit: parse_env("DAILY_LOSS_LIMIT", 0.05)?,
            max_leverage_total: parse_env("MAX_LEVERAGE_TOTAL", 50u32)?,
            accounting_tolerance: parse_env("ACCOUNTING_TOLERANCE", 0.01)?,
            correlation_window: parse_env("CORRELATION_WINDOW", 30usize)?,
        })
    }
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_total_capital_usage: 0.8,
            max_correlation_threshold: 0.75,
            max_sector_concentration: 0.35,
            portfolio_stop_loss: 0.10,
            daily_loss_limit: 0.05,
            max_leverage_total: 50,
            accounting_tolerance: 0.01,
            correlation_window: 30,
        }
    }
}
