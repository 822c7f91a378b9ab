//! Position sizing (§4.2 step 5). Kept as its own module because the formula
//! is reused unchanged by both the live tick path and its unit tests.

use crate::domain::types::{Action, AIDecision, StrategyConfig};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Margin multiplier applied to the stop distance. A plausible reading of an
/// unstated constant in the source policy — pinned here and noted in
/// `DESIGN.md`.
pub const RISK_DISTANCE_MULTIPLIER: Decimal = Decimal::from_parts(15, 0, 0, false, 1); // 1.5

/// Caps `decision.quantity` to respect `max_position_size` and the
/// risk-per-trade budget against the stop distance. Returns `None` when the
/// decision carries no usable stop distance or entry price — the caller
/// treats that as "skip, can't size safely".
pub fn size_intent(
    config: &StrategyConfig,
    decision: &AIDecision,
    available_cash: Decimal,
) -> Option<u32> {
    if !matches!(decision.action, Action::BuyToEnter | Action::SellToEnter) {
        return None;
    }
    let entry = decision.entry_price?;
    let stop = decision.stop_loss?;
    let distance = (entry - stop).abs();
    if distance <= Decimal::ZERO {
        return None;
    }

    let risk_budget = Decimal::try_from(config.risk_per_trade).ok()? * available_cash;
    let risk_based_cap = risk_budget / (distance * RISK_DISTANCE_MULTIPLIER);
    let risk_based_cap: u32 = risk_based_cap.floor().to_u32().unwrap_or(0);

    let capped = risk_based_cap
        .min(config.max_position_size)
        .min(decision.quantity.max(1));

    if capped == 0 { None } else { Some(capped) }
}
