//! Prompt assembly (§4.3 step 1). Kept as plain string templating rather than
//! a templating crate — the prompt body is simple and fixed-shape enough that
//! a dependency would only add indirection.

use crate::domain::errors::DecisionParseError;
use crate::domain::types::{Indicators, MarketSnapshot, StrategyConfig};

pub fn build(config: &StrategyConfig, snapshot: &MarketSnapshot) -> String {
    format!(
        "You are a futures trading strategy assistant for strategy \"{name}\" (model {model}).\n\
         Symbol: {symbol}\n\
         As of: {as_of}\n\
         OHLCV: open={open} high={high} low={low} close={close} volume={volume}\n\
         Indicators: {indicators}\n\
         Risk per trade: {risk_per_trade}\n\
         Confidence threshold: {confidence_threshold}\n\n\
         Respond with a single JSON object with exactly these fields: \
         action (one of \"buy_to_enter\", \"sell_to_enter\", \"close\", \"hold\"), \
         quantity (integer), leverage (integer), entry_price (number or null), \
         profit_target (number or null), stop_loss (number or null), \
         confidence (0.0-1.0), opportunity_score (0-100), rationale (string), \
         market_regime (string or null), invalidation_condition (string or null). \
         Respond with the JSON object only, no surrounding text.",
        name = config.strategy_name,
        model = config.ai_model,
        symbol = snapshot.symbol,
        as_of = snapshot.as_of.to_rfc3339(),
        open = snapshot.open,
        high = snapshot.high,
        low = snapshot.low,
        close = snapshot.close,
        volume = snapshot.volume,
        indicators = describe_indicators(&snapshot.indicators),
        risk_per_trade = config.risk_per_trade,
        confidence_threshold = config.confidence_threshold,
    )
}

fn describe_indicators(ind: &Indicators) -> String {
    let fmt_opt = |label: &str, v: Option<f64>| match v {
        Some(v) => format!("{label}={v:.4}"),
        None => format!("{label}=n/a"),
    };
    [
        fmt_opt("ma5", ind.ma5),
        fmt_opt("ma10", ind.ma10),
        fmt_opt("ma20", ind.ma20),
        fmt_opt("ma60", ind.ma60),
        fmt_opt("ema12", ind.ema12),
        fmt_opt("ema26", ind.ema26),
        fmt_opt("macd_hist", ind.macd.histogram),
        fmt_opt("rsi", ind.rsi),
        fmt_opt("bollinger_upper", ind.bollinger.upper),
        fmt_opt("bollinger_lower", ind.bollinger.lower),
        fmt_opt("atr", ind.atr),
        fmt_opt("kdj_j", ind.kdj.j),
    ]
    .join(", ")
}

/// §4.3 step 3's repair-retry message: the original prompt plus the
/// offending reply and the specific validation failure, asking for a
/// corrected JSON object only.
pub fn build_repair(original_prompt: &str, offending_reply: &str, error: &DecisionParseError) -> String {
    format!(
        "{original_prompt}\n\n\
         Your previous reply could not be used: {error}\n\
         Previous reply was:\n{offending_reply}\n\n\
         Reply again with a single corrected JSON object only, matching the \
         schema above exactly. Do not include any other text.",
    )
}

/// Cache key: the portion of the prompt that determines the response,
/// deliberately excluding `as_of`'s sub-interval jitter isn't needed since the
/// timestamp is already interval-aligned by the caller.
pub fn cache_key(config: &StrategyConfig, snapshot: &MarketSnapshot) -> String {
    format!(
        "{}:{}:{}:{}",
        config.strategy_id,
        snapshot.symbol,
        snapshot.as_of.timestamp(),
        config.ai_model
    )
}
