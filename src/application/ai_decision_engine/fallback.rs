//! Deterministic rule-based decision used whenever the LLM is unavailable,
//! times out, or its reply cannot be repaired into a valid [`AIDecision`]
//! (§4.3 step 5). Never calls out to anything and never fails.

use crate::domain::types::{AIDecision, Action, Indicators, MarketSnapshot, Source};
use chrono::{DateTime, Utc};

/// MA crossover, confirmed by MACD histogram sign and filtered by RSI and
/// Bollinger position, exactly as named in the source policy. Missing
/// indicators fall through to `Hold` rather than guessing.
pub fn decide(snapshot: &MarketSnapshot, now: DateTime<Utc>, source: Source) -> AIDecision {
    let ind = &snapshot.indicators;
    let action = rule_action(ind);

    let mut decision = AIDecision::fallback_hold(snapshot.symbol.clone(), now, source);
    decision.action = action;
    decision.rationale = rationale(ind, action);
    decision.confidence = if action == Action::Hold { 0.0 } else { 0.35 };
    decision.opportunity_score = if action == Action::Hold { 0.0 } else { 40.0 };
    decision.market_regime = Some("rule_based".to_string());

    if action != Action::Hold {
        decision.quantity = 1;
        decision.entry_price = Some(snapshot.close);
    }

    decision.normalise()
}

fn rule_action(ind: &Indicators) -> Action {
    let (Some(ma5), Some(ma20), Some(hist), Some(rsi)) =
        (ind.ma5, ind.ma20, ind.macd.histogram, ind.rsi)
    else {
        return Action::Hold;
    };

    let bullish_cross = ma5 > ma20 && hist > 0.0 && rsi < 70.0;
    let bearish_cross = ma5 < ma20 && hist < 0.0 && rsi > 30.0;

    if let (Some(close_band), Some(upper)) = (ind.bollinger.middle, ind.bollinger.upper) {
        if bullish_cross && close_band < upper {
            return Action::BuyToEnter;
        }
    } else if bullish_cross {
        return Action::BuyToEnter;
    }

    if bearish_cross {
        return Action::SellToEnter;
    }

    Action::Hold
}

fn rationale(ind: &Indicators, action: Action) -> String {
    match action {
        Action::BuyToEnter => format!(
            "ma5/ma20 bullish crossover, macd histogram {:.4}, rsi {:.1}",
            ind.macd.histogram.unwrap_or_default(),
            ind.rsi.unwrap_or_default()
        ),
        Action::SellToEnter => format!(
            "ma5/ma20 bearish crossover, macd histogram {:.4}, rsi {:.1}",
            ind.macd.histogram.unwrap_or_default(),
            ind.rsi.unwrap_or_default()
        ),
        Action::Close | Action::Hold => "no qualifying crossover".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Bollinger, Kdj, Macd, Timeframe};
    use rust_decimal_macros::dec;

    fn snapshot_with(ind: Indicators) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "rb2501".to_string(),
            timeframe: Timeframe::M5,
            as_of: Utc::now(),
            open: dec!(3500),
            high: dec!(3520),
            low: dec!(3490),
            close: dec!(3510),
            volume: dec!(1000),
            open_interest: None,
            indicators: ind,
        }
    }

    #[test]
    fn missing_indicators_hold() {
        let decision = decide(&snapshot_with(Indicators::default()), Utc::now(), Source::Fallback);
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn bullish_crossover_buys() {
        let ind = Indicators {
            ma5: Some(10.0),
            ma20: Some(9.0),
            macd: Macd {
                line: Some(0.5),
                signal: Some(0.2),
                histogram: Some(0.3),
            },
            rsi: Some(55.0),
            bollinger: Bollinger {
                upper: Some(20.0),
                middle: Some(10.0),
                lower: Some(5.0),
            },
            kdj: Kdj::default(),
            ..Indicators::default()
        };
        let decision = decide(&snapshot_with(ind), Utc::now(), Source::Fallback);
        assert_eq!(decision.action, Action::BuyToEnter);
        assert_eq!(decision.quantity, 1);
    }

    #[test]
    fn overbought_rsi_suppresses_buy() {
        let ind = Indicators {
            ma5: Some(10.0),
            ma20: Some(9.0),
            macd: Macd {
                histogram: Some(0.3),
                ..Macd::default()
            },
            rsi: Some(85.0),
            ..Indicators::default()
        };
        let decision = decide(&snapshot_with(ind), Utc::now(), Source::Fallback);
        assert_eq!(decision.action, Action::Hold);
    }
}
