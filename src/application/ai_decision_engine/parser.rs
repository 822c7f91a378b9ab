//! Parses and validates the LLM's raw JSON reply into an [`AIDecision`]
//! (§4.3 step 3). Kept separate from the HTTP call so it can be unit tested
//! against fixed strings without a network client.

use crate::domain::errors::DecisionParseError;
use crate::domain::types::{AIDecision, Action, Source};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    quantity: u32,
    #[serde(default = "default_leverage")]
    leverage: u32,
    #[serde(default)]
    entry_price: Option<Decimal>,
    #[serde(default)]
    profit_target: Option<Decimal>,
    #[serde(default)]
    stop_loss: Option<Decimal>,
    confidence: f64,
    #[serde(default)]
    opportunity_score: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    market_regime: Option<String>,
    #[serde(default)]
    invalidation_condition: Option<String>,
}

fn default_leverage() -> u32 {
    1
}

/// Extracts the first top-level `{...}` object from `reply` (providers
/// sometimes wrap JSON in prose or code fences) and validates it into a
/// well-formed decision.
pub fn parse(
    reply: &str,
    symbol: &str,
    decision_time: DateTime<Utc>,
) -> Result<AIDecision, DecisionParseError> {
    let json_slice = extract_json_object(reply).ok_or(DecisionParseError::NoJsonObject)?;
    let raw: RawDecision = serde_json::from_str(json_slice)
        .map_err(|e| DecisionParseError::MalformedJson(e.to_string()))?;

    let action = match raw.action.as_str() {
        "buy_to_enter" => Action::BuyToEnter,
        "sell_to_enter" => Action::SellToEnter,
        "close" => Action::Close,
        "hold" => Action::Hold,
        other => {
            return Err(DecisionParseError::UnknownEnumValue {
                field: "action",
                value: other.to_string(),
            });
        }
    };

    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(DecisionParseError::OutOfRange {
            field: "confidence",
            detail: format!("{} not in 0.0..=1.0", raw.confidence),
        });
    }

    if matches!(action, Action::BuyToEnter | Action::SellToEnter) {
        if let (Some(entry), Some(stop)) = (raw.entry_price, raw.stop_loss) {
            let coherent = match action {
                Action::BuyToEnter => stop < entry,
                Action::SellToEnter => stop > entry,
                _ => true,
            };
            if !coherent {
                return Err(DecisionParseError::IncoherentStopLoss { action });
            }
        }
    }

    Ok(AIDecision {
        decision_id: Uuid::new_v4(),
        decision_time,
        symbol: symbol.to_string(),
        action,
        quantity: raw.quantity,
        leverage: raw.leverage,
        entry_price: raw.entry_price,
        profit_target: raw.profit_target,
        stop_loss: raw.stop_loss,
        confidence: raw.confidence,
        opportunity_score: raw.opportunity_score,
        rationale: raw.rationale,
        source: Source::Llm,
        market_regime: raw.market_regime,
        invalidation_condition: raw.invalidation_condition,
    })
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reply() {
        let reply = r#"{"action":"buy_to_enter","quantity":2,"leverage":3,
            "entry_price":3500.0,"profit_target":3600.0,"stop_loss":3450.0,
            "confidence":0.8,"opportunity_score":70,"rationale":"breakout"}"#;
        let decision = parse(reply, "rb2501", Utc::now()).unwrap();
        assert_eq!(decision.action, Action::BuyToEnter);
        assert_eq!(decision.quantity, 2);
    }

    #[test]
    fn tolerates_surrounding_prose_and_code_fence() {
        let reply = "Here is my decision:\n```json\n{\"action\":\"hold\",\"confidence\":0.1}\n```\nThanks.";
        let decision = parse(reply, "rb2501", Utc::now()).unwrap();
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn rejects_incoherent_stop_loss() {
        let reply = r#"{"action":"buy_to_enter","entry_price":3500.0,
            "stop_loss":3550.0,"confidence":0.5}"#;
        let err = parse(reply, "rb2501", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            DecisionParseError::IncoherentStopLoss {
                action: Action::BuyToEnter
            }
        );
    }

    #[test]
    fn rejects_unknown_action() {
        let reply = r#"{"action":"short_squeeze","confidence":0.5}"#;
        let err = parse(reply, "rb2501", Utc::now()).unwrap_err();
        assert!(matches!(err, DecisionParseError::UnknownEnumValue { .. }));
    }

    #[test]
    fn no_json_object_is_an_error() {
        let err = parse("no json here", "rb2501", Utc::now()).unwrap_err();
        assert_eq!(err, DecisionParseError::NoJsonObject);
    }
}
