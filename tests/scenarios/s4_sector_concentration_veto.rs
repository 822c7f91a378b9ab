//! S4 (§8 sector concentration veto): two agents trading different symbols in
//! the same commodity sector ("black"). The first agent's buy is approved
//! while it is the only registered capital; once a second agent joins, the
//! combined sector exposure crosses 35% of total capital and its own buy is
//! vetoed — proving the risk manager reasons about exposure across agents,
//! not just within one.

use crate::support::{next_record_for, sample_strategy, test_config, wire};
use cherryquant_orchestrator::domain::ports::{Broker, LLMClient, MarketDataSource};
use cherryquant_orchestrator::domain::types::{
    Action, RiskReasonCode, RiskVerdict, SubmissionOutcome, SymbolSelector,
};
use cherryquant_orchestrator::infrastructure::mock::{
    FakeLlmClient, InMemoryBroker, InMemoryMarketDataSource,
};
use std::sync::Arc;
use std::time::Duration;

fn buy_reply(entry: f64, stop: f64) -> String {
    format!(
        r#"{{
            "action": "buy_to_enter",
            "quantity": 10,
            "entry_price": {entry},
            "profit_target": {target},
            "stop_loss": {stop},
            "confidence": 0.9,
            "opportunity_score": 70,
            "rationale": "sector momentum"
        }}"#,
        target = entry + 50.0,
    )
}

#[tokio::test]
async fn second_agent_in_same_sector_is_vetoed_once_combined_exposure_crosses_the_limit() {
    let config = test_config();
    let market_data: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketDataSource::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    // Both "rb2501" and "hc2501" resolve to the "black" sector (§2 commodity
    // pools), so their notional exposure is pooled for the concentration
    // check even though they are different symbols traded by different
    // agents. One shared manager means one shared LLM client; the two
    // replies are consumed in call order, "a" first then "b" — safe here
    // because "a" is given time to register before "b" joins and neither
    // agent's next decision_interval (1s) elapses before both have ticked
    // once.
    let llm: Arc<dyn LLMClient> = Arc::new(FakeLlmClient::new(vec![
        Ok(buy_reply(3500.0, 3490.0)),
        Ok(buy_reply(3700.0, 3690.0)),
    ]));

    let harness = wire(&config, market_data, broker, llm).await;
    let mut events = harness.decision_logger.subscribe();

    // Agent "a" alone: 10 * 3500 = 35,000 against its own 100,000 capital is
    // exactly 35% — at, not over, the limit, so it is approved.
    harness
        .agent_manager
        .create_agent(sample_strategy(
            "s4a",
            SymbolSelector::Explicit(vec!["rb2501".to_string()]),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.agent_manager.start("s4a".to_string()).await.unwrap();

    let first = next_record_for(&mut events, "s4a", Duration::from_secs(2)).await;
    assert_eq!(first.decision.action, Action::BuyToEnter);
    assert!(matches!(
        first.submission_outcome,
        Some(SubmissionOutcome::Submitted { .. })
    ));

    // Agent "b" joins the same manager/risk manager, adding its own 100,000
    // capital. 10 * 3700 = 37,000 stacked on top of "a"'s 35,000 is 72,000
    // against the combined 200,000 capital — 36%, over the 35% cap.
    harness
        .agent_manager
        .create_agent(sample_strategy(
            "s4b",
            SymbolSelector::Explicit(vec!["hc2501".to_string()]),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.agent_manager.start("s4b".to_string()).await.unwrap();

    let second = next_record_for(&mut events, "s4b", Duration::from_secs(2)).await;
    assert_eq!(second.decision.action, Action::BuyToEnter);
    match second.risk_verdict {
        Some(RiskVerdict::Vetoed { reason, .. }) => {
            assert_eq!(reason, RiskReasonCode::SectorConcentration);
        }
        other => panic!("expected a sector concentration veto, got {other:?}"),
    }
}
