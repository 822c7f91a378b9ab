//! S2 (§8 low-confidence filter): the LLM returns a coherent but low-confidence
//! signal — below the strategy's `confidence_threshold` — so the agent never
//! submits an order and logs `NotSubmitted { reason: "filtered_low_confidence" }`.

use crate::support::{next_record_for, sample_strategy, test_config, wire};
use cherryquant_orchestrator::domain::ports::{Broker, LLMClient, MarketDataSource};
use cherryquant_orchestrator::domain::types::{Action, Source, SubmissionOutcome, SymbolSelector};
use cherryquant_orchestrator::infrastructure::mock::{
    FakeLlmClient, InMemoryBroker, InMemoryMarketDataSource,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn low_confidence_signal_is_filtered_out() {
    let config = test_config();
    let market_data: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketDataSource::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let llm: Arc<dyn LLMClient> = Arc::new(FakeLlmClient::new(vec![Ok(r#"{
        "action": "buy_to_enter",
        "quantity": 1,
        "entry_price": 3500.0,
        "profit_target": 3600.0,
        "stop_loss": 3450.0,
        "confidence": 0.3,
        "opportunity_score": 40,
        "rationale": "weak setup, low conviction"
    }"#
    .to_string())]));

    let harness = wire(&config, market_data, broker, llm).await;
    let mut events = harness.decision_logger.subscribe();

    harness
        .agent_manager
        .create_agent(sample_strategy(
            "s2",
            SymbolSelector::Explicit(vec!["rb2501".to_string()]),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.agent_manager.start("s2".to_string()).await.unwrap();

    let record = next_record_for(&mut events, "s2", Duration::from_secs(2)).await;

    assert_eq!(record.decision.action, Action::BuyToEnter);
    assert_eq!(record.decision.source, Source::Llm);
    assert!(record.decision.confidence < 0.6);
    match record.submission_outcome {
        Some(SubmissionOutcome::NotSubmitted { reason }) => {
            assert_eq!(reason, "filtered_low_confidence");
        }
        other => panic!("expected a filtered-low-confidence outcome, got {other:?}"),
    }
}
