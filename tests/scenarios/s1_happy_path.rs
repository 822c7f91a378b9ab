//! S1 (§8 happy path): a configured LLM returns a coherent buy signal, the
//! risk manager approves it outright, and the order is filled and logged as
//! `Submitted`.

use crate::support::{next_record_for, sample_strategy, test_config, wire};
use cherryquant_orchestrator::domain::ports::{Broker, LLMClient, MarketDataSource};
use cherryquant_orchestrator::domain::types::{Action, Source, SubmissionOutcome, SymbolSelector};
use cherryquant_orchestrator::infrastructure::mock::{
    FakeLlmClient, InMemoryBroker, InMemoryMarketDataSource,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn happy_path_buy_is_approved_and_filled() {
    let config = test_config();
    let market_data: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketDataSource::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let llm: Arc<dyn LLMClient> = Arc::new(FakeLlmClient::new(vec![Ok(r#"{
        "action": "buy_to_enter",
        "quantity": 1,
        "entry_price": 3500.0,
        "profit_target": 3600.0,
        "stop_loss": 3450.0,
        "confidence": 0.9,
        "opportunity_score": 80,
        "rationale": "breakout above resistance"
    }"#
    .to_string())]));

    let harness = wire(&config, market_data, broker, llm).await;
    let mut events = harness.decision_logger.subscribe();

    harness
        .agent_manager
        .create_agent(sample_strategy("s1", SymbolSelector::Explicit(vec!["rb2501".to_string()])))
        .await
        .unwrap();
    // `create_agent` fires off the risk-manager registration as a detached
    // task; give it a moment to land before the agent's first tick evaluates
    // an order against the portfolio.
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.agent_manager.start("s1".to_string()).await.unwrap();

    let record = next_record_for(&mut events, "s1", Duration::from_secs(2)).await;

    assert_eq!(record.strategy_id, "s1");
    assert_eq!(record.decision.action, Action::BuyToEnter);
    assert_eq!(record.decision.source, Source::Llm);
    assert!(matches!(
        record.submission_outcome,
        Some(SubmissionOutcome::Submitted { .. })
    ));
}
