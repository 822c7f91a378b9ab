//! S3 (§8 LLM fallback): a configured LLM that has exhausted its retries
//! degrades to the rule-based fallback engine rather than failing the tick —
//! the decision is still logged, tagged `Source::Fallback`.

use crate::support::{next_record_for, sample_strategy, test_config, wire};
use cherryquant_orchestrator::domain::ports::{Broker, LLMClient, MarketDataSource};
use cherryquant_orchestrator::domain::types::{Action, Source, SymbolSelector};
use cherryquant_orchestrator::infrastructure::mock::{
    FakeLlmClient, InMemoryBroker, InMemoryMarketDataSource,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn exhausted_retries_fall_back_to_the_rule_engine() {
    let config = test_config();
    // An empty canned-reply list means every call to `complete` returns the
    // "no more canned replies" transient error, so the engine's bounded
    // retry loop exhausts and falls through to `fallback::decide`.
    let market_data: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketDataSource::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let llm: Arc<dyn LLMClient> = Arc::new(FakeLlmClient::new(vec![]));

    let harness = wire(&config, market_data, broker, llm).await;
    let mut events = harness.decision_logger.subscribe();

    harness
        .agent_manager
        .create_agent(sample_strategy(
            "s3",
            SymbolSelector::Explicit(vec!["rb2501".to_string()]),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.agent_manager.start("s3".to_string()).await.unwrap();

    let record = next_record_for(&mut events, "s3", Duration::from_secs(2)).await;

    assert_eq!(record.decision.source, Source::Fallback);
    // The in-memory market data source hands back a snapshot with every
    // indicator unset for a symbol nobody has configured, so the rule-based
    // fallback has nothing to act on and holds.
    assert_eq!(record.decision.action, Action::Hold);
}
