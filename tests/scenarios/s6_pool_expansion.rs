//! S6 (§8 pool expansion): a strategy configured with `commodity_pool =
//! "black"` and `max_symbols = 3` trades the currently-dominant contract for
//! three of the pool's five commodities (rb, hc, i, j, jm), in pool order;
//! when the dominant contract for one of those commodities rolls to a new
//! contract month between ticks, the agent picks up the new symbol on its
//! very next tick rather than continuing to trade the stale one.

use crate::support::{next_record_for, sample_strategy, test_config, wire};
use cherryquant_orchestrator::domain::ports::{Broker, LLMClient, MarketDataSource};
use cherryquant_orchestrator::domain::types::SymbolSelector;
use cherryquant_orchestrator::infrastructure::mock::{
    FakeLlmClient, InMemoryBroker, InMemoryMarketDataSource,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn hold_reply() -> String {
    r#"{"action":"hold","confidence":0.4,"rationale":"no setup"}"#.to_string()
}

#[tokio::test]
async fn pool_selector_trades_the_dominant_contract_and_follows_a_roll() {
    let config = test_config();
    let market_data = Arc::new(InMemoryMarketDataSource::new());
    market_data.set_dominant_contracts("rb", vec!["rb2501".to_string()]).await;
    market_data.set_dominant_contracts("hc", vec!["hc2501".to_string()]).await;
    market_data.set_dominant_contracts("i", vec!["i2501".to_string()]).await;
    market_data.set_dominant_contracts("j", vec!["j2501".to_string()]).await;
    market_data.set_dominant_contracts("jm", vec!["jm2501".to_string()]).await;
    let market_data_source: Arc<dyn MarketDataSource> = market_data.clone();
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let llm: Arc<dyn LLMClient> = Arc::new(FakeLlmClient::new(
        std::iter::repeat_with(|| Ok(hold_reply())).take(64).collect(),
    ));

    let harness = wire(&config, market_data_source, broker, llm).await;
    let mut events = harness.decision_logger.subscribe();

    let mut strategy = sample_strategy("s6", SymbolSelector::Pool("black".to_string()));
    strategy.max_symbols = 3;
    strategy.decision_interval = chrono::Duration::milliseconds(150);

    harness.agent_manager.create_agent(strategy).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.agent_manager.start("s6".to_string()).await.unwrap();

    // First tick: the pool's member order is rb, hc, i, j, jm (§2); capped at
    // max_symbols=3 that is the currently-dominant contract for each of the
    // first three.
    let mut first_tick_symbols = HashSet::new();
    for _ in 0..3 {
        let record = next_record_for(&mut events, "s6", Duration::from_secs(2)).await;
        first_tick_symbols.insert(record.input_summary.symbol.clone());
    }
    assert_eq!(
        first_tick_symbols,
        HashSet::from([
            "rb2501".to_string(),
            "hc2501".to_string(),
            "i2501".to_string(),
        ])
    );

    // Roll "rb"'s dominant contract to a new month before the agent's next
    // tick fires.
    market_data.set_dominant_contracts("rb", vec!["rb2505".to_string()]).await;

    let mut second_tick_symbols = HashSet::new();
    for _ in 0..3 {
        let record = next_record_for(&mut events, "s6", Duration::from_secs(2)).await;
        second_tick_symbols.insert(record.input_summary.symbol.clone());
    }
    assert!(second_tick_symbols.contains("rb2505"));
    assert!(!second_tick_symbols.contains("rb2501"));
}
