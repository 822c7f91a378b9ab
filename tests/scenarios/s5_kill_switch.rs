//! S5 (§8 kill switch): a daily loss breaching `daily_loss_limit` latches the
//! portfolio-wide halt and fans out to every registered agent, which the
//! agent manager reflects as `AgentState::Halted`.

use crate::support::{sample_strategy, test_config, wire};
use cherryquant_orchestrator::application::strategy_agent::RiskClient;
use cherryquant_orchestrator::domain::ports::{Broker, LLMClient, MarketDataSource};
use cherryquant_orchestrator::domain::types::{
    AgentState, Direction, OrderIntent, SymbolSelector, TimeInForce,
};
use cherryquant_orchestrator::infrastructure::mock::{
    FakeLlmClient, InMemoryBroker, InMemoryMarketDataSource,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn daily_loss_past_the_limit_halts_every_agent() {
    let config = test_config();
    let market_data: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketDataSource::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let llm: Arc<dyn LLMClient> = Arc::new(FakeLlmClient::unconfigured());

    let harness = wire(&config, market_data, broker, llm).await;

    harness
        .agent_manager
        .create_agent(sample_strategy(
            "s5",
            SymbolSelector::Explicit(vec!["rb2501".to_string()]),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.agent_manager.start("s5".to_string()).await.unwrap();

    // 100,000 initial capital, 5% daily loss limit (§2 risk limits default)
    // => -6,000 is past the -5,000 trigger.
    harness.risk_manager.record_pnl(dec!(-6_000)).await;
    // `record_pnl` and `get_view` share the same single-consumer mailbox, so
    // awaiting this reply guarantees the loss has already been applied.
    harness.risk_manager.get_view().await;

    // The kill-switch check only runs inside `evaluate`, so drive one with a
    // throwaway intent to trip it (§4.4 Testable Property 6).
    let dummy_intent = OrderIntent {
        strategy_id: "s5".to_string(),
        decision_id: uuid::Uuid::new_v4(),
        symbol: "rb2501".to_string(),
        direction: Direction::Long,
        quantity: 1,
        price: dec!(3500),
        stop_loss: None,
        take_profit: None,
        time_in_force: TimeInForce::Day,
    };
    harness
        .risk_manager
        .evaluate(dummy_intent, chrono::Utc::now())
        .await;

    let mut halted = false;
    for _ in 0..20 {
        if harness.agent_manager.get_state("s5".to_string()).await == Some(AgentState::Halted) {
            halted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(halted, "agent was never reflected as Halted after the kill-switch engaged");
}
