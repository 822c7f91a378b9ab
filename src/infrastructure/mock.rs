//! In-memory fakes for every external-collaborator trait (§6, §8), grounded
//! on the teacher's `MockMarketDataService`/`MockExecutionService`
//! (`infrastructure/mock.rs`): no network, deterministic, used by the
//! scenario tests and as a local dry-run mode.

use crate::domain::errors::TransientError;
use crate::domain::ports::{Broker, LLMClient, MarketDataSource};
use crate::domain::types::{BrokerEvent, MarketSnapshot, OrderIntent, Symbol, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

/// Returns whatever snapshot/dominant-contract list/returns series was last
/// registered for a key, or a flat synthetic default otherwise. Every
/// setter takes effect immediately for the next read — there is no
/// simulated feed loop, unlike the teacher's `MockMarketDataService`, since
/// this crate's snapshots are pulled on demand rather than pushed.
pub struct InMemoryMarketDataSource {
    snapshots: Arc<RwLock<HashMap<Symbol, MarketSnapshot>>>,
    dominant_contracts: Arc<RwLock<HashMap<String, Vec<Symbol>>>>,
    returns: Arc<RwLock<HashMap<Symbol, Vec<f64>>>>,
}

impl InMemoryMarketDataSource {
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            dominant_contracts: Arc::new(RwLock::new(HashMap::new())),
            returns: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set_snapshot(&self, snapshot: MarketSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.symbol.clone(), snapshot);
    }

    pub async fn set_dominant_contracts(&self, commodity: &str, symbols: Vec<Symbol>) {
        self.dominant_contracts
            .write()
            .await
            .insert(commodity.to_string(), symbols);
    }

    pub async fn set_recent_returns(&self, symbol: &str, returns: Vec<f64>) {
        self.returns.write().await.insert(symbol.to_string(), returns);
    }
}

impl Default for InMemoryMarketDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for InMemoryMarketDataSource {
    async fn get_snapshot(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<MarketSnapshot, TransientError> {
        if let Some(snapshot) = self.snapshots.read().await.get(symbol) {
            return Ok(snapshot.clone());
        }
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            timeframe,
            as_of: Utc::now(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            volume: Decimal::ZERO,
            open_interest: None,
            indicators: Default::default(),
        })
    }

    async fn resolve_dominant_contracts(&self, commodity: &str) -> Result<Vec<Symbol>, TransientError> {
        if let Some(symbols) = self.dominant_contracts.read().await.get(commodity) {
            return Ok(symbols.clone());
        }
        Ok(vec![commodity.to_string()])
    }

    async fn recent_returns(&self, symbol: &str, window: usize) -> Result<Vec<f64>, TransientError> {
        if let Some(returns) = self.returns.read().await.get(symbol) {
            let len = returns.len();
            return Ok(returns[len.saturating_sub(window)..].to_vec());
        }
        Ok(Vec::new())
    }
}

/// Fills every submitted order immediately at the intent's own price and
/// fans the resulting events out to every current subscriber, mirroring the
/// teacher's subscriber-list broadcast in `MockMarketDataService::publish`.
pub struct InMemoryBroker {
    subscribers: Arc<RwLock<Vec<mpsc::Sender<BrokerEvent>>>>,
    order_seq: AtomicU64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            order_seq: AtomicU64::new(0),
        }
    }

    async fn publish(&self, event: BrokerEvent) {
        let subs = self.subscribers.read().await;
        for tx in subs.iter() {
            let _ = tx.send(event.clone()).await;
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn submit(&self, intent: OrderIntent) -> Result<String, TransientError> {
        let order_id = format!("sim-{}", self.order_seq.fetch_add(1, Ordering::Relaxed));
        info!(order_id, symbol = %intent.symbol, "InMemoryBroker: filling order immediately");

        self.publish(BrokerEvent::Ack {
            order_id: order_id.clone(),
            decision_id: Some(intent.decision_id),
        })
        .await;
        self.publish(BrokerEvent::Fill {
            order_id: order_id.clone(),
            decision_id: Some(intent.decision_id),
            symbol: intent.symbol,
            price: intent.price,
            quantity: intent.quantity,
            direction: intent.direction,
            ts: Utc::now(),
        })
        .await;

        Ok(order_id)
    }

    async fn events(&self) -> mpsc::Receiver<BrokerEvent> {
        let (tx, rx) = mpsc::channel(128);
        self.subscribers.write().await.push(tx);
        rx
    }
}

/// Replays a queue of canned `complete()` outcomes in order, one per call —
/// lets a scenario test script exactly the sequence of replies/timeouts an
/// agent's engine sees (e.g. S3's "times out twice, then would succeed but
/// the agent has already fallen back").
pub struct FakeLlmClient {
    replies: Mutex<VecDeque<Result<String, TransientError>>>,
    configured: bool,
}

impl FakeLlmClient {
    pub fn new(replies: Vec<Result<String, TransientError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            configured: true,
        }
    }

    /// An engine with no LLM configured at all (`Source::Simulated`, never
    /// `Source::Fallback`).
    pub fn unconfigured() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            configured: false,
        }
    }
}

#[async_trait]
impl LLMClient for FakeLlmClient {
    async fn complete(
        &self,
        _prompt: &str,
        _model: &str,
        _temperature: f64,
        _max_tokens: u32,
        _deadline: DateTime<Utc>,
    ) -> Result<String, TransientError> {
        let mut replies = self.replies.lock().await;
        replies
            .pop_front()
            .unwrap_or_else(|| Err(TransientError::Upstream("no more canned replies".to_string())))
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}
