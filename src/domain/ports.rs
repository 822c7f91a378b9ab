//! Narrow interfaces to everything the core treats as an external collaborator
//! (§6). Market-data ingestion, the execution gateway, and the LLM provider
//! are adapters living in `infrastructure`; the core only ever sees these
//! traits.

use crate::domain::errors::TransientError;
use crate::domain::types::{BrokerEvent, MarketSnapshot, OrderIntent, Symbol, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::Receiver;

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_snapshot(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<MarketSnapshot, TransientError>;

    async fn resolve_dominant_contracts(
        &self,
        commodity: &str,
    ) -> Result<Vec<Symbol>, TransientError>;

    async fn recent_returns(
        &self,
        symbol: &str,
        window: usize,
    ) -> Result<Vec<f64>, TransientError>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn submit(&self, intent: OrderIntent) -> Result<String, TransientError>;

    /// Subscribe to the asynchronous event stream (acks, fills, rejects,
    /// position snapshots). Implementations fan this out per subscriber.
    async fn events(&self) -> Receiver<BrokerEvent>;
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
        max_tokens: u32,
        deadline: DateTime<Utc>,
    ) -> Result<String, TransientError>;

    /// Whether credentials/model are configured at all — distinguishes
    /// `Source::Simulated` (no LLM configured) from `Source::Fallback` (LLM
    /// configured but this call degraded).
    fn is_configured(&self) -> bool {
        true
    }
}
