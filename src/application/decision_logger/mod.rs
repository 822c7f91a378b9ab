//! Decision Logger (§4.5): a single-writer actor that buffers
//! [`DecisionRecord`]s in memory and flushes them to the `decision_log`
//! SQLite table on a timer or a size threshold, whichever comes first.
//! Best-effort — losing the unflushed tail on a crash is acceptable (§4.5).

use crate::application::strategy_agent::DecisionLogClient;
use crate::domain::types::{DecisionId, DecisionRecord};
use crate::infrastructure::persistence::Database;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

enum LogCommand {
    Append(DecisionRecord),
    AttachOutcome {
        decision_id: DecisionId,
        fill_price: Option<Decimal>,
        realized_pnl: Option<Decimal>,
        invalidation_triggered: Option<bool>,
    },
}

pub struct DecisionLogger {
    db: Database,
    buffer: HashMap<DecisionId, DecisionRecord>,
    flush_threshold: usize,
    events: broadcast::Sender<DecisionRecord>,
}

impl DecisionLogger {
    pub fn new(db: Database, flush_threshold: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            db,
            buffer: HashMap::new(),
            flush_threshold,
            events,
        }
    }

    fn handle_command(&mut self, cmd: LogCommand) -> bool {
        match cmd {
            LogCommand::Append(record) => {
                let _ = self.events.send(record.clone());
                self.buffer.insert(record.decision_id, record);
            }
            LogCommand::AttachOutcome {
                decision_id,
                fill_price,
                realized_pnl,
                invalidation_triggered,
            } => {
                if let Some(record) = self.buffer.get_mut(&decision_id) {
                    record.fill_price = fill_price.or(record.fill_price);
                    record.realized_pnl = realized_pnl.or(record.realized_pnl);
                    record.invalidation_triggered =
                        invalidation_triggered.or(record.invalidation_triggered);
                    let _ = self.events.send(record.clone());
                } else {
                    // Already flushed (or never appended) — best-effort, the
                    // outcome is simply dropped rather than re-reading from
                    // SQLite to patch it in.
                    info!(%decision_id, "outcome for unbuffered decision dropped");
                }
            }
        }
        self.buffer.len() >= self.flush_threshold
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let records: Vec<DecisionRecord> = self.buffer.drain().map(|(_, v)| v).collect();
        for record in &records {
            let record_json = match serde_json::to_string(record) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, decision_id = %record.decision_id, "failed to serialize decision record");
                    continue;
                }
            };
            let result = sqlx::query(
                "INSERT OR REPLACE INTO decision_log (decision_id, strategy_id, symbol, logged_at, record_json) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(record.decision_id.to_string())
            .bind(&record.strategy_id)
            .bind(&record.input_summary.symbol)
            .bind(record.logged_at.timestamp())
            .bind(record_json)
            .execute(&self.db.pool)
            .await;

            if let Err(e) = result {
                error!(error = %e, decision_id = %record.decision_id, "failed to persist decision record");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DecisionRecord> {
        self.events.subscribe()
    }

    /// The logger's event loop: flushes on a fixed interval, draining
    /// commands in between, and also flushes early once the buffer crosses
    /// `flush_threshold`. Runs until `cmd_rx` is closed, flushing once more
    /// on the way out.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<LogCommand>, flush_interval: Duration) {
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd) {
                                self.flush().await;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        self.flush().await;
    }
}

#[derive(Clone)]
pub struct DecisionLoggerHandle {
    tx: mpsc::Sender<LogCommand>,
    events: broadcast::Sender<DecisionRecord>,
}

impl DecisionLoggerHandle {
    pub async fn attach_outcome(
        &self,
        decision_id: DecisionId,
        fill_price: Option<Decimal>,
        realized_pnl: Option<Decimal>,
        invalidation_triggered: Option<bool>,
    ) {
        let _ = self
            .tx
            .send(LogCommand::AttachOutcome {
                decision_id,
                fill_price,
                realized_pnl,
                invalidation_triggered,
            })
            .await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DecisionRecord> {
        self.events.subscribe()
    }
}

#[async_trait]
impl DecisionLogClient for DecisionLoggerHandle {
    async fn log(&self, record: DecisionRecord) {
        let _ = self.tx.send(LogCommand::Append(record)).await;
    }

    async fn attach_outcome(
        &self,
        decision_id: DecisionId,
        fill_price: Option<Decimal>,
        realized_pnl: Option<Decimal>,
        invalidation_triggered: Option<bool>,
    ) {
        DecisionLoggerHandle::attach_outcome(self, decision_id, fill_price, realized_pnl, invalidation_triggered)
            .await;
    }
}

/// Spawns the logger task and returns a clonable handle. `flush_interval`
/// and `flush_threshold` come from `OrchestratorConfig` (§4.5 defaults: 2s /
/// 256 records).
pub fn spawn(db: Database, flush_interval: Duration, flush_threshold: usize) -> DecisionLoggerHandle {
    let logger = DecisionLogger::new(db, flush_threshold);
    let events = logger.events.clone();
    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(logger.run(rx, flush_interval));
    DecisionLoggerHandle { tx, events }
}
