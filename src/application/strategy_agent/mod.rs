//! Strategy Agent (§4.2): the per-strategy decision loop. One agent owns one
//! [`AgentRuntime`] and drives it through the nine-step tick protocol, with
//! all outside collaboration going through narrow port traits rather than a
//! back-pointer to the [`super::agent_manager::AgentManager`] or the
//! [`super::portfolio_risk_manager`] actor.

mod sizing;

use crate::application::agent_manager::TokenBucket;
use crate::application::ai_decision_engine::AIDecisionEngine;
use crate::config::LlmConfig;
use crate::domain::errors::AgentFault;
use crate::domain::ports::{Broker, LLMClient, MarketDataSource};
use crate::domain::types::{
    Action, AgentId, AgentRuntime, AgentState, AIDecision, BrokerEvent, DecisionId, DecisionRecord,
    Direction, InputSummary, OrderIntent, Position, RiskVerdict, Source, StrategyConfig,
    SubmissionOutcome, Symbol, SymbolSelector, TimeInForce,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

/// Narrow callback into the Portfolio Risk Manager. An agent never sees the
/// manager's internal state or its sibling agents — only this interface.
#[async_trait]
pub trait RiskClient: Send + Sync {
    async fn evaluate(&self, intent: OrderIntent, now: DateTime<Utc>) -> RiskVerdict;

    /// Tells the risk manager about a newly created agent's starting
    /// capital, so portfolio-level percentage limits have a denominator for
    /// that agent from its very first order. A no-op by default so existing
    /// narrow test doubles don't need to implement it.
    async fn register_agent(&self, _agent_id: AgentId, _initial_capital: rust_decimal::Decimal) {}

    /// Tells the risk manager that an agent has gone flat in `symbol`, so
    /// its per-(agent, symbol) exposure entry can be cleared rather than
    /// left stale once a `Close` fills. A no-op by default.
    async fn close(&self, _agent_id: AgentId, _symbol: Symbol) {}

    /// Reports a closing fill's realized PnL so the risk manager's rolling
    /// drawdown and daily-loss floor (§4.4) actually move with real trading
    /// losses rather than only through the operator-facing PnL API. A no-op
    /// by default so existing narrow test doubles don't need to implement
    /// it.
    async fn report_realized_pnl(&self, _delta: rust_decimal::Decimal) {}
}

/// Narrow callback into the Decision Logger.
#[async_trait]
pub trait DecisionLogClient: Send + Sync {
    async fn log(&self, record: DecisionRecord);

    /// Patches fill price / realized PnL / invalidation flag into an
    /// already-logged record once the broker's fill resolves it (§4.5:
    /// "when later known"). A no-op by default so narrow test doubles that
    /// never need it don't have to implement it.
    async fn attach_outcome(
        &self,
        _decision_id: DecisionId,
        _fill_price: Option<rust_decimal::Decimal>,
        _realized_pnl: Option<rust_decimal::Decimal>,
        _invalidation_triggered: Option<bool>,
    ) {
    }
}

enum StrategyAgentCommand {
    Start {
        reply: oneshot::Sender<Result<AgentState, AgentFault>>,
    },
    Tick {
        now: DateTime<Utc>,
        reply: oneshot::Sender<Result<AgentState, AgentFault>>,
    },
    Pause {
        reply: oneshot::Sender<Result<AgentState, AgentFault>>,
    },
    Resume {
        reply: oneshot::Sender<Result<AgentState, AgentFault>>,
    },
    /// Used only by the Agent Manager's kill-switch resume path — bypasses
    /// the normal state-machine check that otherwise keeps a single agent
    /// from lifting its own `HALTED` state (§4.4, §7).
    ForceResume {
        reply: oneshot::Sender<AgentState>,
    },
    Halt {
        reply: oneshot::Sender<AgentState>,
    },
    Stop {
        reply: oneshot::Sender<Result<AgentState, AgentFault>>,
    },
    /// The Agent Manager's designated flatten path for `remove(agent_id)`
    /// (§4.1): closes every open position directly with the broker,
    /// bypassing `RiskClient::evaluate` since a forced liquidation only
    /// ever reduces exposure and must not be vetoable.
    Flatten {
        reply: oneshot::Sender<()>,
    },
    GetState {
        reply: oneshot::Sender<AgentState>,
    },
}

#[derive(Clone)]
pub struct StrategyAgentHandle {
    pub id: AgentId,
    tx: mpsc::Sender<StrategyAgentCommand>,
}

impl StrategyAgentHandle {
    pub async fn request_tick(&self, now: DateTime<Utc>) -> Result<AgentState, AgentFault> {
        self.roundtrip(|reply| StrategyAgentCommand::Tick { now, reply })
            .await
    }

    pub async fn start(&self) -> Result<AgentState, AgentFault> {
        self.roundtrip(|reply| StrategyAgentCommand::Start { reply })
            .await
    }

    pub async fn pause(&self) -> Result<AgentState, AgentFault> {
        self.roundtrip(|reply| StrategyAgentCommand::Pause { reply })
            .await
    }

    pub async fn resume(&self) -> Result<AgentState, AgentFault> {
        self.roundtrip(|reply| StrategyAgentCommand::Resume { reply })
            .await
    }

    pub async fn stop(&self) -> Result<AgentState, AgentFault> {
        self.roundtrip(|reply| StrategyAgentCommand::Stop { reply })
            .await
    }

    /// Closes every position this agent holds before it's torn down. Waits
    /// for the agent task to finish flattening; a no-op if the task has
    /// already exited.
    pub async fn flatten(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(StrategyAgentCommand::Flatten { reply }).await.is_err() {
            return;
        }
        let _ = rx.await;
    }

    pub async fn halt(&self) -> AgentState {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(StrategyAgentCommand::Halt { reply }).await;
        rx.await.unwrap_or(AgentState::Halted)
    }

    pub async fn force_resume(&self) -> AgentState {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(StrategyAgentCommand::ForceResume { reply })
            .await;
        rx.await.unwrap_or(AgentState::Halted)
    }

    pub async fn get_state(&self) -> AgentState {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(StrategyAgentCommand::GetState { reply }).await;
        rx.await.unwrap_or(AgentState::Terminated)
    }

    async fn roundtrip<F>(&self, make_cmd: F) -> Result<AgentState, AgentFault>
    where
        F: FnOnce(oneshot::Sender<Result<AgentState, AgentFault>>) -> StrategyAgentCommand,
    {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make_cmd(reply)).await.is_err() {
            return Err(AgentFault::Panicked("agent task is no longer running".into()));
        }
        rx.await
            .unwrap_or_else(|_| Err(AgentFault::Panicked("agent task dropped reply".into())))
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    config: StrategyConfig,
    now: DateTime<Utc>,
    market_data: Arc<dyn MarketDataSource>,
    broker: Arc<dyn Broker>,
    llm_client: Arc<dyn LLMClient>,
    llm_config: Arc<LlmConfig>,
    llm_budget: Arc<TokenBucket>,
    risk_client: Arc<dyn RiskClient>,
    decision_log: Arc<dyn DecisionLogClient>,
) -> StrategyAgentHandle {
    let id = config.strategy_id.clone();
    let (tx, rx) = mpsc::channel(32);
    let engine = AIDecisionEngine::new(llm_config);

    let agent = StrategyAgent {
        id: id.clone(),
        config,
        runtime: AgentRuntime::new(Default::default()),
        market_data,
        broker,
        llm_client,
        llm_budget,
        risk_client,
        decision_log,
        engine,
        broker_events: None,
        registered_at: now,
    };

    tokio::spawn(agent.run(rx));
    StrategyAgentHandle { id, tx }
}

struct StrategyAgent {
    id: AgentId,
    config: StrategyConfig,
    runtime: AgentRuntime,
    market_data: Arc<dyn MarketDataSource>,
    broker: Arc<dyn Broker>,
    llm_client: Arc<dyn LLMClient>,
    llm_budget: Arc<TokenBucket>,
    risk_client: Arc<dyn RiskClient>,
    decision_log: Arc<dyn DecisionLogClient>,
    engine: AIDecisionEngine,
    broker_events: Option<mpsc::Receiver<BrokerEvent>>,
    registered_at: DateTime<Utc>,
}

impl StrategyAgent {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<StrategyAgentCommand>) {
        self.runtime = AgentRuntime::new(self.config.initial_capital);
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                StrategyAgentCommand::Start { reply } => {
                    let result = self.transition_checked(AgentState::Idle);
                    if result.is_ok() {
                        self.broker_events = Some(self.broker.events().await);
                    }
                    let _ = reply.send(result);
                }
                StrategyAgentCommand::Tick { now, reply } => {
                    self.drain_broker_events().await;
                    let result = self.tick(now).await;
                    let _ = reply.send(result);
                }
                StrategyAgentCommand::Pause { reply } => {
                    let _ = reply.send(self.transition_checked(AgentState::Paused));
                }
                StrategyAgentCommand::Resume { reply } => {
                    let _ = reply.send(self.transition_checked(AgentState::Idle));
                }
                StrategyAgentCommand::ForceResume { reply } => {
                    self.runtime.state = AgentState::Idle;
                    let _ = reply.send(self.runtime.state);
                }
                StrategyAgentCommand::Halt { reply } => {
                    self.runtime.state = AgentState::Halted;
                    let _ = reply.send(self.runtime.state);
                }
                StrategyAgentCommand::Stop { reply } => {
                    let _ = reply.send(self.transition_checked(AgentState::Terminated));
                }
                StrategyAgentCommand::Flatten { reply } => {
                    self.flatten_all().await;
                    let _ = reply.send(());
                }
                StrategyAgentCommand::GetState { reply } => {
                    let _ = reply.send(self.runtime.state);
                }
            }
        }
    }

    fn transition_checked(&mut self, next: AgentState) -> Result<AgentState, AgentFault> {
        if self.runtime.state.can_transition_to(next) {
            self.runtime.state = next;
            Ok(next)
        } else {
            Err(AgentFault::IllegalTransition {
                from: self.runtime.state,
                to: next,
            })
        }
    }

    /// Collects whatever events are pending before processing any of them,
    /// since [`Self::apply_fill`] needs `&mut self` for the risk-manager and
    /// decision-logger callbacks and so can't run while `broker_events` is
    /// itself borrowed.
    async fn drain_broker_events(&mut self) {
        let mut events = Vec::new();
        if let Some(rx) = self.broker_events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        for event in events {
            self.apply_fill(event).await;
        }
    }

    #[instrument(skip(self), fields(agent_id = %self.id))]
    async fn tick(&mut self, now: DateTime<Utc>) -> Result<AgentState, AgentFault> {
        if !self.runtime.state.can_transition_to(AgentState::Thinking) {
            return Err(AgentFault::IllegalTransition {
                from: self.runtime.state,
                to: AgentState::Thinking,
            });
        }
        self.runtime.state = AgentState::Thinking;

        let symbols = match self.select_symbols().await {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!(error = %e, "symbol selection failed, ending tick idle");
                self.runtime.state = AgentState::Idle;
                return Ok(self.runtime.state);
            }
        };

        for symbol in symbols {
            self.tick_one_symbol(&symbol, now).await;
        }

        self.runtime.refresh_drawdown();
        self.runtime.last_decision_time = Some(now);
        self.runtime.state = AgentState::Idle;
        Ok(self.runtime.state)
    }

    /// One symbol through steps 2-8 of the per-tick protocol.
    async fn tick_one_symbol(&mut self, symbol: &Symbol, now: DateTime<Utc>) {
        let snapshot = match self
            .market_data
            .get_snapshot(symbol, crate::domain::types::Timeframe::M5)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "snapshot fetch failed, skipping symbol");
                return;
            }
        };

        if snapshot.is_stale(now, self.config.decision_interval) {
            warn!(symbol = %symbol, "snapshot stale, skipping symbol");
            return;
        }

        let outcome = self
            .engine
            .decide(
                &self.config,
                &snapshot,
                self.llm_client.as_ref(),
                &self.llm_budget,
                now,
            )
            .await;
        let decision = outcome.decision;

        let input_summary = InputSummary {
            symbol: symbol.clone(),
            as_of: snapshot.as_of,
            indicators: snapshot.indicators,
        };

        // §4.2 step 4: low-confidence decisions are filtered distinctly from
        // a plain `hold` so the audit trail can tell the two apart (§8 S2).
        let filtered = if decision.confidence < self.config.confidence_threshold {
            Some("filtered_low_confidence")
        } else if decision.action == Action::Hold {
            Some("hold")
        } else {
            None
        };
        if let Some(reason) = filtered {
            self.log_decision(DecisionRecord {
                decision_id: decision.decision_id,
                strategy_id: self.id.clone(),
                input_summary,
                raw_ai_response: outcome.raw_response,
                decision,
                risk_verdict: None,
                submission_outcome: Some(SubmissionOutcome::NotSubmitted {
                    reason: reason.to_string(),
                }),
                fill_price: None,
                realized_pnl: None,
                invalidation_triggered: None,
                logged_at: now,
            })
            .await;
            return;
        }

        // Invariant: |positions[agent]| <= max_positions. A `Close` on an
        // already-held symbol never grows the book, so only a fresh entry is
        // capped here (§3 invariant 2).
        let opens_new_position = matches!(decision.action, Action::BuyToEnter | Action::SellToEnter)
            && !self.runtime.positions.contains_key(symbol);
        if opens_new_position && self.runtime.positions.len() >= self.config.max_positions {
            self.log_decision(DecisionRecord {
                decision_id: decision.decision_id,
                strategy_id: self.id.clone(),
                input_summary,
                raw_ai_response: outcome.raw_response,
                decision,
                risk_verdict: None,
                submission_outcome: Some(SubmissionOutcome::NotSubmitted {
                    reason: "max_positions reached".to_string(),
                }),
                fill_price: None,
                realized_pnl: None,
                invalidation_triggered: None,
                logged_at: now,
            })
            .await;
            return;
        }

        if decision.action == Action::Close {
            self.handle_close(symbol, decision, input_summary, outcome.raw_response, now)
                .await;
            return;
        }

        let Some(quantity) = sizing::size_intent(&self.config, &decision, self.runtime.available_cash)
        else {
            self.log_decision(DecisionRecord {
                decision_id: decision.decision_id,
                strategy_id: self.id.clone(),
                input_summary,
                raw_ai_response: outcome.raw_response,
                decision,
                risk_verdict: None,
                submission_outcome: Some(SubmissionOutcome::NotSubmitted {
                    reason: "could not size within risk budget".to_string(),
                }),
                fill_price: None,
                realized_pnl: None,
                invalidation_triggered: None,
                logged_at: now,
            })
            .await;
            return;
        };

        let direction = match decision.action {
            Action::BuyToEnter => Direction::Long,
            _ => Direction::Short,
        };
        let intent = OrderIntent {
            strategy_id: self.id.clone(),
            decision_id: decision.decision_id,
            symbol: symbol.clone(),
            direction,
            quantity,
            price: decision.entry_price.unwrap_or_default(),
            stop_loss: decision.stop_loss,
            take_profit: decision.profit_target,
            time_in_force: TimeInForce::Day,
        };

        let verdict = self.risk_client.evaluate(intent.clone(), now).await;
        let submission_outcome = match &verdict {
            RiskVerdict::Vetoed { reason, detail } => {
                info!(symbol = %symbol, %reason, %detail, "risk manager vetoed order");
                Some(SubmissionOutcome::NotSubmitted {
                    reason: format!("{reason}: {detail}"),
                })
            }
            RiskVerdict::Approved { adjusted_quantity } => {
                let final_intent = match adjusted_quantity {
                    Some(q) => OrderIntent {
                        quantity: *q,
                        ..intent.clone()
                    },
                    None => intent.clone(),
                };
                // Transient `ORDERING` state while the submission is
                // in-flight; `submit` resolves synchronously to an order id
                // or an error, so the agent is always back in a quiescent
                // state by the time this function returns (§4.2 step 7).
                self.runtime.state = AgentState::Ordering;
                let outcome = match self.submit_with_retry(final_intent).await {
                    Ok(order_id) => Some(SubmissionOutcome::Submitted { order_id }),
                    Err(e) => Some(SubmissionOutcome::Failed { error: e }),
                };
                self.runtime.state = AgentState::Thinking;
                outcome
            }
        };

        self.log_decision(DecisionRecord {
            decision_id: decision.decision_id,
            strategy_id: self.id.clone(),
            input_summary,
            raw_ai_response: outcome.raw_response,
            decision,
            risk_verdict: Some(verdict),
            submission_outcome,
            fill_price: None,
            realized_pnl: None,
            invalidation_triggered: None,
            logged_at: now,
        })
        .await;
    }

    /// A `Close` decision on a symbol the agent actually holds: builds the
    /// offsetting order from the held position rather than the sizing
    /// pipeline (which only ever sizes entries), still subject to the
    /// ordinary risk check since a model-initiated close is part of the
    /// regular decision loop, not an administrative override.
    async fn handle_close(
        &mut self,
        symbol: &Symbol,
        decision: AIDecision,
        input_summary: InputSummary,
        raw_response: Option<String>,
        now: DateTime<Utc>,
    ) {
        let Some(position) = self.runtime.positions.get(symbol).cloned() else {
            self.log_decision(DecisionRecord {
                decision_id: decision.decision_id,
                strategy_id: self.id.clone(),
                input_summary,
                raw_ai_response: raw_response,
                decision,
                risk_verdict: None,
                submission_outcome: Some(SubmissionOutcome::NotSubmitted {
                    reason: "no open position to close".to_string(),
                }),
                fill_price: None,
                realized_pnl: None,
                invalidation_triggered: None,
                logged_at: now,
            })
            .await;
            return;
        };

        let close_direction = match position.direction {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        };
        let price = decision.entry_price.unwrap_or(position.entry_price);
        let intent = OrderIntent {
            strategy_id: self.id.clone(),
            decision_id: decision.decision_id,
            symbol: symbol.clone(),
            direction: close_direction,
            quantity: position.quantity,
            price,
            stop_loss: None,
            take_profit: None,
            time_in_force: TimeInForce::Day,
        };

        // Settlement (position removal, cash/margin credit, realized PnL,
        // the risk manager's exposure clear, and this record's fill
        // price/PnL) all happen later, event-driven, through `apply_fill`
        // once the broker's `Fill` for this `decision_id` is drained — never
        // synchronously here. A synchronous close here and an event-driven
        // open in `apply_fill` would double-settle the book on every
        // entry-then-close cycle (§3 invariant 2, §4.2 step 9).
        let verdict = self.risk_client.evaluate(intent.clone(), now).await;
        let submission_outcome = match &verdict {
            RiskVerdict::Vetoed { reason, detail } => {
                info!(symbol = %symbol, %reason, %detail, "risk manager vetoed close order");
                Some(SubmissionOutcome::NotSubmitted {
                    reason: format!("{reason}: {detail}"),
                })
            }
            RiskVerdict::Approved { .. } => {
                self.runtime.state = AgentState::Ordering;
                let result = self.submit_with_retry(intent.clone()).await;
                self.runtime.state = AgentState::Thinking;
                match result {
                    Ok(order_id) => Some(SubmissionOutcome::Submitted { order_id }),
                    Err(e) => Some(SubmissionOutcome::Failed { error: e }),
                }
            }
        };

        self.log_decision(DecisionRecord {
            decision_id: decision.decision_id,
            strategy_id: self.id.clone(),
            input_summary,
            raw_ai_response: raw_response,
            decision,
            risk_verdict: Some(verdict),
            submission_outcome,
            fill_price: None,
            realized_pnl: None,
            invalidation_triggered: None,
            logged_at: now,
        })
        .await;
    }

    /// The Agent Manager's flatten path (§4.1): closes every held position
    /// directly with the broker and notifies the risk manager, bypassing
    /// `RiskClient::evaluate` entirely. This only ever runs as part of
    /// `remove(agent_id)`, after the agent has already reached a
    /// non-trading state, so there is no normal decision loop left to
    /// arbitrate the closes against.
    async fn flatten_all(&mut self) {
        let symbols: Vec<Symbol> = self.runtime.positions.keys().cloned().collect();
        for symbol in symbols {
            let Some(position) = self.runtime.positions.get(&symbol).cloned() else {
                continue;
            };
            let close_direction = match position.direction {
                Direction::Long => Direction::Short,
                Direction::Short => Direction::Long,
            };
            let intent = OrderIntent {
                strategy_id: self.id.clone(),
                decision_id: DecisionId::new_v4(),
                symbol: symbol.clone(),
                direction: close_direction,
                quantity: position.quantity,
                price: position.entry_price,
                stop_loss: None,
                take_profit: None,
                time_in_force: TimeInForce::Ioc,
            };

            let now = Utc::now();
            // As in `handle_close`, settlement is left to the eventual
            // `Fill` rather than applied here synchronously.
            let submission_outcome = match self.submit_with_retry(intent.clone()).await {
                Ok(order_id) => SubmissionOutcome::Submitted { order_id },
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "flatten close failed to submit");
                    SubmissionOutcome::Failed { error: e }
                }
            };

            let mut decision = AIDecision::fallback_hold(symbol.clone(), now, Source::Fallback);
            decision.action = Action::Close;
            decision.rationale = "administrative flatten on agent removal".to_string();
            self.log_decision(DecisionRecord {
                decision_id: intent.decision_id,
                strategy_id: self.id.clone(),
                input_summary: InputSummary {
                    symbol: symbol.clone(),
                    as_of: now,
                    indicators: Default::default(),
                },
                raw_ai_response: None,
                decision,
                risk_verdict: None,
                submission_outcome: Some(submission_outcome),
                fill_price: None,
                realized_pnl: None,
                invalidation_triggered: None,
                logged_at: now,
            })
            .await;
        }

        // Flatten runs once as part of agent removal, with no further tick
        // to drain the closes' fills at the next suspension point (§5) — so
        // this is the last chance to settle the book and attach outcomes
        // before the agent task is torn down.
        self.drain_broker_events().await;
    }

    async fn submit_with_retry(&self, intent: OrderIntent) -> Result<String, String> {
        let mut attempt = 0u32;
        let mut backoff = std::time::Duration::from_millis(200);
        loop {
            match self.broker.submit(intent.clone()).await {
                Ok(order_id) => return Ok(order_id),
                Err(e) if attempt < 3 => {
                    warn!(error = %e, attempt, "broker submission failed, retrying");
                    // Full jitter: spreads retries from concurrently-failing
                    // agents instead of all waking on the same tick.
                    let jitter = 0.5 + rand::random::<f64>() * 0.5;
                    tokio::time::sleep(backoff.mul_f64(jitter)).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    async fn log_decision(&self, record: DecisionRecord) {
        self.decision_log.log(record).await;
    }

    async fn select_symbols(&self) -> Result<Vec<Symbol>, AgentFault> {
        let candidates = match &self.config.symbol_selector {
            SymbolSelector::Explicit(symbols) => symbols.clone(),
            SymbolSelector::Commodities(commodities) => {
                let mut out = Vec::new();
                for commodity in commodities {
                    match self.market_data.resolve_dominant_contracts(commodity).await {
                        Ok(mut symbols) => out.append(&mut symbols),
                        Err(e) => warn!(commodity = %commodity, error = %e, "dominant contract lookup failed"),
                    }
                }
                out
            }
            SymbolSelector::Pool(_) => {
                // Pool expansion into commodities happens once at config
                // validation/creation time in this crate (§9); by the time an
                // agent ticks, `symbol_selector` has already been normalised
                // by the caller into `Commodities` or `Explicit`.
                return Err(AgentFault::InvariantViolated(
                    "pool selector reached the agent unexpanded".to_string(),
                ));
            }
        };

        let mut candidates = candidates;
        candidates.truncate(self.config.max_symbols);
        Ok(candidates)
    }

    /// The single settlement path for every fill, opening or closing alike
    /// (§4.2 step 9) — neither `handle_close` nor `flatten_all` touch
    /// `runtime.positions`/`available_cash`/`used_margin` directly, so a
    /// position can only ever be opened or closed once, exactly when its
    /// fill actually arrives.
    ///
    /// Whether a fill opens, pyramids, or closes is read off the position
    /// already held for that symbol rather than off the originating
    /// `decision_id`: `positions` is keyed one-per-symbol, so a fill whose
    /// direction opposes the held position is necessarily the full close
    /// this agent submitted (it only ever closes in full).
    async fn apply_fill(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Fill {
                symbol,
                price,
                quantity,
                direction,
                decision_id,
                ts,
                ..
            } => {
                let held_direction = self.runtime.positions.get(&symbol).map(|p| p.direction);
                match held_direction {
                    Some(held) if held != direction => {
                        let position = self
                            .runtime
                            .positions
                            .remove(&symbol)
                            .expect("held_direction came from this symbol's entry");
                        let pnl = position.unrealized_pnl(price);
                        self.runtime.realized_pnl += pnl;
                        self.runtime.available_cash += position.notional() + pnl;
                        self.runtime.used_margin -= position.notional();
                        self.risk_client.close(self.id.clone(), symbol.clone()).await;
                        self.risk_client.report_realized_pnl(pnl).await;
                        if let Some(decision_id) = decision_id {
                            self.decision_log
                                .attach_outcome(decision_id, Some(price), Some(pnl), None)
                                .await;
                        }
                    }
                    Some(_) => {
                        // Same-direction fill on an already-held symbol:
                        // pyramids the position (weighted-average entry)
                        // rather than opening a second one — `positions` is
                        // keyed by symbol, not by fill.
                        let notional = price * rust_decimal::Decimal::from(quantity);
                        self.runtime.used_margin += notional;
                        self.runtime.available_cash -= notional;
                        if let Some(position) = self.runtime.positions.get_mut(&symbol) {
                            let total_quantity = position.quantity + quantity;
                            let total_notional = position.notional() + notional;
                            position.entry_price =
                                total_notional / rust_decimal::Decimal::from(total_quantity);
                            position.quantity = total_quantity;
                        }
                        if let Some(decision_id) = decision_id {
                            self.decision_log
                                .attach_outcome(decision_id, Some(price), None, None)
                                .await;
                        }
                    }
                    None => {
                        let notional = price * rust_decimal::Decimal::from(quantity);
                        self.runtime.used_margin += notional;
                        self.runtime.available_cash -= notional;
                        self.runtime.positions.insert(
                            symbol.clone(),
                            Position::new(
                                symbol,
                                direction,
                                quantity,
                                price,
                                None,
                                None,
                                ts,
                                decision_id.unwrap_or_else(DecisionId::new_v4),
                            ),
                        );
                        if let Some(decision_id) = decision_id {
                            self.decision_log
                                .attach_outcome(decision_id, Some(price), None, None)
                                .await;
                        }
                    }
                }
            }
            BrokerEvent::PositionSnapshot {
                symbol,
                quantity,
                avg_price,
                ..
            } => {
                if let Some(position) = self.runtime.positions.get_mut(&symbol) {
                    position.quantity = quantity;
                    position.entry_price = avg_price;
                }
            }
            BrokerEvent::Ack { .. } | BrokerEvent::Reject { .. } => {}
        }
    }
}
