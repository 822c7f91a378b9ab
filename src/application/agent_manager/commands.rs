//! Messages accepted by the Agent Manager's mailbox (§4.1). Every external
//! operation is a structured command carrying a reply channel, rather than a
//! direct method call into shared mutable state — this keeps the manager a
//! single writer over its own agent table.

use crate::domain::errors::ConfigError;
use crate::domain::types::{AgentId, AgentState, StrategyConfig};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentManagerError {
    #[error("unknown agent id: {0}")]
    UnknownAgent(AgentId),

    #[error("agent {0} must be idle, paused, or halted before it can be removed")]
    InvalidRemoveState(AgentId),
}

pub enum AgentManagerCommand {
    CreateAgent {
        config: StrategyConfig,
        reply: oneshot::Sender<Result<AgentId, ConfigError>>,
    },
    Start {
        id: AgentId,
        reply: oneshot::Sender<Result<(), AgentManagerError>>,
    },
    Stop {
        id: AgentId,
        reply: oneshot::Sender<Result<(), AgentManagerError>>,
    },
    Pause {
        id: AgentId,
        reply: oneshot::Sender<Result<(), AgentManagerError>>,
    },
    Resume {
        id: AgentId,
        reply: oneshot::Sender<Result<(), AgentManagerError>>,
    },
    Remove {
        id: AgentId,
        reply: oneshot::Sender<Result<(), AgentManagerError>>,
    },
    /// Triggered by the Portfolio Risk Manager's kill-switch (§4.4) — every
    /// non-terminal agent transitions to `Halted`.
    HaltAll,
    /// Operator-only: the sole way to lift a kill-switch halt (§4.4, §7).
    ResumeAll,
    GetState {
        id: AgentId,
        reply: oneshot::Sender<Option<AgentState>>,
    },
}
