//! Error taxonomy for the orchestrator (§7).
//!
//! Each kind maps to a distinct propagation policy: `ConfigError` surfaces
//! synchronously to the caller and never reaches an agent; `TransientError`
//! is retried with bounded backoff at the call site; `DecisionParseError`
//! triggers the engine's repair-retry then fallback; `AgentFault` is caught
//! by the Agent Manager and isolated to one agent.

use thiserror::Error;

/// Bad config, bad pool name, invalid numeric range. Never reaches an agent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    #[error("unknown commodity pool: {0}")]
    UnknownPool(String),

    #[error("duplicate strategy id: {0}")]
    DuplicateId(String),

    #[error("agent capacity exceeded: {current}/{limit}")]
    CapacityExceeded { current: usize, limit: usize },
}

/// LLM timeout, market-data timeout, broker temporary reject.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream error: {0}")]
    Upstream(String),
}

/// Unparseable or schema-violating LLM reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecisionParseError {
    #[error("no JSON object found in reply")]
    NoJsonObject,

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} out of range: {detail}")]
    OutOfRange { field: &'static str, detail: String },

    #[error("stop_loss is not on the loss side of entry_price for {action:?}")]
    IncoherentStopLoss { action: crate::domain::types::Action },

    #[error("unknown enum value for {field}: {value}")]
    UnknownEnumValue { field: &'static str, value: String },
}

/// Invariant violated, unknown state — isolates blast radius to one agent.
#[derive(Debug, Error)]
pub enum AgentFault {
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition {
        from: crate::domain::types::AgentState,
        to: crate::domain::types::AgentState,
    },

    #[error("panic during tick: {0}")]
    Panicked(String),
}
