//! Core domain types for the multi-agent strategy orchestrator.
//!
//! Nothing in this module performs I/O. Components in `application` consume
//! these types and the port traits defined here; `infrastructure` provides the
//! concrete adapters.

pub mod commodity_pool;
pub mod errors;
pub mod ports;
pub mod types;
