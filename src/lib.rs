//! Multi-Agent Query Relay
//!
//! Routes a user query to one or more specialized agents and returns a
//! single answer:
//! - Intent classification into single-hop, fan-out, or chained plans
//! - Concurrent DAG execution with timeouts, retries and cancellation
//! - Response synthesis with graceful degradation
//! - Per-session conversation context

pub mod error;
pub mod config;
pub mod memory;
pub mod agent;
pub mod orchestrator;
pub mod server;

// Re-exports for convenience
pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use orchestrator::{Supervisor, SynthesizedResponse};
pub use agent::{Agent, AgentRegistry};
