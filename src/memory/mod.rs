//! Memory Module
//!
//! Per-session conversation state: the store contract, the session window,
//! and the gate that keeps turns of one session in order.

pub mod session;
pub mod store;

pub use session::Session;
pub use store::{InMemoryContextStore, SessionGate};

use async_trait::async_trait;

use crate::error::RelayResult;
use crate::orchestrator::Turn;

/// Storage for session conversation state
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Get or create the session; a missing session is not an error
    async fn load(&self, session_id: &str) -> RelayResult<Session>;

    /// Append a finished turn to the session
    async fn append(&self, session_id: &str, turn: Turn) -> RelayResult<()>;
}
