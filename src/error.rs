//! Error taxonomy for the orchestration core.
//!
//! Everything below the supervisor is recovered or degraded locally; only
//! store failures and cancellation reach the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The intent step was unreachable or produced an unparseable hint.
    #[error("classification failed: {0}")]
    Classification(String),

    /// A worker call failed or timed out.
    #[error("agent '{agent}' failed: {detail}")]
    AgentInvocation { agent: String, detail: String },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    /// The context store could not load or append a session.
    #[error("session '{session_id}' unavailable: {detail}")]
    SessionUnavailable { session_id: String, detail: String },

    #[error("turn cancelled")]
    Cancelled,

    #[error("invalid routing plan: {0}")]
    InvalidPlan(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn invocation(agent: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::AgentInvocation {
            agent: agent.into(),
            detail: detail.into(),
        }
    }

    pub fn session(session_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SessionUnavailable {
            session_id: session_id.into(),
            detail: detail.into(),
        }
    }

    /// Whether the caller should see this as a service-unavailable signal
    /// rather than a best-effort answer.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::SessionUnavailable { .. })
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
