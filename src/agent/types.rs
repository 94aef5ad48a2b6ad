use serde::{Deserialize, Serialize};

/// Outcome of one agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// A recorded agent response. Immutable once stored on a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_name: String,
    pub content: String,
    pub status: ResponseStatus,
    pub error_detail: Option<String>,
    /// Attempts spent, first try included
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl AgentResponse {
    pub fn ok(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            content: content.into(),
            status: ResponseStatus::Ok,
            error_detail: None,
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    pub fn error(agent_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            content: String::new(),
            status: ResponseStatus::Error,
            error_detail: Some(detail.into()),
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Placeholder handed to dependents of a node that failed terminally
pub fn upstream_unavailable(agent_name: &str) -> String {
    format!("[upstream unavailable: {}]", agent_name)
}

/// Output of a dependency, bound into a dependent node's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamOutput {
    pub agent_name: String,
    pub content: String,
    pub available: bool,
}

impl UpstreamOutput {
    pub fn from_response(response: &AgentResponse) -> Self {
        if response.is_ok() {
            Self {
                agent_name: response.agent_name.clone(),
                content: response.content.clone(),
                available: true,
            }
        } else {
            Self {
                agent_name: response.agent_name.clone(),
                content: upstream_unavailable(&response.agent_name),
                available: false,
            }
        }
    }
}

/// Everything an agent sees besides the query text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    /// Recent conversation rendered for prompts
    pub history: String,
    pub upstream: Vec<UpstreamOutput>,
}

impl AgentContext {
    pub fn new(history: impl Into<String>) -> Self {
        Self {
            history: history.into(),
            upstream: Vec::new(),
        }
    }

    pub fn with_upstream(mut self, upstream: Vec<UpstreamOutput>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn has_upstream(&self) -> bool {
        !self.upstream.is_empty()
    }
}
