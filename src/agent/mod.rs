//! Agent Module
//!
//! The uniform capability interface every worker agent sits behind, plus
//! the registry, language-model providers, and the prompt-backed agent.

mod types;
mod provider;
mod cache;
mod prompt;
pub mod registry;

pub use types::{AgentResponse, ResponseStatus, AgentContext, UpstreamOutput, upstream_unavailable};
pub use provider::{LLMProvider, OllamaProvider, OpenAICompatibleProvider, provider_from_settings};
pub use cache::LLMCache;
pub use prompt::{PromptAgent, build_agents};
pub use registry::{AgentRegistry, AgentSnapshot};

use anyhow::Result;
use async_trait::async_trait;

/// A specialized worker reachable through one call shape
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry key for this agent
    fn name(&self) -> &str;

    /// Short human-readable summary, used when prompting the intent model
    fn description(&self) -> &str;

    /// Answer `query`, optionally using history and upstream outputs
    async fn invoke(&self, query: &str, context: &AgentContext) -> Result<String>;
}

/// Single-line preview of agent output for log lines
pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.len() <= max_len {
        s
    } else {
        let target_len = max_len.saturating_sub(3);
        let mut end = target_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 100), "line one line two");
        let cut = truncate("héllo wörld, this is long", 8);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 8);
    }
}
