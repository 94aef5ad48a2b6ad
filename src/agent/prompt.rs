//! Prompt Agent - a worker backed by a language model
//!
//! Each configured agent is a system prompt plus a model name sitting on top
//! of a shared `LLMProvider`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::{Agent, AgentContext, LLMProvider};
use crate::config::{AgentSpec, RelayConfig};

pub struct PromptAgent {
    spec: AgentSpec,
    model: String,
    provider: Arc<dyn LLMProvider>,
}

impl PromptAgent {
    pub fn new(spec: AgentSpec, default_model: &str, provider: Arc<dyn LLMProvider>) -> Self {
        let model = spec.model.clone().unwrap_or_else(|| default_model.to_string());
        Self { spec, model, provider }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Assemble the user prompt from query, history and upstream findings
    pub fn compose_prompt(query: &str, context: &AgentContext) -> String {
        let mut prompt = String::new();
        if !context.history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&context.history);
            prompt.push_str("\n\n");
        }
        prompt.push_str("User request: ");
        prompt.push_str(query);

        if context.has_upstream() {
            prompt.push_str("\n\nBased on this research that has been done:\n");
            for upstream in &context.upstream {
                prompt.push_str(&format!("\n[{}]\n{}\n", upstream.agent_name, upstream.content));
            }
            prompt.push_str("\nBuild on these findings. If a source is marked unavailable, say what is missing.");
        }
        prompt
    }
}

#[async_trait]
impl Agent for PromptAgent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    async fn invoke(&self, query: &str, context: &AgentContext) -> Result<String> {
        let prompt = Self::compose_prompt(query, context);
        let system = if self.spec.system_prompt.is_empty() {
            None
        } else {
            Some(self.spec.system_prompt.clone())
        };

        let answer = self
            .provider
            .generate(&self.model, prompt, system)
            .await
            .with_context(|| format!("agent '{}' generation failed", self.spec.name))?;

        Ok(answer.trim().to_string())
    }
}

/// One prompt agent per configured agent entry
pub fn build_agents(config: &RelayConfig, provider: Arc<dyn LLMProvider>) -> Vec<Arc<dyn Agent>> {
    config
        .agents
        .iter()
        .map(|spec| {
            Arc::new(PromptAgent::new(spec.clone(), &config.llm.model, provider.clone())) as Arc<dyn Agent>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::UpstreamOutput;
    use tokio::sync::Mutex;

    struct RecordingProvider {
        seen: Mutex<Vec<(String, String, Option<String>)>>,
    }

    #[async_trait]
    impl LLMProvider for RecordingProvider {
        async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
            self.seen.lock().await.push((model.to_string(), prompt, system));
            Ok("  advice  ".to_string())
        }
    }

    #[tokio::test]
    async fn test_prompt_agent_uses_spec_model_and_system() {
        let provider = Arc::new(RecordingProvider { seen: Mutex::new(Vec::new()) });
        let mut spec = AgentSpec::new("finance");
        spec.system_prompt = "You are a financial advisor.".into();
        spec.model = Some("qwen3:8b".into());

        let agent = PromptAgent::new(spec, "llama3.2:3b", provider.clone());
        let out = agent.invoke("How should I invest?", &AgentContext::default()).await.unwrap();
        assert_eq!(out, "advice");

        let seen = provider.seen.lock().await;
        assert_eq!(seen[0].0, "qwen3:8b");
        assert_eq!(seen[0].2.as_deref(), Some("You are a financial advisor."));
    }

    #[test]
    fn test_compose_prompt_with_upstream() {
        let context = AgentContext::new("User: hi\nAssistant: hello").with_upstream(vec![UpstreamOutput {
            agent_name: "research".into(),
            content: "AI capex doubled".into(),
            available: true,
        }]);
        let prompt = PromptAgent::compose_prompt("advise on investing", &context);
        assert!(prompt.starts_with("Conversation so far:"));
        assert!(prompt.contains("User request: advise on investing"));
        assert!(prompt.contains("Based on this research that has been done:"));
        assert!(prompt.contains("[research]\nAI capex doubled"));
    }

    #[test]
    fn test_build_agents_from_config() {
        let config = RelayConfig::default();
        let provider: Arc<dyn LLMProvider> = Arc::new(RecordingProvider { seen: Mutex::new(Vec::new()) });
        let agents = build_agents(&config, provider);
        let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["orchestrator", "research", "finance"]);
    }
}
