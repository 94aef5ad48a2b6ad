//! Agent Registry
//!
//! Process-wide map from agent name to capability. Writers build a new map
//! and swap it in whole, so readers always see a complete snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Agent, AgentContext, AgentResponse};
use crate::error::{RelayError, RelayResult};

pub type AgentSnapshot = Arc<HashMap<String, Arc<dyn Agent>>>;

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<AgentSnapshot>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under an explicit name, replacing any prior binding
    pub async fn register(&self, name: impl Into<String>, capability: Arc<dyn Agent>) {
        let name = name.into();
        let mut guard = self.agents.write().await;
        let mut next: HashMap<String, Arc<dyn Agent>> = guard.as_ref().clone();
        if next.insert(name.clone(), capability).is_some() {
            info!("Replaced agent binding '{}'", name);
        } else {
            debug!("Registered agent '{}'", name);
        }
        *guard = Arc::new(next);
    }

    /// Register under the capability's own name
    pub async fn register_instance(&self, capability: Arc<dyn Agent>) {
        let name = capability.name().to_string();
        self.register(name, capability).await;
    }

    /// Swap in a whole new set of agents in one step
    pub async fn replace_all(&self, capabilities: Vec<Arc<dyn Agent>>) {
        let next: HashMap<String, Arc<dyn Agent>> = capabilities
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        let count = next.len();
        *self.agents.write().await = Arc::new(next);
        info!("Agent registry reloaded with {} agents", count);
    }

    pub async fn resolve(&self, name: &str) -> RelayResult<Arc<dyn Agent>> {
        self.agents
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownAgent(name.to_string()))
    }

    /// Current snapshot; unaffected by later registrations
    pub async fn snapshot(&self) -> AgentSnapshot {
        self.agents.read().await.clone()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.agents.read().await.contains_key(name)
    }
}

/// Uniform call into any capability; failures become error responses
pub async fn invoke(capability: &dyn Agent, query: &str, context: &AgentContext) -> AgentResponse {
    let started = Instant::now();
    let response = match capability.invoke(query, context).await {
        Ok(content) => AgentResponse::ok(capability.name(), content),
        Err(e) => AgentResponse::error(
            capability.name(),
            RelayError::invocation(capability.name(), format!("{:#}", e)).to_string(),
        ),
    };
    response.with_elapsed_ms(started.elapsed().as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct Echo {
        name: String,
        reply: String,
    }

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, _query: &str, _context: &AgentContext) -> Result<String> {
            if self.reply == "fail" {
                anyhow::bail!("backend down");
            }
            Ok(self.reply.clone())
        }
    }

    fn echo(name: &str, reply: &str) -> Arc<dyn Agent> {
        Arc::new(Echo { name: name.into(), reply: reply.into() })
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = AgentRegistry::new();
        registry.register_instance(echo("research", "v1")).await;

        assert!(registry.resolve("research").await.is_ok());
        let err = registry.resolve("weather").await.err().unwrap();
        assert!(matches!(err, RelayError::UnknownAgent(name) if name == "weather"));
    }

    #[tokio::test]
    async fn test_reregistration_replaces_binding() {
        let registry = AgentRegistry::new();
        registry.register_instance(echo("research", "v1")).await;
        let old_snapshot = registry.snapshot().await;

        registry.register_instance(echo("research", "v2")).await;
        assert_eq!(registry.names().await, vec!["research".to_string()]);

        let ctx = AgentContext::default();
        let current = registry.resolve("research").await.unwrap();
        assert_eq!(invoke(current.as_ref(), "q", &ctx).await.content, "v2");

        // A turn holding the old snapshot keeps its reference.
        let held = old_snapshot.get("research").unwrap();
        assert_eq!(invoke(held.as_ref(), "q", &ctx).await.content, "v1");
    }

    #[tokio::test]
    async fn test_replace_all_is_atomic() {
        let registry = AgentRegistry::new();
        registry.register_instance(echo("a", "1")).await;
        registry.replace_all(vec![echo("b", "2"), echo("c", "3")]).await;

        assert!(!registry.contains("a").await);
        assert_eq!(registry.names().await, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_invoke_wraps_errors() {
        let failing = echo("finance", "fail");
        let response = invoke(failing.as_ref(), "q", &AgentContext::default()).await;
        assert!(!response.is_ok());
        assert!(response.error_detail.unwrap().contains("backend down"));
    }
}
