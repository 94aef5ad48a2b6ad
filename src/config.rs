//! Configuration - immutable relay settings loaded from YAML
//!
//! A `RelayConfig` is read once, validated, and then shared as an
//! `Arc<RelayConfig>` snapshot. Reloading produces a fresh snapshot.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};

pub const DEFAULT_CONFIG_PATH: &str = "relay.yaml";

/// Which intent model backs the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Keyword,
    Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    Openai,
}

/// Language model connection settings shared by all prompt agents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            api_key: None,
            temperature: 0.0,
            max_tokens: 300,
        }
    }
}

/// One registered worker agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Words that signal this agent is relevant to a query
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Agents whose output this agent expects as input
    #[serde(default)]
    pub consumes: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            keywords: Vec::new(),
            consumes: Vec::new(),
            timeout_ms: None,
            model: None,
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn consuming(mut self, upstream: &[&str]) -> Self {
        self.consumes = upstream.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub default_agent: String,
    pub classifier: ClassifierKind,
    pub confidence_threshold: f32,
    pub classifier_timeout_ms: u64,
    pub agent_timeout_ms: u64,
    /// Whole-turn budget; the turn is cancelled when it runs out
    pub turn_timeout_ms: u64,
    /// Total attempts per plan node, first try included
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_plan_nodes: usize,
    pub max_chain_depth: usize,
    pub similarity_threshold: f32,
    pub context_turns: usize,
    pub max_turns_per_session: usize,
    pub bind: String,
    pub llm: LlmSettings,
    pub agents: Vec<AgentSpec>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_agent: "orchestrator".to_string(),
            classifier: ClassifierKind::Keyword,
            confidence_threshold: 0.5,
            classifier_timeout_ms: 10_000,
            agent_timeout_ms: 30_000,
            turn_timeout_ms: 120_000,
            max_attempts: 2,
            retry_backoff_ms: 250,
            max_backoff_ms: 4_000,
            max_plan_nodes: 6,
            max_chain_depth: 4,
            similarity_threshold: 0.8,
            context_turns: 5,
            max_turns_per_session: 50,
            bind: "0.0.0.0:8002".to_string(),
            llm: LlmSettings::default(),
            agents: default_agents(),
        }
    }
}

fn default_agents() -> Vec<AgentSpec> {
    let mut orchestrator = AgentSpec::new("orchestrator");
    orchestrator.description = "General assistant that answers directly".to_string();
    orchestrator.system_prompt = "You are a helpful assistant that coordinates a team of \
        specialists. Answer general questions directly, clearly and concisely."
        .to_string();

    let mut research = AgentSpec::new("research").with_keywords(&[
        "research", "latest", "developments", "news", "search", "find", "look up",
        "information", "tell me about", "market", "trends", "current",
    ]);
    research.description = "Gathers and summarizes information".to_string();
    research.system_prompt = "You are a research specialist. Gather the relevant facts, \
        summarize the findings, and separate established facts from interpretation."
        .to_string();

    let mut finance = AgentSpec::new("finance")
        .with_keywords(&[
            "invest", "investment", "investing", "stock", "stocks", "portfolio", "finance",
            "financial", "budget", "savings", "retirement",
        ])
        .consuming(&["research"]);
    finance.description = "Gives financial analysis and investment advice".to_string();
    finance.system_prompt = "You are a financial advisor. Give practical, balanced \
        financial analysis and mention the main risks. When research findings are \
        provided, base your analysis on them."
        .to_string();

    vec![orchestrator, research, finance]
}

impl RelayConfig {
    /// Load from a YAML file, falling back to defaults when it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let config = apply_env_overrides(Self::default());
            config.validate()?;
            Ok(config)
        }
    }

    pub fn load(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> RelayResult<Self> {
        let expanded = expand_env_vars(raw)?;
        let config: RelayConfig = serde_yaml::from_str(&expanded)
            .map_err(|e| RelayError::Config(e.to_string()))?;
        let config = apply_env_overrides(config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if !self.agents.iter().any(|a| a.name == self.default_agent) {
            return Err(RelayError::Config(format!(
                "default agent '{}' is not configured",
                self.default_agent
            )));
        }
        for agent in &self.agents {
            if let Some(missing) = agent.consumes.iter().find(|u| self.agent(u).is_none()) {
                return Err(RelayError::Config(format!(
                    "agent '{}' consumes unknown agent '{}'",
                    agent.name, missing
                )));
            }
        }
        for (label, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("similarity_threshold", self.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RelayError::Config(format!("{} must be within [0, 1]", label)));
            }
        }
        if self.max_attempts == 0 {
            return Err(RelayError::Config("max_attempts must be at least 1".into()));
        }
        if self.max_plan_nodes == 0 || self.max_chain_depth == 0 {
            return Err(RelayError::Config("plan bounds must be positive".into()));
        }
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Per-call timeout for an agent, honoring its override
    pub fn timeout_for(&self, agent: &str) -> Duration {
        let ms = self
            .agent(agent)
            .and_then(|a| a.timeout_ms)
            .unwrap_or(self.agent_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.retry_backoff_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Whether `consumer` may take `upstream` output as its input
    pub fn allows_edge(&self, upstream: &str, consumer: &str) -> bool {
        match self.agent(consumer) {
            Some(spec) if !spec.consumes.is_empty() => spec.consumes.iter().any(|u| u == upstream),
            Some(_) => true,
            None => false,
        }
    }
}

/// Expand ${VAR} patterns; unset variables are left untouched
fn expand_env_vars(raw: &str) -> RelayResult<String> {
    let env_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| RelayError::Config(e.to_string()))?;
    Ok(env_regex
        .replace_all(raw, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string())
}

fn apply_env_overrides(mut config: RelayConfig) -> RelayConfig {
    let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    if let Some(provider) = non_empty("RELAY_LLM_PROVIDER") {
        match provider.to_lowercase().as_str() {
            "ollama" => config.llm.provider = ProviderKind::Ollama,
            "openai" => config.llm.provider = ProviderKind::Openai,
            other => tracing::warn!("Ignoring unknown RELAY_LLM_PROVIDER '{}'", other),
        }
    }
    if let Some(url) = non_empty("RELAY_LLM_BASE_URL") {
        config.llm.base_url = url;
    }
    if let Some(model) = non_empty("RELAY_LLM_MODEL") {
        config.llm.model = model;
    }
    if let Some(key) = non_empty("RELAY_LLM_API_KEY") {
        config.llm.api_key = Some(key);
    }
    if let Some(bind) = non_empty("RELAY_BIND") {
        config.bind = bind;
    }
    config
}
