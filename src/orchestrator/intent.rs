//! Intent Models - produce routing hints for a query
//!
//! A hint is a best-effort suggestion: which agents look relevant and what
//! shape the plan should take. The classifier validates it afterwards.

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::plan::PlanShape;
use crate::agent::{LLMCache, LLMProvider};
use crate::config::AgentSpec;

/// Unvalidated routing suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingHint {
    pub shape: PlanShape,
    pub agents: Vec<String>,
    pub confidence: f32,
    pub reason: String,
}

impl RoutingHint {
    pub fn no_match(reason: impl Into<String>) -> Self {
        Self {
            shape: PlanShape::SingleHop,
            agents: Vec::new(),
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait IntentModel: Send + Sync {
    async fn classify_intent(
        &self,
        text: &str,
        context: &str,
        capabilities: &[AgentSpec],
    ) -> Result<RoutingHint>;
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Deterministic scorer driven by each agent's configured keywords
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentModel;

impl KeywordIntentModel {
    pub fn new() -> Self {
        Self
    }

    fn is_greeting(&self, query: &str) -> bool {
        let greetings = ["hi", "hello", "hey", "howdy", "greetings", "good morning", "good afternoon", "good evening"];
        let trimmed = query.trim_matches(|c: char| !c.is_alphanumeric() && c != ' ');
        greetings.iter().any(|g| trimmed == *g)
    }

    fn is_compound(&self, query: &str) -> bool {
        let connectors = [" and ", " then ", " also ", " as well as ", ", plus ", " after that "];
        connectors.iter().any(|c| query.contains(c))
    }

    fn score(&self, query: &str, words: &HashSet<String>, spec: &AgentSpec) -> usize {
        spec.keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| {
                if k.chars().all(char::is_alphanumeric) {
                    words.contains(k)
                } else {
                    query.contains(k.as_str())
                }
            })
            .count()
    }
}

#[async_trait]
impl IntentModel for KeywordIntentModel {
    async fn classify_intent(
        &self,
        text: &str,
        _context: &str,
        capabilities: &[AgentSpec],
    ) -> Result<RoutingHint> {
        let q = text.to_lowercase();
        if self.is_greeting(&q) {
            return Ok(RoutingHint::no_match("Simple greeting"));
        }

        let words = tokens(&q);
        let mut scored: Vec<(usize, &AgentSpec)> = capabilities
            .iter()
            .map(|spec| (self.score(&q, &words, spec), spec))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable sort keeps configuration order on ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let Some(&(best_score, best)) = scored.first() else {
            return Ok(RoutingHint::no_match("No capability keywords matched"));
        };

        if scored.len() == 1 || !self.is_compound(&q) {
            return Ok(RoutingHint {
                shape: PlanShape::SingleHop,
                agents: vec![best.name.clone()],
                confidence: (0.6 + 0.15 * best_score as f32).min(0.95),
                reason: format!("Query matches {} keywords", best.name),
            });
        }

        let names: Vec<String> = scored.iter().map(|(_, s)| s.name.clone()).collect();
        let related = scored.iter().any(|(_, s)| s.consumes.iter().any(|u| names.contains(u)));
        let (shape, reason) = if related {
            (PlanShape::Chained, "Compound query where one agent builds on another")
        } else {
            (PlanShape::ParallelFanOut, "Compound query with independent parts")
        };

        Ok(RoutingHint {
            shape,
            agents: names,
            confidence: 0.8,
            reason: reason.to_string(),
        })
    }
}

/// Asks a language model for a JSON routing hint
pub struct LlmIntentModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    cache: LLMCache,
}

impl LlmIntentModel {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            cache: LLMCache::default(),
        }
    }

    fn system_prompt() -> String {
        "You route user requests to specialist agents. Reply with JSON only, shaped as \
         {\"shape\": \"single\" | \"parallel\" | \"chained\", \"agents\": [names in execution order], \
         \"confidence\": 0.0-1.0, \"reason\": \"short explanation\"}. \
         Use \"chained\" when one agent needs another agent's output, \"parallel\" for independent \
         parts, and \"single\" otherwise. Return an empty agent list for small talk."
            .to_string()
    }

    fn build_prompt(text: &str, context: &str, capabilities: &[AgentSpec]) -> String {
        let mut prompt = String::from("Available agents:\n");
        for spec in capabilities {
            prompt.push_str(&format!("- {}: {}", spec.name, spec.description));
            if !spec.consumes.is_empty() {
                prompt.push_str(&format!(" (builds on: {})", spec.consumes.join(", ")));
            }
            prompt.push('\n');
        }
        if !context.is_empty() {
            prompt.push_str(&format!("\nRecent conversation:\n{}\n", context));
        }
        prompt.push_str(&format!("\nRequest: \"{}\"\n", text));
        prompt
    }

    fn parse_shape(raw: &str) -> Option<PlanShape> {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "single" | "single_hop" | "singlehop" | "direct" => Some(PlanShape::SingleHop),
            "parallel" | "parallel_fan_out" | "fan_out" | "fanout" => Some(PlanShape::ParallelFanOut),
            "chained" | "chain" | "sequential" | "pipeline" => Some(PlanShape::Chained),
            _ => None,
        }
    }

    /// Parse fenced or bare JSON, then fall back to `KEY: value` lines
    pub fn parse_hint(response: &str) -> Result<RoutingHint> {
        if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&response[start..=end]) {
                    let agents: Vec<String> = match &v["agents"] {
                        serde_json::Value::Array(items) => items
                            .iter()
                            .filter_map(|i| i.as_str())
                            .map(|s| s.trim().to_lowercase())
                            .collect(),
                        _ => v["agent"]
                            .as_str()
                            .map(|s| vec![s.trim().to_lowercase()])
                            .unwrap_or_default(),
                    };
                    let shape = v["shape"]
                        .as_str()
                        .and_then(Self::parse_shape)
                        .unwrap_or(if agents.len() > 1 { PlanShape::ParallelFanOut } else { PlanShape::SingleHop });
                    let confidence = v["confidence"].as_f64().unwrap_or(0.7).clamp(0.0, 1.0) as f32;
                    let reason = v["reason"].as_str().unwrap_or("LLM routing decision").to_string();

                    return Ok(RoutingHint { shape, agents, confidence, reason });
                }
            }
        }

        let agents_re = Regex::new(r"(?i)AGENTS?:\s*([\w, -]+)")?;
        let shape_re = Regex::new(r"(?i)SHAPE:\s*([\w-]+)")?;
        let confidence_re = Regex::new(r"(?i)CONFIDENCE:\s*([0-9]*\.?[0-9]+)")?;

        let agents: Vec<String> = agents_re
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let shape = shape_re
            .captures(response)
            .and_then(|c| c.get(1))
            .and_then(|m| Self::parse_shape(m.as_str()));

        if agents.is_empty() && shape.is_none() {
            bail!("unparseable routing hint: {}", crate::agent::truncate(response, 120));
        }

        let confidence = confidence_re
            .captures(response)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f32>().ok())
            .unwrap_or(0.6)
            .clamp(0.0, 1.0);

        Ok(RoutingHint {
            shape: shape.unwrap_or(PlanShape::SingleHop),
            agents,
            confidence,
            reason: "LLM routing decision".to_string(),
        })
    }
}

#[async_trait]
impl IntentModel for LlmIntentModel {
    async fn classify_intent(
        &self,
        text: &str,
        context: &str,
        capabilities: &[AgentSpec],
    ) -> Result<RoutingHint> {
        let prompt = Self::build_prompt(text, context, capabilities);
        let system = Self::system_prompt();

        if let Some(cached) = self.cache.get(&self.model, &prompt, Some(&system)).await {
            return Self::parse_hint(&cached);
        }

        let raw = self.provider.generate(&self.model, prompt.clone(), Some(system.clone())).await?;
        let hint = Self::parse_hint(&raw)?;
        debug!("LLM routing hint: {:?}", hint);
        // Only parseable replies are cached so a retry can still ask again.
        self.cache.set(&self.model, &prompt, Some(&system), raw).await;
        Ok(hint)
    }
}
