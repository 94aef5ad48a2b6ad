//! Response Synthesizer - merges agent outputs into one answer
//!
//! Zero successes give a fixed apology, one success passes through as-is,
//! and several are laid out as a narrative (chained) or as sections
//! (parallel). Near-duplicate contributions are elided.

use std::collections::HashSet;
use tracing::debug;

use super::plan::PlanShape;
use super::turn::SynthesizedResponse;
use crate::agent::AgentResponse;

pub const DEGRADED_MESSAGE: &str =
    "I apologize, but I wasn't able to process your request properly. Please try again shortly.";

pub struct ResponseSynthesizer {
    similarity_threshold: f32,
}

impl ResponseSynthesizer {
    pub fn new(similarity_threshold: f32) -> Self {
        Self { similarity_threshold }
    }

    /// Combine responses already in presentation order
    pub fn synthesize(&self, responses: &[&AgentResponse], query: &str, shape: PlanShape) -> SynthesizedResponse {
        let failed: Vec<&str> = responses
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| r.agent_name.as_str())
            .collect();

        let mut kept: Vec<&AgentResponse> = Vec::new();
        for response in responses.iter().filter(|r| r.is_ok()) {
            if let Some(original) = kept
                .iter()
                .find(|k| similarity(&k.content, &response.content) >= self.similarity_threshold)
            {
                debug!(
                    "Eliding {} output as a near-duplicate of {}",
                    response.agent_name, original.agent_name
                );
                continue;
            }
            kept.push(response);
        }

        if kept.is_empty() {
            return SynthesizedResponse::degraded();
        }

        let mut text = match (kept.len(), shape) {
            (1, _) => kept[0].content.clone(),
            (_, PlanShape::Chained) => {
                let mut body = format!("**Comprehensive answer for: {}**", query.trim());
                for response in &kept {
                    body.push_str(&format!("\n\n**{}:**\n{}", label(&response.agent_name), response.content.trim()));
                }
                body
            }
            _ => kept
                .iter()
                .map(|r| format!("### {}\n\n{}", label(&r.agent_name), r.content.trim()))
                .collect::<Vec<_>>()
                .join("\n\n---\n\n"),
        };

        if !failed.is_empty() {
            text.push_str(&degradation_note(&failed));
        }

        SynthesizedResponse {
            text,
            contributing_agents: kept.iter().map(|r| r.agent_name.clone()).collect(),
            degraded: !failed.is_empty(),
        }
    }
}

fn label(agent_name: &str) -> String {
    let spaced = agent_name.replace(['_', '-'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn degradation_note(failed: &[&str]) -> String {
    let verb = if failed.len() == 1 { "was" } else { "were" };
    format!(
        "\n\n_Note: {} {} unavailable, so this answer may be incomplete._",
        failed.join(", "),
        verb
    )
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of lowercase word sets
pub fn similarity(a: &str, b: &str) -> f32 {
    let (a, b) = (word_set(a), word_set(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count();
    let total = a.union(&b).count();
    shared as f32 / total as f32
}
