//! Intent Classifier - turns a routing hint into a validated plan
//!
//! The intent model only suggests. This layer drops unknown agents, applies
//! the confidence threshold, checks dependency affinities and plan bounds,
//! and falls back to the default agent whenever the hint cannot be used.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::intent::{IntentModel, RoutingHint};
use super::plan::{PlanLimits, PlanShape, RoutingPlan, RoutingStep};
use crate::config::{AgentSpec, RelayConfig};
use crate::error::{RelayError, RelayResult};

/// Calls made to the intent model per classification, first try included
const CLASSIFY_ATTEMPTS: u32 = 2;

pub struct IntentClassifier {
    model: Arc<dyn IntentModel>,
    config: Arc<RelayConfig>,
    /// Configured agents that are currently registered
    capabilities: Vec<AgentSpec>,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn IntentModel>, config: Arc<RelayConfig>, registered: &[String]) -> Self {
        let capabilities = config
            .agents
            .iter()
            .filter(|spec| registered.contains(&spec.name))
            .cloned()
            .collect();
        Self { model, config, capabilities }
    }

    fn limits(&self) -> PlanLimits {
        PlanLimits {
            max_nodes: self.config.max_plan_nodes,
            max_depth: self.config.max_chain_depth,
        }
    }

    pub fn default_plan(&self, reason: impl Into<String>) -> RoutingPlan {
        RoutingPlan::single_hop(self.config.default_agent.clone(), reason)
    }

    pub async fn classify(&self, text: &str, context: &str) -> RelayResult<RoutingPlan> {
        let hint = self.request_hint(text, context).await?;
        Ok(self.plan_from_hint(hint))
    }

    async fn request_hint(&self, text: &str, context: &str) -> RelayResult<RoutingHint> {
        let limit = Duration::from_millis(self.config.classifier_timeout_ms);
        let mut last_error = String::new();

        for attempt in 1..=CLASSIFY_ATTEMPTS {
            match tokio::time::timeout(limit, self.model.classify_intent(text, context, &self.capabilities)).await {
                Ok(Ok(hint)) => return Ok(hint),
                Ok(Err(e)) => last_error = format!("{:#}", e),
                Err(_) => last_error = format!("timed out after {}ms", limit.as_millis()),
            }
            warn!("Intent classification attempt {} failed: {}", attempt, last_error);
        }

        Err(RelayError::Classification(last_error))
    }

    /// Validate a hint against registered agents, affinities and bounds
    pub fn plan_from_hint(&self, hint: RoutingHint) -> RoutingPlan {
        let mut agents: Vec<String> = Vec::new();
        for name in &hint.agents {
            if agents.contains(name) {
                continue;
            }
            if self.capabilities.iter().any(|c| &c.name == name) {
                agents.push(name.clone());
            } else {
                debug!("Dropping unknown agent '{}' from routing hint", name);
            }
        }

        if hint.confidence < self.config.confidence_threshold || agents.is_empty() {
            info!(
                "Routing to default agent (confidence {:.2}, {} usable agents)",
                hint.confidence,
                agents.len()
            );
            return self
                .default_plan(format!("Low-confidence routing: {}", hint.reason))
                .with_confidence(hint.confidence);
        }

        agents.truncate(self.config.max_plan_nodes);

        let plan = match (hint.shape, agents.len()) {
            (_, 1) | (PlanShape::SingleHop, _) => RoutingPlan::single_hop(agents[0].clone(), hint.reason.clone()),
            (PlanShape::Chained, _) => self.chain_plan(&agents, &hint.reason),
            _ => RoutingPlan::parallel(&agents, hint.reason.clone()),
        }
        .with_confidence(hint.confidence);

        match plan.validate(self.limits()) {
            Ok(()) => {
                info!("Routing plan {:?}: {:?}", plan.shape, plan.agent_names());
                plan
            }
            Err(e) => {
                warn!("Discarding routing plan: {}", e);
                self.default_plan(format!("Invalid routing plan: {}", e))
                    .with_confidence(hint.confidence)
            }
        }
    }

    /// Build dependency edges from affinities; no edges means parallel
    fn chain_plan(&self, agents: &[String], reason: &str) -> RoutingPlan {
        let mut ordered = self.order_by_affinity(agents);
        loop {
            let plan = self.link(&ordered, reason);
            match plan.depth() {
                Some(depth) if depth > self.config.max_chain_depth && ordered.len() > 1 => {
                    debug!("Chain depth {} over limit; dropping '{:?}'", depth, ordered.last());
                    ordered.pop();
                }
                _ => return plan,
            }
        }
    }

    fn link(&self, ordered: &[String], reason: &str) -> RoutingPlan {
        let steps: Vec<RoutingStep> = ordered
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let deps: Vec<String> = if self.declares_affinity(name) {
                    ordered[..i]
                        .iter()
                        .filter(|u| self.config.allows_edge(u, name))
                        .cloned()
                        .collect()
                } else {
                    // No declared affinity: follow the hint's order.
                    if i == 0 { Vec::new() } else { vec![ordered[i - 1].clone()] }
                };
                RoutingStep::after(name.clone(), deps)
            })
            .collect();

        let plan = RoutingPlan::from_steps(PlanShape::Chained, steps, reason);
        if plan.has_edges() {
            plan
        } else {
            debug!("Chained hint has no permitted edges; running in parallel");
            RoutingPlan::parallel(ordered, reason)
        }
    }

    fn declares_affinity(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.name == name && !c.consumes.is_empty())
    }

    /// Stable topological order: consumers come after what they consume
    fn order_by_affinity(&self, agents: &[String]) -> Vec<String> {
        let mut remaining: Vec<String> = agents.to_vec();
        let mut ordered: Vec<String> = Vec::with_capacity(agents.len());

        while !remaining.is_empty() {
            let ready = remaining.iter().position(|name| {
                !self.declares_affinity(name)
                    || remaining
                        .iter()
                        .all(|u| u == name || !self.config.allows_edge(u, name))
            });
            match ready {
                Some(idx) => ordered.push(remaining.remove(idx)),
                // Circular affinities: keep hint order for the rest.
                None => ordered.append(&mut remaining),
            }
        }
        ordered
    }
}
