//! Graph Executor - walks a routing plan wave by wave
//!
//! Every ready node is dispatched at once and the wave is awaited as a whole
//! before readiness is re-evaluated, so a dependent never sees a sibling
//! half-done. Failed nodes are retried with backoff and then recorded as
//! errors; their dependents get a sentinel in place of the missing output.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::plan::{InputBinding, RoutingStep};
use super::turn::{Turn, TurnState};
use crate::agent::{self, truncate, AgentContext, AgentResponse, AgentSnapshot, UpstreamOutput};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};

pub struct GraphExecutor {
    agents: AgentSnapshot,
    config: Arc<RelayConfig>,
}

impl GraphExecutor {
    pub fn new(agents: AgentSnapshot, config: Arc<RelayConfig>) -> Self {
        Self { agents, config }
    }

    /// Drain the turn's plan, recording one response per node
    #[tracing::instrument(skip_all, fields(query_id = %turn.query.id))]
    pub async fn execute(&self, turn: &mut Turn, history: &str, cancel: &CancellationToken) -> RelayResult<()> {
        let plan = turn
            .plan
            .clone()
            .ok_or_else(|| RelayError::InvalidPlan("turn has no routing plan".into()))?;
        let query = turn.query.text.clone();
        let mut wave = 0usize;

        loop {
            turn.advance(TurnState::Routing);
            let ready: Vec<&RoutingStep> = plan.ready_steps(&turn.responses);
            if ready.is_empty() {
                break;
            }
            wave += 1;
            debug!("Wave {}: dispatching {:?}", wave, ready.iter().map(|s| &s.agent_name).collect::<Vec<_>>());

            let dispatches: Vec<_> = ready
                .iter()
                .map(|step| {
                    let context = self.bind_input(step, &turn.responses, history);
                    self.run_node(step.agent_name.clone(), query.clone(), context)
                })
                .collect();

            turn.advance(TurnState::AwaitingAgent);
            let results = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Turn cancelled during wave {}", wave);
                    return Err(RelayError::Cancelled);
                }
                results = join_all(dispatches) => results,
            };

            for response in results {
                turn.record(response);
            }
        }

        let pending = plan.steps.len() - turn.responses.len();
        if pending > 0 {
            // Only reachable with an unvalidated plan.
            warn!("{} plan steps never became ready", pending);
        }
        info!("Plan drained in {} waves: {}/{} succeeded", wave, turn.successes(), plan.steps.len());
        Ok(())
    }

    fn bind_input(
        &self,
        step: &RoutingStep,
        recorded: &std::collections::HashMap<String, AgentResponse>,
        history: &str,
    ) -> AgentContext {
        let context = AgentContext::new(history);
        match step.input_binding {
            InputBinding::RawQuery => context,
            InputBinding::WithUpstream => {
                let upstream = step
                    .depends_on
                    .iter()
                    .filter_map(|dep| recorded.get(dep))
                    .map(UpstreamOutput::from_response)
                    .collect();
                context.with_upstream(upstream)
            }
        }
    }

    /// Invoke one agent with per-attempt timeout and bounded retries
    pub async fn run_node(&self, agent_name: String, query: String, context: AgentContext) -> AgentResponse {
        let started = Instant::now();
        let Some(capability) = self.agents.get(&agent_name).cloned() else {
            warn!("Plan references unregistered agent '{}'", agent_name);
            return AgentResponse::error(&agent_name, RelayError::UnknownAgent(agent_name.clone()).to_string());
        };

        let limit = self.config.timeout_for(&agent_name);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(limit, agent::registry::invoke(capability.as_ref(), &query, &context)).await {
                Ok(response) if response.is_ok() => {
                    debug!("{} answered: {}", agent_name, truncate(&response.content, 80));
                    return response
                        .with_attempts(attempt)
                        .with_elapsed_ms(started.elapsed().as_millis() as u64);
                }
                Ok(response) => {
                    last_error = response.error_detail.unwrap_or_default();
                }
                Err(_) => {
                    last_error = RelayError::invocation(
                        &agent_name,
                        format!("timed out after {}ms", limit.as_millis()),
                    )
                    .to_string();
                }
            }

            warn!("Attempt {}/{} for '{}' failed: {}", attempt, max_attempts, agent_name, last_error);
            if attempt < max_attempts {
                tokio::time::sleep(self.config.backoff_after(attempt)).await;
            }
        }

        AgentResponse::error(&agent_name, last_error)
            .with_attempts(max_attempts)
            .with_elapsed_ms(started.elapsed().as_millis() as u64)
    }
}
