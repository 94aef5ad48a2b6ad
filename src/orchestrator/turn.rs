//! Turn - one query-to-response cycle and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::plan::RoutingPlan;
use super::synthesizer::DEGRADED_MESSAGE;
use crate::agent::AgentResponse;

/// An incoming user query. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Query {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Start,
    Classifying,
    Routing,
    AwaitingAgent,
    Synthesizing,
    Done,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed)
    }
}

/// The single answer handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedResponse {
    pub text: String,
    pub contributing_agents: Vec<String>,
    /// Set when some or all agent calls failed
    pub degraded: bool,
}

impl SynthesizedResponse {
    /// The fixed apology returned when no agent output can be used
    pub fn degraded() -> Self {
        Self {
            text: DEGRADED_MESSAGE.to_string(),
            contributing_agents: Vec::new(),
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub query: Query,
    pub plan: Option<RoutingPlan>,
    pub responses: HashMap<String, AgentResponse>,
    /// Default-agent answer used when every planned node failed
    pub fallback: Option<AgentResponse>,
    pub final_response: Option<SynthesizedResponse>,
    pub state: TurnState,
    pub transitions: Vec<TurnState>,
}

impl Turn {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            plan: None,
            responses: HashMap::new(),
            fallback: None,
            final_response: None,
            state: TurnState::Start,
            transitions: vec![TurnState::Start],
        }
    }

    pub fn advance(&mut self, next: TurnState) {
        if self.state.is_terminal() || self.state == next {
            return;
        }
        debug!(query_id = %self.query.id, "Turn {:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    pub fn fail(&mut self) {
        self.advance(TurnState::Failed);
    }

    /// First response for an agent wins; later ones are ignored
    pub fn record(&mut self, response: AgentResponse) {
        self.responses
            .entry(response.agent_name.clone())
            .or_insert(response);
    }

    /// Recorded responses in the plan's declared order, fallback last
    pub fn ordered_responses(&self) -> Vec<&AgentResponse> {
        let mut ordered: Vec<&AgentResponse> = match &self.plan {
            Some(plan) => plan
                .steps
                .iter()
                .filter_map(|s| self.responses.get(&s.agent_name))
                .collect(),
            None => Vec::new(),
        };
        if let Some(fallback) = &self.fallback {
            ordered.push(fallback);
        }
        ordered
    }

    pub fn successes(&self) -> usize {
        self.ordered_responses().iter().filter(|r| r.is_ok()).count()
    }

    pub fn visited(&self, state: TurnState) -> bool {
        self.transitions.contains(&state)
    }
}
