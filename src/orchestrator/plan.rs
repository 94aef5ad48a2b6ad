//! Routing Plan - the DAG of agent calls for one turn
//!
//! A plan is a list of steps in presentation order. Edges point from a step
//! to the steps whose output it needs.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::agent::AgentResponse;
use crate::error::{RelayError, RelayResult};

/// The three shapes a routing decision can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanShape {
    SingleHop,
    ParallelFanOut,
    Chained,
}

/// What a step receives as input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputBinding {
    RawQuery,
    /// Raw query plus the outputs of every dependency
    WithUpstream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingStep {
    pub agent_name: String,
    pub depends_on: Vec<String>,
    pub input_binding: InputBinding,
}

impl RoutingStep {
    pub fn entry(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            depends_on: Vec::new(),
            input_binding: InputBinding::RawQuery,
        }
    }

    pub fn after(agent_name: impl Into<String>, depends_on: Vec<String>) -> Self {
        let mut deps = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        let input_binding = if deps.is_empty() {
            InputBinding::RawQuery
        } else {
            InputBinding::WithUpstream
        };
        Self {
            agent_name: agent_name.into(),
            depends_on: deps,
            input_binding,
        }
    }

    pub fn is_entry(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// Size bounds applied to every plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_nodes: usize,
    /// Longest dependency path, counted in nodes
    pub max_depth: usize,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self { max_nodes: 6, max_depth: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub shape: PlanShape,
    pub steps: Vec<RoutingStep>,
    pub confidence: f32,
    pub reason: String,
}

impl RoutingPlan {
    pub fn single_hop(agent_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            shape: PlanShape::SingleHop,
            steps: vec![RoutingStep::entry(agent_name)],
            confidence: 1.0,
            reason: reason.into(),
        }
    }

    pub fn parallel(agents: &[String], reason: impl Into<String>) -> Self {
        Self {
            shape: PlanShape::ParallelFanOut,
            steps: agents.iter().map(RoutingStep::entry).collect(),
            confidence: 1.0,
            reason: reason.into(),
        }
    }

    /// Linear chain: each agent consumes the one before it
    pub fn chain(agents: &[String], reason: impl Into<String>) -> Self {
        let steps = agents
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if i == 0 {
                    RoutingStep::entry(name)
                } else {
                    RoutingStep::after(name, vec![agents[i - 1].clone()])
                }
            })
            .collect();
        Self {
            shape: PlanShape::Chained,
            steps,
            confidence: 1.0,
            reason: reason.into(),
        }
    }

    pub fn from_steps(shape: PlanShape, steps: Vec<RoutingStep>, reason: impl Into<String>) -> Self {
        Self {
            shape,
            steps,
            confidence: 1.0,
            reason: reason.into(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn step(&self, agent_name: &str) -> Option<&RoutingStep> {
        self.steps.iter().find(|s| s.agent_name == agent_name)
    }

    pub fn contains(&self, agent_name: &str) -> bool {
        self.step(agent_name).is_some()
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.agent_name.as_str()).collect()
    }

    pub fn entry_points(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.is_entry())
            .map(|s| s.agent_name.as_str())
            .collect()
    }

    pub fn has_edges(&self) -> bool {
        self.steps.iter().any(|s| !s.is_entry())
    }

    /// Steps not yet recorded whose dependencies all have a response
    pub fn ready_steps(&self, recorded: &HashMap<String, AgentResponse>) -> Vec<&RoutingStep> {
        self.steps
            .iter()
            .filter(|s| !recorded.contains_key(&s.agent_name))
            .filter(|s| s.depends_on.iter().all(|d| recorded.contains_key(d)))
            .collect()
    }

    /// Longest dependency path in nodes, or `None` when the steps do not form a DAG
    pub fn depth(&self) -> Option<usize> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.agent_name.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let &d = index.get(dep.as_str())?;
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut level = vec![1usize; self.steps.len()];
        let mut queue: VecDeque<usize> = (0..self.steps.len()).filter(|&i| indegree[i] == 0).collect();
        let mut visited = 0;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &next in &dependents[node] {
                level[next] = level[next].max(level[node] + 1);
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited == self.steps.len() {
            Some(level.into_iter().max().unwrap_or(0))
        } else {
            None
        }
    }

    pub fn validate(&self, limits: PlanLimits) -> RelayResult<()> {
        if self.steps.is_empty() {
            return Err(RelayError::InvalidPlan("plan has no steps".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.agent_name.as_str()) {
                return Err(RelayError::InvalidPlan(format!("duplicate step '{}'", step.agent_name)));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.agent_name {
                    return Err(RelayError::InvalidPlan(format!("'{}' depends on itself", dep)));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(RelayError::InvalidPlan(format!(
                        "'{}' depends on '{}' which is not in the plan",
                        step.agent_name, dep
                    )));
                }
            }
        }

        if self.entry_points().is_empty() {
            return Err(RelayError::InvalidPlan("plan has no entry point".into()));
        }

        let depth = self
            .depth()
            .ok_or_else(|| RelayError::InvalidPlan("plan contains a cycle".into()))?;

        if self.steps.len() > limits.max_nodes {
            return Err(RelayError::InvalidPlan(format!(
                "{} steps exceeds the limit of {}",
                self.steps.len(),
                limits.max_nodes
            )));
        }
        if depth > limits.max_depth {
            return Err(RelayError::InvalidPlan(format!(
                "chain depth {} exceeds the limit of {}",
                depth, limits.max_depth
            )));
        }

        Ok(())
    }
}
