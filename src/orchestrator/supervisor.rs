//! Supervisor
//!
//! Owns the turn state machine: load the session, classify, execute the
//! plan, fall back to the default agent when everything failed, synthesize,
//! and append the finished turn. Turns of one session run one at a time.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::classifier::IntentClassifier;
use super::executor::GraphExecutor;
use super::intent::{IntentModel, KeywordIntentModel, LlmIntentModel};
use super::plan::RoutingPlan;
use super::synthesizer::ResponseSynthesizer;
use super::turn::{Query, SynthesizedResponse, Turn, TurnState};
use crate::agent::{build_agents, AgentContext, AgentRegistry, AgentSnapshot, LLMProvider};
use crate::config::{ClassifierKind, RelayConfig};
use crate::error::{RelayError, RelayResult};
use crate::memory::{ContextStore, InMemoryContextStore, Session, SessionGate};

/// Configuration and intent model that are swapped together on reload
struct Runtime {
    config: Arc<RelayConfig>,
    intent_model: Arc<dyn IntentModel>,
}

/// Everything one turn reads, taken in a single step
#[derive(Clone)]
pub struct TurnSnapshot {
    pub config: Arc<RelayConfig>,
    pub intent_model: Arc<dyn IntentModel>,
    pub agents: AgentSnapshot,
}

pub struct Supervisor {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn ContextStore>,
    runtime: RwLock<Runtime>,
    gate: SessionGate,
}

/// Intent model selected by the configuration
pub fn intent_model_for(config: &RelayConfig, provider: Arc<dyn LLMProvider>) -> Arc<dyn IntentModel> {
    match config.classifier {
        ClassifierKind::Keyword => Arc::new(KeywordIntentModel::new()),
        ClassifierKind::Llm => Arc::new(LlmIntentModel::new(provider, config.llm.model.clone())),
    }
}

impl Supervisor {
    pub fn new(config: Arc<RelayConfig>, registry: Arc<AgentRegistry>, intent_model: Arc<dyn IntentModel>) -> Self {
        let store = Arc::new(InMemoryContextStore::new(config.max_turns_per_session));
        Self {
            registry,
            store,
            runtime: RwLock::new(Runtime { config, intent_model }),
            gate: SessionGate::new(),
        }
    }

    /// Register one prompt agent per configured entry and pick the intent model
    pub async fn from_config(config: RelayConfig, provider: Arc<dyn LLMProvider>) -> RelayResult<Self> {
        config.validate()?;
        let registry = Arc::new(AgentRegistry::new());
        registry.replace_all(build_agents(&config, provider.clone())).await;
        let model = intent_model_for(&config, provider);
        Ok(Self::new(Arc::new(config), registry, model))
    }

    pub fn with_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = store;
        self
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> Arc<dyn ContextStore> {
        self.store.clone()
    }

    pub async fn config(&self) -> Arc<RelayConfig> {
        self.runtime.read().await.config.clone()
    }

    /// Config, intent model and agents as one consistent view
    pub async fn snapshot(&self) -> TurnSnapshot {
        // Reload holds the write side across the registry swap.
        let runtime = self.runtime.read().await;
        TurnSnapshot {
            config: runtime.config.clone(),
            intent_model: runtime.intent_model.clone(),
            agents: self.registry.snapshot().await,
        }
    }

    /// Swap in a new configuration; in-flight turns keep their snapshots
    pub async fn reload(&self, config: RelayConfig, provider: Arc<dyn LLMProvider>) -> RelayResult<()> {
        config.validate()?;
        let agents = build_agents(&config, provider.clone());
        let intent_model = intent_model_for(&config, provider);

        let mut runtime = self.runtime.write().await;
        self.registry.replace_all(agents).await;
        *runtime = Runtime {
            config: Arc::new(config),
            intent_model,
        };
        info!("Configuration reloaded");
        Ok(())
    }

    pub async fn handle_query(&self, session_id: &str, text: &str) -> RelayResult<SynthesizedResponse> {
        self.handle_query_with_cancel(session_id, text, CancellationToken::new()).await
    }

    /// Run one turn. Cancelling `cancel` abandons it with `Cancelled`; running
    /// out of turn time gives the degraded response. Neither is appended.
    #[tracing::instrument(skip(self, text, cancel), fields(query_len = text.len()))]
    pub async fn handle_query_with_cancel(
        &self,
        session_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> RelayResult<SynthesizedResponse> {
        let turn_guard = self.gate.acquire(session_id).await;
        let result = self.run_serialized(session_id, text, &cancel).await;
        drop(turn_guard);
        self.gate.prune(session_id).await;
        result
    }

    async fn run_serialized(
        &self,
        session_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> RelayResult<SynthesizedResponse> {
        let session = self
            .store
            .load(session_id)
            .await
            .map_err(|e| as_unavailable(session_id, e))?;
        let snapshot = self.snapshot().await;

        let turn_cancel = cancel.child_token();
        let watchdog = {
            let token = turn_cancel.clone();
            let limit = Duration::from_millis(snapshot.config.turn_timeout_ms);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!("Turn exceeded {}ms; cancelling", limit.as_millis());
                token.cancel();
            })
        };

        let mut turn = self
            .run_turn_with(snapshot, Query::new(session_id, text), &session, &turn_cancel)
            .await;
        watchdog.abort();

        // The last wave and a cancel can land in the same poll.
        let completed = turn.state == TurnState::Done && !turn_cancel.is_cancelled();
        if !completed {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
            warn!("Turn {} timed out; returning degraded response", turn.query.id);
            let degraded = SynthesizedResponse::degraded();
            turn.final_response = Some(degraded.clone());
            return Ok(degraded);
        }

        let response = turn
            .final_response
            .clone()
            .unwrap_or_else(SynthesizedResponse::degraded);
        self.store
            .append(session_id, turn)
            .await
            .map_err(|e| as_unavailable(session_id, e))?;
        Ok(response)
    }

    /// Classify, then execute; the turn ends `Done` unless cancelled
    pub async fn run_turn(&self, query: Query, session: &Session, cancel: &CancellationToken) -> Turn {
        let snapshot = self.snapshot().await;
        self.run_turn_with(snapshot, query, session, cancel).await
    }

    async fn run_turn_with(
        &self,
        snapshot: TurnSnapshot,
        query: Query,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Turn {
        let history = session.format_for_prompt(snapshot.config.context_turns);
        let mut turn = Turn::new(query);

        turn.advance(TurnState::Classifying);
        let mut names: Vec<String> = snapshot.agents.keys().cloned().collect();
        names.sort();
        let classifier = IntentClassifier::new(snapshot.intent_model.clone(), snapshot.config.clone(), &names);

        let classified = tokio::select! {
            _ = cancel.cancelled() => {
                turn.fail();
                return turn;
            }
            result = classifier.classify(&turn.query.text, &history) => result,
        };
        let plan = classified.unwrap_or_else(|e| {
            warn!("{}; routing to default agent", e);
            classifier.default_plan("Classifier unavailable")
        });

        self.drive(turn, plan, &history, snapshot, cancel).await
    }

    /// Execute a ready-made plan against the session, skipping classification
    pub async fn execute(&self, plan: RoutingPlan, query: Query, session: &Session) -> Turn {
        let snapshot = self.snapshot().await;
        let history = session.format_for_prompt(snapshot.config.context_turns);
        self.drive(Turn::new(query), plan, &history, snapshot, &CancellationToken::new())
            .await
    }

    async fn drive(
        &self,
        mut turn: Turn,
        plan: RoutingPlan,
        history: &str,
        snapshot: TurnSnapshot,
        cancel: &CancellationToken,
    ) -> Turn {
        let TurnSnapshot { config, agents, .. } = snapshot;
        let shape = plan.shape;
        let default_in_plan = plan.contains(&config.default_agent);
        turn.plan = Some(plan);

        let executor = GraphExecutor::new(agents, config.clone());
        if let Err(e) = executor.execute(&mut turn, history, cancel).await {
            warn!("Turn {} abandoned: {}", turn.query.id, e);
            turn.fail();
            return turn;
        }

        if turn.successes() == 0 && !default_in_plan {
            info!("Every planned agent failed; falling back to '{}'", config.default_agent);
            turn.advance(TurnState::AwaitingAgent);
            let fallback = executor.run_node(
                config.default_agent.clone(),
                turn.query.text.clone(),
                AgentContext::new(history),
            );
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    turn.fail();
                    return turn;
                }
                response = fallback => response,
            };
            turn.fallback = Some(response);
            turn.advance(TurnState::Routing);
        }

        turn.advance(TurnState::Synthesizing);
        let synthesizer = ResponseSynthesizer::new(config.similarity_threshold);
        let response = synthesizer.synthesize(&turn.ordered_responses(), &turn.query.text, shape);
        if response.degraded {
            warn!("Turn {} degraded: {:?} contributed", turn.query.id, response.contributing_agents);
        }
        turn.final_response = Some(response);
        turn.advance(TurnState::Done);
        turn
    }
}

fn as_unavailable(session_id: &str, err: RelayError) -> RelayError {
    if err.is_unavailable() {
        err
    } else {
        RelayError::session(session_id, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::config::AgentSpec;
    use crate::orchestrator::{PlanShape, RoutingHint, DEGRADED_MESSAGE};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl Agent for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "fixed"
        }

        async fn invoke(&self, _query: &str, _context: &AgentContext) -> Result<String> {
            match self.reply {
                Some(r) => Ok(r.to_string()),
                None => anyhow::bail!("{} is down", self.name),
            }
        }
    }

    async fn supervisor(agents: Vec<Fixed>) -> Supervisor {
        let mut config = RelayConfig::default();
        config.retry_backoff_ms = 1;
        config.agent_timeout_ms = 200;
        let registry = Arc::new(AgentRegistry::new());
        for agent in agents {
            registry.register_instance(Arc::new(agent)).await;
        }
        Supervisor::new(Arc::new(config), registry, Arc::new(KeywordIntentModel::new()))
    }

    #[tokio::test]
    async fn test_turn_walks_the_state_machine() {
        let sup = supervisor(vec![
            Fixed { name: "orchestrator", reply: Some("Hi!") },
            Fixed { name: "research", reply: Some("News.") },
            Fixed { name: "finance", reply: Some("Advice.") },
        ])
        .await;

        let session = Session::new("s1", 10);
        let turn = sup.run_turn(Query::new("s1", "hello"), &session, &CancellationToken::new()).await;
        assert_eq!(turn.state, TurnState::Done);
        assert_eq!(
            turn.transitions,
            vec![
                TurnState::Start,
                TurnState::Classifying,
                TurnState::Routing,
                TurnState::AwaitingAgent,
                TurnState::Routing,
                TurnState::Synthesizing,
                TurnState::Done,
            ]
        );
        assert_eq!(turn.final_response.unwrap().text, "Hi!");
    }

    #[tokio::test]
    async fn test_all_failures_fall_back_to_default() {
        let sup = supervisor(vec![
            Fixed { name: "orchestrator", reply: Some("General answer") },
            Fixed { name: "research", reply: None },
        ])
        .await;

        let response = sup.handle_query("s1", "latest AI news").await.unwrap();
        assert!(response.text.starts_with("General answer"));
        assert!(response.text.contains("research was unavailable"));
        assert_eq!(response.contributing_agents, vec!["orchestrator".to_string()]);
    }

    #[tokio::test]
    async fn test_total_failure_is_degraded_not_error() {
        let sup = supervisor(vec![
            Fixed { name: "orchestrator", reply: None },
            Fixed { name: "research", reply: None },
        ])
        .await;

        let response = sup.handle_query("s1", "latest AI news").await.unwrap();
        assert_eq!(response.text, DEGRADED_MESSAGE);
        assert!(response.degraded);
    }

    #[tokio::test]
    async fn test_execute_skips_classification() {
        let sup = supervisor(vec![Fixed { name: "research", reply: Some("Data.") }]).await;
        let session = Session::new("s1", 10);
        let turn = sup
            .execute(RoutingPlan::single_hop("research", "direct"), Query::new("s1", "anything"), &session)
            .await;
        assert!(!turn.visited(TurnState::Classifying));
        assert_eq!(turn.state, TurnState::Done);
    }

    #[tokio::test]
    async fn test_reload_swaps_config_snapshot() {
        let sup = supervisor(vec![Fixed { name: "orchestrator", reply: Some("x") }]).await;
        let before = sup.config().await;

        let mut next = RelayConfig::default();
        next.agents.push(AgentSpec::new("weather").with_keywords(&["weather"]));
        next.confidence_threshold = 0.3;

        struct Silent;
        #[async_trait]
        impl LLMProvider for Silent {
            async fn generate(&self, _m: &str, _p: String, _s: Option<String>) -> Result<String> {
                Ok(String::new())
            }
        }

        sup.reload(next, Arc::new(Silent)).await.unwrap();
        let after = sup.config().await;
        assert_eq!(before.confidence_threshold, 0.5);
        assert_eq!(after.confidence_threshold, 0.3);
        assert!(sup.registry().contains("weather").await);
    }

    struct Slow {
        name: &'static str,
        reply: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Agent for Slow {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _query: &str, _context: &AgentContext) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.to_string())
        }
    }

    struct Canned(&'static str);

    #[async_trait]
    impl LLMProvider for Canned {
        async fn generate(&self, _m: &str, _p: String, _s: Option<String>) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Unreachable {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IntentModel for Unreachable {
        async fn classify_intent(&self, _text: &str, _context: &str, _caps: &[AgentSpec]) -> Result<RoutingHint> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("intent service unreachable")
        }
    }

    #[tokio::test]
    async fn test_classifier_failure_routes_to_default() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register_instance(Arc::new(Fixed { name: "orchestrator", reply: Some("Happy to help.") }))
            .await;
        registry
            .register_instance(Arc::new(Fixed { name: "research", reply: Some("Findings.") }))
            .await;
        let model = Arc::new(Unreachable { calls: AtomicUsize::new(0) });
        let sup = Supervisor::new(Arc::new(RelayConfig::default()), registry, model.clone());

        let session = Session::new("s1", 10);
        let turn = sup
            .run_turn(Query::new("s1", "latest AI news"), &session, &CancellationToken::new())
            .await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(turn.state, TurnState::Done);
        let plan = turn.plan.as_ref().unwrap();
        assert_eq!(plan.shape, PlanShape::SingleHop);
        assert_eq!(plan.agent_names(), vec!["orchestrator"]);
        assert_eq!(turn.final_response.unwrap().text, "Happy to help.");
    }

    #[tokio::test]
    async fn test_turn_timeout_returns_degraded_response() {
        let mut config = RelayConfig::default();
        config.turn_timeout_ms = 30;
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register_instance(Arc::new(Slow { name: "orchestrator", reply: "late", delay: Duration::from_secs(5) }))
            .await;
        let sup = Supervisor::new(Arc::new(config), registry, Arc::new(KeywordIntentModel::new()));

        let response = sup.handle_query("s1", "hello").await.unwrap();
        assert_eq!(response, SynthesizedResponse::degraded());
        assert!(sup.store().load("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_never_appended() {
        let sup = supervisor(vec![Fixed { name: "orchestrator", reply: Some("Hi!") }]).await;

        for _ in 0..20 {
            let cancel = CancellationToken::new();
            cancel.cancel();
            let err = sup.handle_query_with_cancel("s1", "hello", cancel).await.unwrap_err();
            assert!(matches!(err, RelayError::Cancelled));
        }
        assert!(sup.store().load("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_during_turn_keeps_one_consistent_view() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register_instance(Arc::new(Slow {
                name: "orchestrator",
                reply: "Answer from the old setup.",
                delay: Duration::from_millis(80),
            }))
            .await;
        let sup = Arc::new(Supervisor::new(
            Arc::new(RelayConfig::default()),
            registry,
            Arc::new(KeywordIntentModel::new()),
        ));

        let in_flight = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.handle_query("old", "hello").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut next = RelayConfig::default();
        next.default_agent = "concierge".to_string();
        next.agents = vec![AgentSpec::new("concierge")];
        sup.reload(next, Arc::new(Canned("Answer from the new setup."))).await.unwrap();

        let snapshot = sup.snapshot().await;
        assert_eq!(snapshot.config.default_agent, "concierge");
        assert!(snapshot.agents.contains_key("concierge"));
        assert!(!snapshot.agents.contains_key("orchestrator"));

        let old = in_flight.await.unwrap().unwrap();
        assert_eq!(old.text, "Answer from the old setup.");

        let new = sup.handle_query("new", "hello").await.unwrap();
        assert_eq!(new.text, "Answer from the new setup.");
        assert_eq!(new.contributing_agents, vec!["concierge".to_string()]);
        assert!(!new.degraded);
    }

    #[tokio::test]
    async fn test_session_gates_are_released_after_turns() {
        let sup = supervisor(vec![Fixed { name: "orchestrator", reply: Some("Hi!") }]).await;
        for i in 0..5 {
            sup.handle_query(&format!("one-off-{}", i), "hello").await.unwrap();
        }
        assert_eq!(sup.gate.tracked().await, 0);
    }
}
