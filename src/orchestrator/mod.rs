//! Orchestrator Module
//!
//! Classifies a query into a routing plan, walks the plan against the agent
//! registry, and synthesizes the outputs into one answer.

pub mod plan;
pub mod turn;
pub mod intent;
pub mod classifier;
pub mod executor;
pub mod synthesizer;
pub mod supervisor;

pub use plan::{InputBinding, PlanLimits, PlanShape, RoutingPlan, RoutingStep};
pub use turn::{Query, SynthesizedResponse, Turn, TurnState};
pub use intent::{IntentModel, KeywordIntentModel, LlmIntentModel, RoutingHint};
pub use classifier::IntentClassifier;
pub use executor::GraphExecutor;
pub use synthesizer::{ResponseSynthesizer, DEGRADED_MESSAGE};
pub use supervisor::{intent_model_for, Supervisor};
