//! HTTP transport - thin axum layer over `Supervisor::handle_query`

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::provider_from_settings;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::orchestrator::Supervisor;

struct ServerError(anyhow::Error);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<RelayError>() {
            Some(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            Some(RelayError::Config(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for ServerError where E: Into<anyhow::Error> {
    fn from(err: E) -> Self { Self(err.into()) }
}

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub config_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub session_id: String,
    pub text: String,
    pub contributing_agents: Vec<String>,
    pub degraded: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/admin/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState, bind: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!("Relay listening on http://{}", bind);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, ServerError> {
    if req.message.trim().is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message must not be empty" })),
        )
            .into_response());
    }

    let session_id = req
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let response = state.supervisor.handle_query(&session_id, &req.message).await?;

    Ok(Json(ChatReply {
        session_id,
        text: response.text,
        contributing_agents: response.contributing_agents,
        degraded: response.degraded,
    })
    .into_response())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.supervisor.registry().names().await;
    Json(serde_json::json!({ "status": "ok", "agents": agents }))
}

async fn reload(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    let config = RelayConfig::load(&state.config_path)?;
    let provider = provider_from_settings(&config.llm)?;
    state.supervisor.reload(config, provider).await?;
    let agents = state.supervisor.registry().names().await;
    Ok(Json(serde_json::json!({ "status": "reloaded", "agents": agents })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LLMProvider;
    use crate::orchestrator::{SynthesizedResponse, DEGRADED_MESSAGE};
    use async_trait::async_trait;
    use std::time::Duration;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct CannedProvider;

    #[async_trait]
    impl LLMProvider for CannedProvider {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> Result<String> {
            Ok("Hello from the relay.".to_string())
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl LLMProvider for StalledProvider {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    async fn app_with(config: RelayConfig, provider: Arc<dyn LLMProvider>) -> Router {
        let supervisor = Supervisor::from_config(config, provider).await.unwrap();
        router(AppState {
            supervisor: Arc::new(supervisor),
            config_path: PathBuf::from("does-not-exist.yaml"),
        })
    }

    async fn app() -> Router {
        app_with(RelayConfig::default(), Arc::new(CannedProvider)).await
    }

    #[tokio::test]
    async fn test_chat_endpoint() {
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"session_id": "web-1", "message": "hello"}"#))
            .unwrap();

        let response = app().await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reply: ChatReply = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply.session_id, "web-1");
        assert_eq!(reply.text, "Hello from the relay.");
        assert_eq!(reply.contributing_agents, vec!["orchestrator".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message": "  "}"#))
            .unwrap();

        let response = app().await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reload_with_missing_file_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/admin/reload")
            .body(Body::empty())
            .unwrap();

        let response = app().await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_turn_timeout_is_a_degraded_reply() {
        let mut config = RelayConfig::default();
        config.turn_timeout_ms = 50;
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"session_id": "slow", "message": "hello"}"#))
            .unwrap();

        let response = app_with(config, Arc::new(StalledProvider)).await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reply: ChatReply = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply.text, DEGRADED_MESSAGE);
        assert!(reply.degraded);
        assert_eq!(reply.contributing_agents, SynthesizedResponse::degraded().contributing_agents);
    }

    #[test]
    fn test_unavailable_maps_to_503() {
        let err = ServerError(RelayError::session("s1", "store offline").into());
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
