use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::sync::Arc;

use crate::config::{LlmSettings, ProviderKind};
use crate::error::{RelayError, RelayResult};

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String>;
}

pub struct OllamaProvider {
    client: ollama_rs::Ollama,
}

impl OllamaProvider {
    pub fn new(client: ollama_rs::Ollama) -> Self {
        Self { client }
    }

    /// Build a client from a base URL such as `http://localhost:11434`
    pub fn from_base_url(base_url: &str) -> RelayResult<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| RelayError::Config(format!("invalid ollama url '{}': {}", base_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::Config(format!("ollama url '{}' has no host", base_url)))?;
        let port = url.port().unwrap_or(11434);
        let client = ollama_rs::Ollama::new(format!("{}://{}", url.scheme(), host), port);
        Ok(Self::new(client))
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};

        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user(prompt));

        let res = self
            .client
            .send_chat_messages(ChatMessageRequest::new(model.to_string(), messages))
            .await
            .context("ollama chat request failed")?;

        Ok(res.message.content)
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            temperature: 0.0,
            max_tokens: 300,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(json!({ "role": "system", "content": sys }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await?.error_for_status()?;
        let json: serde_json::Value = res.json().await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .context("Failed to parse content from OpenAI response")?;

        Ok(content.to_string())
    }
}

/// Pick the provider named by the configuration
pub fn provider_from_settings(settings: &LlmSettings) -> RelayResult<Arc<dyn LLMProvider>> {
    Ok(match settings.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_base_url(&settings.base_url)?),
        ProviderKind::Openai => Arc::new(
            OpenAICompatibleProvider::new(settings.base_url.clone(), settings.api_key.clone())
                .with_sampling(settings.temperature, settings.max_tokens),
        ),
    })
}
