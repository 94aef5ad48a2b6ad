//! Response Cache
//!
//! Keeps language-model replies keyed by a hash of model, prompt and system
//! text, so repeated identical requests resolve to the same answer.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use sha2::{Sha256, Digest};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    prompt_hash: [u8; 32],
    system_hash: [u8; 32],
}

impl CacheKey {
    fn new(model: &str, prompt: &str, system: Option<&str>) -> Self {
        Self {
            model: model.to_string(),
            prompt_hash: hash(prompt),
            system_hash: hash(system.unwrap_or("")),
        }
    }
}

fn hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// Bounded in-memory reply cache
pub struct LLMCache {
    responses: Arc<RwLock<HashMap<CacheKey, String>>>,
    capacity: usize,
}

impl LLMCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            responses: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn get(&self, model: &str, prompt: &str, system: Option<&str>) -> Option<String> {
        let key = CacheKey::new(model, prompt, system);
        let hit = self.responses.read().await.get(&key).cloned();
        if hit.is_some() {
            debug!("Cache hit for model {}", model);
        }
        hit
    }

    pub async fn set(&self, model: &str, prompt: &str, system: Option<&str>, response: String) {
        let key = CacheKey::new(model, prompt, system);
        let mut responses = self.responses.write().await;
        if responses.len() >= self.capacity && !responses.contains_key(&key) {
            // No recency tracking; start over once full.
            responses.clear();
        }
        responses.insert(key, response);
    }

    pub async fn len(&self) -> usize {
        self.responses.read().await.len()
    }

    pub async fn clear(&self) {
        self.responses.write().await.clear();
    }
}

impl Default for LLMCache {
    fn default() -> Self {
        Self::new(512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_roundtrip() {
        let cache = LLMCache::default();
        assert!(cache.get("m", "p", None).await.is_none());

        cache.set("m", "p", None, "reply".into()).await;
        assert_eq!(cache.get("m", "p", None).await.as_deref(), Some("reply"));
        assert!(cache.get("m", "p", Some("sys")).await.is_none());
        assert!(cache.get("other", "p", None).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_capacity_resets() {
        let cache = LLMCache::new(2);
        cache.set("m", "a", None, "1".into()).await;
        cache.set("m", "b", None, "2".into()).await;
        assert_eq!(cache.len().await, 2);

        cache.set("m", "c", None, "3".into()).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("m", "c", None).await.as_deref(), Some("3"));
    }
}
