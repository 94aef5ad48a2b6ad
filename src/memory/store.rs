//! In-memory context store and per-session turn gate

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use super::{ContextStore, Session};
use crate::error::RelayResult;
use crate::orchestrator::Turn;

/// Sessions live for the process lifetime, each behind its own lock
pub struct InMemoryContextStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    max_turns: usize,
}

impl InMemoryContextStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    async fn entry(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating session {}", session_id);
                Arc::new(Mutex::new(Session::new(session_id, self.max_turns)))
            })
            .clone()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn load(&self, session_id: &str) -> RelayResult<Session> {
        let session = self.entry(session_id).await;
        let snapshot = session.lock().await.clone();
        Ok(snapshot)
    }

    async fn append(&self, session_id: &str, turn: Turn) -> RelayResult<()> {
        let session = self.entry(session_id).await;
        session.lock().await.push(turn);
        Ok(())
    }
}

/// One async mutex per session id; holding the guard serializes turns
#[derive(Default)]
pub struct SessionGate {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Forget the session's lock once nobody holds or awaits it
    pub async fn prune(&self, session_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(session_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(session_id);
        }
    }

    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
