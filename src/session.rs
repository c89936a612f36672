//! Per-session state. Sessions never share a conversation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::ConversationState;
use crate::credentials::SessionOverrides;

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub conversation: ConversationState,
    pub overrides: SessionOverrides,
    /// The background task answering the pending user turn, if any.
    pub generation: Option<JoinHandle<()>>,
    last_seen: Instant,
}

impl Session {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            conversation: ConversationState::new(),
            overrides: SessionOverrides::default(),
            generation: None,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Cancels the in-flight generation and waits until it is gone, then
    /// restores the seed conversation.
    pub async fn reset(&mut self) {
        if let Some(task) = self.generation.take() {
            task.abort();
            // The task only locks the session after its outbound calls, and
            // an aborted task stops at that await, so this cannot deadlock.
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(id = %self.id, "Generation task failed: {}", e);
                }
            }
        }
        self.conversation.reset();
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(Session::new(id))));
        info!(%id, "Created chat session");
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops sessions idle for longer than `max_idle`. Sessions with a reply
    /// in flight are kept. Returns how many were dropped.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            // A locked session is in use right now.
            if let Ok(session) = session.try_lock() {
                if session.conversation.is_idle() && session.idle_for() > max_idle {
                    expired.push(*id);
                }
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Evicted idle sessions");
        }
        expired.len()
    }
}
