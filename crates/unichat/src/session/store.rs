//! In-memory session store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::Session;
use crate::discovery::DiscoveryResult;

/// A session guarded for use across request handlers.
pub type SharedSession = Arc<Mutex<Session>>;

/// Live sessions, keyed by session id.
///
/// Sessions leave the store when the page deletes them or when they sit idle
/// past the eviction limit (see [`spawn_eviction_task`]).
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session bound to a discovery result and return its id.
    pub async fn create(&self, discovery: Arc<DiscoveryResult>) -> (String, SharedSession) {
        let session = Session::new(discovery);
        let id = session.id.clone();
        let shared = Arc::new(Mutex::new(session));

        self.sessions
            .write()
            .await
            .insert(id.clone(), shared.clone());
        debug!(session_id = %id, "Session created");

        (id, shared)
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drop a session. Returns `false` if it did not exist.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions untouched for longer than `max_idle`. Sessions that are
    /// locked or have a turn streaming are kept. Returns how many were dropped.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|id, session| {
            let Ok(session) = session.try_lock() else {
                return true;
            };
            if session.turn_in_progress() {
                return true;
            }
            let idle = (now - session.updated_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if idle > max_idle {
                debug!(session_id = %id, idle_secs = idle.as_secs(), "Session evicted");
                return false;
            }
            true
        });

        before - sessions.len()
    }
}

/// Spawn a periodic task that evicts idle sessions. Returns its handle for shutdown.
pub fn spawn_eviction_task(
    store: SessionStore,
    max_idle: Duration,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = store.evict_idle(max_idle).await;
            if evicted > 0 {
                let live = store.len().await;
                info!(evicted, live, "Evicted idle sessions");
            }
        }
    })
}
