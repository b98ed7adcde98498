//! Per-session chat state.
//!
//! A session owns one transcript per model id and shares the memoized
//! discovery result with every other session.

mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::discovery::DiscoveryResult;
use crate::llm::Message;

pub use store::{SessionStore, SharedSession, spawn_eviction_task};

/// State for one browser session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    discovery: Arc<DiscoveryResult>,
    transcripts: HashMap<String, Vec<Message>>,
    turn: Arc<Mutex<()>>,
}

/// Held for the whole of a chat turn. At most one exists per session.
#[derive(Debug)]
pub struct TurnGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Session {
    pub fn new(discovery: Arc<DiscoveryResult>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", ulid::Ulid::new()),
            created_at: now,
            updated_at: now,
            discovery,
            transcripts: HashMap::new(),
            turn: Arc::new(Mutex::new(())),
        }
    }

    /// Claim the session for one chat turn. `None` while another turn is
    /// still streaming.
    pub fn try_begin_turn(&self) -> Option<TurnGuard> {
        self.turn.clone().try_lock_owned()
            .ok()
            .map(|guard| TurnGuard { _guard: guard })
    }

    pub fn turn_in_progress(&self) -> bool {
        self.turn.try_lock().is_err()
    }

    /// Mark the session as used without changing any transcript.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn discovery(&self) -> &DiscoveryResult {
        &self.discovery
    }

    /// Return the model's transcript, creating an empty one on first reference.
    pub fn get_or_init_transcript(&mut self, model_id: &str) -> &[Message] {
        self.transcripts.entry(model_id.to_string()).or_default()
    }

    /// The model's transcript, if it was ever referenced.
    pub fn transcript(&self, model_id: &str) -> Option<&[Message]> {
        self.transcripts.get(model_id).map(Vec::as_slice)
    }

    pub fn append(&mut self, model_id: &str, message: Message) {
        self.transcripts
            .entry(model_id.to_string())
            .or_default()
            .push(message);
        self.updated_at = Utc::now();
    }

    /// Empty one model's transcript. Other models are untouched.
    pub fn clear(&mut self, model_id: &str) {
        self.transcripts
            .entry(model_id.to_string())
            .or_default()
            .clear();
        self.updated_at = Utc::now();
    }
}
