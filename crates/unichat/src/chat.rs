//! Chat driver: one user turn against one model.
//!
//! A turn moves through `Idle → UserAppended → Streaming → Completed | Failed`.
//! Both terminal states leave the transcript two messages longer. A failure is
//! stored as an ordinary assistant message carrying the error text. Turns
//! cannot be cancelled once streaming has started, and a session runs at most
//! one turn at a time.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::llm::{ChatRequest, LLMError, LLMProvider, Message, ProviderRegistry, StreamEvent};
use crate::session::Session;

/// Receives assistant output as it is produced.
pub trait TokenSink: Send {
    /// An incremental fragment of assistant text.
    fn token(&mut self, fragment: &str);

    /// The turn failed; `message` is what was stored in the transcript.
    fn error(&mut self, message: &str);
}

/// Progress of a single chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No turn is running for the session.
    Idle,
    UserAppended,
    Streaming,
    Completed,
    Failed,
}

/// How a turn ended. Both variants were appended to the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(String),
    Failed(String),
}

impl TurnOutcome {
    /// The assistant message stored for this turn.
    pub fn content(&self) -> &str {
        match self {
            TurnOutcome::Completed(content) | TurnOutcome::Failed(content) => content,
        }
    }

    pub fn state(&self) -> TurnState {
        match self {
            TurnOutcome::Completed(_) => TurnState::Completed,
            TurnOutcome::Failed(_) => TurnState::Failed,
        }
    }
}

/// Whether `session` is idle or has a turn streaming.
pub fn session_turn_state(session: &Session) -> TurnState {
    if session.turn_in_progress() {
        TurnState::Streaming
    } else {
        TurnState::Idle
    }
}

/// Errors that reject a turn before anything is appended.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("model '{0}' not found")]
    UnknownModel(String),

    #[error("provider '{0}' is not configured")]
    ProviderNotConfigured(String),

    #[error("a reply is still streaming for this session")]
    TurnInProgress,
}

/// Streams completions from the provider owning the selected model.
pub struct ChatDriver {
    providers: ProviderRegistry,
    idle_timeout: Option<Duration>,
}

impl ChatDriver {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self {
            providers,
            idle_timeout: None,
        }
    }

    /// Fail a turn when the provider produces nothing for this long.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Run one turn: append the user message, stream the reply into `sink`,
    /// and append the assistant reply (or the error text).
    ///
    /// The session lock is only held while the transcript is touched, not
    /// while the provider streams. The session's turn slot is held for the
    /// whole turn, so a second turn is rejected with
    /// [`ChatError::TurnInProgress`] until this one has stored its reply.
    pub async fn send(
        &self,
        session: &Mutex<Session>,
        model_id: &str,
        user_text: &str,
        sink: &mut dyn TokenSink,
    ) -> Result<TurnOutcome, ChatError> {
        if user_text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (provider, request, _turn) = {
            let mut session = session.lock().await;

            let Some(model) = session.discovery().get(model_id) else {
                return Err(ChatError::UnknownModel(model_id.to_string()));
            };
            let provider_key = model.provider.clone();
            let Some(provider) = self.providers.get(&provider_key) else {
                return Err(ChatError::ProviderNotConfigured(provider_key));
            };
            let Some(turn) = session.try_begin_turn() else {
                return Err(ChatError::TurnInProgress);
            };

            session.append(model_id, Message::user(user_text));
            let request = ChatRequest {
                model: model_id.to_string(),
                messages: session.get_or_init_transcript(model_id).to_vec(),
            };
            (provider, request, turn)
        };
        debug!(model = %model_id, state = ?TurnState::UserAppended, "Chat turn");

        let outcome = match self.stream_reply(provider, request, sink).await {
            Ok(reply) => TurnOutcome::Completed(reply),
            Err(e) => {
                warn!(model = %model_id, error = %e, "Chat completion failed");
                let message = format!("An error occurred: {e}");
                sink.error(&message);
                TurnOutcome::Failed(message)
            }
        };

        session
            .lock()
            .await
            .append(model_id, Message::assistant(outcome.content()));
        debug!(model = %model_id, state = ?outcome.state(), "Chat turn");

        Ok(outcome)
    }

    async fn stream_reply(
        &self,
        provider: Arc<dyn LLMProvider>,
        request: ChatRequest,
        sink: &mut dyn TokenSink,
    ) -> Result<String, LLMError> {
        let model = request.model.clone();
        let mut stream = provider.chat_stream(request).await?;
        debug!(model = %model, state = ?TurnState::Streaming, "Chat turn");

        let mut reply = String::new();
        loop {
            let next = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, stream.next())
                    .await
                    .map_err(|_| LLMError::Timeout(limit))?,
                None => stream.next().await,
            };

            match next {
                Some(Ok(StreamEvent::Token(fragment))) => {
                    sink.token(&fragment);
                    reply.push_str(&fragment);
                }
                Some(Ok(StreamEvent::Done)) | None => break,
                Some(Err(e)) => return Err(e),
            }
        }

        Ok(reply)
    }
}
