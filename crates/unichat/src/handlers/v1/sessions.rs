//! Session and chat HTTP handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

use crate::chat::{TokenSink, TurnOutcome, TurnState, session_turn_state};
use crate::discovery::{DiscoveryResult, NO_MODELS_MESSAGE};
use crate::llm::Message;
use crate::response;
use crate::server::AppState;
use crate::session::{Session, SharedSession};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ModelView {
    id: String,
    display_name: String,
    provider: String,
    provider_description: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    session_id: String,
    created_at: String,
    updated_at: String,
    turn: TurnState,
    models: Vec<ModelView>,
    errors: Vec<String>,
}

#[derive(Deserialize)]
pub struct TranscriptQuery {
    model: String,
}

#[derive(Serialize)]
pub struct TranscriptResponse {
    model: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
pub struct ChatMessageRequest {
    model: String,
    content: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/sessions
///
/// Runs discovery on first use. Refuses to create a session when no provider
/// offers any model.
pub async fn create_session(State(state): State<AppState>) -> Response {
    let discovery = state.discovery.get_or_discover().await;
    if discovery.is_empty() {
        return response::service_unavailable(NO_MODELS_MESSAGE)
            .with_details(discovery.errors().to_vec())
            .into_response();
    }

    let (_, session) = state.sessions.create(discovery).await;
    let session = session.lock().await;

    (StatusCode::OK, Json(session_response(&state, &session))).into_response()
}

/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.sessions.get(&session_id).await else {
        return response::not_found("Session not found").into_response();
    };
    let mut session = session.lock().await;
    session.touch();

    (StatusCode::OK, Json(session_response(&state, &session))).into_response()
}

/// DELETE /api/v1/sessions/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if !state.sessions.remove(&session_id).await {
        return response::not_found("Session not found").into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

/// GET /api/v1/sessions/{session_id}/transcript?model=...
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TranscriptQuery>,
) -> Response {
    let session = match resolve(&state, &session_id, &query.model).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let mut session = session.lock().await;
    let messages = session.get_or_init_transcript(&query.model).to_vec();

    let response = TranscriptResponse {
        model: query.model,
        messages,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// DELETE /api/v1/sessions/{session_id}/transcript?model=...
///
/// Refused with 409 while a reply is streaming for the session.
pub async fn clear_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TranscriptQuery>,
) -> Response {
    let session = match resolve(&state, &session_id, &query.model).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let mut session = session.lock().await;
    if session.turn_in_progress() {
        return response::conflict(TURN_IN_PROGRESS_MESSAGE).into_response();
    }
    session.clear(&query.model);

    StatusCode::NO_CONTENT.into_response()
}

/// POST /api/v1/sessions/{session_id}/chat
///
/// SSE endpoint for one chat turn.
///
/// Request body: `{"model": "...", "content": "..."}`
///
/// Events emitted:
/// - `start`: `{}` once the turn is accepted
/// - `token`: `{"content": "..."}` for each streamed fragment
/// - `done`: `{"content": "..."}` with the complete assistant reply
/// - `error`: `{"message": "..."}` when the turn failed; the message is also
///   stored in the transcript
///
/// The turn runs in its own task and finishes even if the client disconnects.
/// A session runs one turn at a time; a second request gets 409 until the
/// first has stored its reply.
pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ChatMessageRequest>,
) -> Response {
    if req.content.trim().is_empty() {
        return response::bad_request("Message content must not be empty").into_response();
    }
    let session = match resolve(&state, &session_id, &req.model).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if session.lock().await.turn_in_progress() {
        return response::conflict(TURN_IN_PROGRESS_MESSAGE).into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let driver = state.driver.clone();
    tokio::spawn(async move {
        let mut sink = ChannelSink { tx: tx.clone() };
        match driver
            .send(&session, &req.model, &req.content, &mut sink)
            .await
        {
            Ok(TurnOutcome::Completed(content)) => {
                let _ = tx.send(SseMessage::Done(content));
            }
            // Already reported through the sink.
            Ok(TurnOutcome::Failed(_)) => {}
            Err(e) => {
                warn!(error = %e, "Chat turn rejected");
                let _ = tx.send(SseMessage::Error(e.to_string()));
            }
        }
    });

    let events = tokio_stream::once(Event::default().event("start").data("{}"))
        .chain(UnboundedReceiverStream::new(rx).map(SseMessage::into_event))
        .map(Ok::<_, Infallible>);

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(events).keep_alive(keep_alive).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

const TURN_IN_PROGRESS_MESSAGE: &str = "A reply is still streaming for this session";

/// Look up a session and check that `model` was discovered.
async fn resolve(
    state: &AppState,
    session_id: &str,
    model: &str,
) -> Result<SharedSession, Response> {
    let Some(session) = state.sessions.get(session_id).await else {
        return Err(response::not_found("Session not found").into_response());
    };
    {
        let mut guard = session.lock().await;
        if guard.discovery().get(model).is_none() {
            return Err(response::not_found(format!("Model '{}' not found", model)).into_response());
        }
        guard.touch();
    }
    Ok(session)
}

fn session_response(state: &AppState, session: &Session) -> SessionResponse {
    SessionResponse {
        session_id: session.id.clone(),
        created_at: session.created_at.to_rfc3339(),
        updated_at: session.updated_at.to_rfc3339(),
        turn: session_turn_state(session),
        models: model_views(state, session.discovery()),
        errors: session.discovery().errors().to_vec(),
    }
}

fn model_views(state: &AppState, discovery: &DiscoveryResult) -> Vec<ModelView> {
    let registry = state.discovery.registry();
    discovery
        .models()
        .iter()
        .map(|model| ModelView {
            id: model.id.clone(),
            display_name: model.display_name.clone(),
            provider: model.provider.clone(),
            provider_description: registry
                .config(&model.provider)
                .map(|c| c.description.clone())
                .unwrap_or_default(),
        })
        .collect()
}

// ============================================================================
// SSE Streaming
// ============================================================================

#[derive(Serialize)]
struct ContentData {
    content: String,
}

#[derive(Serialize)]
struct ErrorData {
    message: String,
}

/// What the chat task sends to the SSE response.
enum SseMessage {
    Token(String),
    Done(String),
    Error(String),
}

impl SseMessage {
    fn into_event(self) -> Event {
        let (name, event) = match self {
            SseMessage::Token(content) => {
                ("token", Event::default().json_data(ContentData { content }))
            }
            SseMessage::Done(content) => {
                ("done", Event::default().json_data(ContentData { content }))
            }
            SseMessage::Error(message) => {
                ("error", Event::default().json_data(ErrorData { message }))
            }
        };
        event
            .map(|e| e.event(name))
            .unwrap_or_else(|_| Event::default().event(name).data("{}"))
    }
}

/// Forwards driver output into the SSE channel.
///
/// Send failures mean the client went away; the turn keeps running regardless.
struct ChannelSink {
    tx: mpsc::UnboundedSender<SseMessage>,
}

impl TokenSink for ChannelSink {
    fn token(&mut self, fragment: &str) {
        let _ = self.tx.send(SseMessage::Token(fragment.to_string()));
    }

    fn error(&mut self, message: &str) {
        let _ = self.tx.send(SseMessage::Error(message.to_string()));
    }
}
