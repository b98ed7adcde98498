//! In-memory provider for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;

use super::error::LLMError;
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatStream, ModelInfo, StreamEvent};

type ErrorFn = Box<dyn Fn() -> LLMError + Send + Sync>;

/// Scripted provider: fixed model list, fixed reply fragments.
#[derive(Default)]
pub(crate) struct MockProvider {
    models: Mutex<Vec<String>>,
    list_error: Option<String>,
    fragments: Vec<String>,
    fail_request: Option<ErrorFn>,
    fail_mid_stream: Option<ErrorFn>,
    stall: bool,
    list_calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn with_models(ids: &[&str]) -> Self {
        Self {
            models: Mutex::new(ids.iter().map(|id| id.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn unreachable(message: &str) -> Self {
        Self {
            list_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn replying(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn failing_request(mut self, error: impl Fn() -> LLMError + Send + Sync + 'static) -> Self {
        self.fail_request = Some(Box::new(error));
        self
    }

    pub fn failing_mid_stream(
        mut self,
        error: impl Fn() -> LLMError + Send + Sync + 'static,
    ) -> Self {
        self.fail_mid_stream = Some(Box::new(error));
        self
    }

    /// Emit the fragments, then never produce another event.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn set_models(&self, ids: &[&str]) {
        *self.models.lock().unwrap() = ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref message) = self.list_error {
            return Err(LLMError::Stream(message.clone()));
        }
        Ok(self
            .models
            .lock()
            .unwrap()
            .iter()
            .map(|id| ModelInfo { id: id.clone() })
            .collect())
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        self.requests.lock().unwrap().push(request);
        if let Some(ref error) = self.fail_request {
            return Err(error());
        }

        let mut events: Vec<Result<StreamEvent, LLMError>> = self
            .fragments
            .iter()
            .map(|f| Ok(StreamEvent::Token(f.clone())))
            .collect();
        if let Some(ref error) = self.fail_mid_stream {
            events.push(Err(error()));
        }

        let head = futures::stream::iter(events);
        if self.stall {
            return Ok(Box::pin(head.chain(futures::stream::pending())));
        }
        Ok(Box::pin(
            head.chain(futures::stream::once(async { Ok(StreamEvent::Done) })),
        ))
    }
}
