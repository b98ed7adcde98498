//! OpenAI-compatible LLM provider.
//!
//! Works with Ollama, Docker Model Runner, and anything else exposing the
//! `/models` and `/chat/completions` endpoints.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;

use super::error::{LLMError, check_response};
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatStream, Message, ModelInfo, ModelList, StreamEvent};

/// OpenAI-compatible provider.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let url = format!("{}/models", self.base_url);

        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = check_response(response).await?;

        let body = response.bytes().await?;
        let list: ModelList = serde_json::from_slice(&body)
            .map_err(|e| LLMError::InvalidResponse(format!("malformed model list: {e}")))?;

        Ok(list.into_models())
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let url = format!("{}/chat/completions", self.base_url);

        let stream_request = StreamRequest {
            model: request.model,
            messages: request.messages,
            stream: true,
        };

        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");

        let response = self.authorize(req).json(&stream_request).send().await?;
        let response = check_response(response).await?;

        Ok(Box::pin(StreamParser::new(response.bytes_stream())))
    }
}

// --- Streaming types ---

#[derive(serde::Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

/// Turns an SSE byte stream into [`StreamEvent`]s.
///
/// Lines are split on raw bytes so multi-byte characters cut across network
/// chunks survive intact.
struct StreamParser<S> {
    inner: S,
    buffer: Vec<u8>,
    eof: bool,
    done: bool,
}

impl<S> StreamParser<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            eof: false,
            done: false,
        }
    }
}

impl<S> Stream for StreamParser<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
                match parse_line(&line) {
                    Some(Ok(StreamEvent::Done)) => {
                        self.done = true;
                        return Poll::Ready(Some(Ok(StreamEvent::Done)));
                    }
                    Some(Err(e)) => {
                        self.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Some(event) => return Poll::Ready(Some(event)),
                    None => continue,
                }
            }

            // Providers that close the connection without `[DONE]` still end cleanly.
            if self.eof {
                self.done = true;
                return Poll::Ready(Some(Ok(StreamEvent::Done)));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => {
                    self.eof = true;
                    if !self.buffer.is_empty() {
                        self.buffer.push(b'\n');
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Parse one SSE line. Returns `None` for lines that carry no event.
fn parse_line(line: &[u8]) -> Option<Result<StreamEvent, LLMError>> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Some(Err(LLMError::InvalidResponse(format!(
                "malformed stream chunk: {e}"
            ))));
        }
    };

    if let Some(error) = chunk.error {
        return Some(Err(LLMError::Stream(error.message)));
    }

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(|content| Ok(StreamEvent::Token(content)))
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use futures::StreamExt;
    use serde_json::{Value, json};

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"index": 0, "delta": {"content": content}}]})
        )
    }

    async fn collect(parts: &[&'static [u8]]) -> Vec<Result<StreamEvent, LLMError>> {
        let inner = futures::stream::iter(
            parts
                .iter()
                .copied()
                .map(|p| Ok::<_, reqwest::Error>(Bytes::from_static(p))),
        );
        StreamParser::new(inner).collect().await
    }

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[test]
    fn parse_line_ignores_comments_and_blank_lines() {
        assert!(parse_line(b"\n").is_none());
        assert!(parse_line(b": keep-alive\n").is_none());
        assert!(parse_line(b"event: message\n").is_none());
    }

    #[test]
    fn parse_line_skips_role_only_delta() {
        let line = br#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn parse_line_reports_provider_error() {
        let line = br#"data: {"error":{"message":"model is loading"}}"#;
        let err = parse_line(line).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "stream error: model is loading");
    }

    #[test]
    fn parse_line_rejects_malformed_json() {
        let err = parse_line(b"data: {not json").unwrap().unwrap_err();
        assert!(matches!(err, LLMError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn parser_yields_tokens_then_done() {
        let events = collect(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;

        let events: Vec<StreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Hi".to_string()),
                StreamEvent::Token(" there".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn parser_joins_lines_split_across_chunks() {
        // "é" is 0xC3 0xA9; split it between two network reads.
        let events = collect(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xC3",
            b"\xA9\"}}]}\n",
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Token("café".to_string())
        );
        assert_eq!(events[1].as_ref().unwrap(), &StreamEvent::Done);
    }

    #[tokio::test]
    async fn parser_flushes_trailing_line_without_newline() {
        let events = collect(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}"])
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Token("end".to_string())
        );
    }

    #[tokio::test]
    async fn parser_stops_after_error() {
        let events = collect(&[
            b"data: {\"error\":{\"message\":\"boom\"}}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ])
        .await;

        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }

    #[tokio::test]
    async fn list_models_sends_bearer_and_parses_ids() {
        let router = Router::new().route(
            "/v1/models",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer ollama" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
                }
                (
                    StatusCode::OK,
                    Json(json!({"object": "list", "data": [{"id": "llama3"}, {"id": "qwen2"}]})),
                )
            }),
        );
        let base_url = serve(router).await;

        let provider =
            OpenAICompatibleProvider::new(Client::new(), base_url, Some("ollama".to_string()));
        let models = provider.list_models().await.unwrap();

        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["llama3", "qwen2"]);
    }

    #[tokio::test]
    async fn list_models_maps_error_status() {
        let router = Router::new().route(
            "/v1/models",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "engine offline") }),
        );
        let base_url = serve(router).await;

        let provider = OpenAICompatibleProvider::new(Client::new(), base_url, None);
        let err = provider.list_models().await.unwrap_err();

        match err {
            LLMError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "engine offline");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn list_models_null_data_means_no_models() {
        let router = Router::new().route(
            "/v1/models",
            get(|| async { Json(json!({"object": "list", "data": null})) }),
        );
        let base_url = serve(router).await;

        let provider = OpenAICompatibleProvider::new(Client::new(), base_url, None);
        let models = provider.list_models().await.unwrap();

        assert!(models.is_empty());
    }

    #[tokio::test]
    async fn list_models_rejects_malformed_body() {
        let router = Router::new().route("/v1/models", get(|| async { "not json" }));
        let base_url = serve(router).await;

        let provider = OpenAICompatibleProvider::new(Client::new(), base_url, None);
        let err = provider.list_models().await.unwrap_err();

        assert!(matches!(err, LLMError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn list_models_unreachable_is_request_error() {
        let provider = OpenAICompatibleProvider::new(
            Client::new(),
            "http://127.0.0.1:1/v1".to_string(),
            None,
        );
        let err = provider.list_models().await.unwrap_err();

        assert!(matches!(err, LLMError::Request(_)));
    }

    #[tokio::test]
    async fn chat_stream_posts_transcript_and_streams_tokens() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "llama3");
                assert_eq!(body["stream"], true);
                assert_eq!(body["messages"][0]["role"], "user");
                assert_eq!(body["messages"][0]["content"], "hello");

                let mut sse = String::new();
                for part in ["Hi", " there", "!"] {
                    sse.push_str(&chunk(part));
                }
                sse.push_str("data: [DONE]\n\n");
                ([("content-type", "text/event-stream")], sse)
            }),
        );
        let base_url = serve(router).await;

        let provider = OpenAICompatibleProvider::new(Client::new(), base_url, None);
        let request = ChatRequest {
            model: "llama3".to_string(),
            messages: vec![Message::user("hello")],
        };
        let stream = provider.chat_stream(request).await.unwrap();
        let events: Vec<StreamEvent> = stream.map(Result::unwrap).collect().await;

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t.as_str()),
                StreamEvent::Done => None,
            })
            .collect();
        assert_eq!(text, "Hi there!");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn chat_stream_maps_error_status() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::NOT_FOUND, "model \"nope\" not found") }),
        );
        let base_url = serve(router).await;

        let provider = OpenAICompatibleProvider::new(Client::new(), base_url, None);
        let request = ChatRequest {
            model: "nope".to_string(),
            messages: vec![Message::user("hello")],
        };
        let err = match provider.chat_stream(request).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };

        assert!(matches!(err, LLMError::Api { status: 404, .. }));
    }
}
