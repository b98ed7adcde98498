//! LLM error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to a provider.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The provider reported an error inside an open stream
    #[error("stream error: {0}")]
    Stream(String),

    /// A response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No stream output arrived within the idle timeout
    #[error("request timed out after {0:?} without output")]
    Timeout(Duration),
}

/// Turn a non-success HTTP response into [`LLMError::Api`].
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(LLMError::Api { status, message })
}
