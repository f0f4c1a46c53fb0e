//! Backend trait: the abstraction over a local inference server.
//!
//! A Backend takes a fully formatted prompt, streams the generated text back
//! chunk by chunk, and returns the complete text with timing metadata.
//! Implementations: llama.cpp server, OpenAI-compatible text completions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BackendError;

/// Where a backend delivers partial text while a completion is running.
///
/// Chunks are sent in generation order and never overlap. Their
/// concatenation equals [`CompleteResponse::text`].
pub type PartialSink = mpsc::UnboundedSender<String>;

/// A finished completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteResponse {
    /// The full generated text
    pub text: String,

    /// Generation speed, when the server reports enough to compute it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,

    /// Wall-clock time from sending the request to the first chunk
    pub time_to_first_token_ms: u64,

    /// Which model actually served the request
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

/// The core Backend trait.
///
/// One instance serves one in-flight `complete()` at a time; a second call
/// while one is outstanding fails with [`BackendError::Busy`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g., "llamacpp").
    fn name(&self) -> &str;

    /// Run a completion, pushing chunks into `on_partial` as they arrive.
    ///
    /// Resolves to [`BackendError::Cancelled`] when `interrupt()` was called
    /// while this request was in flight.
    async fn complete(
        &self,
        prompt: &str,
        on_partial: PartialSink,
    ) -> Result<CompleteResponse, BackendError>;

    /// Prime the server with `prompt` and throw the output away.
    ///
    /// Default implementation runs a normal completion into a discarded sink.
    async fn warmup(&self, prompt: &str) -> Result<CompleteResponse, BackendError> {
        let (tx, _rx) = mpsc::unbounded_channel();
        self.complete(prompt, tx).await
    }

    /// Request cancellation of the in-flight completion, if any.
    ///
    /// Idempotent; a no-op when nothing is running.
    async fn interrupt(&self);

    /// Health check: can we reach the server?
    async fn health_check(&self) -> Result<bool, BackendError> {
        Ok(true)
    }
}
