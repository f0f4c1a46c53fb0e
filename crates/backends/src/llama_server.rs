//! llama.cpp server backend.
//!
//! Talks to the native `POST /completion` endpoint of `llama-server` with
//! `stream: true`. Each SSE event carries a `content` fragment; the last one
//! has `stop: true` plus the model name, token counts, and timings.
//!
//! # Example
//! ```bash
//! llama-server -m tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf --port 8080
//! parley chat
//! ```

use async_trait::async_trait;
use parley_core::backend::{Backend, CompleteResponse, PartialSink};
use parley_core::error::BackendError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::in_flight::InFlight;
use crate::params::SamplingParams;
use crate::stream::{self, ChunkTimer, Flow};

/// A backend driving a llama.cpp `llama-server` process.
pub struct LlamaServerBackend {
    base_url: String,
    model: String,
    params: SamplingParams,
    client: reqwest::Client,
    in_flight: InFlight,
}

impl LlamaServerBackend {
    /// Create a backend for the server at `base_url` (e.g. `http://127.0.0.1:8080`).
    ///
    /// `model` labels responses when the server does not report its own.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        params: SamplingParams,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(params.timeout)
            .build()
            .map_err(|e| BackendError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            params,
            client,
            in_flight: InFlight::new(),
        })
    }

    fn request_body(&self, prompt: &str, n_predict: u32) -> serde_json::Value {
        serde_json::json!({
            "prompt": prompt,
            "n_predict": n_predict,
            "temperature": self.params.temperature,
            "top_p": self.params.top_p,
            "stop": self.params.stop,
            "stream": true,
            "cache_prompt": true,
        })
    }

    async fn run(
        &self,
        prompt: &str,
        n_predict: u32,
        on_partial: &PartialSink,
    ) -> Result<CompleteResponse, BackendError> {
        let guard = self.in_flight.begin()?;
        let token = guard.token();
        let url = format!("{}/completion", self.base_url);

        debug!(
            url = %url,
            prompt_chars = prompt.len(),
            n_predict,
            "Sending completion request"
        );

        let mut timer = ChunkTimer::start();
        let request = self.client.post(&url).json(&self.request_body(prompt, n_predict));
        let response = stream::send(request, token).await?;

        let mut text = String::new();
        let mut last: Option<LlamaChunk> = None;

        stream::drive(response, token, |data| {
            let mut chunk: LlamaChunk = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                    return Ok(Flow::Continue);
                }
            };

            if let Some(error) = chunk.error.take() {
                return Err(BackendError::Api {
                    status_code: error.code.unwrap_or(500),
                    message: error.message.unwrap_or_else(|| "unknown server error".into()),
                });
            }

            if !chunk.content.is_empty() {
                timer.mark_chunk();
                let content = std::mem::take(&mut chunk.content);
                text.push_str(&content);
                let _ = on_partial.send(content);
            }

            if chunk.stop {
                last = Some(chunk);
                return Ok(Flow::Stop);
            }
            Ok(Flow::Continue)
        })
        .await?;

        let Some(last) = last else {
            debug!("Stream ended without a final event");
            return Ok(CompleteResponse {
                text,
                tokens_per_second: None,
                time_to_first_token_ms: timer.time_to_first_token().as_millis() as u64,
                model: self.model.clone(),
                prompt_tokens: None,
                completion_tokens: None,
            });
        };

        Ok(CompleteResponse {
            text,
            tokens_per_second: last.timings.and_then(|t| t.predicted_per_second),
            time_to_first_token_ms: timer.time_to_first_token().as_millis() as u64,
            model: last
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.model.clone()),
            prompt_tokens: last.tokens_evaluated,
            completion_tokens: last.tokens_predicted,
        })
    }
}

#[async_trait]
impl Backend for LlamaServerBackend {
    fn name(&self) -> &str {
        "llamacpp"
    }

    async fn complete(
        &self,
        prompt: &str,
        on_partial: PartialSink,
    ) -> Result<CompleteResponse, BackendError> {
        self.run(prompt, self.params.max_tokens, &on_partial).await
    }

    async fn warmup(&self, prompt: &str) -> Result<CompleteResponse, BackendError> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        self.run(prompt, self.params.warmup_tokens, &tx).await
    }

    async fn interrupt(&self) {
        if self.in_flight.interrupt() {
            info!(backend = "llamacpp", "Interrupt requested");
        }
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(stream::map_transport)?;
        Ok(response.status().is_success())
    }
}

// --- llama.cpp server types (internal) ---

#[derive(Debug, Deserialize)]
struct LlamaChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tokens_predicted: Option<u32>,
    #[serde(default)]
    tokens_evaluated: Option<u32>,
    #[serde(default)]
    timings: Option<LlamaTimings>,
    #[serde(default)]
    error: Option<LlamaError>,
}

#[derive(Debug, Deserialize)]
struct LlamaTimings {
    #[serde(default)]
    predicted_per_second: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LlamaError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}
