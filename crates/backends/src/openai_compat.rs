//! OpenAI-compatible text completions backend.
//!
//! Works with: Ollama, vLLM, llama.cpp (`/v1`), LM Studio, and any server
//! exposing `/v1/completions`. The prompt is sent raw; chat formatting is
//! already done by the agent.

use async_trait::async_trait;
use parley_core::backend::{Backend, CompleteResponse, PartialSink};
use parley_core::error::BackendError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::in_flight::InFlight;
use crate::params::SamplingParams;
use crate::stream::{self, ChunkTimer, Flow};

/// An OpenAI-compatible completions backend.
pub struct OpenAiCompletionsBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    params: SamplingParams,
    client: reqwest::Client,
    in_flight: InFlight,
}

impl OpenAiCompletionsBackend {
    /// Create a backend. `base_url` includes the version prefix
    /// (e.g. `http://localhost:11434/v1`).
    pub fn new(
        name: impl Into<String>,
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
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            params,
            client,
            in_flight: InFlight::new(),
        })
    }

    /// Create an Ollama backend (convenience constructor).
    pub fn ollama(
        base_url: Option<&str>,
        model: impl Into<String>,
        params: SamplingParams,
    ) -> Result<Self, BackendError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            model,
            params,
        )
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn request_body(&self, prompt: &str, max_tokens: u32) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": max_tokens,
            "temperature": self.params.temperature,
            "top_p": self.params.top_p,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !self.params.stop.is_empty() {
            body["stop"] = serde_json::json!(self.params.stop);
        }
        body
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn run(
        &self,
        prompt: &str,
        max_tokens: u32,
        on_partial: &PartialSink,
    ) -> Result<CompleteResponse, BackendError> {
        let guard = self.in_flight.begin()?;
        let token = guard.token();
        let url = format!("{}/completions", self.base_url);

        debug!(
            backend = %self.name,
            model = %self.model,
            prompt_chars = prompt.len(),
            "Sending completion request"
        );

        let mut timer = ChunkTimer::start();
        let request = self
            .authorized(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&self.request_body(prompt, max_tokens));
        let response = stream::send(request, token).await?;

        let mut text = String::new();
        let mut model: Option<String> = None;
        let mut usage: Option<ApiUsage> = None;

        stream::drive(response, token, |data| {
            let chunk: StreamResponse = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    trace!(
                        backend = %self.name,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                    return Ok(Flow::Continue);
                }
            };

            if let Some(error) = chunk.error {
                return Err(BackendError::Api {
                    status_code: 500,
                    message: error.message,
                });
            }

            if model.is_none() {
                model = chunk.model.filter(|m| !m.is_empty());
            }

            for choice in chunk.choices {
                if !choice.text.is_empty() {
                    timer.mark_chunk();
                    text.push_str(&choice.text);
                    let _ = on_partial.send(choice.text);
                }
            }

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            Ok(Flow::Continue)
        })
        .await?;

        let completion_tokens = usage.as_ref().map(|u| u.completion_tokens);
        let tokens_per_second = match (completion_tokens, timer.generation_time()) {
            (Some(tokens), Some(elapsed)) if tokens > 0 && !elapsed.is_zero() => {
                Some(f64::from(tokens) / elapsed.as_secs_f64())
            }
            _ => None,
        };

        Ok(CompleteResponse {
            text,
            tokens_per_second,
            time_to_first_token_ms: timer.time_to_first_token().as_millis() as u64,
            model: model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens,
        })
    }
}

#[async_trait]
impl Backend for OpenAiCompletionsBackend {
    fn name(&self) -> &str {
        &self.name
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
        self.run(prompt, self.params.warmup_tokens.max(1), &tx).await
    }

    async fn interrupt(&self) {
        if self.in_flight.interrupt() {
            info!(backend = %self.name, "Interrupt requested");
        }
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(stream::map_transport)?;
        Ok(response.status().is_success())
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::response::sse::{Event, Sse};
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::stream::{self as fstream, Stream};
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    async fn completions(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        captured.lock().unwrap().push((auth, body));

        let payloads = vec![
            r#"{"model":"qwen2:0.5b","choices":[{"text":"Hi","index":0,"finish_reason":null}]}"#.to_string(),
            r#"{"model":"qwen2:0.5b","choices":[{"text":" there","index":0,"finish_reason":"stop"}]}"#.to_string(),
            r#"{"model":"qwen2:0.5b","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}"#.to_string(),
            "[DONE]".to_string(),
        ];
        Sse::new(fstream::iter(
            payloads.into_iter().map(|p| Ok(Event::default().data(p))),
        ))
    }

    #[test]
    fn ollama_constructor() {
        let backend =
            OpenAiCompletionsBackend::ollama(None, "llama3", SamplingParams::default()).unwrap();
        assert_eq!(backend.name(), "ollama");
        assert!(backend.base_url.contains("localhost:11434"));
    }

    #[test]
    fn request_body_includes_stop_only_when_set() {
        let backend =
            OpenAiCompletionsBackend::new("vllm", "http://x/v1", "m", SamplingParams::default())
                .unwrap();
        let body = backend.request_body("p", 16);
        assert_eq!(body["max_tokens"], 16);
        assert!(body.get("stop").is_none());

        let backend = OpenAiCompletionsBackend::new(
            "vllm",
            "http://x/v1",
            "m",
            SamplingParams::default().with_stop("<|im_end|>"),
        )
        .unwrap();
        assert_eq!(backend.request_body("p", 16)["stop"][0], "<|im_end|>");
    }

    #[tokio::test]
    async fn streams_text_and_usage() {
        let captured = Captured::default();
        let app = Router::new()
            .route("/v1/completions", post(completions))
            .with_state(captured.clone());
        let base = spawn_server(app).await;

        let backend =
            OpenAiCompletionsBackend::new("openai", &base, "local", SamplingParams::default())
                .unwrap()
                .with_api_key("sk-local");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let response = backend.complete("prompt", tx).await.unwrap();

        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.concat(), "Hi there");
        assert_eq!(response.text, "Hi there");
        assert_eq!(response.model, "qwen2:0.5b");
        assert_eq!(response.prompt_tokens, Some(9));
        assert_eq!(response.completion_tokens, Some(2));

        let (auth, body) = captured.lock().unwrap()[0].clone();
        assert_eq!(auth.as_deref(), Some("Bearer sk-local"));
        assert_eq!(body["prompt"], "prompt");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn parse_usage_only_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.choices.is_empty());
        assert_eq!(parsed.usage.unwrap().completion_tokens, 5);
    }

    #[test]
    fn parse_error_chunk() {
        let data = r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.error.unwrap().message, "model not found");
    }
}
