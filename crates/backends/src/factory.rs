//! Backend construction from configuration.

use std::sync::Arc;

use parley_config::{AppConfig, BackendKind};
use parley_core::backend::Backend;
use parley_core::error::BackendError;
use parley_core::prompt::PromptFormat;
use tracing::debug;

use crate::llama_server::LlamaServerBackend;
use crate::openai_compat::OpenAiCompletionsBackend;
use crate::params::SamplingParams;

/// Base URL used when the config leaves `base_url` unset.
pub fn default_base_url(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Llamacpp => "http://127.0.0.1:8080",
        BackendKind::Openai => "http://127.0.0.1:8080/v1",
    }
}

/// Build the configured backend.
///
/// The template's end-of-turn marker is always a stop sequence, so the
/// model cannot run on into a fabricated next turn.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Backend>, BackendError> {
    let base_url = config
        .base_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| default_base_url(config.backend));

    let terminator = config.agent.template.terminator().trim_end().to_string();
    let params = SamplingParams::from_config(&config.generation).with_stop(terminator);

    debug!(
        backend = config.backend.as_str(),
        base_url = %base_url,
        model = %config.model,
        "Building backend"
    );

    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Llamacpp => {
            Arc::new(LlamaServerBackend::new(base_url, &config.model, params)?)
        }
        BackendKind::Openai => {
            let backend = OpenAiCompletionsBackend::new("openai", base_url, &config.model, params)?;
            match config.api_key.as_deref().filter(|key| !key.is_empty()) {
                Some(key) => Arc::new(backend.with_api_key(key)),
                None => Arc::new(backend),
            }
        }
    };
    Ok(backend)
}
