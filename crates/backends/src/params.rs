//! Sampling settings shared by every backend.

use parley_config::GenerationConfig;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
    pub warmup_tokens: u32,
    pub timeout: Duration,
}

impl SamplingParams {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop: config.stop.clone(),
            warmup_tokens: config.warmup_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Add a stop sequence unless it is already present.
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        let stop = stop.into();
        if !stop.is_empty() && !self.stop.contains(&stop) {
            self.stop.push(stop);
        }
        self
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}
