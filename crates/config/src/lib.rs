//! Configuration loading, validation, and management for parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use parley_core::prompt::ChatTemplate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which inference server protocol to speak
    #[serde(default)]
    pub backend: BackendKind,

    /// Server base URL (defaults per backend when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model name sent to the server
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for servers that require one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling and request settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Agent identity and prompt policy
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Inference server protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// llama.cpp server, native `/completion` endpoint
    #[default]
    Llamacpp,
    /// Any server exposing OpenAI-style `/v1/completions`
    Openai,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llamacpp => "llamacpp",
            Self::Openai => "openai",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "llamacpp" | "llama.cpp" | "llama-server" => Ok(Self::Llamacpp),
            "openai" | "openai-compat" | "ollama" | "vllm" => Ok(Self::Openai),
            other => Err(ConfigError::ValidationError(format!(
                "unknown backend '{other}' (expected llamacpp or openai)"
            ))),
        }
    }
}

fn default_model() -> String {
    "local".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("generation", &self.generation)
            .field("agent", &self.agent)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum tokens generated per turn
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Extra stop sequences (the template terminator is always added)
    #[serde(default)]
    pub stop: Vec<String>,

    /// Tokens generated by a warmup request
    #[serde(default = "default_warmup_tokens")]
    pub warmup_tokens: u32,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.95
}
fn default_warmup_tokens() -> u32 {
    1
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop: Vec::new(),
            warmup_tokens: default_warmup_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Name the agent's turns are tagged with in the prompt
    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default = "default_system_directive")]
    pub system_directive: String,

    #[serde(default)]
    pub template: ChatTemplate,

    /// How many trailing prompt characters are searched for the directive
    #[serde(default = "default_directive_window")]
    pub directive_window: usize,
}

fn default_identity() -> String {
    "Assistant".into()
}
fn default_system_directive() -> String {
    "You are a helpful assistant.".into()
}
fn default_directive_window() -> usize {
    2000
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            system_directive: default_system_directive(),
            template: ChatTemplate::default(),
            directive_window: default_directive_window(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment variables override the file:
    /// `PARLEY_BACKEND`, `PARLEY_BASE_URL`, `PARLEY_MODEL`, `PARLEY_API_KEY`,
    /// `PARLEY_SYSTEM_DIRECTIVE`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(backend) = lookup("PARLEY_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(url) = lookup("PARLEY_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(model) = lookup("PARLEY_MODEL") {
            self.model = model;
        }
        if let Some(key) = lookup("PARLEY_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(directive) = lookup("PARLEY_SYSTEM_DIRECTIVE") {
            self.agent.system_directive = directive;
        }
        self.validate()
    }

    /// Get the configuration directory path (`PARLEY_HOME` wins over `~/.parley`).
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("PARLEY_HOME") {
            return PathBuf::from(dir);
        }
        dirs_home().join(".parley")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let generation = &self.generation;
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if generation.top_p <= 0.0 || generation.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "generation.top_p must be in (0.0, 1.0]".into(),
            ));
        }

        if generation.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "generation.max_tokens must be > 0".into(),
            ));
        }

        if self.agent.directive_window == 0 {
            return Err(ConfigError::ValidationError(
                "agent.directive_window must be > 0".into(),
            ));
        }

        if self.agent.identity.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.identity must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            base_url: None,
            model: default_model(),
            api_key: None,
            generation: GenerationConfig::default(),
            agent: AgentSettings::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, BackendKind::Llamacpp);
        assert_eq!(config.agent.directive_window, 2000);
        assert_eq!(config.agent.template, ChatTemplate::Llama2);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend, config.backend);
        assert_eq!(parsed.agent.identity, config.agent.identity);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.generation.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_directive_window_rejected() {
        let mut config = AppConfig::default();
        config.agent.directive_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.model, "local");
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
backend = "openai"
base_url = "http://127.0.0.1:11434"

[agent]
identity = "Ada"
template = "chatml"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Openai);
        assert_eq!(config.base_url.as_deref(), Some("http://127.0.0.1:11434"));
        assert_eq!(config.agent.identity, "Ada");
        assert_eq!(config.agent.template, ChatTemplate::ChatMl);
        assert_eq!(config.generation.max_tokens, 512);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn overrides_take_priority() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PARLEY_BACKEND", "ollama"),
            ("PARLEY_MODEL", "qwen2:0.5b"),
            ("PARLEY_SYSTEM_DIRECTIVE", "Be terse."),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend, BackendKind::Openai);
        assert_eq!(config.model, "qwen2:0.5b");
        assert_eq!(config.agent.system_directive, "Be terse.");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn unknown_backend_override_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "PARLEY_BACKEND").then(|| "carrier-pigeon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("llamacpp"));
        assert!(toml_str.contains("directive_window = 2000"));
    }

    #[test]
    fn backend_kind_serializes_lowercase() {
        let json = serde_json::to_string(&BackendKind::Openai).unwrap();
        assert_eq!(json, r#""openai""#);
    }
}
