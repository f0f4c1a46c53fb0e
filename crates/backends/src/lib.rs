//! Inference server backends for Parley.
//!
//! All backends implement the `parley_core::Backend` trait and share the
//! SSE decoder and the single in-flight request bookkeeping.

pub mod factory;
pub mod in_flight;
pub mod llama_server;
pub mod openai_compat;
pub mod params;
pub mod stream;

pub use factory::{build_from_config, default_base_url};
pub use llama_server::LlamaServerBackend;
pub use openai_compat::OpenAiCompletionsBackend;
pub use params::SamplingParams;
