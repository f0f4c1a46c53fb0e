//! # parley core
//!
//! Domain types, traits, and error definitions for the parley agent controller.
//! This crate has **no HTTP or runtime wiring**: it defines the model
//! that the backend and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! The inference server is reached only through the [`Backend`] trait, and the
//! prompt text only through [`PromptFormat`]. This enables:
//! - Swapping the inference server via configuration
//! - Testing the controller with scripted backends
//! - Changing model families without touching the turn protocol

pub mod agent;
pub mod backend;
pub mod error;
pub mod event;
pub mod prompt;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentStatus, StatusEvent};
pub use backend::{Backend, CompleteResponse, PartialSink};
pub use error::{BackendError, Error, Result};
pub use event::{AgentEvent, EventBus};
pub use prompt::{ChatTemplate, PromptFormat};
