//! The agent controller, the heart of parley.
//!
//! An [`Agent`] owns one model-formatted running prompt and takes turns:
//!
//! 1. **Listen**: the status flips to processing before anything else
//! 2. **Think**: the prompt is seeded if empty, closed with the terminator,
//!    and extended with the new turn (re-emitting the system directive when
//!    it has scrolled out of the recent window)
//! 3. **Respond**: chunks stream into the prompt and the pending output
//! 4. **Commit**: the final text is returned for the caller to persist
//!
//! At most one generation runs per agent. A turn submitted while another is
//! in flight interrupts it and starts once it has ended.

pub mod controller;
pub mod window;

#[cfg(test)]
mod test_helpers;

pub use controller::{
    Agent, AgentOptions, DEFAULT_DIRECTIVE_WINDOW, DEFAULT_SPEAKER, TurnOutcome, WarmupOutcome,
};
pub use window::directive_in_window;
