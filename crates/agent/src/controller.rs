//! The agent controller: one running prompt, one generation at a time.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use parley_config::AppConfig;
use parley_core::agent::{AgentStatus, StatusEvent};
use parley_core::backend::{Backend, CompleteResponse};
use parley_core::error::{BackendError, Error, Result};
use parley_core::event::{AgentEvent, EventBus};
use parley_core::prompt::{ChatTemplate, PromptFormat};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::window::directive_in_window;

/// Default number of trailing prompt characters searched for the directive.
pub const DEFAULT_DIRECTIVE_WINDOW: usize = 2000;

/// Speaker name used when warmup has to seed an empty prompt.
pub const DEFAULT_SPEAKER: &str = "User";

/// Everything an agent is constructed with, apart from its backend.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Caller-assigned handle, also the tag on the agent's turns
    pub identity: String,
    /// Prompt to resume from; empty means seed from the directive on first use
    pub initial_prompt: String,
    pub system_directive: String,
}

/// How a submitted turn ended, short of a backend failure.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(CompleteResponse),
    /// Interrupted; `partial` is what was generated (and kept in the prompt).
    Cancelled { partial: String },
}

impl TurnOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn response(&self) -> Option<&CompleteResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Cancelled { .. } => None,
        }
    }
}

/// What a warmup call did.
#[derive(Debug, Clone, PartialEq)]
pub enum WarmupOutcome {
    Warmed(CompleteResponse),
    /// Nothing to warm with, or a generation already holds the backend.
    Skipped,
    /// Recorded in [`Agent::last_warmup_error`] as well.
    Failed(BackendError),
}

/// A conversational agent driving a single backend.
///
/// All methods take `&self`; share the agent through an `Arc` so that
/// [`Agent::interrupt`] can run while [`Agent::submit_turn`] is awaiting.
pub struct Agent {
    identity: String,
    backend: Arc<dyn Backend>,
    format: Arc<dyn PromptFormat>,
    directive_window: usize,
    event_bus: Arc<EventBus>,

    status: watch::Sender<AgentStatus>,
    running_prompt: watch::Sender<String>,
    pending: watch::Sender<String>,
    system_directive: watch::Sender<String>,
    last_warmup_error: Mutex<Option<BackendError>>,

    /// Held for the whole of every generation, turns and warmups alike
    generation: tokio::sync::Mutex<()>,
    /// Cancels the turn currently in flight
    current_turn: Mutex<Option<CancellationToken>>,
}

impl Agent {
    pub fn new(options: AgentOptions, backend: Arc<dyn Backend>) -> Self {
        let (status, _) = watch::channel(AgentStatus::Cold);
        let (running_prompt, _) = watch::channel(options.initial_prompt);
        let (pending, _) = watch::channel(String::new());
        let (system_directive, _) = watch::channel(options.system_directive);

        Self {
            identity: options.identity,
            backend,
            format: Arc::new(ChatTemplate::default()),
            directive_window: DEFAULT_DIRECTIVE_WINDOW,
            event_bus: Arc::new(EventBus::default()),
            status,
            running_prompt,
            pending,
            system_directive,
            last_warmup_error: Mutex::new(None),
            generation: tokio::sync::Mutex::new(()),
            current_turn: Mutex::new(None),
        }
    }

    /// Build an agent from the `[agent]` section of the config.
    pub fn from_config(config: &AppConfig, backend: Arc<dyn Backend>) -> Self {
        let options = AgentOptions {
            identity: config.agent.identity.clone(),
            initial_prompt: String::new(),
            system_directive: config.agent.system_directive.clone(),
        };
        Self::new(options, backend)
            .with_format(Arc::new(config.agent.template))
            .with_directive_window(config.agent.directive_window)
    }

    /// Use a different prompt format.
    pub fn with_format(mut self, format: Arc<dyn PromptFormat>) -> Self {
        self.format = format;
        self
    }

    /// Set how many trailing characters are searched for the directive.
    pub fn with_directive_window(mut self, chars: usize) -> Self {
        self.directive_window = chars;
        self
    }

    /// Publish events on a shared bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    // --- Observable state ---

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    pub fn pending_output(&self) -> String {
        self.pending.borrow().clone()
    }

    pub fn running_prompt(&self) -> String {
        self.running_prompt.borrow().clone()
    }

    pub fn system_directive(&self) -> String {
        self.system_directive.borrow().clone()
    }

    pub fn last_warmup_error(&self) -> Option<BackendError> {
        self.last_warmup_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AgentStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<String> {
        self.pending.subscribe()
    }

    pub fn subscribe_prompt(&self) -> watch::Receiver<String> {
        self.running_prompt.subscribe()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    // --- Caller mutations ---

    /// Change the directive used from the next turn on.
    pub fn set_system_directive(&self, directive: impl Into<String>) {
        self.system_directive.send_replace(directive.into());
    }

    /// Replace the running prompt, e.g. when switching conversations.
    ///
    /// Rejected while a generation is in flight.
    pub fn reset_prompt(&self, prompt: impl Into<String>) -> Result<()> {
        let Ok(_slot) = self.generation.try_lock() else {
            return Err(Error::Internal(
                "cannot reset the prompt while a generation is in flight".into(),
            ));
        };
        self.running_prompt.send_replace(prompt.into());
        self.pending.send_replace(String::new());
        debug!(agent = %self.identity, "Running prompt reset");
        Ok(())
    }

    // --- Operations ---

    /// Run one turn: extend the prompt, stream the reply, commit it.
    ///
    /// If another generation is in flight it is interrupted first, and this
    /// turn starts once it has ended. Cancellation is reported as
    /// [`TurnOutcome::Cancelled`]; backend failures as errors.
    pub async fn submit_turn(&self, speaker: &str, message: &str) -> Result<TurnOutcome> {
        let _slot = self.acquire_slot().await;

        let turn_id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.set_current_turn(Some(token.clone()));

        if self.transition(StatusEvent::TurnSubmitted).is_none() {
            self.set_current_turn(None);
            return Err(Error::Internal(format!(
                "cannot start a turn while {}",
                self.status()
            )));
        }

        let directive = self.system_directive();
        let (prompt, directive_injected) = self.extend_prompt(speaker, message, &directive);
        self.pending.send_replace(String::new());

        info!(
            agent = %self.identity,
            turn_id = %turn_id,
            speaker = %speaker,
            prompt_chars = prompt.chars().count(),
            directive_injected,
            "Turn started"
        );
        self.event_bus.publish(AgentEvent::TurnStarted {
            agent: self.identity.clone(),
            turn_id,
            speaker: speaker.to_string(),
            directive_injected,
            timestamp: Utc::now(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let completion = self.backend.complete(&prompt, tx);
        tokio::pin!(completion);

        let result = loop {
            tokio::select! {
                biased;
                Some(chunk) = rx.recv() => self.apply_chunk(turn_id, chunk),
                result = &mut completion => break result,
                _ = token.cancelled() => break Err(BackendError::Cancelled),
            }
        };
        while let Ok(chunk) = rx.try_recv() {
            self.apply_chunk(turn_id, chunk);
        }
        self.set_current_turn(None);

        match result {
            Ok(response) => {
                let terminator = self.format.terminator();
                self.running_prompt
                    .send_modify(|prompt| ensure_terminated(prompt, terminator));
                self.pending.send_replace(response.text.clone());
                self.transition(StatusEvent::TurnCompleted);

                info!(
                    agent = %self.identity,
                    turn_id = %turn_id,
                    model = %response.model,
                    chars = response.text.chars().count(),
                    ttft_ms = response.time_to_first_token_ms,
                    tokens_per_second = response.tokens_per_second,
                    "Turn completed"
                );
                self.event_bus.publish(AgentEvent::TurnCompleted {
                    agent: self.identity.clone(),
                    turn_id,
                    response: response.clone(),
                    timestamp: Utc::now(),
                });
                Ok(TurnOutcome::Completed(response))
            }
            Err(BackendError::Cancelled) => {
                let partial = self.pending_output();
                self.transition(StatusEvent::TurnCancelled);

                info!(
                    agent = %self.identity,
                    turn_id = %turn_id,
                    partial_chars = partial.chars().count(),
                    "Turn cancelled"
                );
                self.event_bus.publish(AgentEvent::TurnCancelled {
                    agent: self.identity.clone(),
                    turn_id,
                    partial: partial.clone(),
                    timestamp: Utc::now(),
                });
                Ok(TurnOutcome::Cancelled { partial })
            }
            Err(e) => {
                self.transition(StatusEvent::TurnFailed);

                warn!(agent = %self.identity, turn_id = %turn_id, error = %e, "Turn failed");
                self.event_bus.publish(AgentEvent::TurnFailed {
                    agent: self.identity.clone(),
                    turn_id,
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e.into())
            }
        }
    }

    /// Prime the backend with the current prompt.
    ///
    /// An empty prompt is seeded from the directive first; with no directive
    /// either there is nothing to warm with. Failures are recorded in
    /// [`Agent::last_warmup_error`], never returned as errors.
    pub async fn warmup(&self) -> WarmupOutcome {
        self.set_warmup_error(None);
        let Ok(_slot) = self.generation.try_lock() else {
            debug!(agent = %self.identity, "Generation in flight, skipping warmup");
            return WarmupOutcome::Skipped;
        };

        let directive = self.system_directive();
        let mut prompt = self.running_prompt();
        if prompt.is_empty() {
            if directive.is_empty() {
                debug!(agent = %self.identity, "Empty prompt and directive, nothing to warm");
                return WarmupOutcome::Skipped;
            }
            prompt = self.format.seed(&directive, DEFAULT_SPEAKER, &self.identity);
            self.running_prompt.send_replace(prompt.clone());
            debug!(agent = %self.identity, "Seeded prompt for warmup");
        }

        info!(
            agent = %self.identity,
            backend = %self.backend.name(),
            prompt_chars = prompt.chars().count(),
            "Warming up"
        );

        match self.backend.warmup(&prompt).await {
            Ok(response) => {
                self.transition(StatusEvent::WarmupSucceeded);
                info!(agent = %self.identity, model = %response.model, "Warmup complete");
                self.event_bus.publish(AgentEvent::WarmupCompleted {
                    agent: self.identity.clone(),
                    model: response.model.clone(),
                    timestamp: Utc::now(),
                });
                WarmupOutcome::Warmed(response)
            }
            Err(e) => {
                self.transition(StatusEvent::WarmupFailed);
                self.set_warmup_error(Some(e.clone()));
                warn!(agent = %self.identity, error = %e, "Warmup failed");
                self.event_bus.publish(AgentEvent::WarmupFailed {
                    agent: self.identity.clone(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                WarmupOutcome::Failed(e)
            }
        }
    }

    /// Ask the in-flight turn to stop. A no-op unless a turn is processing.
    ///
    /// Returns immediately; the turn itself performs the state cleanup.
    pub async fn interrupt(&self) {
        if !self.status().is_processing() {
            debug!(agent = %self.identity, status = %self.status(), "Nothing to interrupt");
            return;
        }

        info!(agent = %self.identity, "Interrupting in-flight turn");
        if let Some(token) = self
            .current_turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            token.cancel();
        }
        self.backend.interrupt().await;
    }

    // --- Internals ---

    /// Take the generation slot, interrupting a turn that holds it.
    async fn acquire_slot(&self) -> tokio::sync::MutexGuard<'_, ()> {
        if let Ok(slot) = self.generation.try_lock() {
            return slot;
        }
        info!(agent = %self.identity, "Turn submitted while busy, interrupting");
        self.interrupt().await;
        self.generation.lock().await
    }

    /// Seed, terminate, and append the new turn. Returns the full prompt and
    /// whether the directive block was re-emitted.
    fn extend_prompt(&self, speaker: &str, message: &str, directive: &str) -> (String, bool) {
        let terminator = self.format.terminator();
        let mut seeded = false;
        let mut injected = false;

        self.running_prompt.send_modify(|prompt| {
            if prompt.is_empty() {
                *prompt = self.format.seed(directive, speaker, &self.identity);
                seeded = true;
            }
            ensure_terminated(prompt, terminator);

            injected = !directive_in_window(prompt, directive, self.directive_window);
            let turn = self
                .format
                .turn(speaker, message, &self.identity, injected.then_some(directive));
            prompt.push_str(&turn);
        });

        debug!(
            agent = %self.identity,
            seeded,
            directive_injected = injected,
            window = self.directive_window,
            "Prompt extended"
        );
        (self.running_prompt(), injected)
    }

    fn apply_chunk(&self, turn_id: Uuid, chunk: String) {
        self.running_prompt.send_modify(|prompt| prompt.push_str(&chunk));
        self.pending.send_modify(|pending| pending.push_str(&chunk));
        self.event_bus.publish(AgentEvent::Chunk {
            turn_id,
            content: chunk,
        });
    }

    /// Apply a status event, publishing the change. `None` if it was invalid.
    fn transition(&self, event: StatusEvent) -> Option<AgentStatus> {
        let from = self.status();
        let Some(to) = from.next(event) else {
            warn!(agent = %self.identity, status = %from, ?event, "Ignoring invalid status event");
            return None;
        };

        if to != from {
            self.status.send_replace(to);
            debug!(agent = %self.identity, from = %from, to = %to, "Status changed");
            self.event_bus.publish(AgentEvent::StatusChanged {
                agent: self.identity.clone(),
                from,
                to,
                timestamp: Utc::now(),
            });
        }
        Some(to)
    }

    fn set_current_turn(&self, token: Option<CancellationToken>) {
        *self
            .current_turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn set_warmup_error(&self, error: Option<BackendError>) {
        *self
            .last_warmup_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Close the last turn, completing a terminator whose trailing whitespace
/// was trimmed off.
fn ensure_terminated(prompt: &mut String, terminator: &str) {
    if prompt.is_empty() || prompt.ends_with(terminator) {
        return;
    }
    let marker = terminator.trim_end();
    if !marker.is_empty() && prompt.ends_with(marker) {
        prompt.push_str(&terminator[marker.len()..]);
    } else {
        prompt.push_str(terminator);
    }
}
