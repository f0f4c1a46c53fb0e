//! Scripted backend for controller tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parley_core::backend::{Backend, CompleteResponse, PartialSink};
use parley_core::error::BackendError;
use tokio::sync::Notify;

/// One scripted `complete()` call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Stream `chunks`, then succeed with `text`.
    Reply { chunks: Vec<String>, text: String },
    /// Stream `chunks`, then wait until interrupted.
    Hang(Vec<String>),
    Fail(BackendError),
}

impl Step {
    pub fn reply(chunks: &[&str]) -> Self {
        Self::Reply {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            text: chunks.concat(),
        }
    }

    pub fn hang(chunks: &[&str]) -> Self {
        Self::Hang(chunks.iter().map(|c| c.to_string()).collect())
    }
}

pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    prompts: Mutex<Vec<String>>,
    warmups: Mutex<Vec<String>>,
    warmup_error: Mutex<Option<BackendError>>,
    interrupted: Notify,
    interrupts: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
            warmups: Mutex::new(Vec::new()),
            warmup_error: Mutex::new(None),
            interrupted: Notify::new(),
            interrupts: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn fail_warmup(self, error: BackendError) -> Self {
        *self.warmup_error.lock().unwrap() = Some(error);
        self
    }

    pub fn heal_warmup(&self) {
        *self.warmup_error.lock().unwrap() = None;
    }

    /// Prompts sent to `complete()`, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn warmups(&self) -> Vec<String> {
        self.warmups.lock().unwrap().clone()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `complete()` calls seen.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Counts a call as active until it returns or is dropped.
struct Active<'a>(&'a ScriptedBackend);

impl<'a> Active<'a> {
    fn enter(backend: &'a ScriptedBackend) -> Self {
        let now = backend.active.fetch_add(1, Ordering::SeqCst) + 1;
        backend.max_active.fetch_max(now, Ordering::SeqCst);
        Self(backend)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn response(text: String) -> CompleteResponse {
    CompleteResponse {
        text,
        tokens_per_second: Some(30.0),
        time_to_first_token_ms: 5,
        model: "scripted".into(),
        prompt_tokens: None,
        completion_tokens: None,
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &str,
        on_partial: PartialSink,
    ) -> Result<CompleteResponse, BackendError> {
        let _active = Active::enter(self);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedBackend exhausted");

        match step {
            Step::Reply { chunks, text } => {
                for chunk in chunks {
                    let _ = on_partial.send(chunk);
                    tokio::task::yield_now().await;
                }
                Ok(response(text))
            }
            Step::Hang(chunks) => {
                let interrupted = self.interrupted.notified();
                for chunk in chunks {
                    let _ = on_partial.send(chunk);
                }
                interrupted.await;
                Err(BackendError::Cancelled)
            }
            Step::Fail(error) => Err(error),
        }
    }

    async fn warmup(&self, prompt: &str) -> Result<CompleteResponse, BackendError> {
        self.warmups.lock().unwrap().push(prompt.to_string());
        match self.warmup_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(response(String::new())),
        }
    }

    async fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.interrupted.notify_waiters();
    }
}
