//! Single in-flight request bookkeeping and interrupt delivery.
//!
//! Every completion registers a fresh [`CancellationToken`]. `interrupt()`
//! cancels whatever token is registered at that moment, so a late interrupt
//! can never reach a request that started afterwards.

use parley_core::error::BackendError;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct InFlight {
    current: Mutex<Option<CancellationToken>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request, or fail with `Busy` if one is outstanding.
    pub fn begin(&self) -> Result<InFlightGuard<'_>, BackendError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            return Err(BackendError::Busy);
        }
        let token = CancellationToken::new();
        *current = Some(token.clone());
        Ok(InFlightGuard { owner: self, token })
    }

    /// Cancel the registered request. Returns whether there was one.
    pub fn interrupt(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Clears the registration when the request ends, on every exit path.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    token: CancellationToken,
}

impl InFlightGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut current = self
            .owner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = None;
    }
}
