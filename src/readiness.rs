//! Bounded-deadline readiness signaling for an externally loaded vision
//! backend.
//!
//! Some host applications load their vision implementation asynchronously
//! (native library init, model files). [`ReadinessGate`] lets the loader
//! signal readiness once and lets consumers block with a deadline instead
//! of busy-polling; a gate that never becomes ready resolves to an explicit
//! error.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// One-shot readiness flag with condition-variable waiting.
///
/// Clones share the same underlying flag.
#[derive(Clone, Default)]
pub struct ReadinessGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ReadinessGate {
    /// Create a gate in the not-ready state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal readiness. Idempotent; wakes every waiter.
    pub fn mark_ready(&self) {
        let (lock, condvar) = &*self.inner;
        let mut ready = lock.lock().expect("readiness lock poisoned");
        *ready = true;
        condvar.notify_all();
    }

    /// Whether the gate has been marked ready.
    pub fn is_ready(&self) -> bool {
        *self.inner.0.lock().expect("readiness lock poisoned")
    }

    /// Block until the gate is ready or the timeout elapses.
    ///
    /// # Errors
    /// [`Error::BackendUnavailable`] when the deadline passes first — the
    /// terminal "never became ready" state.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let (lock, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;

        let mut ready = lock.lock().expect("readiness lock poisoned");
        while !*ready {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::BackendUnavailable(format!(
                    "backend not ready within {:?}",
                    timeout
                )));
            }
            let (guard, _result) = condvar
                .wait_timeout(ready, deadline - now)
                .expect("readiness lock poisoned");
            ready = guard;
        }

        Ok(())
    }
}
