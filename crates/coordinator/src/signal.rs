//! Abort controllers, abort signals, and the coordinator's pending-controller
//! slot.
//!
//! [`AbortController`] is the write side (it can abort) and [`AbortSignal`]
//! the read side handed to transports. Both wrap a
//! [`tokio_util::sync::CancellationToken`]; aborting is permanent.

use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owner of an abort signal.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    /// Creates an unsignaled controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the read side of this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }

    /// Signals abort. Calling this more than once has no further effect.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Returns `true` once [`abort`](Self::abort) has been called.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Read-only view of an [`AbortController`] that transports observe.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    /// Returns `true` once the owning controller has aborted.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the owning controller aborts; immediately if it already
    /// has.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}

// ---------------------------------------------------------------------------
// Pending-controller slot
// ---------------------------------------------------------------------------

/// Holds at most one pending controller so callers can obtain a signal before
/// they build the call that will use it.
#[derive(Debug, Default)]
pub struct SignalSlot {
    pending: Mutex<Option<AbortController>>,
}

impl SignalSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending controller, creating a fresh one if the slot is
    /// empty or its controller has already aborted.
    pub fn controller(&self) -> AbortController {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_ref() {
            Some(controller) if !controller.is_aborted() => controller.clone(),
            _ => {
                let fresh = AbortController::new();
                *pending = Some(fresh.clone());
                fresh
            }
        }
    }

    /// Shorthand for `controller().signal()`.
    pub fn signal(&self) -> AbortSignal {
        self.controller().signal()
    }

    /// Takes the pending controller (or a fresh one) for a submission and
    /// empties the slot, so the next query manufactures a new controller.
    pub fn claim(&self) -> AbortController {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .take()
            .filter(|controller| !controller.is_aborted())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// External abort bridge
// ---------------------------------------------------------------------------

/// Invokes `abort` once `signal` fires.
///
/// Bridges transports that only expose an imperative abort method. Returns
/// `None` without doing anything when no signal is given. A panic raised by
/// `abort` is caught and discarded. If the signal has already fired, `abort`
/// runs on the next scheduler turn.
///
/// The returned handle may be aborted once the request completes to stop
/// watching the signal. Must be called from within a tokio runtime.
pub fn link_external_abort<F>(abort: F, signal: Option<&AbortSignal>) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let signal = signal?.clone();
    Some(tokio::spawn(async move {
        signal.aborted().await;
        if std::panic::catch_unwind(AssertUnwindSafe(abort)).is_err() {
            tracing::debug!("external abort handler panicked; ignored");
        }
    }))
}
