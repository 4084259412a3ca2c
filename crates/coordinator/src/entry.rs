//! Bookkeeping record for one tracked request and its state machine.
//!
//! ```text
//! Pending ──settle──▶ Settled
//!    │
//!    └──cancel──▶ CancelledVerbose | CancelledSilent
//! ```
//!
//! Every state other than `Pending` is terminal.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{AbortController, CancelHandle, RequestError, RequestIdentity};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique number distinguishing one submission from every other,
/// including later submissions under the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryState {
    /// The call is in flight.
    Pending,
    /// The proxy was settled with the call's own outcome.
    Settled,
    /// Cancelled; the proxy was rejected with a cancellation error.
    CancelledVerbose,
    /// Cancelled; the proxy is left pending.
    CancelledSilent,
}

impl EntryState {
    /// Returns `true` for the cancelled states.
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::CancelledVerbose | Self::CancelledSilent)
    }
}

pub(crate) type ProxySender<T> = oneshot::Sender<Result<T, RequestError>>;

/// Serialisable view of a tracked entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSnapshot {
    /// Identity the entry is tracked under.
    pub identity: RequestIdentity,
    /// The entry's own id.
    pub entry_id: EntryId,
    /// Target the request was submitted for.
    pub target: String,
    /// When the request was submitted.
    pub started_at: DateTime<Utc>,
    /// Whether cancellation will reject the proxy.
    pub verbose_on_cancel: bool,
}

pub(crate) struct RequestEntry<T> {
    pub(crate) id: EntryId,
    pub(crate) identity: RequestIdentity,
    target: String,
    controller: AbortController,
    cancel_handle: Option<CancelHandle>,
    proxy: Option<ProxySender<T>>,
    state: EntryState,
    verbose_on_cancel: bool,
    started_at: DateTime<Utc>,
}

impl<T> RequestEntry<T> {
    pub(crate) fn new(
        identity: RequestIdentity,
        target: String,
        controller: AbortController,
        cancel_handle: Option<CancelHandle>,
        proxy: ProxySender<T>,
        verbose_on_cancel: bool,
    ) -> Self {
        Self {
            id: EntryId::next(),
            identity,
            target,
            controller,
            cancel_handle,
            proxy: Some(proxy),
            state: EntryState::Pending,
            verbose_on_cancel,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn state(&self) -> EntryState {
        self.state
    }

    /// Pending → Settled. Hands back the proxy's settle side exactly once.
    pub(crate) fn settle(&mut self) -> Option<ProxySender<T>> {
        if self.state != EntryState::Pending {
            return None;
        }
        self.state = EntryState::Settled;
        self.proxy.take()
    }

    /// Pending → Cancelled*, then drives every cancellation path.
    ///
    /// Signal abort and cancel-handle failures are swallowed. Returns `false`
    /// if the entry had already left `Pending`.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.state != EntryState::Pending {
            return false;
        }
        self.state = if self.verbose_on_cancel {
            EntryState::CancelledVerbose
        } else {
            EntryState::CancelledSilent
        };

        if !self.controller.is_aborted() {
            self.controller.abort();
        }
        if let Some(handle) = self.cancel_handle.take() {
            handle.fire();
        }

        let proxy = self.proxy.take();
        if self.verbose_on_cancel {
            if let Some(proxy) = proxy {
                let _ = proxy.send(Err(RequestError::Cancelled {
                    identity: self.identity.clone(),
                }));
            }
        }
        tracing::debug!(
            identity = %self.identity,
            entry_id = %self.id,
            verbose = self.verbose_on_cancel,
            "request cancelled"
        );
        true
    }

    pub(crate) fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            identity: self.identity.clone(),
            entry_id: self.id,
            target: self.target.clone(),
            started_at: self.started_at,
            verbose_on_cancel: self.verbose_on_cancel,
        }
    }
}
