//! Error types for the request coordination domain.
//!
//! [`RequestError`] is what a caller's [`crate::ProxyResult`] resolves to when
//! a call does not succeed. [`SubmitError`] covers caller misuse, which is
//! reported synchronously from [`crate::RequestCoordinator::submit`] instead of
//! being deferred into the proxy result.
//!
//! Failures raised while *cancelling* (a panicking cancel callback, a
//! `Cancellable` returning `Err`) never appear here: cancellation is
//! best-effort and those failures are logged and discarded.

use thiserror::Error;

use crate::RequestIdentity;

/// Type-erased error produced by a transport or a key producer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Proxy-level errors
// ---------------------------------------------------------------------------

/// Why a proxy result was rejected.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The underlying call failed for reasons unrelated to cancellation.
    ///
    /// The transport's own error is carried unchanged; use
    /// [`RequestError::downcast_transport`] to recover the concrete type.
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),

    /// The entry was cancelled (superseded, or cancelled explicitly) while
    /// verbose mode was in effect for it.
    ///
    /// Non-verbose cancellation never produces this value; the proxy is left
    /// pending instead.
    #[error("request '{identity}' was cancelled")]
    Cancelled {
        /// Identity of the cancelled entry.
        identity: RequestIdentity,
    },

    /// The entry's signal was aborted by someone other than the coordinator
    /// (e.g. the caller aborted a controller it supplied) while the entry was
    /// still current.
    #[error("request '{identity}' was aborted through its signal")]
    Aborted {
        /// Identity of the aborted entry.
        identity: RequestIdentity,
    },
}

impl RequestError {
    /// Returns `true` for the cancellation-kind variants.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Aborted { .. })
    }

    /// Returns the transport error as `E` if this is a transport failure of
    /// that concrete type.
    pub fn downcast_transport<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Transport(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Submission errors
// ---------------------------------------------------------------------------

/// Caller errors detected while a request is being submitted.
///
/// These are returned before any entry is registered, so a failed submission
/// never supersedes an in-flight request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// A bare target was supplied as the call, but the coordinator has no
    /// default transport to build a call from it.
    #[error("no default transport configured to call '{target}'")]
    NoTransport {
        /// The target that could not be called.
        target: String,
    },

    /// A bare target was supplied as the call, but it is blank.
    #[error("cannot build a default call for an empty target")]
    EmptyTarget,
}
