//! The caller-facing result of a submission.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::{EntryId, RequestError, RequestIdentity};

/// Future returned by [`crate::RequestCoordinator::submit`].
///
/// Only the coordinator settles it. It resolves with the call's own outcome
/// if the entry was still current when the call finished, or with
/// [`RequestError::Cancelled`] if it was cancelled under verbose mode. A
/// silently cancelled or reset entry leaves its proxy pending forever; callers
/// are expected to have moved on to the superseding request.
#[derive(Debug)]
#[must_use = "the proxy result is the only way to observe the call's outcome"]
pub struct ProxyResult<T> {
    identity: RequestIdentity,
    entry_id: EntryId,
    rx: oneshot::Receiver<Result<T, RequestError>>,
    abandoned: bool,
}

impl<T> ProxyResult<T> {
    pub(crate) fn new(
        identity: RequestIdentity,
        entry_id: EntryId,
        rx: oneshot::Receiver<Result<T, RequestError>>,
    ) -> Self {
        Self {
            identity,
            entry_id,
            rx,
            abandoned: false,
        }
    }

    /// Identity the request was tracked under.
    pub fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    /// Id of the entry backing this proxy.
    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }
}

impl<T> Future for ProxyResult<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.abandoned {
            return Poll::Pending;
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The settle side was dropped unused: silent cancel or reset.
            Poll::Ready(Err(_)) => {
                self.abandoned = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
