//! Cancel-token style cancellation: a source object with a `cancel` method
//! and tokens that calls watch.
//!
//! The source implements [`Cancellable`], so the coordinator reaches it
//! through [`CancelHandle::Token`] rather than through the entry's signal.

use std::sync::{Arc, Mutex, PoisonError};

use coordinator::{
    AbortController, AbortSignal, BoxError, Call, CancelHandle, Cancellable, ProxyResult,
    RequestConfig, RequestCoordinator, SubmitError, TransportOptions,
};

use crate::{HttpError, HttpResponse, HttpTransport};

/// Reason recorded when the coordinator cancels through the source.
pub const SUPERSEDED_REASON: &str = "superseded by a newer request";

/// Owner of a cancel token.
#[derive(Debug, Clone, Default)]
pub struct CancelTokenSource {
    controller: AbortController,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelTokenSource {
    /// Creates an uncancelled source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            signal: self.controller.signal(),
            reason: Arc::clone(&self.reason),
        }
    }

    /// Cancels with `reason`. Returns `false` if the source was already
    /// cancelled; the first reason is kept.
    pub fn cancel_with(&self, reason: impl Into<String>) -> bool {
        let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.into());
        drop(slot);
        self.controller.abort();
        true
    }
}

impl Cancellable for CancelTokenSource {
    fn cancel(&mut self) -> Result<(), BoxError> {
        if self.cancel_with(SUPERSEDED_REASON) {
            Ok(())
        } else {
            Err("cancel token source was already cancelled".into())
        }
    }
}

/// Read side of a [`CancelTokenSource`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: AbortSignal,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelToken {
    /// Returns `true` once the source has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_aborted()
    }

    /// The reason given to the source, if it has been cancelled.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Completes once the source is cancelled and yields its reason.
    pub async fn cancelled(&self) -> String {
        self.signal.aborted().await;
        self.reason().unwrap_or_else(|| SUPERSEDED_REASON.to_owned())
    }
}

impl HttpTransport {
    /// Performs the request, giving up with [`HttpError::Cancelled`] once
    /// `token` is cancelled.
    pub async fn execute_with_token(
        &self,
        target: &str,
        options: &TransportOptions,
        token: &CancelToken,
    ) -> Result<HttpResponse, HttpError> {
        self.execute_until(target, options, async {
            HttpError::Cancelled {
                reason: token.cancelled().await,
            }
        })
        .await
    }

    /// Submits a token-cancelled call for `target` to `coordinator`.
    ///
    /// The call watches its own cancel token rather than the entry's signal;
    /// the source is registered as the entry's cancel handle. A cancel handle
    /// already present in `config` is kept and fired first.
    pub fn fetch_with_token(
        &self,
        coordinator: &RequestCoordinator<HttpResponse>,
        target: impl Into<String>,
        mut config: RequestConfig,
    ) -> Result<ProxyResult<HttpResponse>, SubmitError> {
        let target = target.into();
        let source = CancelTokenSource::new();
        let token = source.token();
        let transport = self.clone();
        let options = coordinator::config::forwardable(&config.options);
        let url = target.clone();
        let handle = match config.cancel_handle.take() {
            Some(existing) => existing.and_then(CancelHandle::token(source)),
            None => CancelHandle::token(source),
        };

        coordinator.submit(
            target,
            Call::pending(async move {
                transport.execute_with_token(&url, &options, &token).await
            }),
            config.with_cancel_handle(handle),
        )
    }
}
