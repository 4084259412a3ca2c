//! Imperatively aborted requests.
//!
//! An [`AbortableRequest`] starts immediately on its own task and can only be
//! stopped by calling [`AbortableRequest::abort`]. It does not observe any
//! signal; [`AbortableRequest::submit_to`] bridges the coordinator's signal to
//! `abort()` with [`coordinator::link_external_abort`].

use coordinator::{
    link_external_abort, Call, ProxyResult, RequestConfig, RequestCoordinator, SubmitError,
    TransportOptions,
};
use tokio::task::{AbortHandle, JoinHandle};

use crate::{HttpError, HttpResponse, HttpTransport};

/// An in-flight request with an `abort()` method.
#[derive(Debug)]
pub struct AbortableRequest {
    task: JoinHandle<Result<HttpResponse, HttpError>>,
}

/// Cloneable handle that aborts an [`AbortableRequest`] from elsewhere.
#[derive(Debug, Clone)]
pub struct RequestAborter {
    handle: AbortHandle,
}

impl RequestAborter {
    /// Stops the request. Has no effect once it has finished.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl AbortableRequest {
    /// Spawns the request. A `timeoutMs` option bounds the whole call.
    pub fn start(
        transport: &HttpTransport,
        target: impl Into<String>,
        options: TransportOptions,
    ) -> Self {
        let transport = transport.clone();
        let target = target.into();
        let task = tokio::spawn(async move { transport.perform(&target, &options).await });
        Self { task }
    }

    /// Stops the request.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// A handle that can abort this request after it has been moved.
    pub fn aborter(&self) -> RequestAborter {
        RequestAborter {
            handle: self.task.abort_handle(),
        }
    }

    /// Waits for the request to finish.
    pub async fn finish(self) -> Result<HttpResponse, HttpError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(HttpError::Aborted),
            Err(err) => Err(HttpError::Task(err.to_string())),
        }
    }

    /// Starts a request for `target` and submits it to `coordinator`, wiring
    /// the entry's signal to [`abort`](Self::abort).
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_to(
        coordinator: &RequestCoordinator<HttpResponse>,
        transport: &HttpTransport,
        target: impl Into<String>,
        mut config: RequestConfig,
    ) -> Result<ProxyResult<HttpResponse>, SubmitError> {
        let target = target.into();
        // The signal is needed before the request starts, so take the
        // controller up front; the coordinator then uses this same one.
        let controller = config.controller.take().unwrap_or_else(|| coordinator.claim_controller());
        let signal = controller.signal();

        let request = Self::start(
            transport,
            target.clone(),
            coordinator::config::forwardable(&config.options),
        );
        let aborter = request.aborter();
        let watcher = link_external_abort(move || aborter.abort(), Some(&signal));

        let call = Call::pending(async move {
            let result = request.finish().await;
            if let Some(watcher) = watcher {
                watcher.abort();
            }
            result
        });
        coordinator.submit(target, call, config.with_controller(controller))
    }
}
