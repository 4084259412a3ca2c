//! The call shapes a coordinator accepts and the transport port it uses to
//! build a default call from a bare target.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::{AbortSignal, BoxError, TransportOptions};

/// A boxed, in-flight call.
pub type CallFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'static>>;

/// Boxes any sendable future into a [`CallFuture`].
pub fn boxed_call<T, E, F>(future: F) -> CallFuture<T>
where
    T: 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    Box::pin(async move { future.await.map_err(Into::into) })
}

/// What a call factory or transport receives: the target, the forwarded
/// options (private keys removed) and the entry's abort signal.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// The URL-like target the request was submitted for.
    pub target: String,
    /// Pass-through options.
    pub options: TransportOptions,
    /// Fires when the coordinator cancels this request.
    pub signal: AbortSignal,
}

/// Builds a call from a bare target.
///
/// Implementations should stop work when `request.signal` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Value produced by a successful call.
    type Output: Send + 'static;

    /// Performs the call.
    async fn send(&self, request: PreparedRequest) -> Result<Self::Output, BoxError>;
}

/// The underlying call handed to [`crate::RequestCoordinator::submit`].
pub enum Call<T> {
    /// A call that is already running.
    Pending(CallFuture<T>),
    /// A function that starts the call once given the prepared request.
    Factory(Box<dyn FnOnce(PreparedRequest) -> CallFuture<T> + Send>),
    /// A target to call through the coordinator's default transport.
    Target(String),
    /// A value that is already available. The proxy still settles
    /// asynchronously.
    Ready(T),
}

impl<T> Call<T> {
    /// Wraps a running future.
    pub fn pending<E, F>(future: F) -> Self
    where
        T: 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Pending(boxed_call(future))
    }

    /// Wraps a call factory.
    pub fn factory<E, Fut, F>(f: F) -> Self
    where
        T: 'static,
        F: FnOnce(PreparedRequest) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Factory(Box::new(move |request| boxed_call(f(request))))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Pending(_) => "pending",
            Self::Factory(_) => "factory",
            Self::Target(_) => "target",
            Self::Ready(_) => "ready",
        }
    }
}

impl<T> fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(target) => f.debug_tuple("Target").field(target).finish(),
            other => write!(f, "Call::{}", other.kind()),
        }
    }
}
