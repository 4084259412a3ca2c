//! Cancel handles for transports that do not (only) observe an abort signal.

use std::fmt;
use std::panic::AssertUnwindSafe;

use crate::{AbortController, BoxError};

/// An object exposing a cancel method, such as a cancel-token source.
pub trait Cancellable: Send {
    /// Requests cancellation of the associated call.
    fn cancel(&mut self) -> Result<(), BoxError>;
}

/// How the coordinator reaches a call to cancel it, in addition to the
/// entry's own abort signal.
///
/// The variant is fixed when the request is submitted; cancelling dispatches
/// on it directly.
pub enum CancelHandle {
    /// A separate controller to abort (e.g. one shared with a client library).
    Signal(AbortController),
    /// A function invoked once on cancellation.
    Callback(Box<dyn FnOnce() + Send>),
    /// An object whose [`Cancellable::cancel`] is invoked once.
    Token(Box<dyn Cancellable>),
}

impl CancelHandle {
    /// Wraps a cancellation function.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::Callback(Box::new(f))
    }

    /// Wraps a cancel-method object.
    pub fn token<C>(token: C) -> Self
    where
        C: Cancellable + 'static,
    {
        Self::Token(Box::new(token))
    }

    /// Combines two handles into one that fires `self` and then `next`.
    ///
    /// Each is fired independently; a failure of one does not stop the other.
    pub fn and_then(self, next: CancelHandle) -> Self {
        Self::callback(move || {
            self.fire();
            next.fire();
        })
    }

    /// Fires the handle. Errors and panics are caught; returns `false` if the
    /// attempt failed.
    pub fn fire(self) -> bool {
        let kind = self.kind();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || match self {
            Self::Signal(controller) => {
                if !controller.is_aborted() {
                    controller.abort();
                }
                Ok(())
            }
            Self::Callback(f) => {
                f();
                Ok(())
            }
            Self::Token(mut token) => token.cancel(),
        }));
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::debug!(handle = kind, error = %err, "cancel handle failed; ignored");
                false
            }
            Err(_) => {
                tracing::debug!(handle = kind, "cancel handle panicked; ignored");
                false
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Signal(_) => "signal",
            Self::Callback(_) => "callback",
            Self::Token(_) => "token",
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelHandle::{}", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Flag(Arc<AtomicBool>);

    impl Cancellable for Flag {
        fn cancel(&mut self) -> Result<(), BoxError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    impl Cancellable for Broken {
        fn cancel(&mut self) -> Result<(), BoxError> {
            Err("already closed".into())
        }
    }

    #[test]
    fn token_handle_invokes_cancel() {
        let seen = Arc::new(AtomicBool::new(false));
        assert!(CancelHandle::token(Flag(Arc::clone(&seen))).fire());
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn signal_handle_aborts_controller() {
        let controller = AbortController::new();
        assert!(CancelHandle::Signal(controller.clone()).fire());
        assert!(controller.is_aborted());
    }

    #[test]
    fn chained_handles_both_fire_despite_failures() {
        let seen = Arc::new(AtomicBool::new(false));
        let chained = CancelHandle::callback(|| panic!("first fails"))
            .and_then(CancelHandle::token(Flag(Arc::clone(&seen))));
        assert!(chained.fire());
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn failures_are_swallowed() {
        assert!(!CancelHandle::token(Broken).fire());
        assert!(!CancelHandle::callback(|| panic!("boom")).fire());
    }
}
