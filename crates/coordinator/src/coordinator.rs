//! The latest-call-wins request coordinator.
//!
//! [`RequestCoordinator`] owns the table of in-flight requests keyed by
//! [`RequestIdentity`]. Submitting a request under an identity that is already
//! tracked cancels the tracked one first; only the newest call for an identity
//! can ever settle its caller's [`ProxyResult`].
//!
//! ## Concurrency
//!
//! The table sits behind a `std::sync::Mutex` that is only held for
//! synchronous bookkeeping, never across an `.await` and never while user
//! callbacks (call factories, cancel handles) run. Each submission spawns one
//! continuation task that waits for the call and then, in a single critical
//! section, checks that its entry is still the table's occupant for the
//! identity before removing it. That check is what keeps a late completion of
//! a superseded call from touching newer state.

use std::collections::HashMap;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::forwardable;
use crate::entry::{EntryState, RequestEntry};
use crate::{
    identity, AbortController, AbortSignal, BoxError, Call, CallFuture, CoordinatorConfig,
    EntryId, PreparedRequest, ProxyResult, RequestConfig, RequestError, RequestIdentity,
    RequestSnapshot, SignalSlot, SubmitError, Transport,
};

type Table<T> = HashMap<RequestIdentity, RequestEntry<T>>;

/// How a call ended, as seen by its continuation.
enum Outcome<T> {
    Value(T),
    Failed(BoxError),
    /// The entry's signal fired before the call finished.
    Aborted,
}

enum Work<T> {
    Call(CallFuture<T>),
    Ready(T),
}

struct Inner<T> {
    table: Mutex<Table<T>>,
    slot: SignalSlot,
    verbose: AtomicBool,
    transport: Option<Arc<dyn Transport<Output = T>>>,
}

impl<T> Inner<T> {
    fn lock_table(&self) -> MutexGuard<'_, Table<T>> {
        // Every critical section leaves the table consistent, so a panic
        // elsewhere while holding the lock does not invalidate it.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settles the proxy of `entry_id` if it is still the current, pending
    /// occupant of `identity`; otherwise does nothing.
    fn complete(&self, identity: &RequestIdentity, entry_id: EntryId, outcome: Outcome<T>) {
        let removed = {
            let mut table = self.lock_table();
            let current = table
                .get(identity)
                .is_some_and(|entry| entry.id == entry_id && entry.state() == EntryState::Pending);
            if current {
                table.remove(identity)
            } else {
                None
            }
        };

        let Some(mut entry) = removed else {
            tracing::debug!(%identity, %entry_id, "stale completion ignored");
            return;
        };
        let Some(proxy) = entry.settle() else {
            return;
        };

        let result = match outcome {
            Outcome::Value(value) => {
                tracing::debug!(%identity, %entry_id, "request fulfilled");
                Ok(value)
            }
            Outcome::Failed(err) => {
                tracing::debug!(%identity, %entry_id, error = %err, "request failed");
                Err(RequestError::Transport(err))
            }
            Outcome::Aborted => {
                tracing::debug!(%identity, %entry_id, "request aborted through its signal");
                Err(RequestError::Aborted {
                    identity: identity.clone(),
                })
            }
        };
        // The caller may have dropped the proxy; nothing to report then.
        let _ = proxy.send(result);
    }
}

/// A call that panicked is reported to its caller as a failed call.
fn panic_error(panic: &(dyn Any + Send)) -> BoxError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    format!("call panicked: {message}").into()
}

/// Tracks the latest request per identity and cancels superseded ones.
///
/// Cloning is cheap and yields a handle to the same table. Independent
/// coordinators do not share any state.
///
/// All methods that start calls spawn onto the ambient tokio runtime.
pub struct RequestCoordinator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RequestCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for RequestCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("active", &self.inner.lock_table().len())
            .field("verbose", &self.inner.verbose.load(Ordering::Relaxed))
            .field("transport", &self.inner.transport.is_some())
            .finish()
    }
}

impl<T: Send + 'static> Default for RequestCoordinator<T> {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl<T: Send + 'static> RequestCoordinator<T> {
    /// Creates a coordinator without a default transport; bare
    /// [`Call::Target`] submissions are rejected.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a coordinator that builds [`Call::Target`] submissions with
    /// `transport`.
    pub fn with_transport(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport<Output = T>>,
    ) -> Self {
        Self::build(config, Some(transport))
    }

    fn build(config: CoordinatorConfig, transport: Option<Arc<dyn Transport<Output = T>>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(HashMap::new()),
                slot: SignalSlot::new(),
                verbose: AtomicBool::new(config.verbose),
                transport,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Starts tracking `call` under the identity derived from `target` and
    /// `config`, superseding whatever was tracked under that identity.
    ///
    /// Call factories run synchronously, before the previous occupant is
    /// cancelled. Misuse is reported here rather than through the proxy, and
    /// a rejected submission supersedes nothing.
    pub fn submit(
        &self,
        target: impl Into<String>,
        call: Call<T>,
        config: RequestConfig,
    ) -> Result<ProxyResult<T>, SubmitError> {
        let target = target.into();
        let RequestConfig {
            key,
            controller,
            cancel_handle,
            no_cancel,
            options,
        } = config;

        let transport = match &call {
            Call::Target(call_target) if call_target.trim().is_empty() => {
                return Err(SubmitError::EmptyTarget);
            }
            Call::Target(call_target) => match &self.inner.transport {
                Some(transport) => Some(Arc::clone(transport)),
                None => {
                    return Err(SubmitError::NoTransport {
                        target: call_target.clone(),
                    });
                }
            },
            _ => None,
        };

        let identity = identity::resolve(&target, key.as_ref(), no_cancel);
        let controller = controller.unwrap_or_else(|| self.inner.slot.claim());
        let signal = controller.signal();
        let prepared = PreparedRequest {
            target: target.clone(),
            options: forwardable(&options),
            signal: signal.clone(),
        };

        let work = match (call, transport) {
            (Call::Pending(future), _) => Work::Call(future),
            (Call::Factory(start), _) => Work::Call(start(prepared)),
            (Call::Target(call_target), Some(transport)) => {
                let request = PreparedRequest {
                    target: call_target,
                    ..prepared
                };
                Work::Call(Box::pin(async move { transport.send(request).await }))
            }
            (Call::Target(call_target), None) => {
                return Err(SubmitError::NoTransport { target: call_target });
            }
            (Call::Ready(value), _) => Work::Ready(value),
        };

        let verbose = self.is_verbose();
        let (tx, rx) = oneshot::channel();
        let entry = RequestEntry::new(
            identity.clone(),
            target,
            controller,
            cancel_handle,
            tx,
            verbose,
        );
        let entry_id = entry.id;

        // The previous occupant is fully cancelled before the new entry is
        // registered. Its cancel handle runs with the table unlocked and may
        // call back into the coordinator, so re-check the identity after each
        // cancellation. Suppressed identities are unique and displace nothing.
        loop {
            let mut table = self.inner.lock_table();
            let Some(mut previous) = table.remove(&identity) else {
                table.insert(identity.clone(), entry);
                break;
            };
            drop(table);
            tracing::debug!(
                %identity,
                superseded = %previous.id,
                by = %entry_id,
                "superseding in-flight request"
            );
            previous.cancel();
        }
        tracing::debug!(%identity, %entry_id, verbose, suppressed = no_cancel, "request submitted");

        let proxy = ProxyResult::new(identity.clone(), entry_id, rx);
        let inner = Arc::clone(&self.inner);
        match work {
            Work::Call(call) => {
                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        biased;
                        result = AssertUnwindSafe(call).catch_unwind() => match result {
                            Ok(Ok(value)) => Outcome::Value(value),
                            Ok(Err(err)) => Outcome::Failed(err),
                            Err(panic) => Outcome::Failed(panic_error(panic.as_ref())),
                        },
                        () = signal.aborted() => Outcome::Aborted,
                    };
                    inner.complete(&identity, entry_id, outcome);
                });
            }
            Work::Ready(value) => {
                // Settle on a later scheduler turn, never re-entrantly.
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    inner.complete(&identity, entry_id, Outcome::Value(value));
                });
            }
        }
        Ok(proxy)
    }

    /// Submits a bare target through the default transport.
    pub fn call_target(
        &self,
        target: impl Into<String>,
        config: RequestConfig,
    ) -> Result<ProxyResult<T>, SubmitError> {
        let target = target.into();
        self.submit(target.clone(), Call::Target(target), config)
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancels the entry tracked under `identity`.
    ///
    /// Aborts its signal, fires its cancel handle, rejects its proxy if it
    /// was created under verbose mode, and stops tracking it. Failures of the
    /// cancellation mechanisms are swallowed. Returns `false` if nothing was
    /// tracked under `identity`.
    pub fn cancel(&self, identity: &RequestIdentity) -> bool {
        let removed = self.inner.lock_table().remove(identity);
        match removed {
            Some(mut entry) => {
                entry.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every tracked entry and returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<RequestEntry<T>> = self
            .inner
            .lock_table()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let count = drained.len();
        for mut entry in drained {
            entry.cancel();
        }
        if count > 0 {
            tracing::debug!(count, "cancelled all tracked requests");
        }
        count
    }

    /// Forgets every tracked entry without cancelling anything.
    ///
    /// Underlying calls keep running unobserved and their proxies never
    /// settle.
    pub fn reset(&self) {
        let forgotten = std::mem::take(&mut *self.inner.lock_table());
        tracing::debug!(count = forgotten.len(), "request table reset");
        drop(forgotten);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Returns `true` if a request is tracked under `identity`.
    pub fn is_active(&self, identity: &RequestIdentity) -> bool {
        self.inner.lock_table().contains_key(identity)
    }

    /// Number of tracked requests.
    pub fn active_count(&self) -> usize {
        self.inner.lock_table().len()
    }

    /// Tracked requests, oldest first.
    pub fn snapshot(&self) -> Vec<RequestSnapshot> {
        let mut snapshots: Vec<RequestSnapshot> =
            self.inner.lock_table().values().map(RequestEntry::snapshot).collect();
        snapshots.sort_by_key(|snapshot| (snapshot.started_at, snapshot.entry_id.as_u64()));
        snapshots
    }

    // -----------------------------------------------------------------------
    // Signals and configuration
    // -----------------------------------------------------------------------

    /// The pending controller; the same one is returned until it aborts or a
    /// submission claims it.
    pub fn controller(&self) -> AbortController {
        self.inner.slot.controller()
    }

    /// Signal of the pending controller.
    pub fn signal(&self) -> AbortSignal {
        self.inner.slot.signal()
    }

    /// Takes the pending controller out of the slot, for adapters that must
    /// start a call before submitting it. Pass it back through
    /// [`RequestConfig::with_controller`].
    pub fn claim_controller(&self) -> AbortController {
        self.inner.slot.claim()
    }

    /// See [`crate::link_external_abort`].
    pub fn link_external_abort<F>(
        &self,
        abort: F,
        signal: Option<&AbortSignal>,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        crate::link_external_abort(abort, signal)
    }

    /// Whether cancellation rejects proxies of newly submitted requests.
    pub fn is_verbose(&self) -> bool {
        self.inner.verbose.load(Ordering::SeqCst)
    }

    /// Changes verbose mode for requests submitted from now on.
    pub fn set_verbose(&self, verbose: bool) {
        self.inner.verbose.store(verbose, Ordering::SeqCst);
    }

    /// Current manager-level configuration.
    pub fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            verbose: self.is_verbose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::pending;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{CancelHandle, Cancellable};

    /// Long enough for any spawned continuation to have run.
    const SETTLE_WINDOW: Duration = Duration::from_millis(100);

    type Coordinator = RequestCoordinator<&'static str>;

    fn never() -> Call<&'static str> {
        Call::pending(pending::<Result<&'static str, BoxError>>())
    }

    fn keyed(key: &str) -> RequestConfig {
        RequestConfig::new().with_key(key)
    }

    async fn stays_pending<T>(proxy: ProxyResult<T>) -> bool {
        tokio::time::timeout(SETTLE_WINDOW, proxy).await.is_err()
    }

    fn flag_handle(flag: &Arc<AtomicBool>) -> CancelHandle {
        let flag = Arc::clone(flag);
        CancelHandle::callback(move || flag.store(true, Ordering::SeqCst))
    }

    #[tokio::test]
    async fn newest_call_wins_and_first_handle_fires() {
        let coordinator = Coordinator::default();
        let fired = Arc::new(AtomicBool::new(false));

        let first = coordinator
            .submit(
                "https://h/a",
                never(),
                keyed("same-id").with_cancel_handle(flag_handle(&fired)),
            )
            .expect("submit first");
        let second = coordinator
            .submit("https://h/b", Call::Ready("second"), keyed("same-id"))
            .expect("submit second");

        assert_eq!(second.await.expect("second settles"), "second");
        assert!(fired.load(Ordering::SeqCst), "first call's cancel handle was invoked");
        assert_eq!(coordinator.active_count(), 0);
        assert!(stays_pending(first).await);
    }

    #[tokio::test]
    async fn superseded_call_is_dropped_before_it_can_settle() {
        let coordinator = Coordinator::default();
        let (first_tx, first_rx) = oneshot::channel::<&'static str>();
        let first = coordinator
            .submit(
                "https://h/search?q=a",
                Call::pending(async move { first_rx.await.map_err(BoxError::from) }),
                RequestConfig::new(),
            )
            .expect("submit first");
        let second = coordinator
            .submit("https://h/search?q=ab", Call::Ready("ab"), RequestConfig::new())
            .expect("submit second");

        assert_eq!(second.await.expect("second settles"), "ab");
        // The first call's future was dropped when its signal fired.
        assert!(first_tx.send("a").is_err());
        assert!(stays_pending(first).await);
    }

    #[tokio::test]
    async fn suppressed_calls_do_not_interact() {
        let coordinator = Coordinator::default();
        let fired = Arc::new(AtomicBool::new(false));

        let first = coordinator
            .submit(
                "https://h/x",
                Call::pending(async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, BoxError>("first")
                }),
                keyed("k").no_cancel().with_cancel_handle(flag_handle(&fired)),
            )
            .expect("submit first");
        let second = coordinator
            .submit("https://h/x", Call::Ready("second"), keyed("k").no_cancel())
            .expect("submit second");

        assert_ne!(first.identity(), second.identity());
        assert_eq!(coordinator.active_count(), 2);
        assert_eq!(second.await.expect("second settles"), "second");
        assert_eq!(first.await.expect("first settles"), "first");
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let coordinator = Coordinator::default();
        let id = RequestIdentity::for_key("once");
        assert!(!coordinator.cancel(&id));

        let _proxy = coordinator.submit("t", never(), keyed("once")).expect("submit");
        assert!(coordinator.is_active(&id));
        assert!(coordinator.cancel(&id));
        assert!(!coordinator.cancel(&id));
        assert!(!coordinator.is_active(&id));
    }

    #[tokio::test]
    async fn cancel_all_counts_distinct_identities() {
        let coordinator = Coordinator::default();
        let proxies: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|key| coordinator.submit("t", never(), keyed(key)).expect("submit"))
            .collect();

        assert_eq!(coordinator.active_count(), proxies.len());
        assert_eq!(coordinator.cancel_all(), 3);
        assert_eq!(coordinator.active_count(), 0);
        assert_eq!(coordinator.cancel_all(), 0);
    }

    #[tokio::test]
    async fn verbose_cancel_rejects_with_cancellation_error() {
        let coordinator = Coordinator::new(CoordinatorConfig { verbose: true });
        let proxy = coordinator.submit("t", never(), keyed("v")).expect("submit");
        coordinator.cancel(&RequestIdentity::for_key("v"));

        let err = proxy.await.expect_err("verbose cancel rejects");
        assert!(matches!(
            err,
            RequestError::Cancelled { ref identity } if identity.as_str() == "key:v"
        ));
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn silent_cancel_leaves_proxy_pending() {
        let coordinator = Coordinator::default();
        let proxy = coordinator.submit("t", never(), keyed("s")).expect("submit");
        coordinator.cancel(&RequestIdentity::for_key("s"));
        assert!(stays_pending(proxy).await);
    }

    #[tokio::test]
    async fn verbose_mode_is_captured_at_submission() {
        let coordinator = Coordinator::default();
        let quiet = coordinator.submit("t", never(), keyed("quiet")).expect("submit");
        coordinator.set_verbose(true);
        let loud = coordinator.submit("t", never(), keyed("loud")).expect("submit");
        coordinator.set_verbose(false);

        assert_eq!(coordinator.cancel_all(), 2);
        assert!(loud.await.is_err());
        assert!(stays_pending(quiet).await);
        assert!(!coordinator.config().verbose);
    }

    #[tokio::test]
    async fn superseding_under_verbose_rejects_the_old_proxy() {
        let coordinator = Coordinator::new(CoordinatorConfig { verbose: true });
        let old = coordinator
            .submit("https://h/p?page=1", never(), RequestConfig::new())
            .expect("submit");
        let new = coordinator
            .submit("https://h/p?page=2", Call::Ready("page 2"), RequestConfig::new())
            .expect("submit");

        assert!(old.await.expect_err("old is rejected").is_cancellation());
        assert_eq!(new.await.expect("new settles"), "page 2");
    }

    #[tokio::test]
    async fn stale_completion_after_reset_is_ignored() {
        let coordinator = Coordinator::default();
        let (stale_tx, stale_rx) = oneshot::channel::<&'static str>();
        let stale = coordinator
            .submit(
                "t",
                Call::pending(async move { stale_rx.await.map_err(BoxError::from) }),
                keyed("r"),
            )
            .expect("submit stale");

        coordinator.reset();
        assert_eq!(coordinator.active_count(), 0);
        let fresh = coordinator.submit("t", never(), keyed("r")).expect("submit fresh");

        // reset() does not abort, so the stale call is still running.
        stale_tx.send("stale").expect("stale call still listening");
        tokio::time::sleep(SETTLE_WINDOW).await;

        assert!(coordinator.is_active(&RequestIdentity::for_key("r")), "fresh entry untouched");
        assert!(stays_pending(stale).await);
        assert!(coordinator.cancel(fresh.identity()));
    }

    #[tokio::test]
    async fn reset_does_not_fire_cancel_handles() {
        let coordinator = Coordinator::default();
        let fired = Arc::new(AtomicBool::new(false));
        let controller = AbortController::new();
        let _proxy = coordinator
            .submit(
                "t",
                never(),
                keyed("quiet")
                    .with_controller(controller.clone())
                    .with_cancel_handle(flag_handle(&fired)),
            )
            .expect("submit");

        coordinator.reset();
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!controller.is_aborted());
    }

    #[tokio::test]
    async fn transport_failure_is_propagated_verbatim() {
        #[derive(Debug, thiserror::Error)]
        #[error("status 503")]
        struct Unavailable;

        let coordinator = Coordinator::default();
        let proxy = coordinator
            .submit(
                "t",
                Call::pending(async { Err::<&'static str, _>(Unavailable) }),
                RequestConfig::new(),
            )
            .expect("submit");

        let err = proxy.await.expect_err("failure propagates");
        assert!(err.downcast_transport::<Unavailable>().is_some());
        assert_eq!(coordinator.active_count(), 0);
    }

    async fn explode() -> Result<&'static str, BoxError> {
        tokio::task::yield_now().await;
        panic!("transport bug");
    }

    #[tokio::test]
    async fn panicking_call_is_reported_as_failure_and_untracked() {
        let coordinator = Coordinator::default();
        let proxy = coordinator
            .submit(
                "t",
                Call::pending(explode()),
                keyed("p"),
            )
            .expect("submit");

        let err = tokio::time::timeout(SETTLE_WINDOW, proxy)
            .await
            .expect("proxy settles")
            .expect_err("panic surfaces as failure");
        let RequestError::Transport(source) = &err else {
            panic!("expected a transport failure, got {err:?}");
        };
        assert!(source.to_string().contains("transport bug"));
        assert!(!coordinator.is_active(&RequestIdentity::for_key("p")));
        assert_eq!(coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn reentrant_cancel_handle_cannot_cancel_its_successor() {
        let coordinator = Coordinator::default();
        let identity = RequestIdentity::for_key("same");
        let reentrant = coordinator.clone();
        let target = identity.clone();
        let handle = CancelHandle::callback(move || {
            reentrant.cancel(&target);
        });

        let first = coordinator
            .submit("t", never(), keyed("same").with_cancel_handle(handle))
            .expect("submit first");
        let second = coordinator
            .submit("t", Call::Ready("second"), keyed("same"))
            .expect("submit second");

        assert!(coordinator.is_active(&identity), "successor is registered");
        let settled = tokio::time::timeout(SETTLE_WINDOW, second)
            .await
            .expect("successor settles");
        assert_eq!(settled.expect("successor fulfilled"), "second");
        assert!(stays_pending(first).await);
    }

    #[tokio::test]
    async fn externally_aborted_controller_rejects_current_entry() {
        let coordinator = Coordinator::default();
        let controller = AbortController::new();
        let proxy = coordinator
            .submit("t", never(), keyed("ext").with_controller(controller.clone()))
            .expect("submit");

        controller.abort();
        let err = proxy.await.expect_err("abort surfaces");
        assert!(matches!(err, RequestError::Aborted { .. }));
        assert_eq!(coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn factory_receives_signal_and_forwarded_options() {
        let coordinator = RequestCoordinator::<usize>::default();
        let pre_signal = coordinator.signal();
        let config = RequestConfig::from_options(match json!({
            "requestKey": "f",
            "headers": { "accept": "application/json" },
            "timeoutMs": 50,
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        });

        let proxy = coordinator
            .submit(
                "https://h/f",
                Call::factory(move |request: PreparedRequest| async move {
                    assert_eq!(request.target, "https://h/f");
                    assert!(!request.options.contains_key("requestKey"));
                    Ok::<_, BoxError>(request.options.len())
                }),
                config,
            )
            .expect("submit");

        assert_eq!(proxy.await.expect("factory call settles"), 2);
        // The submission claimed the pending controller, so the slot now
        // hands out a different one.
        coordinator.controller().abort();
        assert!(!pre_signal.is_aborted());
    }

    #[tokio::test]
    async fn claimed_slot_controller_is_aborted_on_supersede() {
        let coordinator = Coordinator::default();
        let signal = coordinator.signal();
        let watched = signal.clone();
        let _first = coordinator
            .submit(
                "t",
                Call::pending(async move {
                    watched.aborted().await;
                    Err::<&'static str, BoxError>("aborted".into())
                }),
                keyed("slot"),
            )
            .expect("submit");

        let next = coordinator.controller();
        assert!(!next.is_aborted(), "slot manufactures a fresh controller after a claim");

        let _second = coordinator.submit("t", never(), keyed("slot")).expect("submit");
        assert!(signal.is_aborted());
        coordinator.reset();
    }

    #[tokio::test]
    async fn token_handles_are_cancelled_once() {
        struct Counting(Arc<AtomicUsize>);

        impl Cancellable for Counting {
            fn cancel(&mut self) -> Result<(), BoxError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err("transport already closed".into())
            }
        }

        let coordinator = Coordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let _proxy = coordinator
            .submit(
                "t",
                never(),
                keyed("tok").with_cancel_handle(CancelHandle::token(Counting(Arc::clone(&calls)))),
            )
            .expect("submit");

        assert!(coordinator.cancel(&RequestIdentity::for_key("tok")));
        assert!(!coordinator.cancel(&RequestIdentity::for_key("tok")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bare_target_uses_default_transport() {
        struct Echo;

        #[async_trait]
        impl Transport for Echo {
            type Output = String;

            async fn send(&self, request: PreparedRequest) -> Result<String, BoxError> {
                Ok(format!("echo {}", request.target))
            }
        }

        let coordinator = RequestCoordinator::<String>::with_transport(
            CoordinatorConfig::default(),
            Arc::new(Echo),
        );
        let proxy = coordinator
            .call_target("https://h/echo", RequestConfig::new())
            .expect("submit");
        assert_eq!(proxy.await.expect("echo settles"), "echo https://h/echo");
    }

    #[tokio::test]
    async fn bare_target_without_transport_is_rejected_synchronously() {
        let coordinator = RequestCoordinator::<String>::default();
        let err = coordinator
            .call_target("https://h/none", RequestConfig::new())
            .expect_err("no transport");
        assert_eq!(
            err,
            SubmitError::NoTransport {
                target: "https://h/none".into()
            }
        );
        assert_eq!(coordinator.active_count(), 0);

        let blank = coordinator.submit("x", Call::Target("  ".into()), RequestConfig::new());
        assert_eq!(blank.expect_err("blank target"), SubmitError::EmptyTarget);
    }

    #[tokio::test]
    async fn rejected_submission_supersedes_nothing() {
        let coordinator = Coordinator::default();
        let _live = coordinator
            .submit("https://h/a", never(), RequestConfig::new())
            .expect("submit");
        let _ = coordinator.call_target("https://h/a", RequestConfig::new());
        assert!(coordinator.is_active(&RequestIdentity::for_url("h/a")));
    }

    #[tokio::test]
    async fn snapshot_lists_entries_oldest_first() {
        let coordinator = Coordinator::default();
        let _a = coordinator
            .submit("https://h/one", never(), RequestConfig::new())
            .expect("submit");
        let _b = coordinator
            .submit("https://h/two", never(), RequestConfig::new())
            .expect("submit");

        let snapshot = coordinator.snapshot();
        let targets: Vec<&str> = snapshot.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(targets, ["https://h/one", "https://h/two"]);
        assert!(serde_json::to_string(&snapshot).is_ok());
        coordinator.reset();
    }

    #[tokio::test]
    async fn independent_coordinators_do_not_share_tables() {
        let left = Coordinator::default();
        let right = Coordinator::default();
        let _l = left.submit("t", never(), keyed("shared")).expect("submit");
        let _r = right.submit("t", never(), keyed("shared")).expect("submit");
        assert_eq!(left.active_count(), 1);
        assert_eq!(right.active_count(), 1);
        left.reset();
        right.reset();
    }
}
