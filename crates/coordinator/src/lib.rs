//! Latest-call-wins request coordination for Supersede.
//!
//! For any logical request identity, only the most recently submitted call may
//! complete; every earlier in-flight call under that identity is cancelled
//! when the newer one is submitted. Transports of very different shapes (a
//! future that observes an [`AbortSignal`], a request with an imperative
//! `abort()`, a client with a cancel-token object) are driven through one
//! [`RequestCoordinator`].
//!
//! ## Architectural Layer
//!
//! **Domain + port definitions.** This crate performs no network I/O. It
//! defines the [`Transport`] and [`Cancellable`] ports; the `transports` crate
//! implements them over HTTP.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identity`] | `RequestIdentity`, explicit keys, and the resolver |
//! | [`signal`] | Abort controllers and signals, the pending-controller slot |
//! | [`handle`] | `CancelHandle` and the `Cancellable` port |
//! | [`config`] | `CoordinatorConfig`, `RequestConfig`, transport options |
//! | [`transport`] | `Call` shapes, `PreparedRequest`, the `Transport` port |
//! | [`entry`] | Per-request bookkeeping and its state machine |
//! | [`proxy`] | `ProxyResult`, the caller-facing future |
//! | [`coordinator`] | `RequestCoordinator` |
//! | [`errors`] | `RequestError`, `SubmitError` |

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod errors;
pub mod handle;
pub mod identity;
pub mod proxy;
pub mod signal;
pub mod transport;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{CoordinatorConfig, RequestConfig, TransportOptions, PRIVATE_OPTION_KEYS};
pub use coordinator::RequestCoordinator;
pub use entry::{EntryId, EntryState, RequestSnapshot};
pub use errors::{BoxError, RequestError, SubmitError};
pub use handle::{CancelHandle, Cancellable};
pub use identity::{clean_url, KeyLiteral, KeyProducer, RequestIdentity, RequestKey};
pub use proxy::ProxyResult;
pub use signal::{link_external_abort, AbortController, AbortSignal, SignalSlot};
pub use transport::{boxed_call, Call, CallFuture, PreparedRequest, Transport};
