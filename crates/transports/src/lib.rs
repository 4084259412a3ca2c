//! Supersede transport adapters.
//!
//! Implements the ports defined in the [`coordinator`] crate over HTTP with
//! `reqwest`, in the three shapes the coordinator knows how to cancel:
//!
//! | Adapter | Cancelled through |
//! |---------|-------------------|
//! | [`HttpTransport`] | the entry's [`coordinator::AbortSignal`] |
//! | [`AbortableRequest`] | an imperative `abort()` bridged to the signal |
//! | [`CancelTokenSource`] | a [`coordinator::Cancellable`] cancel handle |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Request building, option parsing and response reading
//! live here. The [`coordinator`] crate sees only [`coordinator::Transport`]
//! and [`coordinator::Cancellable`].

mod abortable;
mod cancel_token;
mod error;
mod http;

pub use abortable::{AbortableRequest, RequestAborter};
pub use cancel_token::{CancelToken, CancelTokenSource, SUPERSEDED_REASON};
pub use error::HttpError;
pub use http::{HttpResponse, HttpTransport};
