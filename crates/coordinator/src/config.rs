//! Coordinator-level and per-request configuration.
//!
//! Transport options are a flat JSON object passed through to the transport
//! verbatim, except for the coordinator-private keys in
//! [`PRIVATE_OPTION_KEYS`], which are always stripped before forwarding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AbortController, CancelHandle, KeyLiteral, RequestKey};

/// Option keys that belong to the coordinator and are never forwarded.
pub const PRIVATE_OPTION_KEYS: [&str; 4] =
    ["abortController", "cancelToken", "requestKey", "noCancel"];

/// Flat string-keyed options forwarded to a transport.
pub type TransportOptions = serde_json::Map<String, Value>;

/// Returns a copy of `options` without the coordinator-private keys.
pub fn forwardable(options: &TransportOptions) -> TransportOptions {
    options
        .iter()
        .filter(|(key, _)| !PRIVATE_OPTION_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// CoordinatorConfig
// ---------------------------------------------------------------------------

/// Manager-level settings.
///
/// `verbose` is read when each request is submitted and captured by that
/// request's entry; changing it later does not affect entries already in
/// flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Reject cancelled requests' proxies with a cancellation error instead of
    /// leaving them pending.
    pub verbose: bool,
}

// ---------------------------------------------------------------------------
// RequestConfig
// ---------------------------------------------------------------------------

/// Per-submission configuration.
#[derive(Debug, Default)]
pub struct RequestConfig {
    /// Explicit identity key; the target is used when absent.
    pub key: Option<RequestKey>,
    /// Controller whose signal the call observes. Claimed from the
    /// coordinator's slot when absent.
    pub controller: Option<AbortController>,
    /// Additional cancellation path for transports that do not observe the
    /// signal.
    pub cancel_handle: Option<CancelHandle>,
    /// Disables supersession for this call.
    pub no_cancel: bool,
    /// Pass-through transport options.
    pub options: TransportOptions,
}

impl RequestConfig {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from a raw option object.
    ///
    /// `requestKey` (string or integer) and `noCancel` (bool) are lifted into
    /// their typed fields; every private key is stripped from the remaining
    /// options.
    pub fn from_options(mut options: TransportOptions) -> Self {
        let key = match options.remove("requestKey") {
            Some(Value::String(text)) => Some(RequestKey::Literal(KeyLiteral::Text(text))),
            Some(Value::Number(n)) => {
                n.as_i64().map(|n| RequestKey::Literal(KeyLiteral::Number(n)))
            }
            _ => None,
        };
        let no_cancel = matches!(options.remove("noCancel"), Some(Value::Bool(true)));
        Self {
            key,
            no_cancel,
            options: forwardable(&options),
            ..Self::default()
        }
    }

    /// Sets an explicit key.
    pub fn with_key(mut self, key: impl Into<RequestKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Uses a caller-owned controller instead of the coordinator's slot.
    pub fn with_controller(mut self, controller: AbortController) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Registers an extra cancellation path.
    pub fn with_cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancel_handle = Some(handle);
        self
    }

    /// Suppresses supersession: this call neither cancels nor is cancelled by
    /// other calls.
    pub fn no_cancel(mut self) -> Self {
        self.no_cancel = true;
        self
    }

    /// Adds one pass-through option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}
