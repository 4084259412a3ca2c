//! Errors raised by the HTTP transports.

use thiserror::Error;

/// Why an HTTP call did not produce a successful response.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server answered with a non-success status.
    #[error("{method} {url} returned status {status}")]
    Status {
        /// Request method.
        method: String,
        /// Final request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The configured `timeoutMs` elapsed.
    #[error("request timed out")]
    Timeout,

    /// The request's abort signal fired, or its imperative `abort()` was
    /// called.
    #[error("request aborted")]
    Aborted,

    /// The request's cancel token was cancelled.
    #[error("request cancelled: {reason}")]
    Cancelled {
        /// Reason recorded by the cancel-token source.
        reason: String,
    },

    /// A transport option had an unusable value.
    #[error("invalid option '{name}': {message}")]
    InvalidOption {
        /// Option key.
        name: String,
        /// What was wrong with it.
        message: String,
    },

    /// Connection, protocol, or body-decoding failure.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The task running an abortable request failed without being aborted.
    #[error("request task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}

impl HttpError {
    pub(crate) fn invalid_option(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            name: name.to_owned(),
            message: message.into(),
        }
    }

    /// Returns `true` if the call was stopped on purpose rather than failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Aborted | Self::Cancelled { .. })
    }
}
