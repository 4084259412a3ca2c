//! Signal-aware HTTP transport over `reqwest`.
//!
//! Recognised transport options:
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `method` | string | `GET` |
//! | `headers` | object; non-string values are rendered as JSON | none |
//! | `body` | string (sent as-is) or any other JSON value (sent as JSON) | none |
//! | `timeoutMs` | non-negative integer | none |
//!
//! Unknown keys are ignored.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use coordinator::{
    AbortSignal, BoxError, Call, PreparedRequest, ProxyResult, RequestConfig, RequestCoordinator,
    SubmitError, Transport, TransportOptions,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::HttpError;

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A successful (2xx) HTTP response with its body read as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response headers whose values are valid UTF-8.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

// ---------------------------------------------------------------------------
// Option parsing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Body {
    Text(String),
    Json(Value),
}

#[derive(Debug)]
struct RequestSettings {
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<Body>,
    timeout: Option<Duration>,
}

impl RequestSettings {
    fn from_options(options: &TransportOptions) -> Result<Self, HttpError> {
        let method = match options.get("method") {
            None | Some(Value::Null) => Method::GET,
            Some(Value::String(name)) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| {
                    HttpError::invalid_option("method", format!("'{name}' is not an HTTP method"))
                })?,
            Some(_) => return Err(HttpError::invalid_option("method", "expected a string")),
        };

        let headers = match options.get("headers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, value)| match value {
                    Value::String(text) => (name.clone(), text.clone()),
                    other => (name.clone(), other.to_string()),
                })
                .collect(),
            Some(_) => return Err(HttpError::invalid_option("headers", "expected an object")),
        };

        let body = match options.get("body") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(Body::Text(text.clone())),
            Some(value) => Some(Body::Json(value.clone())),
        };

        let timeout = match options.get("timeoutMs") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let millis = value.as_u64().ok_or_else(|| {
                    HttpError::invalid_option("timeoutMs", "expected a non-negative integer")
                })?;
                Some(Duration::from_millis(millis))
            }
        };

        Ok(Self {
            method,
            headers,
            body,
            timeout,
        })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// HTTP client that stops as soon as the request's signal fires.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Wraps an existing client (connection pool, TLS and proxy settings are
    /// taken from it).
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Performs the request, giving up with [`HttpError::Aborted`] once
    /// `signal` fires.
    pub async fn execute(
        &self,
        target: &str,
        options: &TransportOptions,
        signal: &AbortSignal,
    ) -> Result<HttpResponse, HttpError> {
        self.execute_until(target, options, async {
            signal.aborted().await;
            HttpError::Aborted
        })
        .await
    }

    /// Submits a call for `target` to `coordinator`; the call observes the
    /// entry's signal.
    pub fn fetch(
        &self,
        coordinator: &RequestCoordinator<HttpResponse>,
        target: impl Into<String>,
        config: RequestConfig,
    ) -> Result<ProxyResult<HttpResponse>, SubmitError> {
        let transport = self.clone();
        coordinator.submit(
            target,
            Call::factory(move |request: PreparedRequest| async move {
                transport
                    .execute(&request.target, &request.options, &request.signal)
                    .await
            }),
            config,
        )
    }

    /// Performs the request until `stop` resolves, in which case its error is
    /// returned instead.
    pub(crate) async fn execute_until<S>(
        &self,
        target: &str,
        options: &TransportOptions,
        stop: S,
    ) -> Result<HttpResponse, HttpError>
    where
        S: Future<Output = HttpError>,
    {
        tokio::select! {
            biased;
            err = stop => Err(err),
            result = self.perform(target, options) => result,
        }
    }

    /// Performs the request with no way to stop it other than dropping the
    /// future.
    pub(crate) async fn perform(
        &self,
        target: &str,
        options: &TransportOptions,
    ) -> Result<HttpResponse, HttpError> {
        let settings = RequestSettings::from_options(options)?;
        let method = settings.method.to_string();

        let mut builder = self.client.request(settings.method, target);
        for (name, value) in settings.headers {
            builder = builder.header(name, value);
        }
        builder = match settings.body {
            Some(Body::Text(text)) => builder.body(text),
            Some(Body::Json(value)) => builder.json(&value),
            None => builder,
        };
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let body = response.text().await?;
        tracing::debug!(%method, %url, status = status.as_u16(), "http response");

        if !status.is_success() {
            return Err(HttpError::Status {
                method,
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(HttpResponse {
            url,
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    type Output = HttpResponse;

    async fn send(&self, request: PreparedRequest) -> Result<HttpResponse, BoxError> {
        Ok(self
            .execute(&request.target, &request.options, &request.signal)
            .await?)
    }
}
