//! Request description handed to the executor.
//!
//! A [`Request`] is built once and never mutated by the executor. Per-request
//! timeout and retry settings are optional; unset values fall back to the
//! executor's configuration.

use std::time::Duration;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

/// An HTTP request to run through [`RequestExecutor`](crate::RequestExecutor).
///
/// Builder methods never fail. A header or body that cannot be encoded is
/// remembered and surfaced as a `ClientError` when the request is executed,
/// the same way `reqwest::RequestBuilder` defers its errors to `send`.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    invalid: Option<String>,
}

impl Request {
    /// Create a request for `path`, relative to the executor's base URL.
    ///
    /// An absolute `http://` or `https://` URL bypasses the base URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            max_retries: None,
            invalid: None,
        }
    }

    /// `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT` request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH` request.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE` request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a header. Overrides an executor default of the same name.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                let _ = self.headers.insert(name, value);
            }
            (Err(e), _) => self.record_invalid(format!("invalid header name {name:?}: {e}")),
            (_, Err(e)) => self.record_invalid(format!("invalid value for header {name:?}: {e}")),
        }
        self
    }

    /// Serialize `body` as the JSON request body.
    #[must_use]
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => {
                let _ = self
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.body = Some(bytes);
            }
            Err(e) => self.record_invalid(format!("failed to encode JSON body: {e}")),
        }
        self
    }

    /// Use raw bytes as the request body.
    #[must_use]
    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(bytes.into());
        self
    }

    /// Per-attempt timeout for this request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Additional attempts after the first for retryable failures.
    #[must_use]
    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path or absolute URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Headers set on this request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Encoded body, if any.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Per-request timeout override.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// Per-request retry override.
    pub fn retries_override(&self) -> Option<u32> {
        self.max_retries
    }

    /// First builder error, if any.
    pub(crate) fn invalid(&self) -> Option<&str> {
        self.invalid.as_deref()
    }

    fn record_invalid(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }
}
