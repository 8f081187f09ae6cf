//! Wire transport seam.
//!
//! [`HttpTransport`] performs exactly one exchange and reports any received
//! status as a successful [`Response`]. Status classification, timeouts, and
//! retries belong to the executor; the transport only distinguishes "got a
//! response" from "the exchange itself broke".

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tether_core::RequestError;

/// A request with the base URL and default headers already applied.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    /// HTTP method.
    pub method: Method,
    /// Fully resolved URL.
    pub url: Url,
    /// Merged headers (defaults, then per-request).
    pub headers: HeaderMap,
    /// Encoded body.
    pub body: Option<Vec<u8>>,
}

/// Status and body of a completed exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl Response {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    ///
    /// An empty body decodes as JSON `null`, so `()` and `Option<T>` accept
    /// `204 No Content`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        let parsed = if self.body.is_empty() {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_slice(&self.body)
        };
        parsed.map_err(|e| RequestError::Decode {
            status: self.status,
            message: e.to_string(),
        })
    }
}

/// One HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` and read the full response body.
    ///
    /// Returns `Ok` for every received status. Errors are limited to
    /// `TransportError` (and `ClientError` for requests the transport refuses
    /// to build).
    async fn send(&self, request: &PreparedRequest) -> Result<Response, RequestError>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a fresh client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<Response, RequestError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();
        Ok(Response { status, body })
    }
}

/// Map a `reqwest` failure onto the request taxonomy.
///
/// The executor owns the deadline, so a `reqwest` timeout only appears when a
/// caller supplies a client with its own timeout; it is reported as a
/// transport failure like any other broken exchange.
fn classify_reqwest_error(err: reqwest::Error) -> RequestError {
    if err.is_builder() {
        RequestError::invalid_request(err.to_string())
    } else {
        RequestError::transport(err.to_string())
    }
}
