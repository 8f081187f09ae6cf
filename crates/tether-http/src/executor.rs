//! Request executor: per-attempt timeout, classified retry, cancellation.
//!
//! Every call goes through [`RequestExecutor::execute_raw`]:
//!
//! 1. The request is resolved against the base URL and default headers.
//! 2. Each attempt races the transport against the attempt deadline and the
//!    execution's cancellation token.
//! 3. Non-retryable failures return immediately. Retryable ones sleep
//!    `retry_delay(k, unit)` before retry `k`, with the sleep itself
//!    cancellable.
//! 4. When the budget runs out the last failure is wrapped in
//!    `RetriesExhausted`.
//!
//! Each execution registers a child cancellation token under a fresh
//! [`RequestId`]. A drop guard removes the entry on every exit path,
//! including the caller dropping the future.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_core::backoff::retry_delay;
use tether_core::{CancellationToken, RequestError, RequestId};
use tether_settings::HttpSettings;
use tracing::{debug, instrument, warn};

use crate::request::Request;
use crate::transport::{HttpTransport, PreparedRequest, ReqwestTransport, Response};

/// Result of one logical request.
pub type Outcome<T> = Result<T, RequestError>;

/// Longest response body excerpt carried in an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Runtime configuration for a [`RequestExecutor`].
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Base URL that relative request paths are joined onto.
    pub base_url: String,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    /// Default number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit; retry k waits `unit * 2^(k-1)`.
    pub retry_unit: Duration,
    /// Headers sent with every request unless the request sets its own.
    pub default_headers: HeaderMap,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&HttpSettings::default())
    }
}

impl From<&HttpSettings> for ExecutorConfig {
    fn from(settings: &HttpSettings) -> Self {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &settings.default_headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    let _ = default_headers.insert(name, value);
                }
                _ => warn!(header = %name, "ignoring invalid default header"),
            }
        }
        Self {
            base_url: settings.base_url.clone(),
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
            retry_unit: settings.retry_unit(),
            default_headers,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-flight registry
// ─────────────────────────────────────────────────────────────────────────────

type Registry = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

/// Removes a registry entry when the execution ends, however it ends.
struct InFlightGuard {
    registry: Registry,
    id: RequestId,
}

impl InFlightGuard {
    fn register(registry: &Registry, token: CancellationToken) -> Self {
        let id = RequestId::new();
        let _ = registry.lock().insert(id, token);
        Self {
            registry: Arc::clone(registry),
            id,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = self.registry.lock().remove(&self.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Executes [`Request`]s with timeouts, retry, and cancellation.
///
/// Cheap to clone; clones share the transport and the in-flight registry, so
/// `cancel_all` on any clone reaches every request issued through any of them.
#[derive(Clone)]
pub struct RequestExecutor {
    config: Arc<ExecutorConfig>,
    transport: Arc<dyn HttpTransport>,
    in_flight: Registry,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Create an executor over a custom transport.
    pub fn new(config: ExecutorConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create an executor over `reqwest` from loaded settings.
    pub fn from_settings(settings: &HttpSettings) -> Self {
        Self::new(
            ExecutorConfig::from(settings),
            Arc::new(ReqwestTransport::new()),
        )
    }

    /// Executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `request` and decode a successful body as `T`.
    pub async fn execute<T: DeserializeOwned>(&self, request: Request) -> Outcome<T> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Execute `request`, aborting when `cancel` fires.
    ///
    /// The execution runs under a child of `cancel`, so `cancel_all` never
    /// cancels the caller's own token.
    pub async fn execute_with_cancel<T: DeserializeOwned>(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Outcome<T> {
        self.execute_raw(request, cancel).await?.json()
    }

    /// Execute `request` and return the raw successful response.
    #[instrument(
        skip_all,
        fields(method = %request.method(), path = request.path(), request_id = tracing::field::Empty)
    )]
    pub async fn execute_raw(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Outcome<Response> {
        let token = cancel.child_token();
        let guard = InFlightGuard::register(&self.in_flight, token.clone());
        let _ = tracing::Span::current().record("request_id", tracing::field::display(guard.id));

        let prepared = self.prepare(&request)?;
        let timeout = request.timeout_override().unwrap_or(self.config.timeout);
        let max_retries = request
            .retries_override()
            .unwrap_or(self.config.max_retries);

        let mut retry: u32 = 0;
        loop {
            let attempt = self.attempt(&prepared, timeout, &token).await;
            let err = match attempt {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(kind = %err.kind(), "request failed without retry");
                return Err(err);
            }
            if retry >= max_retries {
                warn!(attempt = retry + 1, error = %err, "request retries exhausted");
                return Err(RequestError::RetriesExhausted {
                    attempts: retry + 1,
                    last: Box::new(err),
                });
            }

            retry += 1;
            let delay = retry_delay(retry, self.config.retry_unit);
            warn!(
                attempt = retry,
                max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                kind = %err.kind(),
                error = %err,
                "retrying request"
            );
            tokio::select! {
                biased;
                () = token.cancelled() => return Err(RequestError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One network attempt bounded by `timeout` and `cancel`.
    async fn attempt(
        &self,
        prepared: &PreparedRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Outcome<Response> {
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RequestError::Cancelled),
            sent = tokio::time::timeout(timeout, self.transport.send(prepared)) => sent,
        };
        let response = match sent {
            Ok(result) => result?,
            Err(_) => return Err(RequestError::Timeout { after: timeout }),
        };

        if response.is_success() {
            debug!(status = response.status, "request succeeded");
            Ok(response)
        } else {
            Err(RequestError::from_status(
                response.status,
                error_message(&response),
            ))
        }
    }

    /// Resolve the URL and merge headers.
    fn prepare(&self, request: &Request) -> Outcome<PreparedRequest> {
        if let Some(message) = request.invalid() {
            return Err(RequestError::invalid_request(message));
        }
        let url = resolve_url(&self.config.base_url, request.path())?;

        let mut headers = self.config.default_headers.clone();
        for (name, value) in request.headers() {
            let _ = headers.insert(name.clone(), value.clone());
        }

        Ok(PreparedRequest {
            method: request.method().clone(),
            url,
            headers,
            body: request.body_bytes().map(<[u8]>::to_vec),
        })
    }

    /// Cancel every request currently tracked by this executor.
    ///
    /// Returns the number of requests signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = self.in_flight.lock().values().cloned().collect();
        for token in &tokens {
            token.cancel();
        }
        if !tokens.is_empty() {
            debug!(count = tokens.len(), "cancelled in-flight requests");
        }
        tokens.len()
    }

    /// Number of executions currently registered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    // ── Convenience helpers ─────────────────────────────────────────────

    /// `GET path` decoded as `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Outcome<T> {
        self.execute(Request::get(path)).await
    }

    /// `DELETE path` decoded as `T`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Outcome<T> {
        self.execute(Request::delete(path)).await
    }

    /// `POST path` with a JSON body, decoded as `T`.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Outcome<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Request::post(path).json(body)).await
    }

    /// `PUT path` with a JSON body, decoded as `T`.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Outcome<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Request::put(path).json(body)).await
    }

    /// `PATCH path` with a JSON body, decoded as `T`.
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Outcome<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Request::patch(path).json(body)).await
    }
}

/// Join `path` onto `base`, or accept `path` as-is when it is absolute.
fn resolve_url(base: &str, path: &str) -> Outcome<Url> {
    let joined = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&joined).map_err(|e| RequestError::invalid_request(format!("invalid URL {joined:?}: {e}")))
}

/// Body excerpt, or the canonical reason phrase when the body is empty.
fn error_message(response: &Response) -> String {
    let text = response.text();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return reqwest::StatusCode::from_u16(response.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("request failed")
            .to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
