//! # tether-http
//!
//! Request/response calls with bounded, classified retry.
//!
//! - [`Request`]: method, path, headers, body, and optional per-request
//!   timeout and retry overrides
//! - [`RequestExecutor`]: runs requests with a per-attempt deadline,
//!   retries transient failures with exponential backoff, and honours
//!   cancellation at every await point
//! - [`HttpTransport`]: the single-exchange seam; [`ReqwestTransport`] is the
//!   production implementation
//!
//! Failures are returned as [`RequestError`](tether_core::RequestError), never
//! raised.

#![deny(unsafe_code)]

pub mod executor;
pub mod request;
pub mod transport;

pub use executor::{ExecutorConfig, Outcome, RequestExecutor};
pub use request::Request;
pub use reqwest::Method;
pub use transport::{HttpTransport, PreparedRequest, ReqwestTransport, Response};
