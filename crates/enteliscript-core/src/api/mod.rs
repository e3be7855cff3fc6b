//! HTTP plumbing for talking to an enteliWEB server.
//!
//! `Transport` turns an `ApiRequest` into a URL, attaches the session
//! token, enforces the timeout, classifies the response and retries
//! server errors and network failures with exponential backoff.

pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use client::{HttpBackend, ReqwestBackend};
pub use error::{Classification, TransportError};
pub use request::{ApiRequest, ApiResult, Method};
pub use transport::{Attempt, RetryPolicy, Transport};
