//! Request execution with timeout, classification and retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::auth::{ServerConfig, Session};
use crate::error::truncate_body;
use crate::events::{CoreEvent, EventSink};

use super::client::{HttpBackend, HttpCall};
use super::error::{Classification, TransportError};
use super::request::{ApiRequest, ApiResult};

/// Header used to echo the CSRF token issued at login
const CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base × 2^retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Bookkeeping for one logical request across its retries.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub request_id: u64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

pub struct Transport<B> {
    backend: B,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
    next_request_id: AtomicU64,
}

impl<B: HttpBackend> Transport<B> {
    pub fn new(backend: B, retry: RetryPolicy, events: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            retry,
            events,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Send `request` to `server`, retrying server errors and network
    /// failures. Auth and client errors return immediately.
    pub async fn send(
        &self,
        server: &ServerConfig,
        request: &ApiRequest,
        session: Option<&Session>,
        timeout: Duration,
    ) -> Result<ApiResult, TransportError> {
        let url = build_url(server, request)?;
        let mut attempt = Attempt {
            request_id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            retry_count: 0,
            last_error: None,
        };

        loop {
            self.events.emit(&CoreEvent::RequestIssued {
                request_id: attempt.request_id,
                method: request.method.to_string(),
                path: request.display_path(),
                attempt: attempt.retry_count + 1,
            });

            let call = HttpCall {
                method: request.method,
                url: url.clone(),
                headers: headers(server, session),
                body: request.body.clone(),
                timeout,
            };

            let outcome = match tokio::time::timeout(timeout, self.backend.execute(call)).await {
                Ok(result) => result,
                Err(_) => Err(super::client::NetworkError("request timed out".to_string())),
            };

            let error = match outcome {
                Ok(response) => {
                    let class = Classification::from_status(response.status);
                    match class {
                        Classification::Success => {
                            debug!(
                                request_id = attempt.request_id,
                                status = response.status,
                                "Request succeeded"
                            );
                            return Ok(ApiResult::from_body(response.status, &response.body));
                        }
                        Classification::AuthExpired => {
                            return Err(TransportError::auth_expired(
                                response.status,
                                &response.body,
                            ))
                        }
                        _ if !class.is_retryable() => {
                            let err = TransportError::rejected(response.status, &response.body);
                            self.events.emit(&CoreEvent::Failure {
                                request_id: Some(attempt.request_id),
                                error: err.to_string(),
                            });
                            return Err(err);
                        }
                        _ => format!(
                            "HTTP {}: {}",
                            response.status,
                            truncate_body(&response.body)
                        ),
                    }
                }
                Err(network) => network.0,
            };
            attempt.last_error = Some(error);

            if attempt.retry_count >= self.retry.max_retries {
                let err = TransportError::Unavailable {
                    attempts: attempt.retry_count + 1,
                    reason: attempt.last_error.take().unwrap_or_default(),
                };
                self.events.emit(&CoreEvent::Failure {
                    request_id: Some(attempt.request_id),
                    error: err.to_string(),
                });
                return Err(err);
            }

            let delay = self.retry.delay_for(attempt.retry_count);
            attempt.retry_count += 1;
            self.events.emit(&CoreEvent::RetryScheduled {
                request_id: attempt.request_id,
                retry: attempt.retry_count,
                delay,
                reason: attempt.last_error.clone().unwrap_or_default(),
            });
            tokio::time::sleep(delay).await;
        }
    }
}

fn build_url(server: &ServerConfig, request: &ApiRequest) -> Result<Url, TransportError> {
    let mut url = Url::parse(server.base_url())
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", server.base_url(), e)))?;
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidUrl(format!("{} cannot be a base", server.base_url())))?
        .pop_if_empty()
        .extend(&request.path);
    if !request.query.is_empty() {
        url.query_pairs_mut().extend_pairs(&request.query);
    }
    Ok(url)
}

fn headers(server: &ServerConfig, session: Option<&Session>) -> Vec<(&'static str, String)> {
    let mut headers = vec![(
        "Accept",
        format!("application/json; version={}", server.api_version()),
    )];
    if let Some(session) = session {
        headers.push(("Authorization", format!("Bearer {}", session.token)));
        if let Some(ref csrf) = session.csrf_token {
            headers.push((CSRF_HEADER, csrf.clone()));
        }
    }
    headers
}
