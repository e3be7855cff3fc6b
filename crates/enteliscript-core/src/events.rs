//! Structured events emitted by the core.
//!
//! The core never decides where its diagnostics end up. Every component
//! holds an `Arc<dyn EventSink>` and reports what happened; the default
//! sink forwards to `tracing`, and a front end may install its own.

use std::time::Duration;

use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    RequestIssued {
        request_id: u64,
        method: String,
        path: String,
        attempt: u32,
    },
    RetryScheduled {
        request_id: u64,
        retry: u32,
        delay: Duration,
        reason: String,
    },
    AuthRefresh {
        username: String,
        reason: String,
    },
    Failure {
        request_id: Option<u64>,
        error: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CoreEvent);
}

/// Forwards events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &CoreEvent) {
        match event {
            CoreEvent::RequestIssued {
                request_id,
                method,
                path,
                attempt,
            } => debug!(request_id, %method, %path, attempt, "Request issued"),
            CoreEvent::RetryScheduled {
                request_id,
                retry,
                delay,
                reason,
            } => warn!(
                request_id,
                retry,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "Retrying request"
            ),
            CoreEvent::AuthRefresh { username, reason } => {
                info!(%username, %reason, "Refreshing session")
            }
            CoreEvent::Failure { request_id, error } => {
                warn!(request_id = ?request_id, %error, "Request failed")
            }
        }
    }
}
