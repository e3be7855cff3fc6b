//! Scripted HTTP backend shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::api::client::{HttpBackend, HttpCall, NetworkError, RawResponse};
use crate::api::Method;
use crate::auth::{Credentials, ServerConfig};

pub fn server() -> ServerConfig {
    ServerConfig::new("http://bms.test", "2").unwrap()
}

pub fn credentials() -> Credentials {
    Credentials::new("operator", "hunter2")
}

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Network,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Reply::Status(status, body.to_string())
    }

    pub fn text(status: u16, body: &str) -> Self {
        Reply::Status(status, body.to_string())
    }

    pub fn login(token: &str) -> Self {
        Reply::json(200, json!({"token": token, "expiresIn": 1800}))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub csrf: Option<String>,
    pub accept: Option<String>,
    pub body: Option<Value>,
}

struct Route {
    suffix: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct Inner {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Option<Duration>,
}

/// Replies per path suffix, in order; the last reply repeats forever.
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Inner>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                latency: Some(latency),
                ..Inner::default()
            }),
        }
    }

    pub fn on(&self, suffix: &str, replies: Vec<Reply>) {
        self.inner.routes.lock().unwrap().push(Route {
            suffix: suffix.to_string(),
            replies: replies.into(),
        });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, suffix: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path.ends_with(suffix))
            .count()
    }

    pub fn logins(&self) -> usize {
        self.calls_to("api/auth/basiclogin")
    }

    fn next_reply(&self, path: &str) -> Reply {
        let mut routes = self.inner.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .find(|r| path.ends_with(&r.suffix))
            .unwrap_or_else(|| panic!("no scripted reply for {}", path));
        if route.replies.len() > 1 {
            route.replies.pop_front().unwrap()
        } else {
            route.replies.front().cloned().unwrap()
        }
    }
}

impl HttpBackend for FakeBackend {
    async fn execute(&self, call: HttpCall) -> Result<RawResponse, NetworkError> {
        let path = call.url.path().to_string();
        self.inner.calls.lock().unwrap().push(RecordedCall {
            method: call.method,
            path: path.clone(),
            query: call.url.query().map(str::to_string),
            authorization: call.header("Authorization").map(str::to_string),
            csrf: call.header("X-CSRF-Token").map(str::to_string),
            accept: call.header("Accept").map(str::to_string),
            body: call.body.clone(),
        });
        let reply = self.next_reply(&path);

        if let Some(latency) = self.inner.latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            Reply::Status(status, body) => Ok(RawResponse { status, body }),
            Reply::Network => Err(NetworkError("connection refused".to_string())),
        }
    }
}
