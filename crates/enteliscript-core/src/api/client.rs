//! HTTP backends.
//!
//! `HttpBackend` is the seam between the transport's retry/classification
//! logic and the wire. Production code uses `ReqwestBackend`; tests script
//! their own responses.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;

use super::request::Method;

/// A fully resolved request, ready for the wire.
pub struct HttpCall {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Connection-level failure: refused, reset, DNS, TLS or timed out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NetworkError(pub String);

pub trait HttpBackend: Send + Sync + 'static {
    fn execute(
        &self,
        call: HttpCall,
    ) -> impl Future<Output = Result<RawResponse, NetworkError>> + Send;
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        }
    }
}

/// Backend over a pooled `reqwest::Client`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestBackend {
    client: Client,
}

impl ReqwestBackend {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("enteliscript/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    fn describe(err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError("request timed out".to_string())
        } else if err.is_connect() {
            NetworkError(format!("connection failed: {}", err))
        } else {
            NetworkError(err.to_string())
        }
    }
}

impl HttpBackend for ReqwestBackend {
    async fn execute(&self, call: HttpCall) -> Result<RawResponse, NetworkError> {
        let mut builder = self
            .client
            .request(call.method.into(), call.url)
            .timeout(call.timeout);
        for (name, value) in call.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = call.body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(Self::describe)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Self::describe)?;
        Ok(RawResponse { status, body })
    }
}
