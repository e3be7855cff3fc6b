use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{json, Value};

use crate::api::{ApiRequest, ApiResult};
use crate::error::{Error, Result};

use super::credentials::Credentials;

/// Login endpoint, relative to the server base URL
const LOGIN_PATH: [&str; 3] = ["api", "auth", "basiclogin"];

/// Response fields that may carry the session token, in order of preference
const TOKEN_FIELDS: [&str; 3] = ["token", "sessionId", "enteliWebID"];

const CSRF_FIELDS: [&str; 2] = ["_csrfToken", "csrfToken"];

/// A live authenticated context.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub csrf_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"***")
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "***"))
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| now >= expiry).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check if the session will expire within `buffer` and should be refreshed
    pub fn needs_refresh(&self, buffer: TimeDelta) -> bool {
        match Utc::now().checked_add_signed(buffer) {
            Some(horizon) => self.is_expired_at(horizon),
            None => self.expires_at.is_some(),
        }
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.expires_at
            .map(|expiry| (expiry - Utc::now()).num_minutes().max(0))
    }
}

/// Build the login call. The password only exists as a string inside the
/// request body.
pub fn login_request(credentials: &Credentials) -> ApiRequest {
    let password = String::from_utf8_lossy(credentials.secret.expose()).into_owned();
    ApiRequest::post(LOGIN_PATH)
        .query("alt", "json")
        .body(json!({
            "username": credentials.username,
            "password": password,
        }))
}

/// Turn a successful login response into a `Session`.
///
/// `assumed_lifetime` applies when the server does not report a usable
/// expiry.
pub fn session_from_login(
    result: &ApiResult,
    issued_at: DateTime<Utc>,
    assumed_lifetime: Option<TimeDelta>,
) -> Result<Session> {
    let payload = &result.payload;

    let token = TOKEN_FIELDS
        .iter()
        .find_map(|field| non_empty_str(payload, field))
        .ok_or_else(|| Error::ClientError {
            status: result.status,
            detail: "login response did not contain a session token".to_string(),
        })?;

    let csrf_token = CSRF_FIELDS
        .iter()
        .find_map(|field| non_empty_str(payload, field));

    let reported_expiry = payload
        .get("expiresAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            payload
                .get("expiresIn")
                .and_then(Value::as_i64)
                .filter(|secs| *secs > 0)
                .and_then(TimeDelta::try_seconds)
                .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        });

    Ok(Session {
        token,
        csrf_token,
        issued_at,
        expires_at: reported_expiry
            .or_else(|| assumed_lifetime.and_then(|d| issued_at.checked_add_signed(d))),
    })
}

fn non_empty_str(payload: &Value, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
