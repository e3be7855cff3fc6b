//! Session lifecycle: login, silent re-authentication, logout.
//!
//! The manager owns the only `Session` in the process. All state lives
//! behind one async mutex which is held across the login round-trip, so
//! concurrent callers that find the session expired queue up behind a
//! single re-authentication and then reuse its result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{HttpBackend, Transport, TransportError};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventSink};

use super::credentials::{CredentialStore, Credentials, ServerConfig};
use super::session::{login_request, session_from_login, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Active,
    Expired,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timeout: Duration,
    pub assumed_lifetime: Option<TimeDelta>,
    pub refresh_buffer: TimeDelta,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            assumed_lifetime: Some(TimeDelta::minutes(30)),
            refresh_buffer: TimeDelta::seconds(60),
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.request_timeout(),
            assumed_lifetime: config.assumed_session_lifetime(),
            refresh_buffer: config.refresh_buffer(),
        }
    }
}

/// Point-in-time view for display. Contains no secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub username: Option<String>,
    pub server: Option<ServerConfig>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of an explicit login. The session is live even if persisting
/// the credentials failed.
#[derive(Debug)]
pub struct LoginReport {
    pub session: Session,
    pub save_error: Option<Error>,
}

struct Inner {
    server: Option<ServerConfig>,
    credentials: Option<Credentials>,
    session: Option<Session>,
    state: SessionState,
}

pub struct SessionManager<B> {
    transport: Arc<Transport<B>>,
    store: Arc<dyn CredentialStore>,
    events: Arc<dyn EventSink>,
    options: SessionOptions,
    inner: Mutex<Inner>,
}

impl<B: HttpBackend> SessionManager<B> {
    pub fn new(
        transport: Arc<Transport<B>>,
        store: Arc<dyn CredentialStore>,
        events: Arc<dyn EventSink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            store,
            events,
            options,
            inner: Mutex::new(Inner {
                server: None,
                credentials: None,
                session: None,
                state: SessionState::Unauthenticated,
            }),
        }
    }

    /// Create a manager primed with whatever the store has saved.
    pub fn from_store(
        transport: Arc<Transport<B>>,
        store: Arc<dyn CredentialStore>,
        events: Arc<dyn EventSink>,
        options: SessionOptions,
    ) -> Result<Self> {
        let profile = store.load()?;
        let mut manager = Self::new(transport, store, events, options);
        if let Some(profile) = profile {
            debug!(
                server = %profile.server,
                has_credentials = profile.credentials.is_some(),
                "Loaded stored profile"
            );
            let inner = manager.inner.get_mut();
            inner.server = Some(profile.server);
            inner.credentials = profile.credentials;
        }
        Ok(manager)
    }

    pub fn transport(&self) -> &Arc<Transport<B>> {
        &self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    pub async fn state(&self) -> SessionState {
        let inner = self.inner.lock().await;
        Self::observed_state(&inner)
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.lock().await;
        SessionStatus {
            state: Self::observed_state(&inner),
            username: inner.credentials.as_ref().map(|c| c.username.clone()),
            server: inner.server.clone(),
            expires_at: inner.session.as_ref().and_then(|s| s.expires_at),
        }
    }

    /// Authenticate against the configured server with `credentials`.
    /// Credentials are kept in memory only.
    pub async fn authenticate(&self, credentials: Credentials) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        let server = inner.server.clone().ok_or_else(|| {
            Error::AuthenticationRequired("no server configured; use `login <url> <username>`".to_string())
        })?;

        let session = self.request_session(&server, &credentials).await?;
        inner.credentials = Some(credentials);
        inner.session = Some(session.clone());
        inner.state = SessionState::Active;
        Ok(session)
    }

    /// Authenticate against `server` and, on success, persist both.
    /// A failed login leaves the previous state untouched.
    pub async fn login(&self, server: ServerConfig, credentials: Credentials) -> Result<LoginReport> {
        let mut inner = self.inner.lock().await;

        let session = self.request_session(&server, &credentials).await?;
        info!(username = %credentials.username, server = %server, "Login successful");

        let save_error = match self.store.save(&server, &credentials) {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Failed to store credentials");
                self.events.emit(&CoreEvent::Failure {
                    request_id: None,
                    error: e.to_string(),
                });
                Some(e)
            }
        };

        inner.server = Some(server);
        inner.credentials = Some(credentials);
        inner.session = Some(session.clone());
        inner.state = SessionState::Active;

        Ok(LoginReport {
            session,
            save_error,
        })
    }

    /// Return a session that is not known to be expired, re-authenticating
    /// with the remembered credentials if needed.
    pub async fn ensure_valid(&self) -> Result<Session> {
        self.context().await.map(|(_, session)| session)
    }

    /// Like `ensure_valid`, also returning the server the session belongs to.
    pub async fn context(&self) -> Result<(ServerConfig, Session)> {
        let mut inner = self.inner.lock().await;

        if inner.state == SessionState::Active {
            if let (Some(server), Some(session)) = (&inner.server, &inner.session) {
                if !session.needs_refresh(self.options.refresh_buffer) {
                    return Ok((server.clone(), session.clone()));
                }
            }
            debug!("Session past its expiry window");
            inner.state = SessionState::Expired;
        }

        let reason = match inner.state {
            SessionState::Expired => "session expired",
            _ => "no active session",
        };

        let (Some(server), Some(credentials)) = (inner.server.clone(), inner.credentials.clone())
        else {
            inner.session = None;
            inner.state = SessionState::Unauthenticated;
            return Err(Error::AuthenticationRequired(
                "not logged in; use `login <url> <username>`".to_string(),
            ));
        };

        self.events.emit(&CoreEvent::AuthRefresh {
            username: credentials.username.clone(),
            reason: reason.to_string(),
        });

        match self.request_session(&server, &credentials).await {
            Ok(session) if session.is_expired() => {
                warn!(expires_at = ?session.expires_at, "Server issued an already expired session");
                inner.session = None;
                inner.state = SessionState::Expired;
                Err(Error::AuthenticationRequired(
                    "server issued a session that has already expired; check the server clock"
                        .to_string(),
                ))
            }
            Ok(session) => {
                inner.session = Some(session.clone());
                inner.state = SessionState::Active;
                Ok((server, session))
            }
            // Transient: keep the credentials so a later call can retry
            Err(e @ (Error::UpstreamUnavailable { .. } | Error::InvalidServer(_))) => Err(e),
            Err(e) => {
                warn!(error = %e, "Silent re-authentication rejected");
                inner.credentials = None;
                inner.session = None;
                inner.state = SessionState::Unauthenticated;
                Err(match e {
                    Error::AuthenticationRequired(_) => e,
                    other => Error::AuthenticationRequired(format!(
                        "re-authentication failed: {}",
                        other
                    )),
                })
            }
        }
    }

    /// Mark `stale` as expired if it is still the current session. A session
    /// that was already replaced by another caller is left alone.
    pub async fn invalidate(&self, stale: &Session) {
        let mut inner = self.inner.lock().await;
        let is_current = inner
            .session
            .as_ref()
            .map(|s| s.token == stale.token)
            .unwrap_or(false);
        if is_current && inner.state == SessionState::Active {
            debug!("Session rejected by server; marking expired");
            inner.state = SessionState::Expired;
        }
    }

    /// Drop the session and in-memory credentials. With `forget`, also
    /// erase what the store has saved.
    pub async fn logout(&self, forget: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.session = None;
        inner.credentials = None;
        inner.state = SessionState::Unauthenticated;
        if forget {
            self.store.clear()?;
            inner.server = None;
        }
        info!(forget, "Logged out");
        Ok(())
    }

    /// Point at a different server. The live session is dropped; remembered
    /// credentials are tried against the new server on next use.
    pub async fn reconfigure(&self, server: ServerConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.store.save_server(&server)?;
        info!(server = %server, "Server reconfigured");
        inner.server = Some(server);
        inner.session = None;
        inner.state = SessionState::Unauthenticated;
        Ok(())
    }

    fn observed_state(inner: &Inner) -> SessionState {
        match (&inner.state, &inner.session) {
            (SessionState::Active, Some(session)) if session.is_expired() => SessionState::Expired,
            (state, _) => *state,
        }
    }

    async fn request_session(&self, server: &ServerConfig, credentials: &Credentials) -> Result<Session> {
        let issued_at = Utc::now();
        let result = self
            .transport
            .send(server, &login_request(credentials), None, self.options.timeout)
            .await;

        match result {
            Ok(result) => session_from_login(&result, issued_at, self.options.assumed_lifetime),
            Err(TransportError::AuthExpired { status, .. }) => {
                Err(Error::AuthenticationRequired(format!(
                    "invalid username or password ({})",
                    status
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}
