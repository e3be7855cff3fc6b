//! Core library for enteliscript.
//!
//! Everything a front end needs to drive an enteliWEB server from typed
//! commands: credential persistence, the session state machine, an HTTP
//! transport with retry and backoff, the command registry and the
//! dispatcher that ties them together. Nothing here touches the terminal.

pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

pub use api::{ApiRequest, ApiResult, ReqwestBackend};
pub use auth::{CredentialStore, Credentials, Secret, ServerConfig, SessionManager};
pub use config::{Config, CredentialBackend, SettingsFile};
pub use dispatch::{describe_status, Dispatcher, Outcome, RowOutcome};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventSink, TracingSink};

/// Open the credential store selected by `backend` at its default location.
pub fn open_store(backend: CredentialBackend) -> Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match backend {
        CredentialBackend::File => Arc::new(auth::FileStore::default_location()?),
        CredentialBackend::Keyring => Arc::new(auth::KeyringStore::default_location()?),
    };
    debug!(backend = ?backend, "Opened credential store");
    Ok(store)
}

/// Wire up a dispatcher talking HTTP to the stored server.
pub fn connect(
    config: &Config,
    store: Arc<dyn CredentialStore>,
    events: Arc<dyn EventSink>,
) -> anyhow::Result<Dispatcher<ReqwestBackend>> {
    let backend =
        ReqwestBackend::new(config.request_timeout()).context("Failed to build HTTP client")?;
    let transport = Arc::new(api::Transport::new(
        backend,
        config.retry_policy(),
        events.clone(),
    ));
    let sessions = SessionManager::from_store(transport, store, events.clone(), config.into())
        .context("Failed to load saved credentials")?;
    let registry = commands::builtin_registry().context("Failed to register commands")?;

    Ok(Dispatcher::new(registry, Arc::new(sessions), events))
}
