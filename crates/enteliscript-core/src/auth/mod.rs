//! Authentication module for managing server sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: persisted server config + credentials, with
//!   plaintext-file, OS keychain and in-memory backends
//! - `Session`: token-based session with optional known expiry
//! - `SessionManager`: the session state machine (login, silent
//!   re-authentication, logout)

pub mod credentials;
pub mod manager;
pub mod session;

pub use credentials::{
    CredentialStore, Credentials, FileStore, Keychain, KeyringStore, MemoryStore, OsKeychain,
    Secret, ServerConfig, StoredProfile,
};
pub use manager::{LoginReport, SessionManager, SessionOptions, SessionState, SessionStatus};
pub use session::Session;
