use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use keyring::Entry;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, APP_NAME};
use crate::error::{Error, Result};

/// Plaintext credential file name in the config directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Profile file (no secret) used alongside the OS keychain
const PROFILE_FILE: &str = "profile.json";

pub const DEFAULT_API_VERSION: &str = "2";

/// Which server to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    base_url: String,
    api_version: String,
}

impl ServerConfig {
    pub fn new(base_url: &str, api_version: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::InvalidServer("server URL is empty".to_string()));
        }
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::InvalidServer(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidServer(format!(
                "{}: scheme must be http or https",
                base_url
            )));
        }

        let api_version = match api_version.trim() {
            "" => DEFAULT_API_VERSION,
            v => v,
        };

        Ok(Self {
            base_url: base_url.to_string(),
            api_version: api_version.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (api v{})", self.base_url, self.api_version)
    }
}

/// Opaque secret bytes. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<Secret>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

/// Everything persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProfile {
    pub server: ServerConfig,
    pub credentials: Option<Credentials>,
}

/// Persistence for server configuration and credentials.
///
/// `load` returns `Ok(None)` when nothing has been saved yet; only real I/O
/// or format problems are errors.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredProfile>>;

    fn save(&self, server: &ServerConfig, credentials: &Credentials) -> Result<()>;

    /// Replace the server configuration, keeping any saved credentials.
    fn save_server(&self, server: &ServerConfig) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// On-disk JSON layout shared by both file-backed stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    server_url: String,
    #[serde(default)]
    api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    /// Base64 of the secret bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
}

impl CredentialRecord {
    fn server(&self, path: &Path) -> Result<ServerConfig> {
        ServerConfig::new(&self.server_url, &self.api_version).map_err(|e| {
            Error::StoreUnavailable(format!("{}: {}", path.display(), e))
        })
    }
}

fn unavailable(path: &Path, what: &str, err: impl fmt::Display) -> Error {
    Error::StoreUnavailable(format!("{} {}: {}", what, path.display(), err))
}

fn read_record(path: &Path) -> Result<Option<CredentialRecord>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(path, "Failed to read", e)),
    };
    let record =
        serde_json::from_str(&contents).map_err(|e| unavailable(path, "Failed to parse", e))?;
    Ok(Some(record))
}

/// Write via a temp file in the same directory, then rename over the target,
/// so a crash mid-write never leaves a truncated record behind.
fn write_record(path: &Path, record: &CredentialRecord) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| unavailable(path, "No parent directory for", "path"))?;
    std::fs::create_dir_all(parent).map_err(|e| unavailable(parent, "Failed to create", e))?;

    let contents = serde_json::to_vec_pretty(record)
        .map_err(|e| unavailable(path, "Failed to encode", e))?;

    // NamedTempFile is created with mode 0600 on Unix
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| unavailable(parent, "Failed to create temp file in", e))?;
    tmp.write_all(&contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| unavailable(path, "Failed to write", e))?;
    tmp.persist(path)
        .map_err(|e| unavailable(path, "Failed to replace", e.error))?;

    debug!(path = %path.display(), "Credential record written");
    Ok(())
}

fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(unavailable(path, "Failed to remove", e)),
    }
}

fn default_path(file: &str) -> Result<PathBuf> {
    Config::config_dir()
        .map(|dir| dir.join(file))
        .map_err(|e| Error::StoreUnavailable(e.to_string()))
}

// ============================================================================
// Plaintext file
// ============================================================================

/// Server config, username and secret in a single JSON file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/enteliscript/credentials.json`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(default_path(CREDENTIALS_FILE)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<Option<StoredProfile>> {
        let Some(record) = read_record(&self.path)? else {
            return Ok(None);
        };
        let server = record.server(&self.path)?;

        let credentials = match (record.username, record.secret) {
            (Some(username), Some(encoded)) => {
                let bytes = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| unavailable(&self.path, "Corrupt secret in", e))?;
                Some(Credentials {
                    username,
                    secret: Secret::new(bytes),
                })
            }
            _ => None,
        };

        Ok(Some(StoredProfile {
            server,
            credentials,
        }))
    }

    fn save(&self, server: &ServerConfig, credentials: &Credentials) -> Result<()> {
        write_record(
            &self.path,
            &CredentialRecord {
                server_url: server.base_url().to_string(),
                api_version: server.api_version().to_string(),
                username: Some(credentials.username.clone()),
                secret: Some(BASE64.encode(credentials.secret.expose())),
            },
        )
    }

    fn save_server(&self, server: &ServerConfig) -> Result<()> {
        let existing = read_record(&self.path)?;
        let (username, secret) = existing
            .map(|r| (r.username, r.secret))
            .unwrap_or((None, None));
        write_record(
            &self.path,
            &CredentialRecord {
                server_url: server.base_url().to_string(),
                api_version: server.api_version().to_string(),
                username,
                secret,
            },
        )
    }

    fn clear(&self) -> Result<()> {
        remove_file(&self.path)
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Where `KeyringStore` keeps secrets, one per account.
pub trait Keychain: Send + Sync {
    fn get(&self, account: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, account: &str, secret: &[u8]) -> Result<()>;

    /// Removing an account that has no secret is not an error.
    fn delete(&self, account: &str) -> Result<()>;
}

/// The platform credential store (macOS Keychain, Windows Credential
/// Manager, Secret Service on Linux).
pub struct OsKeychain {
    service: String,
}

impl OsKeychain {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry> {
        Entry::new(&self.service, account)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to open keychain entry: {}", e)))
    }
}

impl Default for OsKeychain {
    fn default() -> Self {
        Self::new(APP_NAME)
    }
}

impl Keychain for OsKeychain {
    fn get(&self, account: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(account)?.get_secret() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::StoreUnavailable(format!(
                "Failed to read keychain: {}",
                e
            ))),
        }
    }

    fn set(&self, account: &str, secret: &[u8]) -> Result<()> {
        self.entry(account)?
            .set_secret(secret)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to write keychain: {}", e)))
    }

    fn delete(&self, account: &str) -> Result<()> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::StoreUnavailable(format!(
                "Failed to delete keychain entry: {}",
                e
            ))),
        }
    }
}

/// Secret in a keychain; server config and username in a profile file.
pub struct KeyringStore<K = OsKeychain> {
    profile_path: PathBuf,
    keychain: K,
}

impl KeyringStore {
    /// `~/.config/enteliscript/profile.json` + keychain service `enteliscript`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(default_path(PROFILE_FILE)?, OsKeychain::default()))
    }
}

impl<K: Keychain> KeyringStore<K> {
    pub fn new(profile_path: impl Into<PathBuf>, keychain: K) -> Self {
        Self {
            profile_path: profile_path.into(),
            keychain,
        }
    }
}

impl<K: Keychain> CredentialStore for KeyringStore<K> {
    fn load(&self) -> Result<Option<StoredProfile>> {
        let Some(record) = read_record(&self.profile_path)? else {
            return Ok(None);
        };
        let server = record.server(&self.profile_path)?;

        let credentials = match record.username {
            Some(username) => self.keychain.get(&username)?.map(|bytes| Credentials {
                username,
                secret: Secret::new(bytes),
            }),
            None => None,
        };

        Ok(Some(StoredProfile {
            server,
            credentials,
        }))
    }

    fn save(&self, server: &ServerConfig, credentials: &Credentials) -> Result<()> {
        let account = credentials.username.as_str();
        self.keychain.set(account, credentials.secret.expose())?;

        // The profile is written only once a fresh lookup returns the secret
        match self.keychain.get(account)? {
            Some(stored) if stored == credentials.secret.expose() => {}
            _ => {
                return Err(Error::StoreUnavailable(
                    "keychain did not retain the secret; no persistent keystore is available"
                        .to_string(),
                ))
            }
        }

        write_record(
            &self.profile_path,
            &CredentialRecord {
                server_url: server.base_url().to_string(),
                api_version: server.api_version().to_string(),
                username: Some(credentials.username.clone()),
                secret: None,
            },
        )
    }

    fn save_server(&self, server: &ServerConfig) -> Result<()> {
        let username = read_record(&self.profile_path)?.and_then(|r| r.username);
        write_record(
            &self.profile_path,
            &CredentialRecord {
                server_url: server.base_url().to_string(),
                api_version: server.api_version().to_string(),
                username,
                secret: None,
            },
        )
    }

    fn clear(&self) -> Result<()> {
        if let Some(username) = read_record(&self.profile_path)?.and_then(|r| r.username) {
            self.keychain.delete(&username)?;
        }
        remove_file(&self.profile_path)
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Process-local store, for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    profile: Mutex<Option<StoredProfile>>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: StoredProfile) -> Self {
        Self {
            profile: Mutex::new(Some(profile)),
            unavailable: false,
        }
    }

    /// A store whose every operation fails, to exercise error paths.
    pub fn unavailable() -> Self {
        Self {
            profile: Mutex::new(None),
            unavailable: true,
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Option<StoredProfile>>> {
        if self.unavailable {
            return Err(Error::StoreUnavailable("memory store disabled".to_string()));
        }
        self.profile
            .lock()
            .map_err(|_| Error::StoreUnavailable("memory store poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<StoredProfile>> {
        Ok(self.guard()?.clone())
    }

    fn save(&self, server: &ServerConfig, credentials: &Credentials) -> Result<()> {
        *self.guard()? = Some(StoredProfile {
            server: server.clone(),
            credentials: Some(credentials.clone()),
        });
        Ok(())
    }

    fn save_server(&self, server: &ServerConfig) -> Result<()> {
        let mut guard = self.guard()?;
        let credentials = guard.take().and_then(|p| p.credentials);
        *guard = Some(StoredProfile {
            server: server.clone(),
            credentials,
        });
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.guard()? = None;
        Ok(())
    }
}
