//! Turns one typed command into at most two authenticated API calls.
//!
//! The dispatcher resolves and validates the command, asks the session
//! manager for a usable session, and hands the built request to the
//! transport. A request rejected with 401/403 gets exactly one second
//! chance after a forced re-authentication. Batch commands repeat that for
//! every row and report each row on its own.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResult, HttpBackend, TransportError};
use crate::auth::{Credentials, ServerConfig, SessionManager, SessionState, SessionStatus};
use crate::commands::{
    split_command, Arguments, BatchItem, BatchLoader, Invoke, Registry, SessionOp, UiAction,
};
use crate::config::SettingsFile;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventSink};

/// Sends per invocation, regardless of the transport's own retries.
const MAX_AUTH_ATTEMPTS: u32 = 2;

/// What a successfully executed command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Payload returned by the server for a data command
    Response {
        command: &'static str,
        result: ApiResult,
    },
    /// One result per row of a batch command. `rows` is shorter than
    /// `total` when the batch stopped early for lack of a session.
    Batch {
        command: &'static str,
        rows: Vec<RowOutcome>,
        total: usize,
    },
    /// Informational text from a session or settings command
    Message(String),
    /// Left for the front end to carry out
    Ui {
        action: UiAction,
        arguments: Arguments,
    },
}

/// How one row of a batch went.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    /// 1-based data row in the batch file
    pub row: usize,
    /// Path the row was sent to
    pub target: String,
    pub result: Result<ApiResult>,
}

pub struct Dispatcher<B> {
    registry: Registry,
    sessions: Arc<SessionManager<B>>,
    events: Arc<dyn EventSink>,
    settings: Option<Arc<SettingsFile>>,
}

impl<B: HttpBackend> Dispatcher<B> {
    pub fn new(
        registry: Registry,
        sessions: Arc<SessionManager<B>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            sessions,
            events,
            settings: None,
        }
    }

    /// Back the `setting` command with a config file.
    pub fn with_settings(mut self, settings: Arc<SettingsFile>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager<B>> {
        &self.sessions
    }

    /// Tokenize and execute one input line. `None` for a blank line.
    pub async fn execute_line(&self, line: &str) -> Result<Option<Outcome>> {
        match split_command(line)? {
            Some((name, raw)) => self.execute(&name, &raw).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn execute(&self, name: &str, raw: &[String]) -> Result<Outcome> {
        let spec = self.registry.resolve(name)?;
        let arguments = spec.validate(raw)?;
        debug!(command = spec.name, "Executing command");

        match spec.invoke {
            Invoke::Request(build) => {
                let request = build(&arguments);
                let result = self.send_authenticated(spec.name, &request).await?;
                Ok(Outcome::Response {
                    command: spec.name,
                    result,
                })
            }
            Invoke::Batch(load) => self.run_batch(spec.name, load, &arguments).await,
            Invoke::Session(op) => self.session_op(op, &arguments).await.map(Outcome::Message),
            Invoke::Settings => self.settings_op(&arguments).map(Outcome::Message),
            Invoke::Ui(action) => Ok(Outcome::Ui { action, arguments }),
        }
    }

    /// How `line` should appear in history: secret arguments masked.
    pub fn history_entry(&self, line: &str) -> String {
        let Ok(Some((name, raw))) = split_command(line) else {
            // Unparseable; keep it only if it cannot carry a secret
            let first = line.split_whitespace().next().unwrap_or_default();
            return match self.registry.resolve(first) {
                Ok(spec) if spec.has_secret() => first.to_string(),
                _ => line.trim().to_string(),
            };
        };
        let Ok(spec) = self.registry.resolve(&name) else {
            return line.trim().to_string();
        };

        std::iter::once(name)
            .chain(spec.redact(&raw).into_iter().map(quote_if_needed))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn send_authenticated(&self, command: &str, request: &ApiRequest) -> Result<ApiResult> {
        let transport = self.sessions.transport();
        let timeout = self.sessions.timeout();

        let (mut server, mut session) = self.sessions.context().await?;

        let mut attempt = 1;
        loop {
            match transport.send(&server, request, Some(&session), timeout).await {
                Ok(result) => return Ok(result),
                Err(TransportError::AuthExpired { status, detail }) => {
                    self.sessions.invalidate(&session).await;
                    if attempt >= MAX_AUTH_ATTEMPTS {
                        let err = Error::AuthenticationRequired(format!(
                            "server rejected a fresh session ({}): {}",
                            status, detail
                        ));
                        self.events.emit(&CoreEvent::Failure {
                            request_id: None,
                            error: err.to_string(),
                        });
                        return Err(err);
                    }
                    debug!(command, status, "Session rejected; re-authenticating once");
                    (server, session) = self.sessions.context().await?;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Load every row first, then send them one by one. A row that fails
    /// is recorded and the next row still goes out, unless no session can
    /// be had at all.
    async fn run_batch(
        &self,
        command: &'static str,
        load: BatchLoader,
        arguments: &Arguments,
    ) -> Result<Outcome> {
        let items = load(arguments)?;
        let total = items.len();
        info!(command, rows = total, "Running batch");

        let mut rows = Vec::with_capacity(total);
        for BatchItem { row, request } in items {
            let result = self.send_authenticated(command, &request).await;
            let stop = matches!(result, Err(Error::AuthenticationRequired(_)));
            if let Err(e) = &result {
                warn!(command, row, error = %e, "Batch row failed");
            }
            rows.push(RowOutcome {
                row,
                target: request.display_path(),
                result,
            });
            if stop {
                break;
            }
        }
        Ok(Outcome::Batch {
            command,
            rows,
            total,
        })
    }

    /// `setting` lists everything, `setting key` shows one value and
    /// `setting key value` saves a new one.
    fn settings_op(&self, arguments: &Arguments) -> Result<String> {
        let settings = self.settings.as_ref().ok_or_else(|| {
            Error::SettingsUnavailable("no config file is attached".to_string())
        })?;

        match (arguments.str("key"), arguments.str("value")) {
            (None, _) => {
                let entries = settings.entries();
                if entries.is_empty() {
                    return Ok(format!("No settings saved in {}", settings.path().display()));
                }
                Ok(entries
                    .iter()
                    .map(|(key, value)| format!("{} = {}", key, value))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            (Some(key), None) => Ok(match settings.get(key) {
                Some(value) => format!("{} = {}", key, value),
                None => format!("{} is not set", key),
            }),
            (Some(key), Some(value)) => {
                settings
                    .set(key, value)
                    .map_err(|e| Error::SettingsUnavailable(format!("{:#}", e)))?;
                Ok(format!("{} = {} (saved)", key, value))
            }
        }
    }

    async fn session_op(&self, op: SessionOp, arguments: &Arguments) -> Result<String> {
        match op {
            SessionOp::Login => self.login(arguments).await,
            SessionOp::Logout => {
                let forget = arguments.bool("forget").unwrap_or(false);
                self.sessions.logout(forget).await?;
                Ok(if forget {
                    "Logged out; saved credentials removed".to_string()
                } else {
                    "Logged out".to_string()
                })
            }
            SessionOp::Status => Ok(describe_status(&self.sessions.status().await)),
            SessionOp::Server => {
                let server = ServerConfig::new(
                    arguments.text("url"),
                    arguments.str("version").unwrap_or_default(),
                )?;
                self.sessions.reconfigure(server.clone()).await?;
                Ok(format!(
                    "Server set to {}; the next command re-authenticates",
                    server
                ))
            }
        }
    }

    /// `login [url] [username] [password] [version]`; omitted values fall
    /// back to the current server and user.
    async fn login(&self, arguments: &Arguments) -> Result<String> {
        let current = self.sessions.status().await;

        let version = arguments
            .str("version")
            .map(str::to_string)
            .or_else(|| current.server.as_ref().map(|s| s.api_version().to_string()))
            .unwrap_or_default();
        let server = match (arguments.str("url"), &current.server) {
            (Some(url), _) => ServerConfig::new(url, &version)?,
            (None, Some(server)) => ServerConfig::new(server.base_url(), &version)?,
            (None, None) => return Err(Error::missing("url")),
        };
        let username = arguments
            .str("username")
            .map(str::to_string)
            .or(current.username)
            .ok_or_else(|| Error::missing("username"))?;
        let secret = arguments
            .secret("password")
            .cloned()
            .ok_or_else(|| Error::missing("password"))?;

        let report = self
            .sessions
            .login(server.clone(), Credentials::new(username.clone(), secret))
            .await?;
        info!(username = %username, server = %server, "Logged in");

        let mut message = format!("Logged in to {} as {}", server, username);
        if let Some(minutes) = report.session.minutes_until_expiry() {
            message.push_str(&format!(" (session expires in {} min)", minutes));
        }
        if let Some(e) = report.save_error {
            message.push_str(&format!("\nWarning: credentials were not saved: {}", e));
        }
        Ok(message)
    }
}

/// Multi-line summary of a session snapshot.
pub fn describe_status(status: &SessionStatus) -> String {
    let state = match status.state {
        SessionState::Unauthenticated => "not logged in",
        SessionState::Active => "active",
        SessionState::Expired => "expired",
    };
    let mut lines = vec![
        format!(
            "Server:  {}",
            status
                .server
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "(none)".to_string())
        ),
        format!("User:    {}", status.username.as_deref().unwrap_or("(none)")),
        format!("Session: {}", state),
    ];
    if let Some(expires) = status.expires_at {
        lines.push(format!(
            "Expires: {}",
            expires.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
        ));
    }
    lines.join("\n")
}

fn quote_if_needed(token: String) -> String {
    if token.is_empty() || token.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("\"{}\"", token.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use crate::api::{Method, RetryPolicy, Transport};
    use crate::auth::{CredentialStore, MemoryStore, SessionOptions, StoredProfile};
    use crate::commands::builtin_registry;
    use crate::config::Config;
    use crate::events::recording::RecordingSink;
    use crate::testing::{credentials, server, FakeBackend, Reply};

    const LOGIN: &str = "api/auth/basiclogin";
    const SITES: &str = "api/.bacnet";

    struct Harness {
        backend: FakeBackend,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        dispatcher: Dispatcher<FakeBackend>,
    }

    fn harness_with(store: MemoryStore, base_delay: Duration) -> Harness {
        let backend = FakeBackend::new();
        let store = Arc::new(store);
        let sink = Arc::new(RecordingSink::default());
        let events: Arc<dyn EventSink> = sink.clone();
        let transport = Arc::new(Transport::new(
            backend.clone(),
            RetryPolicy {
                max_retries: 3,
                base_delay,
                max_delay: Duration::from_secs(1),
            },
            events.clone(),
        ));
        let sessions = Arc::new(
            SessionManager::from_store(
                transport,
                store.clone(),
                events.clone(),
                SessionOptions::default(),
            )
            .unwrap(),
        );
        let dispatcher = Dispatcher::new(builtin_registry().unwrap(), sessions, events);
        Harness {
            backend,
            store,
            sink,
            dispatcher,
        }
    }

    fn harness() -> Harness {
        harness_with(
            MemoryStore::with_profile(StoredProfile {
                server: server(),
                credentials: Some(credentials()),
            }),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_request_uses_session_token() {
        let h = harness();
        h.backend.on(LOGIN, vec![Reply::login("t1")]);
        h.backend.on(SITES, vec![Reply::json(200, json!({"Main": {}}))]);

        let outcome = h.dispatcher.execute_line("sites").await.unwrap().unwrap();
        match outcome {
            Outcome::Response { command, result } => {
                assert_eq!(command, "sites");
                assert_eq!(result.payload, json!({"Main": {}}));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let data = h.backend.calls().pop().unwrap();
        assert_eq!(data.authorization.as_deref(), Some("Bearer t1"));
        assert_eq!(data.query.as_deref(), Some("alt=json"));
    }

    #[tokio::test]
    async fn test_auth_expired_once_retries_once() {
        let h = harness();
        h.backend
            .on(LOGIN, vec![Reply::login("t1"), Reply::login("t2")]);
        h.backend.on(
            SITES,
            vec![Reply::text(401, "expired"), Reply::json(200, json!([]))],
        );

        let outcome = h.dispatcher.execute("sites", &[]).await.unwrap();
        assert!(matches!(outcome, Outcome::Response { .. }));

        assert_eq!(h.backend.calls_to(SITES), 2);
        // Initial silent login plus exactly one re-authentication
        assert_eq!(h.backend.logins(), 2);
        let last = h.backend.calls().pop().unwrap();
        assert_eq!(last.authorization.as_deref(), Some("Bearer t2"));
    }

    #[tokio::test]
    async fn test_auth_expired_always_requires_login() {
        let h = harness();
        h.backend.on(LOGIN, vec![Reply::login("t1")]);
        h.backend.on(SITES, vec![Reply::text(403, "forbidden")]);

        let err = h.dispatcher.execute("sites", &[]).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired(_)), "{:?}", err);
        assert_eq!(h.backend.calls_to(SITES), 2);
        assert_eq!(h.backend.logins(), 2);
    }

    #[tokio::test]
    async fn test_missing_argument_makes_no_calls() {
        let h = harness();
        let err = h.dispatcher.execute("devices", &[]).await.unwrap_err();
        assert_eq!(err, Error::missing("site"));
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_makes_no_calls() {
        let h = harness();
        let err = h.dispatcher.execute_line("frobnicate 1 2").await.unwrap_err();
        assert_eq!(err, Error::UnknownCommand("frobnicate".to_string()));
        assert!(err.is_recoverable());
        assert!(h.backend.calls().is_empty());
        assert!(h.dispatcher.execute_line("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_failures_then_success() {
        let base = Duration::from_millis(20);
        let h = harness_with(
            MemoryStore::with_profile(StoredProfile {
                server: server(),
                credentials: Some(credentials()),
            }),
            base,
        );
        h.backend.on(LOGIN, vec![Reply::login("t1")]);
        h.backend.on(
            SITES,
            vec![Reply::Network, Reply::Network, Reply::json(200, json!([]))],
        );

        let started = Instant::now();
        let outcome = h.dispatcher.execute("sites", &[]).await.unwrap();
        assert!(matches!(outcome, Outcome::Response { .. }));
        assert!(started.elapsed() >= base * 3);
        assert_eq!(h.backend.calls_to(SITES), 3);
        assert_eq!(h.sink.retries(), 2);
    }

    #[tokio::test]
    async fn test_server_error_budget_exhausted() {
        let h = harness();
        h.backend.on(LOGIN, vec![Reply::login("t1")]);
        h.backend.on(SITES, vec![Reply::text(503, "busy")]);

        let err = h.dispatcher.execute("sites", &[]).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable { attempts: 4, .. }));
        assert_eq!(h.backend.calls_to(SITES), 4);
    }

    #[tokio::test]
    async fn test_client_error_passes_through() {
        let h = harness();
        h.backend.on(LOGIN, vec![Reply::login("t1")]);
        h.backend.on("Nowhere", vec![Reply::text(404, "no such site")]);

        let err = h.dispatcher.execute_line("devices Nowhere").await.unwrap_err();
        assert_eq!(err, Error::client(404, "no such site"));
        assert_eq!(h.backend.calls_to("Nowhere"), 1);
    }

    #[tokio::test]
    async fn test_not_logged_in() {
        let h = harness_with(MemoryStore::new(), Duration::from_millis(1));
        let err = h.dispatcher.execute("sites", &[]).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired(_)));
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_login_command_persists_on_success() {
        let h = harness_with(MemoryStore::new(), Duration::from_millis(1));
        h.backend.on(LOGIN, vec![Reply::login("t1")]);

        let err = h
            .dispatcher
            .execute_line("login http://bms.test operator")
            .await
            .unwrap_err();
        assert_eq!(err, Error::missing("password"));
        assert!(h.backend.calls().is_empty());

        let outcome = h
            .dispatcher
            .execute_line("login http://bms.test operator password=hunter2")
            .await
            .unwrap()
            .unwrap();
        match outcome {
            Outcome::Message(text) => {
                assert!(text.contains("operator"));
                assert!(!text.contains("hunter2"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let saved = h.store.load().unwrap().unwrap();
        assert_eq!(saved.server, server());
        assert_eq!(saved.credentials.unwrap().secret.expose(), b"hunter2");
    }

    #[tokio::test]
    async fn test_failed_login_keeps_stored_credentials() {
        let h = harness();
        h.backend.on(LOGIN, vec![Reply::text(401, "bad password")]);

        let err = h
            .dispatcher
            .execute_line("login http://other.test intruder wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired(_)));

        let saved = h.store.load().unwrap().unwrap();
        assert_eq!(saved.server, server());
        assert_eq!(saved.credentials.unwrap().username, "operator");
    }

    #[tokio::test]
    async fn test_login_reuses_current_server_and_user() {
        let h = harness();
        h.backend.on(LOGIN, vec![Reply::login("t1")]);

        let outcome = h
            .dispatcher
            .execute("login", &["password=hunter2".to_string()])
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Message(ref m) if m.contains("http://bms.test")));
        assert!(h.backend.calls()[0].path.ends_with(LOGIN));
    }

    #[tokio::test]
    async fn test_logout_and_status() {
        let h = harness();
        h.backend.on(LOGIN, vec![Reply::login("t1")]);
        h.backend.on(SITES, vec![Reply::json(200, json!([]))]);
        h.dispatcher.execute("sites", &[]).await.unwrap();

        let status = h.dispatcher.execute("status", &[]).await.unwrap();
        assert!(matches!(status, Outcome::Message(ref m) if m.contains("Session: active")));

        h.dispatcher.execute("logout", &[]).await.unwrap();
        assert!(h.store.load().unwrap().is_some());
        let err = h.dispatcher.execute("sites", &[]).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired(_)));

        h.dispatcher
            .execute("logout", &["forget=yes".to_string()])
            .await
            .unwrap();
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_command_reconfigures() {
        let h = harness();
        h.dispatcher
            .execute_line("server https://bms2.test/ 3")
            .await
            .unwrap();

        let saved = h.store.load().unwrap().unwrap();
        assert_eq!(saved.server.base_url(), "https://bms2.test");
        assert_eq!(saved.server.api_version(), "3");
        assert!(saved.credentials.is_some());
    }

    #[tokio::test]
    async fn test_ui_commands_skip_network() {
        let h = harness();
        let outcome = h.dispatcher.execute_line("help read").await.unwrap().unwrap();
        match outcome {
            Outcome::Ui { action, arguments } => {
                assert_eq!(action, UiAction::Help);
                assert_eq!(arguments.str("command"), Some("read"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(h.backend.calls().is_empty());
        assert_eq!(h.sink.auth_refreshes(), 0);
    }

    fn batch_file(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("writes.csv");
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_batch_sends_one_write_per_row() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let path = batch_file(
            &dir,
            "site,device,object,value,priority\n\
             Main,100,analog-value:1,70,8\n\
             Main,100,analog-value:2,71,\n\
             Main,100,analog-value:3,72,8\n",
        );
        h.backend.on(LOGIN, vec![Reply::login("t1")]);
        h.backend.on("analog-value:1/present-value", vec![Reply::json(200, json!({}))]);
        h.backend
            .on("analog-value:2/present-value", vec![Reply::text(404, "no such object")]);
        h.backend.on("analog-value:3/present-value", vec![Reply::json(200, json!({}))]);

        let outcome = h
            .dispatcher
            .execute("write-batch", &[path])
            .await
            .unwrap();
        let Outcome::Batch {
            command,
            rows,
            total,
        } = outcome
        else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(command, "write-batch");
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].result.is_ok());
        assert_eq!(rows[1].row, 2);
        assert_eq!(rows[1].result, Err(Error::client(404, "no such object")));
        assert!(rows[1].target.ends_with("analog-value:2/present-value"));
        assert!(rows[2].result.is_ok());

        // One silent login shared by every row
        assert_eq!(h.backend.logins(), 1);
        let writes: Vec<_> = h
            .backend
            .calls()
            .into_iter()
            .filter(|c| !c.path.ends_with(LOGIN))
            .collect();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|c| c.method == Method::Put));
        assert!(writes
            .iter()
            .all(|c| c.authorization.as_deref() == Some("Bearer t1")));
    }

    #[tokio::test]
    async fn test_batch_stops_without_a_session() {
        let h = harness_with(MemoryStore::new(), Duration::from_millis(1));
        let dir = tempfile::tempdir().unwrap();
        let path = batch_file(
            &dir,
            "site,device,object,value\n\
             Main,100,analog-value:1,70\n\
             Main,100,analog-value:2,71\n",
        );

        let outcome = h.dispatcher.execute("write-batch", &[path]).await.unwrap();
        let Outcome::Batch { rows, total, .. } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0].result, Err(Error::AuthenticationRequired(_))));
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_with_a_bad_row_sends_nothing() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let path = batch_file(
            &dir,
            "site,device,object,value,priority\n\
             Main,100,analog-value:1,70,8\n\
             Main,100,analog-value:2,71,0\n",
        );
        h.backend.on(LOGIN, vec![Reply::login("t1")]);

        let err = h
            .dispatcher
            .execute("write-batch", &[path])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Argument { ref argument, .. } if argument == "file"));
        assert!(err.to_string().contains("row 2"), "{}", err);
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_setting_command_reads_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let settings = Arc::new(SettingsFile::open(&path).unwrap());
        let Harness {
            backend,
            dispatcher,
            ..
        } = harness();
        let dispatcher = dispatcher.with_settings(settings.clone());

        let listed = dispatcher.execute_line("setting").await.unwrap().unwrap();
        assert!(matches!(listed, Outcome::Message(ref m) if m.starts_with("No settings saved")));

        dispatcher
            .execute_line("setting default-site Main")
            .await
            .unwrap();
        let shown = dispatcher
            .execute_line("config default-site")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shown, Outcome::Message("default-site = Main".to_string()));
        let missing = dispatcher.execute_line("settings colour").await.unwrap().unwrap();
        assert_eq!(missing, Outcome::Message("colour is not set".to_string()));

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.get_value("default-site"), Some("Main"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_setting_command_without_a_config_file() {
        let h = harness();
        let err = h.dispatcher.execute("setting", &[]).await.unwrap_err();
        assert!(matches!(err, Error::SettingsUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_password_is_rejected_before_login() {
        let h = harness_with(MemoryStore::new(), Duration::from_millis(1));
        let err = h
            .dispatcher
            .execute_line("login http://bms.test operator password=")
            .await
            .unwrap_err();
        assert_eq!(err, Error::malformed("password", "must not be empty"));
        assert!(h.backend.calls().is_empty());
        assert!(h.store.load().unwrap().is_none());
    }

    #[test]
    fn test_history_entry_masks_password() {
        let h = harness();
        assert_eq!(
            h.dispatcher.history_entry("login http://bms.test operator hunter2"),
            "login http://bms.test operator ****"
        );
        assert_eq!(
            h.dispatcher.history_entry(r#"devices "Main Campus""#),
            r#"devices "Main Campus""#
        );
        assert_eq!(h.dispatcher.history_entry("login 'unterminated"), "login");
        assert_eq!(h.dispatcher.history_entry("sites"), "sites");
    }
}
