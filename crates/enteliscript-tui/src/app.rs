//! Application state for the enteliscript terminal.
//!
//! `App` owns the output log, the prompt and the dispatcher handle.
//! Commands run on spawned tokio tasks; their results and the core's
//! events come back over one mpsc channel that the render loop drains
//! between frames.

use std::sync::Arc;
use std::time::Instant;

use enteliscript_core::auth::{SessionState, SessionStatus};
use enteliscript_core::commands::UiAction;
use enteliscript_core::error::ArgumentProblem;
use enteliscript_core::{
    CoreEvent, Dispatcher, Error, EventSink, Outcome, ReqwestBackend, TracingSink,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::format;
use crate::prompt::Prompt;

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the task/event channel.
pub const CHANNEL_BUFFER_SIZE: usize = 32;

/// Output lines kept before the oldest are discarded.
const MAX_OUTPUT_LINES: usize = 5_000;

/// Maximum length for password input.
const MAX_PASSWORD_LENGTH: usize = 128;

/// Number of lines to scroll on page up/down.
pub const PAGE_SCROLL_SIZE: usize = 10;

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Normal,
    /// Masked input for the password a `login` command is waiting on
    EnteringPassword,
    Quitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Command,
    Output,
    Info,
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: LineKind,
    pub text: String,
}

/// Messages from spawned work back to the render loop.
pub enum TaskMessage {
    Finished {
        command: String,
        raw: Vec<String>,
        result: Result<Outcome, Error>,
    },
    Event(CoreEvent),
}

/// Logs through `tracing` and forwards a copy to the UI.
pub struct ChannelSink {
    tx: mpsc::Sender<TaskMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<TaskMessage>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &CoreEvent) {
        TracingSink.emit(event);
        // A full channel only costs the on-screen copy
        let _ = self.tx.try_send(TaskMessage::Event(event.clone()));
    }
}

// ============================================================================
// App
// ============================================================================

pub struct App {
    pub state: AppState,
    pub dispatcher: Arc<Dispatcher<ReqwestBackend>>,
    pub output: Vec<OutputLine>,
    /// Lines scrolled up from the bottom of the log
    pub scroll: usize,
    pub prompt: Prompt,
    pub password: String,
    pub status: SessionStatus,
    /// Set while a command is in flight
    pub busy_since: Option<Instant>,
    /// Arguments of the `login` waiting for a password
    pending_login: Option<Vec<String>>,
    tx: mpsc::Sender<TaskMessage>,
    rx: mpsc::Receiver<TaskMessage>,
}

impl App {
    pub async fn new(
        dispatcher: Arc<Dispatcher<ReqwestBackend>>,
        tx: mpsc::Sender<TaskMessage>,
        rx: mpsc::Receiver<TaskMessage>,
    ) -> Self {
        let status = dispatcher.sessions().status().await;
        let mut app = Self {
            state: AppState::Normal,
            dispatcher,
            output: Vec::new(),
            scroll: 0,
            prompt: Prompt::default(),
            password: String::new(),
            status,
            busy_since: None,
            pending_login: None,
            tx,
            rx,
        };
        app.push(
            LineKind::Info,
            "enteliscript: type `help` for commands, `quit` to leave",
        );
        app
    }

    /// Pre-fill the prompt with a login line when there is nothing saved.
    pub fn suggest_login(&mut self, server: Option<String>, username: Option<String>) {
        if let Some(line) = login_suggestion(&self.status, server, username) {
            self.push(LineKind::Notice, "Not logged in; enter your password after `login`");
            self.prompt.set_text(line);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy_since.is_some()
    }

    pub fn spinner(&self) -> char {
        let elapsed = self
            .busy_since
            .map(|t| t.elapsed().as_millis() / 100)
            .unwrap_or(0);
        SPINNER[elapsed as usize % SPINNER.len()]
    }

    // =========================================================================
    // Output log
    // =========================================================================

    pub fn push(&mut self, kind: LineKind, text: impl Into<String>) {
        for line in text.into().lines() {
            self.output.push(OutputLine {
                kind,
                text: line.to_string(),
            });
        }
        if self.output.len() > MAX_OUTPUT_LINES {
            let excess = self.output.len() - MAX_OUTPUT_LINES;
            self.output.drain(..excess);
        }
        self.scroll = 0;
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll = (self.scroll + lines).min(self.output.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
        self.scroll = 0;
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Run whatever is on the prompt.
    pub fn submit(&mut self) {
        if self.is_busy() {
            return;
        }
        let line = self.prompt.take();
        if line.trim().is_empty() {
            return;
        }

        let entry = self.dispatcher.history_entry(&line);
        self.push(LineKind::Command, format!("> {}", entry));
        self.prompt.remember(entry);

        match enteliscript_core::commands::split_command(&line) {
            Ok(Some((command, raw))) => self.spawn(command, raw),
            Ok(None) => {}
            Err(e) => self.push(LineKind::Error, e.to_string()),
        }
    }

    pub fn add_password_char(&mut self, c: char) {
        if self.password.chars().count() < MAX_PASSWORD_LENGTH {
            self.password.push(c);
        }
    }

    /// Resume the pending `login` with the typed password.
    pub fn submit_password(&mut self) {
        let password = std::mem::take(&mut self.password);
        let Some(mut raw) = self.pending_login.take() else {
            self.state = AppState::Normal;
            return;
        };
        self.state = AppState::Normal;
        if password.is_empty() {
            self.push(LineKind::Error, "Login cancelled: empty password");
            return;
        }
        raw.push(format!("password={}", password));
        self.spawn("login".to_string(), raw);
    }

    pub fn cancel_password(&mut self) {
        self.password.clear();
        self.pending_login = None;
        self.state = AppState::Normal;
        self.push(LineKind::Notice, "Login cancelled");
    }

    fn spawn(&mut self, command: String, raw: Vec<String>) {
        self.busy_since = Some(Instant::now());
        let dispatcher = self.dispatcher.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = dispatcher.execute(&command, &raw).await;
            if tx
                .send(TaskMessage::Finished {
                    command,
                    raw,
                    result,
                })
                .await
                .is_err()
            {
                warn!("UI channel closed before command finished");
            }
        });
    }

    // =========================================================================
    // Background results
    // =========================================================================

    /// Drain finished commands and core events. Called once per frame.
    pub async fn check_background_tasks(&mut self) {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }

        let mut finished = false;
        for message in messages {
            match message {
                TaskMessage::Event(event) => {
                    if let Some(text) = format::event_line(&event) {
                        self.push(LineKind::Notice, text);
                    }
                }
                TaskMessage::Finished {
                    command,
                    raw,
                    result,
                } => {
                    self.busy_since = None;
                    finished = true;
                    self.process_result(command, raw, result);
                }
            }
        }

        if finished {
            self.status = self.dispatcher.sessions().status().await;
        }
    }

    fn process_result(&mut self, command: String, raw: Vec<String>, result: Result<Outcome, Error>) {
        match result {
            Ok(Outcome::Response {
                command: name,
                result: response,
            }) => {
                debug!(command = name, status = response.status, "Command succeeded");
                for line in format::payload_lines(&response) {
                    self.push(LineKind::Output, line);
                }
            }
            Ok(Outcome::Batch {
                command: name,
                rows,
                total,
            }) => {
                let (lines, failed) = format::batch_lines(&rows, total);
                debug!(command = name, rows = rows.len(), total, "Batch finished");
                for (i, line) in lines.into_iter().enumerate() {
                    let kind = match rows.get(i) {
                        Some(row) if row.result.is_err() => LineKind::Error,
                        Some(_) => LineKind::Output,
                        None if failed => LineKind::Notice,
                        None => LineKind::Info,
                    };
                    self.push(kind, line);
                }
            }
            Ok(Outcome::Message(text)) => self.push(LineKind::Info, text),
            Ok(Outcome::Ui { action, arguments }) => match action {
                UiAction::Help => {
                    let help = self.dispatcher.registry().help(arguments.str("command"));
                    match help {
                        Ok(text) => self.push(LineKind::Info, text),
                        Err(e) => self.push(LineKind::Error, e.to_string()),
                    }
                }
                UiAction::Clear => self.clear_output(),
                UiAction::Quit => self.state = AppState::Quitting,
                UiAction::History => {
                    let lines: Vec<String> = self
                        .prompt
                        .history()
                        .iter()
                        .enumerate()
                        .map(|(i, entry)| format!("{:>4}  {}", i + 1, entry))
                        .collect();
                    for line in lines {
                        self.push(LineKind::Info, line);
                    }
                }
            },
            Err(Error::Argument {
                ref argument,
                problem: ArgumentProblem::Missing,
            }) if argument == "password" && self.is_login(&command) => {
                self.pending_login = Some(raw);
                self.password.clear();
                self.state = AppState::EnteringPassword;
            }
            Err(e) => {
                let hint = if e.is_recoverable() {
                    format!("{} (try `help {}`)", e, command)
                } else {
                    e.to_string()
                };
                self.push(LineKind::Error, hint);
            }
        }
    }

    fn is_login(&self, command: &str) -> bool {
        self.dispatcher
            .registry()
            .resolve(command)
            .map(|spec| spec.name == "login")
            .unwrap_or(false)
    }
}

/// `login <server> <username> ` when no user is known yet.
pub fn login_suggestion(
    status: &SessionStatus,
    server: Option<String>,
    username: Option<String>,
) -> Option<String> {
    if status.username.is_some() || status.state == SessionState::Active {
        return None;
    }
    let server = status
        .server
        .as_ref()
        .map(|s| s.base_url().to_string())
        .or(server)
        .filter(|s| !s.trim().is_empty())?;

    let mut line = format!("login {}", server.trim());
    if let Some(username) = username.filter(|u| !u.trim().is_empty()) {
        line.push(' ');
        line.push_str(username.trim());
    }
    line.push(' ');
    Some(line)
}
