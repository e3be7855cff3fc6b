//! enteliscript - a terminal client for Delta Controls enteliWEB.
//!
//! Type commands against the BACnet hierarchy an enteliWEB server exposes
//! (sites, devices, objects, properties) from a keyboard-driven prompt.

mod app;
mod format;
mod prompt;
mod ui;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use enteliscript_core::{
    config::APP_NAME, open_store, Config, CredentialBackend, CredentialStore, EventSink, Outcome,
    SettingsFile, TracingSink,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{App, AppState, ChannelSink, CHANNEL_BUFFER_SIZE};
use ui::input::handle_input;
use ui::render::render;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Daily log files kept in the log directory
const MAX_LOG_FILES: usize = 3;

const ENV_SERVER: &str = "ENTELISCRIPT_SERVER";
const ENV_USERNAME: &str = "ENTELISCRIPT_USERNAME";
const ENV_BACKEND: &str = "ENTELISCRIPT_BACKEND";

const USAGE: &str = "\
Usage: enteliscript [FLAG]

With no flag, starts the interactive terminal.

Flags:
  --login      Log in from the command line and save the credentials
  --logout     Remove saved credentials
  --log-path   Print the directory log files are written to
  --help       Show this message

Environment:
  ENTELISCRIPT_SERVER     Server URL to suggest when logging in
  ENTELISCRIPT_USERNAME   Username to suggest when logging in
  ENTELISCRIPT_BACKEND    Credential backend: file or keyring
  RUST_LOG                Log filter (default: info)";

/// Daily `enteliscript.<date>.log` files in `log_dir`, oldest pruned past
/// `MAX_LOG_FILES`.
fn log_appender(log_dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(APP_NAME)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .context("Failed to open log file")
}

/// Initialize the tracing subscriber, writing to a daily rolling file.
///
/// The terminal is owned by the UI, so nothing is logged to stderr.
/// Use the RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(log_appender(log_dir)?);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Ok(guard)
}

/// Config file settings with the environment override applied.
fn effective_config(settings: &SettingsFile) -> Config {
    let mut config = settings.config();
    if let Ok(value) = std::env::var(ENV_BACKEND) {
        match CredentialBackend::parse(&value) {
            Some(backend) => config.credential_backend = backend,
            None => warn!(value = %value, "Ignoring unknown {}", ENV_BACKEND),
        }
    }
    config
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let log_dir = Config::log_dir()?;
    let flag = std::env::args().nth(1);
    match flag.as_deref() {
        Some("--help") | Some("-h") => {
            println!("{}", USAGE);
            return Ok(());
        }
        Some("--log-path") => {
            println!("{}", log_dir.display());
            return Ok(());
        }
        _ => {}
    }

    let _guard = init_tracing(&log_dir)?;
    let settings = Arc::new(SettingsFile::open(Config::path()?)?);
    let config = effective_config(&settings);
    let store = open_store(config.credential_backend)?;

    match flag.as_deref() {
        None => run_tui(&config, settings, store).await,
        Some("--login") => login_interactive(&config, store).await,
        Some("--logout") => {
            store.clear()?;
            info!("Saved credentials removed");
            println!("Saved credentials removed.");
            Ok(())
        }
        Some(other) => anyhow::bail!("Unknown flag: {}\n\n{}", other, USAGE),
    }
}

async fn run_tui(
    config: &Config,
    settings: Arc<SettingsFile>,
    store: Arc<dyn CredentialStore>,
) -> Result<()> {
    info!("enteliscript starting");

    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let sink: Arc<dyn EventSink> = Arc::new(ChannelSink::new(tx.clone()));
    let dispatcher =
        Arc::new(enteliscript_core::connect(config, store, sink)?.with_settings(settings));

    let mut app = App::new(dispatcher, tx, rx).await;
    app.suggest_login(env_value(ENV_SERVER), env_value(ENV_USERNAME));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    info!("enteliscript shutting down");
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|f| render(f, app))?;

        // Poll for events with timeout to allow background updates
        if event::poll(Duration::from_millis(EVENT_POLL_TIMEOUT_MS))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_input(app, key) {
                    return Ok(());
                }
            }
        }

        // Check for completed commands and core events
        app.check_background_tasks().await;

        if app.state == AppState::Quitting {
            return Ok(());
        }
    }
}

/// Line-mode login for `--login`.
async fn login_interactive(config: &Config, store: Arc<dyn CredentialStore>) -> Result<()> {
    println!("\n=== enteliscript login ===\n");

    let saved = store.load()?;
    let saved_server = saved
        .as_ref()
        .map(|p| p.server.base_url().to_string())
        .or_else(|| env_value(ENV_SERVER));
    let saved_user = saved
        .as_ref()
        .and_then(|p| p.credentials.as_ref())
        .map(|c| c.username.clone())
        .or_else(|| env_value(ENV_USERNAME));

    let server = prompt_with_default("Server URL", saved_server)?;
    let username = prompt_with_default("Username", saved_user)?;
    let password = rpassword::prompt_password("Password: ")?;

    println!("\nAuthenticating...");

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let dispatcher = enteliscript_core::connect(config, store, sink)?;
    let raw = vec![server, username, format!("password={}", password)];

    match dispatcher.execute("login", &raw).await {
        Ok(Outcome::Message(text)) => {
            println!("{}\n", text);
            Ok(())
        }
        Ok(other) => {
            warn!(outcome = ?other, "Unexpected login outcome");
            Ok(())
        }
        Err(e) => Err(e).context("Login failed"),
    }
}

fn prompt_with_default(label: &str, default: Option<String>) -> Result<String> {
    match default {
        Some(ref value) => print!("{} [{}]: ", label, value),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), default) {
        (false, _) => Ok(input.to_string()),
        (true, Some(value)) => Ok(value),
        (true, None) => anyhow::bail!("{} is required", label),
    }
}
