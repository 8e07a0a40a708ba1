//! panelmux - headless terminal session manager
//!
//! Main entry point. Spawns a shell for the `main` session, mirrors the
//! active terminal to stdout and reads control lines from stdin.

mod commands;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use commands::Command;
use panels::{
    forward_terminal_output, InMemoryOutputStore, InMemoryPanels, PanelCoordinator, PanelDirectory,
};
use terminal::{
    CloseOptions, CreateOptions, SessionId, TerminalEvent, TerminalId, TerminalManager,
    TerminalSummary,
};
use util::ResultExt;

/// Application startup time for performance monitoring
static STARTUP_TIME: Lazy<Instant> = Lazy::new(Instant::now);

const SESSION: &str = "main";

/// How long to wait for buffered output to reach the store on shutdown.
const FORWARD_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Create the config, data and output directories.
/// `PANELMUX_CONFIG_DIR` and `PANELMUX_DATA_DIR` relocate them.
fn init_paths() -> Result<()> {
    if let Some(dir) = std::env::var_os("PANELMUX_CONFIG_DIR") {
        panelmux_paths::set_config_dir(PathBuf::from(dir));
    }
    if let Some(dir) = std::env::var_os("PANELMUX_DATA_DIR") {
        panelmux_paths::set_data_dir(PathBuf::from(dir));
    }

    let dirs = [
        panelmux_paths::config_dir().clone(),
        panelmux_paths::data_dir().clone(),
        panelmux_paths::output_dir(),
    ];
    for dir in &dirs {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;
    }
    debug!(
        "Initialized paths - config: {:?}, data: {:?}",
        dirs[0], dirs[1]
    );
    Ok(())
}

fn is_debug_mode() -> bool {
    std::env::var("PANELMUX_DEBUG").is_ok()
}

fn is_fast_exit() -> bool {
    std::env::var("PANELMUX_FAST_EXIT").is_ok()
}

/// Logs go to stderr; stdout carries terminal output only.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if is_debug_mode() {
        "panelmux=trace,terminal=trace,panels=trace,settings=debug,info"
    } else {
        "panelmux=info,warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .with(filter)
        .init();

    if is_debug_mode() {
        info!(
            "panelmux v{} starting up (DEBUG MODE ENABLED)",
            env!("CARGO_PKG_VERSION")
        );
    } else {
        info!("panelmux v{} starting up", env!("CARGO_PKG_VERSION"));
    }
}

/// The terminal that receives stdin and whose output reaches stdout.
type Focus = Arc<Mutex<Option<TerminalId>>>;

struct App {
    manager: TerminalManager,
    session: SessionId,
    cwd: PathBuf,
    focus: Focus,
    close_options: CloseOptions,
}

impl App {
    fn focused(&self) -> Option<TerminalId> {
        self.focus.lock().clone()
    }

    fn spawn_terminal(&self) -> Result<TerminalSummary> {
        let summary = self.manager.create_terminal_session(
            &self.session,
            &self.cwd,
            CreateOptions {
                make_default: true,
                ..Default::default()
            },
        )?;
        *self.focus.lock() = Some(summary.id.clone());
        eprintln!("[{} {} started]", summary.title, summary.id);
        Ok(summary)
    }

    /// Id prefix or exact title.
    fn find(&self, target: &str) -> Option<TerminalId> {
        self.manager
            .list_terminals(&self.session)
            .into_iter()
            .find(|summary| summary.title == target || summary.id.as_str().starts_with(target))
            .map(|summary| summary.id)
    }

    fn print_list(&self) {
        let focused = self.focused();
        let default = self.manager.get_default_terminal_id(&self.session);
        for summary in self.manager.list_terminals(&self.session) {
            let active = if focused.as_ref() == Some(&summary.id) { '*' } else { ' ' };
            let is_default = if default.as_ref() == Some(&summary.id) { '+' } else { ' ' };
            let pid = summary
                .pid
                .map_or_else(|| "-".to_string(), |pid| pid.to_string());
            eprintln!(
                "{active}{is_default} {}  {}  pid {}  {}",
                summary.id,
                summary.title,
                pid,
                summary.cwd.display()
            );
        }
    }

    /// Returns false when the loop should stop.
    async fn handle(&self, command: Command) -> bool {
        match command {
            Command::New => {
                if let Err(error) = self.spawn_terminal() {
                    eprintln!("panelmux: {error:#}");
                }
            }
            Command::List => self.print_list(),
            Command::Use(target) => match self.find(&target) {
                Some(terminal_id) => {
                    eprintln!("[using {terminal_id}]");
                    *self.focus.lock() = Some(terminal_id);
                }
                None => eprintln!("panelmux: no terminal matches {target:?}"),
            },
            Command::Close(target) => {
                let terminal_id = match target {
                    Some(target) => self.find(&target),
                    None => self.focused(),
                };
                let Some(terminal_id) = terminal_id else {
                    eprintln!("panelmux: nothing to close");
                    return true;
                };
                if !self
                    .manager
                    .close_terminal_session(&terminal_id, self.close_options)
                    .await
                {
                    eprintln!("[{terminal_id} left processes behind]");
                }
                refocus_after(&self.focus, &self.manager, &self.session, &terminal_id);
            }
            Command::Resize { cols, rows } => {
                if let Some(terminal_id) = self.focused() {
                    self.manager.resize(&terminal_id, cols, rows);
                }
            }
            Command::Help => eprintln!("{}", commands::HELP),
            Command::Quit => return false,
            Command::Send(line) => match self.focused() {
                Some(terminal_id) => {
                    if let Err(error) = self.manager.send_command(&terminal_id, &line) {
                        eprintln!("panelmux: {error}");
                    }
                }
                None => eprintln!("panelmux: no active terminal, try :new"),
            },
        }
        true
    }
}

/// Move focus to the session default if `gone` had it.
fn refocus_after(focus: &Focus, manager: &TerminalManager, session: &SessionId, gone: &TerminalId) {
    let mut focus = focus.lock();
    if focus.as_ref() == Some(gone) {
        *focus = manager.get_default_terminal_id(session);
        if let Some(next) = focus.as_ref() {
            eprintln!("[using {next}]");
        }
    }
}

/// Copy the focused terminal's output to stdout and report lifecycle events.
/// Signals `idle` whenever the session runs out of terminals.
async fn mirror_output(
    mut events: UnboundedReceiver<TerminalEvent>,
    manager: TerminalManager,
    session: SessionId,
    focus: Focus,
    idle: Arc<Notify>,
) {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            TerminalEvent::TerminalOutput {
                terminal_id, data, ..
            } => {
                if focus.lock().as_ref() == Some(&terminal_id) {
                    stdout.write_all(&data).await.log_err();
                    stdout.flush().await.log_err();
                }
            }
            TerminalEvent::TerminalExited {
                terminal_id,
                exit_code,
                signal,
                ..
            } => {
                match signal {
                    Some(signal) => eprintln!("[{terminal_id} exited: {signal}]"),
                    None => eprintln!("[{terminal_id} exited with code {exit_code}]"),
                }
                refocus_after(&focus, &manager, &session, &terminal_id);
            }
            TerminalEvent::TerminalClosed { terminal_id, .. } => {
                eprintln!("[{terminal_id} closed]");
                refocus_after(&focus, &manager, &session, &terminal_id);
            }
            TerminalEvent::ZombieProcessesDetected { message, .. } => {
                eprintln!("panelmux: {message}");
            }
        }
        if manager.list_terminals(&session).is_empty() {
            idle.notify_one();
        }
    }
}

/// Write the session's collected output to the output directory.
fn save_history(
    panels: &InMemoryPanels,
    store: &InMemoryOutputStore,
    session: &SessionId,
) -> Result<Option<PathBuf>> {
    let mut history = Vec::new();
    for panel in panels.all_panels() {
        if panel.is_terminal_for(session) {
            history.extend(store.panel_output(&panel.id));
        }
    }
    history.extend(store.session_output(session));
    if history.is_empty() {
        return Ok(None);
    }

    let path = panelmux_paths::output_dir().join(format!("{session}.log"));
    std::fs::write(&path, &history)
        .with_context(|| format!("Failed to write output history: {:?}", path))?;
    Ok(Some(path))
}

fn working_directory() -> Result<PathBuf> {
    let cwd = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => std::env::current_dir().context("Could not determine current directory")?,
    };
    let canonical = cwd
        .canonicalize()
        .with_context(|| format!("Cannot use {:?} as working directory", cwd))?;
    if !canonical.is_dir() {
        anyhow::bail!("{:?} is not a directory", cwd);
    }
    Ok(canonical)
}

/// Stdin lines, read on a plain thread so a pending read never holds up
/// runtime shutdown.
fn stdin_lines() -> UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(error) = spawned {
        error!("Failed to start stdin reader: {}", error);
    }
    rx
}

async fn read_commands(app: &App, idle: &Notify) {
    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(Ok(line)) => match commands::parse(&line) {
                    Ok(command) => {
                        if !app.handle(command).await {
                            return;
                        }
                    }
                    Err(error) => eprintln!("panelmux: {error:#}"),
                },
                None => {
                    debug!("stdin closed");
                    return;
                }
                Some(Err(error)) => {
                    error!("Failed to read stdin: {}", error);
                    return;
                }
            },
            _ = idle.notified() => {
                if app.manager.list_terminals(&app.session).is_empty() {
                    info!("All terminals exited");
                    return;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    Lazy::force(&STARTUP_TIME);

    init_logging();
    init_paths().context("Failed to initialize application directories")?;

    if let Some(path) = settings::ensure_config_file() {
        debug!("Using config file {:?}", path);
    }
    let config = settings::load_config();
    let cwd = working_directory()?;
    let manager = TerminalManager::new(config);

    let config_watcher = {
        let manager = manager.clone();
        settings::watch_config(move |config| manager.apply_config(config.clone()))
    };
    if config_watcher.is_none() {
        warn!("Config file watching unavailable; restart to apply changes");
    }

    let session = SessionId::from(SESSION);
    let panels = InMemoryPanels::new();
    let store = InMemoryOutputStore::new(panels.clone());
    let coordinator = Arc::new(PanelCoordinator::new(panels.clone(), store.clone()));
    coordinator.ensure_panel(&session, &cwd)?;
    let forwarder = tokio::spawn(forward_terminal_output(
        coordinator.clone(),
        manager.subscribe(),
    ));

    let focus = Focus::default();
    let idle = Arc::new(Notify::new());
    let mirror = tokio::spawn(mirror_output(
        manager.subscribe(),
        manager.clone(),
        session.clone(),
        focus.clone(),
        idle.clone(),
    ));

    let app = App {
        manager: manager.clone(),
        session: session.clone(),
        cwd,
        focus,
        close_options: CloseOptions {
            fast: is_fast_exit(),
        },
    };
    app.spawn_terminal()
        .context("Failed to start the first terminal")?;
    info!("Startup complete in {:?}", STARTUP_TIME.elapsed());

    read_commands(&app, &idle).await;

    info!("Shutting down {} terminal(s)", manager.terminal_count());
    if !manager.cleanup(app.close_options).await {
        warn!("Some processes survived shutdown");
    }
    coordinator.clear_session(&session);

    // The event channels close once the last manager handle is gone.
    mirror.abort();
    let _ = mirror.await;
    drop(config_watcher);
    drop(app);
    drop(manager);
    match tokio::time::timeout(FORWARD_DRAIN_TIMEOUT, forwarder).await {
        Ok(Ok(stored)) => debug!(stored, "Output forwarding drained"),
        Ok(Err(error)) => warn!("Output forwarder failed: {}", error),
        Err(_) => warn!("Timed out waiting for output forwarding"),
    }

    if let Some(Some(path)) = save_history(&panels, &store, &session).log_err() {
        info!("Saved output history to {:?}", path);
    }
    Ok(())
}
