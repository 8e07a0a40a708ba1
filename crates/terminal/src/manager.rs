//! Terminal session manager.
//!
//! [`TerminalManager`] owns every terminal's process and registry record and
//! is the only place they change. Output, exit and close events for a given
//! terminal are all emitted while holding the registry lock, after checking
//! the record is still tracked, which is what keeps the close/exit event last
//! in that terminal's stream.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinSet;

use settings::{constants, Config, TerminationConfig};
use util::ResultExt;

use crate::error::{Result, TerminalError};
use crate::events::{zombie_message, EventBus, OutputKind, TerminalEvent};
use crate::ids::{SessionId, TerminalId};
use crate::process_tree::{
    platform_terminator, terminate_process_tree, ProcessTreeTerminator, TerminationReport,
};
use crate::pty::{NativePtySpawner, PtyExit, PtyObserver, PtyProcess, PtySpawner, SpawnRequest};
use crate::registry::TerminalRegistry;
use crate::shell::{DefaultShell, ShellResolver};

/// Immutable facts about a terminal, as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub id: TerminalId,
    pub session_id: SessionId,
    pub title: String,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
    pub created_at: SystemTime,
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Reattach to this terminal if it exists, otherwise create it under this id.
    pub terminal_id: Option<TerminalId>,
    /// Display title; the session's next "Terminal N" when unset.
    pub title: Option<String>,
    /// Make the new terminal its session's default.
    pub make_default: bool,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl CreateOptions {
    pub fn with_id(terminal_id: impl Into<TerminalId>) -> Self {
        Self {
            terminal_id: Some(terminal_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloseOptions {
    /// Use the short grace and settle periods.
    pub fast: bool,
}

impl CloseOptions {
    pub fn fast() -> Self {
        Self { fast: true }
    }
}

enum TerminalState {
    Running,
    /// Resolves to the close outcome once the protocol has finished.
    Closing(watch::Receiver<Option<bool>>),
}

struct TerminalRecord {
    summary: TerminalSummary,
    process: Box<dyn PtyProcess>,
    state: TerminalState,
}

struct Inner {
    registry: Mutex<TerminalRegistry<TerminalRecord>>,
    events: EventBus,
    config: Mutex<Config>,
    spawner: Arc<dyn PtySpawner>,
    shell: Arc<dyn ShellResolver>,
    terminator: Arc<dyn ProcessTreeTerminator>,
}

impl Inner {
    fn deliver_output(&self, terminal_id: &TerminalId, data: &[u8]) {
        let registry = self.registry.lock();
        let Some(session_id) = registry.session_of(terminal_id) else {
            tracing::trace!(%terminal_id, len = data.len(), "Dropping output of untracked terminal");
            return;
        };
        self.events.emit(TerminalEvent::TerminalOutput {
            session_id: session_id.clone(),
            terminal_id: terminal_id.clone(),
            data: data.to_vec(),
            kind: OutputKind::Stdout,
        });
    }

    fn handle_exit(&self, terminal_id: &TerminalId, exit: PtyExit) {
        let removed = {
            let mut registry = self.registry.lock();
            match registry.get(terminal_id).map(|record| &record.state) {
                Some(TerminalState::Running) => {}
                Some(TerminalState::Closing(_)) => {
                    tracing::debug!(%terminal_id, "Exited while closing");
                    return;
                }
                None => return,
            }

            let removed = registry.untrack(terminal_id);
            if let Some((session_id, _)) = &removed {
                tracing::info!(
                    %terminal_id,
                    %session_id,
                    exit_code = exit.exit_code,
                    signal = ?exit.signal,
                    "Terminal exited"
                );
                self.events.emit(TerminalEvent::TerminalExited {
                    session_id: session_id.clone(),
                    terminal_id: terminal_id.clone(),
                    exit_code: exit.exit_code,
                    signal: exit.signal,
                });
            }
            removed
        };
        drop(removed);
    }
}

/// Forwards a PTY's callbacks to the manager that owns it.
struct RecordObserver {
    inner: Weak<Inner>,
    terminal_id: TerminalId,
}

impl PtyObserver for RecordObserver {
    fn on_data(&self, data: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.deliver_output(&self.terminal_id, data);
        }
    }

    fn on_exit(&self, exit: PtyExit) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_exit(&self.terminal_id, exit);
        }
    }
}

pub struct TerminalManagerBuilder {
    config: Config,
    spawner: Option<Arc<dyn PtySpawner>>,
    shell: Option<Arc<dyn ShellResolver>>,
    terminator: Option<Arc<dyn ProcessTreeTerminator>>,
}

impl TerminalManagerBuilder {
    pub fn spawner(mut self, spawner: Arc<dyn PtySpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn shell(mut self, shell: Arc<dyn ShellResolver>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn terminator(mut self, terminator: Arc<dyn ProcessTreeTerminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    pub fn build(self) -> TerminalManager {
        TerminalManager {
            inner: Arc::new(Inner {
                registry: Mutex::new(TerminalRegistry::new()),
                events: EventBus::new(),
                config: Mutex::new(self.config),
                spawner: self.spawner.unwrap_or_else(|| Arc::new(NativePtySpawner)),
                shell: self.shell.unwrap_or_else(|| Arc::new(DefaultShell)),
                terminator: self.terminator.unwrap_or_else(platform_terminator),
            }),
        }
    }
}

/// Creates, tracks and tears down terminals on behalf of sessions.
///
/// Cheap to clone; clones share the same terminals. Closing operations are
/// async and need a Tokio runtime. Everything else returns immediately.
#[derive(Clone)]
pub struct TerminalManager {
    inner: Arc<Inner>,
}

impl TerminalManager {
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> TerminalManagerBuilder {
        TerminalManagerBuilder {
            config,
            spawner: None,
            shell: None,
            terminator: None,
        }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<TerminalEvent> {
        self.inner.events.subscribe()
    }

    /// Replace the configuration used for new terminals and future closes.
    pub fn apply_config(&self, config: Config) {
        *self.inner.config.lock() = config;
    }

    pub fn set_termination_timings(&self, timings: TerminationConfig) {
        self.inner.config.lock().termination = timings;
    }

    /// Start a shell for `session_id` in `cwd`.
    ///
    /// With `options.terminal_id` naming a live terminal this is a reattach:
    /// the existing terminal is returned and nothing is spawned. Naming a
    /// terminal that is being closed fails with [`TerminalError::Closing`].
    pub fn create_terminal_session(
        &self,
        session_id: &SessionId,
        cwd: impl AsRef<Path>,
        options: CreateOptions,
    ) -> Result<TerminalSummary> {
        if let Some(terminal_id) = &options.terminal_id {
            if let Some(record) = self.inner.registry.lock().get(terminal_id) {
                let summary = reattach(record)?;
                tracing::debug!(%terminal_id, %session_id, "Reattaching to existing terminal");
                return Ok(summary);
            }
        }

        let cwd = cwd.as_ref().to_path_buf();
        let config = self.inner.config.lock().clone();
        let shell = self
            .inner
            .shell
            .resolve(&config)
            .map_err(TerminalError::ShellResolution)?;
        let terminal_id = options.terminal_id.unwrap_or_else(TerminalId::generate);

        let request = SpawnRequest {
            program: shell.program,
            args: shell.args,
            env: shell_environment(&config, session_id, &terminal_id, &cwd),
            cwd: cwd.clone(),
            cols: options.cols.unwrap_or(config.default_cols),
            rows: options.rows.unwrap_or(config.default_rows),
            label: terminal_id.as_str().chars().take(8).collect(),
        };
        let mut process =
            self.inner
                .spawner
                .spawn(request)
                .map_err(|source| TerminalError::Spawn {
                    session_id: session_id.clone(),
                    source,
                })?;

        let mut registry = self.inner.registry.lock();
        if let Some(existing) = registry.get(&terminal_id) {
            // A concurrent create with the same id won.
            let outcome = reattach(existing);
            drop(registry);
            process.kill().log_expected_err();
            return outcome;
        }

        let title = options
            .title
            .unwrap_or_else(|| registry.next_title(session_id));
        let summary = TerminalSummary {
            id: terminal_id.clone(),
            session_id: session_id.clone(),
            title,
            cwd,
            pid: process.pid(),
            created_at: SystemTime::now(),
        };

        // Callbacks block on the registry lock until the record is tracked.
        let observer = Arc::new(RecordObserver {
            inner: Arc::downgrade(&self.inner),
            terminal_id: terminal_id.clone(),
        });
        if let Err(source) = process.start(observer) {
            drop(registry);
            process.kill().log_expected_err();
            return Err(TerminalError::Spawn {
                session_id: session_id.clone(),
                source,
            });
        }

        registry.track(
            session_id.clone(),
            terminal_id.clone(),
            TerminalRecord {
                summary: summary.clone(),
                process,
                state: TerminalState::Running,
            },
            options.make_default,
        );
        drop(registry);

        tracing::info!(
            %terminal_id,
            %session_id,
            title = %summary.title,
            pid = ?summary.pid,
            "Created terminal"
        );
        Ok(summary)
    }

    /// Queue raw input for a terminal.
    pub fn send_input(&self, terminal_id: &TerminalId, data: impl AsRef<[u8]>) -> Result<()> {
        let registry = self.inner.registry.lock();
        let record = registry
            .get(terminal_id)
            .ok_or_else(|| TerminalError::NotFound(terminal_id.clone()))?;
        record
            .process
            .write(data.as_ref())
            .map_err(|source| TerminalError::Write {
                terminal_id: terminal_id.clone(),
                source,
            })
    }

    /// Type `command` followed by a carriage return.
    pub fn send_command(&self, terminal_id: &TerminalId, command: &str) -> Result<()> {
        self.send_input(terminal_id, format!("{command}\r"))
    }

    /// Resize a terminal. Unknown ids and zero dimensions are ignored.
    pub fn resize(&self, terminal_id: &TerminalId, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            tracing::debug!(%terminal_id, cols, rows, "Ignoring empty resize");
            return;
        }
        let registry = self.inner.registry.lock();
        match registry.get(terminal_id) {
            Some(record) => {
                record.process.resize(cols, rows).log_err();
            }
            None => tracing::trace!(%terminal_id, "Resize of unknown terminal"),
        }
    }

    pub fn get_terminal(&self, terminal_id: &TerminalId) -> Option<TerminalSummary> {
        self.inner
            .registry
            .lock()
            .get(terminal_id)
            .map(|record| record.summary.clone())
    }

    /// Terminals of a session in creation order.
    pub fn list_terminals(&self, session_id: &SessionId) -> Vec<TerminalSummary> {
        self.inner
            .registry
            .lock()
            .records_in_session(session_id)
            .map(|record| record.summary.clone())
            .collect()
    }

    pub fn get_default_terminal_id(&self, session_id: &SessionId) -> Option<TerminalId> {
        self.inner.registry.lock().resolve_default(session_id)
    }

    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.inner.registry.lock().has_session(session_id)
    }

    pub fn has_terminal(&self, terminal_id: &TerminalId) -> bool {
        self.inner.registry.lock().contains(terminal_id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.registry.lock().session_ids()
    }

    pub fn terminal_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Close one terminal, killing its whole process tree.
    ///
    /// Returns `false` if processes survived; a zombie event has been emitted
    /// in that case. The terminal is deregistered either way. Closing an
    /// unknown terminal returns `true` without doing anything. Closing a
    /// terminal that is already closing waits for that close and returns its
    /// outcome.
    ///
    /// The protocol runs on its own task, so dropping the returned future
    /// does not abandon a close half way.
    pub async fn close_terminal_session(
        &self,
        terminal_id: &TerminalId,
        options: CloseOptions,
    ) -> bool {
        let (mut outcome, start) = {
            let mut registry = self.inner.registry.lock();
            let Some(record) = registry.get_mut(terminal_id) else {
                tracing::debug!(%terminal_id, "Close of unknown terminal");
                return true;
            };
            let in_progress = match &record.state {
                TerminalState::Closing(outcome) => Some(outcome.clone()),
                TerminalState::Running => None,
            };
            match in_progress {
                Some(outcome) => {
                    tracing::debug!(%terminal_id, "Close already in progress, waiting");
                    (outcome, None)
                }
                None => {
                    let (done, outcome) = watch::channel(None);
                    record.state = TerminalState::Closing(outcome.clone());
                    let start = (
                        done,
                        record.summary.session_id.clone(),
                        record.process.pid(),
                    );
                    (outcome, Some(start))
                }
            }
        };

        if let Some((done, session_id, pid)) = start {
            let manager = self.clone();
            let terminal_id = terminal_id.clone();
            tokio::spawn(async move {
                let clean = manager
                    .finish_close(&terminal_id, &session_id, pid, options)
                    .await;
                done.send_replace(Some(clean));
            });
        }

        let clean = match outcome.wait_for(Option::is_some).await {
            Ok(clean) => *clean == Some(true),
            Err(_) => {
                tracing::warn!(%terminal_id, "Close task ended without an outcome");
                false
            }
        };
        clean
    }

    async fn finish_close(
        &self,
        terminal_id: &TerminalId,
        session_id: &SessionId,
        pid: Option<u32>,
        options: CloseOptions,
    ) -> bool {
        tracing::info!(%terminal_id, %session_id, fast = options.fast, "Closing terminal");

        let report = match pid {
            Some(pid) => self.terminate(pid, options.fast).await,
            None => TerminationReport::default(),
        };

        let removed = {
            let mut registry = self.inner.registry.lock();
            let mut removed = registry.untrack(terminal_id);
            if let Some((session_id, record)) = removed.as_mut() {
                record.process.kill().log_expected_err();
                if !report.is_clean() {
                    self.inner.events.emit(TerminalEvent::ZombieProcessesDetected {
                        session_id: Some(session_id.clone()),
                        terminal_id: Some(terminal_id.clone()),
                        message: survivor_message(&report, pid),
                        pids: report.survivors.clone(),
                    });
                }
                self.inner.events.emit(TerminalEvent::TerminalClosed {
                    session_id: session_id.clone(),
                    terminal_id: terminal_id.clone(),
                });
            }
            removed
        };
        drop(removed);

        report.is_clean()
    }

    /// Close every terminal of a session concurrently and forget the session.
    pub async fn close_terminals_for_session(
        &self,
        session_id: &SessionId,
        options: CloseOptions,
    ) -> bool {
        let terminal_ids = self.inner.registry.lock().terminal_ids(session_id);
        tracing::info!(%session_id, count = terminal_ids.len(), "Closing session terminals");

        let clean = self.close_all(terminal_ids, options).await;

        let mut registry = self.inner.registry.lock();
        if registry.has_session(session_id) {
            tracing::debug!(%session_id, "Session gained terminals while closing");
        } else {
            registry.forget_session(session_id);
        }
        clean
    }

    /// Close every terminal of every session concurrently.
    pub async fn cleanup(&self, options: CloseOptions) -> bool {
        let terminal_ids = self.inner.registry.lock().all_terminal_ids();
        tracing::info!(count = terminal_ids.len(), fast = options.fast, "Closing all terminals");

        let clean = self.close_all(terminal_ids, options).await;
        self.inner.registry.lock().forget_idle_sessions();
        clean
    }

    /// Run the termination protocol on an arbitrary process tree.
    pub async fn kill_process_tree(&self, pid: u32, fast: bool) -> bool {
        let report = self.terminate(pid, fast).await;
        if !report.is_clean() {
            self.inner.events.emit(TerminalEvent::ZombieProcessesDetected {
                session_id: None,
                terminal_id: None,
                message: survivor_message(&report, Some(pid)),
                pids: report.survivors.clone(),
            });
        }
        report.is_clean()
    }

    async fn terminate(&self, pid: u32, fast: bool) -> TerminationReport {
        let timings = self.inner.config.lock().termination.clone();
        terminate_process_tree(
            self.inner.terminator.clone(),
            pid,
            timings.grace_period(fast),
            timings.settle(fast),
        )
        .await
    }

    async fn close_all(&self, terminal_ids: Vec<TerminalId>, options: CloseOptions) -> bool {
        let mut closes = JoinSet::new();
        for terminal_id in terminal_ids {
            let manager = self.clone();
            closes.spawn(async move { manager.close_terminal_session(&terminal_id, options).await });
        }

        let mut clean = true;
        while let Some(result) = closes.join_next().await {
            match result {
                Ok(closed_cleanly) => clean &= closed_cleanly,
                Err(error) => {
                    tracing::warn!("Close task failed: {}", error);
                    clean = false;
                }
            }
        }
        clean
    }
}

/// The live record's summary, or an error if it is on its way out.
fn reattach(record: &TerminalRecord) -> Result<TerminalSummary> {
    match record.state {
        TerminalState::Running => Ok(record.summary.clone()),
        TerminalState::Closing(_) => Err(TerminalError::Closing(record.summary.id.clone())),
    }
}

fn survivor_message(report: &TerminationReport, root: Option<u32>) -> String {
    if report.unverified {
        let root = root.map_or_else(|| "?".to_string(), |pid| pid.to_string());
        format!(
            "Could not read the process table to verify that process tree {root} was terminated. Check for leftover processes."
        )
    } else {
        zombie_message(&report.survivors)
    }
}

/// Variables every shell gets, followed by the configured extras.
fn shell_environment(
    config: &Config,
    session_id: &SessionId,
    terminal_id: &TerminalId,
    cwd: &Path,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("PWD".to_string(), cwd.to_string_lossy().into_owned()),
        ("TERM".to_string(), config.term.clone()),
        (
            "COLORTERM".to_string(),
            constants::terminal::COLORTERM.to_string(),
        ),
        (
            constants::env::SESSION_ID.to_string(),
            session_id.to_string(),
        ),
        (
            constants::env::TERMINAL_ID.to_string(),
            terminal_id.to_string(),
        ),
    ];
    env.extend(
        config
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::MockPtySpawner;
    use crate::shell::{MockShellResolver, ShellSpec};
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    fn manager_with(
        config: Config,
        shell: MockShellResolver,
        spawner: MockPtySpawner,
    ) -> TerminalManager {
        TerminalManager::builder(config)
            .shell(Arc::new(shell))
            .spawner(Arc::new(spawner))
            .build()
    }

    #[test]
    fn shell_failure_never_reaches_the_spawner() {
        let mut shell = MockShellResolver::new();
        shell
            .expect_resolve()
            .times(1)
            .returning(|_| Err(anyhow!("no shell on this host")));
        let mut spawner = MockPtySpawner::new();
        spawner.expect_spawn().never();

        let manager = manager_with(Config::default(), shell, spawner);
        let err = manager
            .create_terminal_session(&SessionId::from("s"), "/", CreateOptions::default())
            .unwrap_err();

        assert!(matches!(err, TerminalError::ShellResolution(_)), "{err}");
        assert!(!manager.has_session(&SessionId::from("s")));
    }

    #[test]
    fn resolved_shell_and_geometry_reach_the_spawner() {
        let mut config = Config::default();
        config.shell = Some("/bin/custom".to_string());
        config.default_rows = 50;

        let mut shell = MockShellResolver::new();
        shell
            .expect_resolve()
            .withf(|config| config.shell.as_deref() == Some("/bin/custom"))
            .returning(|_| Ok(ShellSpec::new("/bin/custom").with_args(["-l"])));
        let mut spawner = MockPtySpawner::new();
        spawner
            .expect_spawn()
            .withf(|request| {
                request.program == "/bin/custom"
                    && request.args == ["-l"]
                    && request.cwd == Path::new("/work")
                    && request.cols == 132
                    && request.rows == 50
                    && request.label == "fixed-id"
            })
            .times(1)
            .returning(|_| Err(anyhow!("pty exhausted")));

        let manager = manager_with(config, shell, spawner);
        let err = manager
            .create_terminal_session(
                &SessionId::from("s"),
                "/work",
                CreateOptions {
                    cols: Some(132),
                    ..CreateOptions::with_id("fixed-id")
                },
            )
            .unwrap_err();

        assert!(matches!(err, TerminalError::Spawn { .. }), "{err}");
        assert_eq!(manager.terminal_count(), 0);
        assert_eq!(manager.get_terminal(&TerminalId::from("fixed-id")), None);
    }

    #[test]
    fn shell_environment_marks_cwd_and_ids() {
        let mut config = Config::default();
        config.env.insert("EDITOR".to_string(), "vim".to_string());

        let env = shell_environment(
            &config,
            &SessionId::from("s1"),
            &TerminalId::from("t1"),
            Path::new("/work"),
        );
        let lookup = |key: &str| {
            env.iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(lookup("PWD"), Some("/work"));
        assert_eq!(lookup("TERM"), Some("xterm-256color"));
        assert_eq!(lookup("COLORTERM"), Some("truecolor"));
        assert_eq!(lookup("PANELMUX_SESSION_ID"), Some("s1"));
        assert_eq!(lookup("PANELMUX_TERMINAL_ID"), Some("t1"));
        assert_eq!(lookup("EDITOR"), Some("vim"));
    }

    #[test]
    fn configured_env_overrides_builtins() {
        let mut config = Config::default();
        config.env.insert("TERM".to_string(), "dumb".to_string());

        let env = shell_environment(
            &config,
            &SessionId::from("s"),
            &TerminalId::from("t"),
            Path::new("/"),
        );
        let last_term = env.iter().rev().find(|(k, _)| k == "TERM").map(|(_, v)| v);
        assert_eq!(last_term.map(String::as_str), Some("dumb"));
    }
}
