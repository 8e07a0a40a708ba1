//! TOML config file support with live reload.
//!
//! Config location: `~/.config/panelmux/config.toml`

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;

/// Process-tree termination timing, in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct TerminationConfig {
    /// Wait between SIGTERM and SIGKILL.
    pub grace_period_ms: u64,
    /// Wait between SIGTERM and SIGKILL for fast closes.
    pub fast_grace_period_ms: u64,
    /// Wait between SIGKILL and verification.
    pub settle_ms: u64,
    /// Wait between SIGKILL and verification for fast closes.
    pub fast_settle_ms: u64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: constants::termination::GRACE_PERIOD.as_millis() as u64,
            fast_grace_period_ms: constants::termination::FAST_GRACE_PERIOD.as_millis() as u64,
            settle_ms: constants::termination::SETTLE.as_millis() as u64,
            fast_settle_ms: constants::termination::FAST_SETTLE.as_millis() as u64,
        }
    }
}

impl TerminationConfig {
    /// Grace period for a normal or fast close.
    pub fn grace_period(&self, fast: bool) -> Duration {
        Duration::from_millis(if fast {
            self.fast_grace_period_ms
        } else {
            self.grace_period_ms
        })
    }

    /// Settle period for a normal or fast close.
    pub fn settle(&self, fast: bool) -> Duration {
        Duration::from_millis(if fast {
            self.fast_settle_ms
        } else {
            self.settle_ms
        })
    }
}

/// User-facing config parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Shell executable; detected from the environment when unset.
    pub shell: Option<String>,
    /// Arguments passed to `shell` (ignored when the shell is detected).
    pub shell_args: Vec<String>,
    /// Initial terminal width.
    pub default_cols: u16,
    /// Initial terminal height.
    pub default_rows: u16,
    /// `TERM` value for spawned shells.
    pub term: String,
    /// Extra environment variables for spawned shells.
    pub env: BTreeMap<String, String>,
    /// Termination protocol timing.
    pub termination: TerminationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            shell_args: Vec::new(),
            default_cols: constants::terminal::DEFAULT_COLS,
            default_rows: constants::terminal::DEFAULT_ROWS,
            term: constants::terminal::TERM.to_string(),
            env: BTreeMap::new(),
            termination: TerminationConfig::default(),
        }
    }
}

impl Config {
    /// Clamp values that would make terminals unusable.
    fn sanitized(mut self) -> Self {
        if self.default_cols == 0 || self.default_rows == 0 {
            tracing::warn!(
                "Ignoring zero terminal geometry {}x{}",
                self.default_cols,
                self.default_rows
            );
            self.default_cols = constants::terminal::DEFAULT_COLS;
            self.default_rows = constants::terminal::DEFAULT_ROWS;
        }
        let max = constants::settings::MAX_STRING_LENGTH;
        if self.shell.as_ref().is_some_and(|shell| shell.len() > max) {
            tracing::warn!("Shell path exceeds {} bytes, ignoring", max);
            self.shell = None;
        }
        if self.term.is_empty() || self.term.len() > max {
            self.term = constants::terminal::TERM.to_string();
        }
        self
    }
}

/// Default config file content with comments (generated on first launch).
const DEFAULT_CONFIG: &str = r#"# panelmux configuration
# Changes are applied live: just save this file.

# Shell executable (detected from $SHELL / %COMSPEC% when unset)
# shell = "/bin/zsh"
# shell-args = ["-l"]

# Initial terminal geometry (terminals are resized by the front end later)
default-cols = 80
default-rows = 24

# TERM value for spawned shells
term = "xterm-256color"

# Extra environment variables for spawned shells
# [env]
# EDITOR = "vim"

# Closing a terminal kills its whole process tree: SIGTERM, wait, SIGKILL, verify.
[termination]
grace-period-ms = 5000
fast-grace-period-ms = 300
settle-ms = 500
fast-settle-ms = 100
"#;

/// Return the config file path.
pub fn config_path() -> Option<PathBuf> {
    Some(panelmux_paths::config_file())
}

/// Ensure the config file exists, creating a default if missing.
/// Returns the path to the config file.
pub fn ensure_config_file() -> Option<PathBuf> {
    let path = config_path()?;
    if !path.exists() {
        let parent = path.parent()?;
        std::fs::create_dir_all(parent).ok()?;
        std::fs::write(&path, DEFAULT_CONFIG).ok()?;
        tracing::info!("Created default config at {:?}", path);
    }
    Some(path)
}

/// Load and parse the config file. Returns default on any error.
pub fn load_config() -> Config {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Config::default(),
    }
}

/// Load and parse a specific config file. Returns default on any error.
pub fn load_config_from(path: &Path) -> Config {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to read config: {}", e);
            }
            return Config::default();
        }
    };

    // Size guard
    if content.len() > constants::settings::MAX_FILE_SIZE as usize {
        tracing::warn!(
            "Config file too large ({} bytes), using defaults",
            content.len()
        );
        return Config::default();
    }

    match toml::from_str::<Config>(&content) {
        Ok(cfg) => cfg.sanitized(),
        Err(e) => {
            tracing::warn!("Failed to parse config.toml: {}", e);
            Config::default()
        }
    }
}

/// Start watching the config file for changes.
///
/// Returns a guard that stops watching on drop. `on_change` runs on the
/// watcher thread, only when the parsed config actually differs.
pub fn watch_config(
    on_change: impl Fn(&Config) + Send + 'static,
) -> Option<notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>> {
    use notify_debouncer_mini::new_debouncer;

    let path = config_path()?;
    let watch_dir = path.parent()?.to_path_buf();

    let current = parking_lot::Mutex::new(load_config_from(&path));
    let path_clone = path.clone();

    let mut debouncer = new_debouncer(
        Duration::from_millis(100),
        move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, _>| {
            let Ok(events) = res else {
                return;
            };
            if !events.iter().any(|event| event.path == path_clone) {
                return;
            }
            let new_config = load_config_from(&path_clone);
            let mut prev = current.lock();
            if new_config != *prev {
                tracing::info!("Config file changed, reloading...");
                *prev = new_config.clone();
                drop(prev);
                on_change(&new_config);
            }
        },
    )
    .ok()?;

    debouncer
        .watcher()
        .watch(&watch_dir, notify::RecursiveMode::NonRecursive)
        .ok()?;

    tracing::info!("Watching config file: {:?}", path);
    Some(debouncer)
}
