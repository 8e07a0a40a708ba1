//! Centralized configuration constants for panelmux.
//!
//! Defaults for everything `config.toml` can override live here, grouped by
//! the component that consumes them.

/// Pseudo-terminal defaults.
pub mod terminal {
    /// Initial terminal width; callers resize once their view is laid out.
    pub const DEFAULT_COLS: u16 = 80;
    /// Initial terminal height.
    pub const DEFAULT_ROWS: u16 = 24;
    /// Value of `TERM` handed to spawned shells.
    pub const TERM: &str = "xterm-256color";
    /// Value of `COLORTERM` handed to spawned shells.
    pub const COLORTERM: &str = "truecolor";
    /// Size of a single PTY read.
    pub const READ_BUFFER_SIZE: usize = 4096;
    /// Prefix of auto-generated terminal titles ("Terminal 1", "Terminal 2", ...).
    pub const TITLE_PREFIX: &str = "Terminal";
}

/// Environment variables injected into every spawned shell.
pub mod env {
    /// Logical session that owns the terminal.
    pub const SESSION_ID: &str = "PANELMUX_SESSION_ID";
    /// Identifier of the terminal itself.
    pub const TERMINAL_ID: &str = "PANELMUX_TERMINAL_ID";
}

/// Process-tree termination timing.
pub mod termination {
    use std::time::Duration;

    /// Wait between the graceful and the forceful phase.
    pub const GRACE_PERIOD: Duration = Duration::from_millis(5_000);
    /// Grace period when a fast close is requested (auto-restart, shutdown).
    pub const FAST_GRACE_PERIOD: Duration = Duration::from_millis(300);
    /// Wait between the forceful phase and verification.
    pub const SETTLE: Duration = Duration::from_millis(500);
    /// Settle period for fast closes.
    pub const FAST_SETTLE: Duration = Duration::from_millis(100);
}

/// Settings file validation limits.
pub mod settings {
    /// Maximum settings file size in bytes (64 KB).
    /// Settings files should be tiny; anything larger is suspicious.
    pub const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Maximum length for string fields (shell path, TERM value).
    pub const MAX_STRING_LENGTH: usize = 4096;
}
