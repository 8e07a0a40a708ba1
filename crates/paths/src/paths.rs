//! Where panelmux keeps its files.
//!
//! Directories are resolved once and cached. Call the `set_*` functions
//! before first access to relocate them (tests, portable installs).

use std::path::PathBuf;
use std::sync::OnceLock;

static CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();
static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

fn platform_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("panelmux")
}

/// ~/.config/panelmux (or platform equivalent)
pub fn config_dir() -> &'static PathBuf {
    CONFIG_DIR.get_or_init(|| platform_dir(dirs::config_dir()))
}

/// ~/.local/share/panelmux (or platform equivalent)
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(|| platform_dir(dirs::data_dir()))
}

/// Relocate the config dir. Returns false if it was already resolved.
pub fn set_config_dir(path: PathBuf) -> bool {
    CONFIG_DIR.set(path).is_ok()
}

/// Relocate the data dir. Returns false if it was already resolved.
pub fn set_data_dir(path: PathBuf) -> bool {
    DATA_DIR.set(path).is_ok()
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Saved terminal output, one file per session.
pub fn output_dir() -> PathBuf {
    data_dir().join("output")
}
