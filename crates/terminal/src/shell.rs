//! Shell selection for new terminals.

use anyhow::{bail, Result};
use std::path::Path;

/// Program and arguments used to start a terminal's shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Resolves the shell a new terminal runs.
#[cfg_attr(test, mockall::automock)]
pub trait ShellResolver: Send + Sync {
    fn resolve(&self, config: &settings::Config) -> Result<ShellSpec>;
}

/// The configured `shell` if set, otherwise the host's default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultShell;

impl ShellResolver for DefaultShell {
    fn resolve(&self, config: &settings::Config) -> Result<ShellSpec> {
        match &config.shell {
            Some(program) if program.trim().is_empty() => bail!("configured shell is empty"),
            Some(program) => Ok(ShellSpec::new(program.clone()).with_args(config.shell_args.clone())),
            None => detect_shell(),
        }
    }
}

#[cfg(unix)]
fn detect_shell() -> Result<ShellSpec> {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() && Path::new(&shell).exists() {
            return Ok(ShellSpec::new(shell));
        }
        tracing::debug!(shell = %shell, "Ignoring unusable $SHELL");
    }
    for candidate in ["/bin/zsh", "/bin/bash", "/bin/sh"] {
        if Path::new(candidate).exists() {
            return Ok(ShellSpec::new(candidate));
        }
    }
    bail!("no usable shell found")
}

#[cfg(windows)]
fn detect_shell() -> Result<ShellSpec> {
    let system_root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
    let powershell = Path::new(&system_root)
        .join(r"System32\WindowsPowerShell\v1.0\powershell.exe");
    if powershell.exists() {
        return Ok(ShellSpec::new(powershell.to_string_lossy()).with_args(["-NoLogo"]));
    }
    match std::env::var("COMSPEC") {
        Ok(comspec) if !comspec.is_empty() => Ok(ShellSpec::new(comspec)),
        _ => Ok(ShellSpec::new("cmd.exe")),
    }
}
