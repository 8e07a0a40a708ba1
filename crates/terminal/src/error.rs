use thiserror::Error;

use crate::ids::{SessionId, TerminalId};

/// Failures surfaced to callers of [`crate::TerminalManager`].
///
/// Termination problems are deliberately absent: a close that leaves
/// survivors returns `false` and emits [`crate::TerminalEvent::ZombieProcessesDetected`].
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("terminal {0} not found")]
    NotFound(TerminalId),

    #[error("failed to spawn terminal for session {session_id}: {source:#}")]
    Spawn {
        session_id: SessionId,
        #[source]
        source: anyhow::Error,
    },

    #[error("terminal {0} is being closed")]
    Closing(TerminalId),

    #[error("failed to resolve shell: {0:#}")]
    ShellResolution(#[source] anyhow::Error),

    #[error("failed to write to terminal {terminal_id}: {source:#}")]
    Write {
        terminal_id: TerminalId,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T, E = TerminalError> = std::result::Result<T, E>;
