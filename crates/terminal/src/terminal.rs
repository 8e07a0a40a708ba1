//! Terminal session lifecycle for panelmux.
//!
//! Spawns shells on pseudo-terminals for logical sessions, routes their I/O
//! to subscribers and tears down whole process trees on close.

pub mod error;
pub mod events;
pub mod ids;
pub mod manager;
pub mod process_tree;
pub mod pty;
pub mod registry;
pub mod shell;

pub use error::{Result, TerminalError};
pub use events::{EventBus, OutputKind, TerminalEvent};
pub use ids::{SessionId, TerminalId};
pub use manager::{
    CloseOptions, CreateOptions, TerminalManager, TerminalManagerBuilder, TerminalSummary,
};
pub use process_tree::{
    platform_terminator, terminate_process_tree, ProcessSnapshot, ProcessTreeTerminator,
    TerminationReport,
};
pub use pty::{NativePtySpawner, PtyExit, PtyObserver, PtyProcess, PtySpawner, SpawnRequest};
pub use registry::TerminalRegistry;
pub use shell::{DefaultShell, ShellResolver, ShellSpec};
