//! Session-to-panel coordination for panelmux.
//!
//! A session's terminal output is rendered by exactly one terminal panel.
//! [`PanelCoordinator`] finds or creates that panel and routes output into
//! persistent storage, falling back to session-level storage so no output is
//! dropped when a panel disappears underneath it.

mod coordinator;
mod forward;
mod memory;
mod panel;

pub use coordinator::{CoordinatorError, PanelCoordinator};
pub use forward::forward_terminal_output;
pub use memory::{InMemoryOutputStore, InMemoryPanels, StoredOutput};
pub use panel::{
    OutputStore, Panel, PanelDirectory, PanelId, PanelKind, PanelRequest, TerminalPanelState,
};
