use collections::FxHashMap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use terminal::{OutputKind, SessionId};

use crate::panel::{OutputStore, PanelDirectory, PanelId, PanelKind, PanelRequest, TerminalPanelState};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to create terminal panel for session {session_id}: {source:#}")]
    PanelCreation {
        session_id: SessionId,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to store output for session {session_id}: {source:#}")]
    OutputLost {
        session_id: SessionId,
        #[source]
        source: anyhow::Error,
    },
}

/// Maps each session to the terminal panel that renders it.
///
/// The `session -> panel` cache is only a shortcut: an entry is checked
/// against the directory before use and dropped when its panel is gone.
pub struct PanelCoordinator {
    panels: Arc<dyn PanelDirectory>,
    store: Arc<dyn OutputStore>,
    cache: Mutex<FxHashMap<SessionId, PanelId>>,
}

impl PanelCoordinator {
    pub fn new(panels: Arc<dyn PanelDirectory>, store: Arc<dyn OutputStore>) -> Self {
        Self {
            panels,
            store,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// The session's terminal panel, if one exists.
    pub fn find_panel(&self, session_id: &SessionId) -> Option<PanelId> {
        let cached = self.cache.lock().get(session_id).cloned();
        if let Some(panel_id) = cached {
            if self.panels.get(&panel_id).is_some() {
                return Some(panel_id);
            }
            tracing::debug!(%session_id, %panel_id, "Cached panel is gone");
            self.evict(session_id, &panel_id);
        }

        let panel = self
            .panels
            .all_panels()
            .into_iter()
            .find(|panel| panel.is_terminal_for(session_id))?;
        self.cache.lock().insert(session_id.clone(), panel.id.clone());
        Some(panel.id)
    }

    /// The session's terminal panel, created un-activated if missing.
    pub fn ensure_panel(
        &self,
        session_id: &SessionId,
        cwd: impl AsRef<Path>,
    ) -> Result<PanelId, CoordinatorError> {
        if let Some(panel_id) = self.find_panel(session_id) {
            return Ok(panel_id);
        }

        let panel = self
            .panels
            .create(PanelRequest {
                session_id: session_id.clone(),
                kind: PanelKind::Terminal,
                title: "Terminal".to_string(),
                state: Some(TerminalPanelState {
                    is_initialized: false,
                    cwd: cwd.as_ref().to_path_buf(),
                }),
                activate: false,
            })
            .map_err(|source| CoordinatorError::PanelCreation {
                session_id: session_id.clone(),
                source,
            })?;

        tracing::info!(%session_id, panel_id = %panel.id, "Created terminal panel");
        self.cache.lock().insert(session_id.clone(), panel.id.clone());
        Ok(panel.id)
    }

    /// Persist a chunk of output, by panel when possible, by session otherwise.
    pub fn record_output(
        &self,
        session_id: &SessionId,
        kind: OutputKind,
        data: &[u8],
    ) -> Result<(), CoordinatorError> {
        if let Some(panel_id) = self.find_panel(session_id) {
            match self.store.append_panel_output(&panel_id, kind, data) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    tracing::warn!(
                        %session_id,
                        %panel_id,
                        "Panel output write failed, storing by session: {:#}",
                        error
                    );
                    self.evict(session_id, &panel_id);
                }
            }
        }

        self.store
            .append_session_output(session_id, kind, data)
            .map_err(|source| CoordinatorError::OutputLost {
                session_id: session_id.clone(),
                source,
            })
    }

    /// Forget the session's cached panel.
    pub fn clear_session(&self, session_id: &SessionId) {
        if self.cache.lock().remove(session_id).is_some() {
            tracing::debug!(%session_id, "Cleared panel cache entry");
        }
    }

    pub fn cached_panel(&self, session_id: &SessionId) -> Option<PanelId> {
        self.cache.lock().get(session_id).cloned()
    }

    fn evict(&self, session_id: &SessionId, panel_id: &PanelId) {
        let mut cache = self.cache.lock();
        if cache.get(session_id) == Some(panel_id) {
            cache.remove(session_id);
        }
    }
}
