//! In-memory panel directory and output store, used by the headless binary
//! and by tests.

use anyhow::{bail, Result};
use collections::{FxHashMap, IndexMap};
use parking_lot::Mutex;
use std::sync::Arc;

use terminal::{OutputKind, SessionId};

use crate::panel::{OutputStore, Panel, PanelDirectory, PanelId, PanelRequest};

#[derive(Default)]
pub struct InMemoryPanels {
    panels: Mutex<IndexMap<PanelId, Panel>>,
}

impl InMemoryPanels {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn remove(&self, panel_id: &PanelId) -> Option<Panel> {
        self.panels.lock().shift_remove(panel_id)
    }

    pub fn len(&self) -> usize {
        self.panels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.lock().is_empty()
    }
}

impl PanelDirectory for InMemoryPanels {
    fn all_panels(&self) -> Vec<Panel> {
        self.panels.lock().values().cloned().collect()
    }

    fn get(&self, panel_id: &PanelId) -> Option<Panel> {
        self.panels.lock().get(panel_id).cloned()
    }

    fn create(&self, request: PanelRequest) -> Result<Panel> {
        let panel = Panel {
            id: PanelId::generate(),
            session_id: request.session_id,
            kind: request.kind,
            title: request.title,
            state: request.state,
            active: request.activate,
        };
        self.panels.lock().insert(panel.id.clone(), panel.clone());
        Ok(panel)
    }
}

/// One stored chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredOutput {
    pub kind: OutputKind,
    pub data: Vec<u8>,
}

/// Output history keyed by panel, with a per-session overflow.
///
/// Panel writes are checked against the directory so writes for a deleted
/// panel fail the way a foreign-key constraint would.
pub struct InMemoryOutputStore {
    panels: Arc<dyn PanelDirectory>,
    by_panel: Mutex<FxHashMap<PanelId, Vec<StoredOutput>>>,
    by_session: Mutex<FxHashMap<SessionId, Vec<StoredOutput>>>,
}

impl InMemoryOutputStore {
    pub fn new(panels: Arc<dyn PanelDirectory>) -> Arc<Self> {
        Arc::new(Self {
            panels,
            by_panel: Mutex::new(FxHashMap::default()),
            by_session: Mutex::new(FxHashMap::default()),
        })
    }

    /// Concatenated output attributed to a panel.
    pub fn panel_output(&self, panel_id: &PanelId) -> Vec<u8> {
        concat(self.by_panel.lock().get(panel_id))
    }

    /// Concatenated output stored without a panel.
    pub fn session_output(&self, session_id: &SessionId) -> Vec<u8> {
        concat(self.by_session.lock().get(session_id))
    }
}

fn concat(chunks: Option<&Vec<StoredOutput>>) -> Vec<u8> {
    chunks
        .into_iter()
        .flatten()
        .flat_map(|chunk| chunk.data.iter().copied())
        .collect()
}

impl OutputStore for InMemoryOutputStore {
    fn append_panel_output(&self, panel_id: &PanelId, kind: OutputKind, data: &[u8]) -> Result<()> {
        if self.panels.get(panel_id).is_none() {
            bail!("panel {panel_id} does not exist");
        }
        self.by_panel
            .lock()
            .entry(panel_id.clone())
            .or_default()
            .push(StoredOutput {
                kind,
                data: data.to_vec(),
            });
        Ok(())
    }

    fn append_session_output(
        &self,
        session_id: &SessionId,
        kind: OutputKind,
        data: &[u8],
    ) -> Result<()> {
        self.by_session
            .lock()
            .entry(session_id.clone())
            .or_default()
            .push(StoredOutput {
                kind,
                data: data.to_vec(),
            });
        Ok(())
    }
}
