use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use terminal::{OutputKind, SessionId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PanelId(String);

impl PanelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PanelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Terminal,
    Diff,
    Editor,
}

/// Initial payload of a terminal panel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalPanelState {
    pub is_initialized: bool,
    pub cwd: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: PanelId,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: PanelKind,
    pub title: String,
    pub state: Option<TerminalPanelState>,
    pub active: bool,
}

impl Panel {
    pub fn is_terminal_for(&self, session_id: &SessionId) -> bool {
        self.kind == PanelKind::Terminal && &self.session_id == session_id
    }
}

/// What to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanelRequest {
    pub session_id: SessionId,
    pub kind: PanelKind,
    pub title: String,
    pub state: Option<TerminalPanelState>,
    pub activate: bool,
}

/// The application's panel registry.
#[cfg_attr(test, mockall::automock)]
pub trait PanelDirectory: Send + Sync {
    /// Every panel of every session.
    fn all_panels(&self) -> Vec<Panel>;

    fn get(&self, panel_id: &PanelId) -> Option<Panel>;

    fn create(&self, request: PanelRequest) -> anyhow::Result<Panel>;
}

/// Persistent output history.
#[cfg_attr(test, mockall::automock)]
pub trait OutputStore: Send + Sync {
    /// Attribute output to a panel. Fails if the panel no longer exists.
    fn append_panel_output(
        &self,
        panel_id: &PanelId,
        kind: OutputKind,
        data: &[u8],
    ) -> anyhow::Result<()>;

    /// Store output against the session alone.
    fn append_session_output(
        &self,
        session_id: &SessionId,
        kind: OutputKind,
        data: &[u8],
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn panel(kind: PanelKind, session: &str) -> Panel {
        Panel {
            id: PanelId::from("p"),
            session_id: SessionId::from(session),
            kind,
            title: "Terminal".to_string(),
            state: None,
            active: false,
        }
    }

    #[test_case(PanelKind::Terminal, "s", true ; "terminal of the session")]
    #[test_case(PanelKind::Terminal, "other", false ; "terminal of another session")]
    #[test_case(PanelKind::Diff, "s", false ; "diff panel")]
    #[test_case(PanelKind::Editor, "s", false ; "editor panel")]
    fn terminal_panel_matching(kind: PanelKind, session: &str, expected: bool) {
        assert_eq!(
            panel(kind, session).is_terminal_for(&SessionId::from("s")),
            expected
        );
    }

    #[test]
    fn initial_state_uses_camel_case() {
        let state = TerminalPanelState {
            is_initialized: false,
            cwd: PathBuf::from("/work"),
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            serde_json::json!({ "isInitialized": false, "cwd": "/work" })
        );
    }
}
