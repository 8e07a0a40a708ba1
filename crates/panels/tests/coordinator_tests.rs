//! Integration tests for the session-to-panel coordinator.
//!
//! # Test Organization
//!
//! - `panels` - finding and creating terminal panels
//! - `output` - output routing and the session-level fallback
//! - `forwarding` - draining a terminal event stream into storage

use panels::{
    forward_terminal_output, InMemoryOutputStore, InMemoryPanels, PanelCoordinator,
    PanelDirectory, PanelKind, PanelRequest, TerminalPanelState,
};
use pretty_assertions::assert_eq as pretty_eq;
use std::sync::Arc;
use terminal::{OutputKind, SessionId, TerminalEvent, TerminalId};

struct Fixture {
    panels: Arc<InMemoryPanels>,
    store: Arc<InMemoryOutputStore>,
    coordinator: PanelCoordinator,
}

impl Fixture {
    fn new() -> Self {
        let panels = InMemoryPanels::new();
        let store = InMemoryOutputStore::new(panels.clone());
        let coordinator = PanelCoordinator::new(panels.clone(), store.clone());
        Self {
            panels,
            store,
            coordinator,
        }
    }
}

fn sid(id: &str) -> SessionId {
    SessionId::from(id)
}

// ============================================================================
// Panels
// ============================================================================

mod panels_lookup {
    use super::*;

    #[test]
    fn ensure_panel_creates_once() {
        let f = Fixture::new();
        let first = f.coordinator.ensure_panel(&sid("s"), "/work").unwrap();
        let second = f.coordinator.ensure_panel(&sid("s"), "/ignored").unwrap();

        assert_eq!(first, second);
        assert_eq!(f.panels.len(), 1);

        let panel = f.panels.get(&first).unwrap();
        assert_eq!(panel.kind, PanelKind::Terminal);
        assert!(!panel.active);
        pretty_eq!(
            panel.state,
            Some(TerminalPanelState {
                is_initialized: false,
                cwd: "/work".into(),
            })
        );
    }

    #[test]
    fn existing_panel_is_adopted_without_creating() {
        let f = Fixture::new();
        let existing = f
            .panels
            .create(PanelRequest {
                session_id: sid("s"),
                kind: PanelKind::Terminal,
                title: "Restored".to_string(),
                state: None,
                activate: true,
            })
            .unwrap();

        assert_eq!(f.coordinator.ensure_panel(&sid("s"), "/").unwrap(), existing.id);
        assert_eq!(f.panels.len(), 1);
    }

    #[test]
    fn deleted_panel_is_replaced() {
        let f = Fixture::new();
        let first = f.coordinator.ensure_panel(&sid("s"), "/").unwrap();
        f.panels.remove(&first);

        assert_eq!(f.coordinator.find_panel(&sid("s")), None);
        assert_eq!(f.coordinator.cached_panel(&sid("s")), None);

        let second = f.coordinator.ensure_panel(&sid("s"), "/").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn clear_session_drops_cache_only() {
        let f = Fixture::new();
        let panel = f.coordinator.ensure_panel(&sid("s"), "/").unwrap();

        f.coordinator.clear_session(&sid("s"));

        assert_eq!(f.coordinator.cached_panel(&sid("s")), None);
        assert_eq!(f.coordinator.find_panel(&sid("s")), Some(panel));
    }

    #[test]
    fn panel_serializes_with_type_field() {
        let f = Fixture::new();
        let id = f.coordinator.ensure_panel(&sid("s"), "/w").unwrap();
        let json = serde_json::to_value(f.panels.get(&id).unwrap()).unwrap();
        assert_eq!(json["type"], "terminal");
        assert_eq!(json["sessionId"], "s");
        assert_eq!(json["state"]["isInitialized"], false);
    }
}

// ============================================================================
// Output
// ============================================================================

mod output {
    use super::*;

    #[test]
    fn output_is_attributed_to_panel() {
        let f = Fixture::new();
        let panel = f.coordinator.ensure_panel(&sid("s"), "/").unwrap();

        f.coordinator
            .record_output(&sid("s"), OutputKind::Stdout, b"ab")
            .unwrap();
        f.coordinator
            .record_output(&sid("s"), OutputKind::Stdout, b"cd")
            .unwrap();

        assert_eq!(f.store.panel_output(&panel), b"abcd".to_vec());
        assert!(f.store.session_output(&sid("s")).is_empty());
    }

    #[test]
    fn output_survives_concurrent_panel_deletion() {
        let f = Fixture::new();
        let panel = f.coordinator.ensure_panel(&sid("s"), "/").unwrap();
        f.coordinator
            .record_output(&sid("s"), OutputKind::Stdout, b"before ")
            .unwrap();

        f.panels.remove(&panel);
        f.coordinator
            .record_output(&sid("s"), OutputKind::Stdout, b"after")
            .unwrap();

        assert_eq!(f.store.panel_output(&panel), b"before ".to_vec());
        assert_eq!(f.store.session_output(&sid("s")), b"after".to_vec());
        assert_eq!(f.coordinator.cached_panel(&sid("s")), None);
    }

    #[test]
    fn output_without_panel_is_stored_by_session() {
        let f = Fixture::new();
        f.coordinator
            .record_output(&sid("lonely"), OutputKind::Stdout, b"x")
            .unwrap();
        assert_eq!(f.store.session_output(&sid("lonely")), b"x".to_vec());
        assert!(f.panels.is_empty(), "recording never creates panels");
    }
}

// ============================================================================
// Forwarding
// ============================================================================

mod forwarding {
    use super::*;

    fn output(session: &str, data: &[u8]) -> TerminalEvent {
        TerminalEvent::TerminalOutput {
            session_id: sid(session),
            terminal_id: TerminalId::from("t"),
            data: data.to_vec(),
            kind: OutputKind::Stdout,
        }
    }

    #[tokio::test]
    async fn forwards_output_events_until_stream_ends() {
        let f = Fixture::new();
        let panel = f.coordinator.ensure_panel(&sid("s1"), "/").unwrap();
        let coordinator = Arc::new(f.coordinator);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(output("s1", b"hello ")).unwrap();
        tx.send(TerminalEvent::TerminalClosed {
            session_id: sid("s2"),
            terminal_id: TerminalId::from("t"),
        })
        .unwrap();
        tx.send(output("s2", b"orphan")).unwrap();
        tx.send(output("s1", b"world")).unwrap();
        drop(tx);

        let stored = forward_terminal_output(coordinator, rx).await;

        assert_eq!(stored, 3);
        assert_eq!(f.store.panel_output(&panel), b"hello world".to_vec());
        assert_eq!(f.store.session_output(&sid("s2")), b"orphan".to_vec());
    }
}
