//! Events emitted by the terminal manager, and the subscriber list that fans
//! them out.
//!
//! Per terminal, output events arrive in the order the process produced them
//! and `TerminalExited`/`TerminalClosed` is always the last event for that id.
//! Nothing is ever dropped for a live subscriber: every subscriber gets an
//! unbounded channel.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::ids::{SessionId, TerminalId};

/// Stream a chunk of output was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Stdout => "stdout",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TerminalEvent {
    /// Raw bytes produced by the terminal's process.
    #[serde(rename_all = "camelCase")]
    TerminalOutput {
        session_id: SessionId,
        terminal_id: TerminalId,
        data: Vec<u8>,
        #[serde(rename = "type")]
        kind: OutputKind,
    },
    /// The process ended on its own.
    #[serde(rename_all = "camelCase")]
    TerminalExited {
        session_id: SessionId,
        terminal_id: TerminalId,
        exit_code: u32,
        signal: Option<String>,
    },
    /// The terminal was closed by a caller.
    #[serde(rename_all = "camelCase")]
    TerminalClosed {
        session_id: SessionId,
        terminal_id: TerminalId,
    },
    /// Processes survived the termination protocol.
    #[serde(rename_all = "camelCase")]
    ZombieProcessesDetected {
        session_id: Option<SessionId>,
        terminal_id: Option<TerminalId>,
        pids: Vec<u32>,
        message: String,
    },
}

impl TerminalEvent {
    /// The terminal this event belongs to, if any.
    pub fn terminal_id(&self) -> Option<&TerminalId> {
        match self {
            TerminalEvent::TerminalOutput { terminal_id, .. }
            | TerminalEvent::TerminalExited { terminal_id, .. }
            | TerminalEvent::TerminalClosed { terminal_id, .. } => Some(terminal_id),
            TerminalEvent::ZombieProcessesDetected { terminal_id, .. } => terminal_id.as_ref(),
        }
    }

    /// Whether no further events will follow for this terminal.
    pub fn is_terminal_end(&self) -> bool {
        matches!(
            self,
            TerminalEvent::TerminalExited { .. } | TerminalEvent::TerminalClosed { .. }
        )
    }
}

/// Remediation text attached to zombie reports.
pub fn zombie_message(pids: &[u32]) -> String {
    let list = pids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} process(es) survived termination (PIDs: {}). Kill them manually, e.g. `kill -9 {}`.",
        pids.len(),
        list,
        pids.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    )
}

/// Fan-out of events to any number of subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<TerminalEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TerminalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber; receivers that were dropped are pruned.
    pub fn emit(&self, event: TerminalEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn closed(terminal: &str) -> TerminalEvent {
        TerminalEvent::TerminalClosed {
            session_id: "s".into(),
            terminal_id: terminal.into(),
        }
    }

    #[test]
    fn every_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(closed("t1"));

        assert_eq!(first.try_recv().unwrap(), closed("t1"));
        assert_eq!(second.try_recv().unwrap(), closed("t1"));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        drop(rx);

        bus.emit(closed("t1"));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn output_event_serializes_with_type_field() {
        let event = TerminalEvent::TerminalOutput {
            session_id: "s1".into(),
            terminal_id: "t1".into(),
            data: b"a".to_vec(),
            kind: OutputKind::Stdout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "terminal-output");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["terminalId"], "t1");
        assert_eq!(json["type"], "stdout");
    }

    #[test]
    fn zombie_event_serializes_null_session() {
        let event = TerminalEvent::ZombieProcessesDetected {
            session_id: None,
            terminal_id: None,
            pids: vec![42],
            message: zombie_message(&[42]),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "zombie-processes-detected");
        assert!(json["sessionId"].is_null());
        assert_eq!(json["pids"][0], 42);
    }

    #[test]
    fn zombie_message_lists_pids() {
        let message = zombie_message(&[10, 20]);
        assert!(message.contains("10, 20"), "{message}");
        assert!(message.contains("kill -9 10 20"), "{message}");
    }

    #[test]
    fn end_events_are_flagged() {
        assert!(closed("t").is_terminal_end());
        let output = TerminalEvent::TerminalOutput {
            session_id: "s".into(),
            terminal_id: "t".into(),
            data: vec![],
            kind: OutputKind::Stdout,
        };
        assert!(!output.is_terminal_end());
        assert_eq!(output.terminal_id().map(TerminalId::as_str), Some("t"));
    }
}
