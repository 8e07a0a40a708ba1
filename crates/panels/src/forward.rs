use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use terminal::TerminalEvent;
use util::ResultExt;

use crate::coordinator::PanelCoordinator;

/// Record every output event through `coordinator` until the stream ends.
/// Returns the number of chunks stored.
pub async fn forward_terminal_output(
    coordinator: Arc<PanelCoordinator>,
    mut events: UnboundedReceiver<TerminalEvent>,
) -> usize {
    let mut stored = 0;
    while let Some(event) = events.recv().await {
        if let TerminalEvent::TerminalOutput {
            session_id,
            data,
            kind,
            ..
        } = event
        {
            if coordinator
                .record_output(&session_id, kind, &data)
                .log_err()
                .is_some()
            {
                stored += 1;
            }
        }
    }
    tracing::debug!(stored, "Output forwarding finished");
    stored
}
