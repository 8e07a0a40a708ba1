use std::os::windows::process::CommandExt;
use std::process::{Command, Stdio};

use super::{ProcessSnapshot, ProcessTreeTerminator};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// `taskkill /T /F`, falling back to killing each descendant by pid.
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowsTerminator;

impl ProcessTreeTerminator for WindowsTerminator {
    fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot::capture()
    }

    fn graceful(&self, root: u32, descendants: &[u32]) {
        if taskkill(&["/PID", &root.to_string(), "/T", "/F"]) {
            return;
        }
        tracing::debug!(root, "Tree kill failed, killing descendants individually");
        for pid in descendants {
            taskkill(&["/PID", &pid.to_string(), "/F"]);
        }
    }

    // Tree kill is already forceful.
    fn forceful(&self, _root: u32, _descendants: &[u32]) {}
}

fn taskkill(args: &[&str]) -> bool {
    let result = Command::new("taskkill")
        .args(args)
        .creation_flags(CREATE_NO_WINDOW)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(status) => status.success(),
        Err(error) => {
            tracing::warn!(%error, "Failed to run taskkill");
            false
        }
    }
}
