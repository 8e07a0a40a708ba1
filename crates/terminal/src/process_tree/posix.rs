use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, getpgrp, Pid};
use std::process::{Command, Stdio};

use super::{ProcessSnapshot, ProcessTreeTerminator};

/// SIGTERM, then SIGKILL, by pid and by process group.
#[derive(Clone, Copy, Debug, Default)]
pub struct PosixTerminator;

impl ProcessTreeTerminator for PosixTerminator {
    fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot::capture()
    }

    fn graceful(&self, root: u32, _descendants: &[u32]) {
        signal_process(root, Signal::SIGTERM);
        if let Some(group) = foreign_group(root) {
            signal_group(group, Signal::SIGTERM);
        }
    }

    fn forceful(&self, root: u32, descendants: &[u32]) {
        signal_process(root, Signal::SIGKILL);
        if let Some(group) = foreign_group(root) {
            signal_group(group, Signal::SIGKILL);
        }
        for &pid in descendants {
            signal_process(pid, Signal::SIGKILL);
        }
        kill_children_of(root);
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    // 0 and negative values address groups, never a single process.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Process group of `root`, or `root` itself if the lookup fails. `None`
/// when signalling it would hit this process's own group.
fn foreign_group(root: u32) -> Option<Pid> {
    let pid = to_pid(root)?;
    let group = match getpgid(Some(pid)) {
        Ok(group) => group,
        Err(error) => {
            tracing::trace!(root, %error, "Process group lookup failed, using root pid");
            pid
        }
    };
    if group == getpgrp() || group.as_raw() <= 1 {
        tracing::debug!(root, group = group.as_raw(), "Skipping shared process group");
        return None;
    }
    Some(group)
}

fn signal_process(pid: u32, signal: Signal) {
    let Some(target) = to_pid(pid) else {
        return;
    };
    match kill(target, signal) {
        Ok(()) => tracing::trace!(pid, ?signal, "Signalled process"),
        Err(Errno::ESRCH) => tracing::trace!(pid, "Process already gone"),
        Err(error) => tracing::warn!(pid, ?signal, %error, "Failed to signal process"),
    }
}

fn signal_group(group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) => tracing::trace!(group = group.as_raw(), ?signal, "Signalled process group"),
        Err(Errno::ESRCH) => tracing::trace!(group = group.as_raw(), "Process group already gone"),
        Err(error) => {
            tracing::warn!(group = group.as_raw(), ?signal, %error, "Failed to signal process group")
        }
    }
}

/// Final sweep with `pkill -KILL -P <root>`.
fn kill_children_of(root: u32) {
    let result = Command::new("pkill")
        .args(["-KILL", "-P", &root.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        // Exit status 1 means nothing matched.
        Ok(status) => tracing::trace!(root, ?status, "pkill sweep finished"),
        Err(error) => tracing::debug!(root, %error, "pkill unavailable"),
    }
}

/// Parse `/proc/<pid>/stat` into `(state, ppid)`.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(stat: &str) -> Option<(char, u32)> {
    let rest = stat.get(stat.rfind(')')? + 1..)?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some((state, ppid))
}

/// Read the process table from `/proc`, or `None` if it is unavailable.
#[cfg(target_os = "linux")]
pub(super) fn capture_from_proc() -> Option<ProcessSnapshot> {
    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(error) => {
            tracing::debug!(%error, "Cannot read /proc, falling back to sysinfo");
            return None;
        }
    };

    let processes = entries.flatten().filter_map(|entry| {
        let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
        // Exits between listing and reading are normal.
        let stat = std::fs::read_to_string(entry.path().join("stat")).ok()?;
        let (state, ppid) = parse_stat(&stat)?;
        // Zombies (Z) and dead (X) tasks have already exited.
        if matches!(state, 'Z' | 'X' | 'x') {
            return None;
        }
        Some((pid, (ppid != 0).then_some(ppid)))
    });

    Some(ProcessSnapshot::from_entries(processes))
}
