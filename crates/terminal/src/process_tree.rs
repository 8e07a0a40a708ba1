//! Process-tree termination.
//!
//! Closing a terminal must take down every process its shell started, not
//! just the shell. [`terminate_process_tree`] runs the escalation:
//!
//! 1. snapshot the root's descendants while the tree is still intact;
//! 2. graceful signal to the root and its group;
//! 3. wait out the grace period;
//! 4. forceful kill of the root, its group and every snapshotted descendant;
//! 5. wait out the settle period, then look for survivors.
//!
//! Survivors are the root itself if still alive, its current descendants,
//! and any snapshotted pid that is still alive. Orphans get reparented once
//! the root dies, so the snapshot is the only way to find them again.
//!
//! Platform specifics live behind [`ProcessTreeTerminator`].

use collections::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use posix::PosixTerminator;
#[cfg(windows)]
pub use windows::WindowsTerminator;

/// Point-in-time view of the process table: who is alive and who their
/// parent is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    alive: FxHashSet<u32>,
    children: FxHashMap<u32, Vec<u32>>,
}

impl ProcessSnapshot {
    /// Build from `(pid, parent)` pairs. Exited processes must be left out.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, Option<u32>)>) -> Self {
        let mut snapshot = Self::default();
        for (pid, parent) in entries {
            snapshot.alive.insert(pid);
            if let Some(parent) = parent {
                if parent != pid {
                    snapshot.children.entry(parent).or_default().push(pid);
                }
            }
        }
        for children in snapshot.children.values_mut() {
            children.sort_unstable();
        }
        snapshot
    }

    /// Read the live process table.
    pub fn capture() -> Self {
        #[cfg(target_os = "linux")]
        {
            if let Some(snapshot) = posix::capture_from_proc() {
                return snapshot;
            }
        }
        capture_with_sysinfo()
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.alive.contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// Every process transitively below `root`, breadth first, without
    /// duplicates and without `root` itself.
    pub fn descendants(&self, root: u32) -> Vec<u32> {
        let mut seen = FxHashSet::default();
        seen.insert(root);
        let mut queue = VecDeque::from([root]);
        let mut found = Vec::new();

        while let Some(pid) = queue.pop_front() {
            for &child in self.children.get(&pid).into_iter().flatten() {
                if seen.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        found
    }
}

fn capture_with_sysinfo() -> ProcessSnapshot {
    use sysinfo::{ProcessStatus, ProcessesToUpdate, System};

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    ProcessSnapshot::from_entries(
        system
            .processes()
            .iter()
            .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
            .map(|(pid, process)| (pid.as_u32(), process.parent().map(|parent| parent.as_u32()))),
    )
}

/// Platform capability used by the termination protocol.
///
/// Signal delivery is best effort: implementations log failures and never
/// report them, since verification decides the outcome.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessTreeTerminator: Send + Sync {
    fn snapshot(&self) -> ProcessSnapshot;

    /// Ask the tree rooted at `root` to exit.
    fn graceful(&self, root: u32, descendants: &[u32]);

    /// Kill the root, its group and every listed descendant.
    fn forceful(&self, root: u32, descendants: &[u32]);
}

/// Terminator for the host platform.
pub fn platform_terminator() -> Arc<dyn ProcessTreeTerminator> {
    #[cfg(unix)]
    {
        Arc::new(PosixTerminator)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsTerminator)
    }
}

/// Result of one run of the termination protocol.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// Processes still alive after the settle period, ascending.
    pub survivors: Vec<u32>,
    /// The final process table could not be read, so survivors are unknown.
    pub unverified: bool,
}

impl TerminationReport {
    pub fn is_clean(&self) -> bool {
        !self.unverified && self.survivors.is_empty()
    }
}

async fn blocking<T, F>(terminator: &Arc<dyn ProcessTreeTerminator>, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProcessTreeTerminator) -> T + Send + 'static,
{
    let terminator = terminator.clone();
    match tokio::task::spawn_blocking(move || f(terminator.as_ref())).await {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!("Process-tree task failed: {}", error);
            None
        }
    }
}

/// Kill `root` and everything below it, then report what survived.
pub async fn terminate_process_tree(
    terminator: Arc<dyn ProcessTreeTerminator>,
    root: u32,
    grace: Duration,
    settle: Duration,
) -> TerminationReport {
    let descendants = match blocking(&terminator, |t| t.snapshot()).await {
        Some(before) => {
            let descendants = before.descendants(root);
            if !before.is_alive(root) && descendants.is_empty() {
                tracing::debug!(root, "Process tree already gone");
                return TerminationReport::default();
            }
            descendants
        }
        None => {
            tracing::warn!(root, "No process snapshot, signalling the root only");
            Vec::new()
        }
    };

    tracing::debug!(root, descendants = ?descendants, "Terminating process tree");

    let targets: Arc<[u32]> = descendants.into();
    {
        let targets = targets.clone();
        blocking(&terminator, move |t| t.graceful(root, &targets)).await;
    }

    tokio::time::sleep(grace).await;

    {
        let targets = targets.clone();
        blocking(&terminator, move |t| t.forceful(root, &targets)).await;
    }

    tokio::time::sleep(settle).await;

    let Some(after) = blocking(&terminator, |t| t.snapshot()).await else {
        tracing::warn!(root, "Could not verify process tree termination");
        return TerminationReport {
            survivors: Vec::new(),
            unverified: true,
        };
    };

    let mut survivors: Vec<u32> = after
        .descendants(root)
        .into_iter()
        .chain(
            std::iter::once(root)
                .chain(targets.iter().copied())
                .filter(|pid| after.is_alive(*pid)),
        )
        .collect();
    survivors.sort_unstable();
    survivors.dedup();

    if survivors.is_empty() {
        tracing::debug!(root, "Process tree terminated");
    } else {
        tracing::warn!(root, survivors = ?survivors, "Processes survived termination");
    }

    TerminationReport {
        survivors,
        unverified: false,
    }
}
