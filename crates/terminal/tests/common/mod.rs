//! Fakes for driving `TerminalManager` without real processes.

#![allow(dead_code)]

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use settings::{Config, TerminationConfig};
use terminal::{
    ProcessSnapshot, ProcessTreeTerminator, PtyExit, PtyObserver, PtyProcess, PtySpawner,
    ShellResolver, ShellSpec, SpawnRequest, TerminalEvent, TerminalManager,
};

/// Upper bound for waiting on a single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace and settle periods short enough to keep tests fast.
pub fn quick_timings() -> TerminationConfig {
    TerminationConfig {
        grace_period_ms: 5,
        fast_grace_period_ms: 1,
        settle_ms: 5,
        fast_settle_ms: 1,
    }
}

pub fn quick_config() -> Config {
    Config {
        termination: quick_timings(),
        ..Default::default()
    }
}

// ============================================================================
// Process tree
// ============================================================================

/// In-memory process table. Signals remove processes unless they are marked
/// stubborn (ignore the graceful signal) or immortal (survive everything).
#[derive(Default)]
pub struct FakeTree {
    processes: Mutex<BTreeMap<u32, Option<u32>>>,
    stubborn: Mutex<BTreeSet<u32>>,
    immortal: Mutex<BTreeSet<u32>>,
    calls: Mutex<Vec<(&'static str, u32)>>,
}

impl FakeTree {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, pid: u32, parent: u32) {
        self.processes.lock().insert(pid, Some(parent));
    }

    pub fn ignore_graceful(&self, pid: u32) {
        self.stubborn.lock().insert(pid);
    }

    pub fn make_immortal(&self, pid: u32) {
        self.immortal.lock().insert(pid);
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.processes.lock().contains_key(&pid)
    }

    /// `("graceful" | "forceful", root)` in call order.
    pub fn calls(&self) -> Vec<(&'static str, u32)> {
        self.calls.lock().clone()
    }

    fn remove(&self, pids: impl IntoIterator<Item = u32>, spare: &BTreeSet<u32>) {
        let mut processes = self.processes.lock();
        for pid in pids {
            if spare.contains(&pid) {
                continue;
            }
            processes.remove(&pid);
            // Orphans are adopted by init.
            for parent in processes.values_mut() {
                if *parent == Some(pid) {
                    *parent = Some(1);
                }
            }
        }
    }
}

impl ProcessTreeTerminator for FakeTree {
    fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot::from_entries(
            self.processes
                .lock()
                .iter()
                .map(|(pid, parent)| (*pid, *parent)),
        )
    }

    fn graceful(&self, root: u32, descendants: &[u32]) {
        self.calls.lock().push(("graceful", root));
        let spare: BTreeSet<u32> = self
            .stubborn
            .lock()
            .union(&self.immortal.lock())
            .copied()
            .collect();
        self.remove(
            std::iter::once(root).chain(descendants.iter().copied()),
            &spare,
        );
    }

    fn forceful(&self, root: u32, descendants: &[u32]) {
        self.calls.lock().push(("forceful", root));
        let spare = self.immortal.lock().clone();
        self.remove(
            std::iter::once(root).chain(descendants.iter().copied()),
            &spare,
        );
    }
}

// ============================================================================
// PTY
// ============================================================================

struct FakeShared {
    pid: u32,
    request: SpawnRequest,
    observer: Mutex<Option<Arc<dyn PtyObserver>>>,
    input: Mutex<Vec<u8>>,
    size: Mutex<(u16, u16)>,
    killed: AtomicBool,
}

/// Test-side view of a spawned fake process.
#[derive(Clone)]
pub struct FakeHandle {
    shared: Arc<FakeShared>,
}

impl FakeHandle {
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    pub fn request(&self) -> SpawnRequest {
        self.shared.request.clone()
    }

    /// Produce output as the process would.
    pub fn emit(&self, data: &[u8]) {
        let observer = self.shared.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_data(data);
        }
    }

    /// End the process on its own.
    pub fn exit(&self, exit_code: u32, signal: Option<&str>) {
        let observer = self.shared.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_exit(PtyExit {
                exit_code,
                signal: signal.map(str::to_string),
            });
        }
    }

    pub fn input(&self) -> Vec<u8> {
        self.shared.input.lock().clone()
    }

    pub fn size(&self) -> (u16, u16) {
        *self.shared.size.lock()
    }

    pub fn was_killed(&self) -> bool {
        self.shared.killed.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.shared.observer.lock().is_some()
    }
}

struct FakeProcess {
    shared: Arc<FakeShared>,
}

impl PtyProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.shared.pid)
    }

    fn start(&mut self, observer: Arc<dyn PtyObserver>) -> Result<()> {
        *self.shared.observer.lock() = Some(observer);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        self.shared.input.lock().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        *self.shared.size.lock() = (cols, rows);
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.shared.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fake processes and registers their pids in a [`FakeTree`].
pub struct FakeSpawner {
    tree: Arc<FakeTree>,
    next_pid: AtomicU32,
    handles: Mutex<Vec<FakeHandle>>,
    fail: AtomicBool,
}

impl FakeSpawner {
    pub fn new(tree: Arc<FakeTree>) -> Arc<Self> {
        Arc::new(Self {
            tree,
            next_pid: AtomicU32::new(1000),
            handles: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn fail_next_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn handle(&self, index: usize) -> FakeHandle {
        self.handles.lock()[index].clone()
    }

    pub fn last(&self) -> FakeHandle {
        self.handles
            .lock()
            .last()
            .cloned()
            .expect("nothing was spawned")
    }

    pub fn by_pid(&self, pid: u32) -> FakeHandle {
        self.handles
            .lock()
            .iter()
            .find(|handle| handle.pid() == pid)
            .cloned()
            .expect("unknown pid")
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn PtyProcess>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("spawn refused");
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.tree.add(pid, 1);
        let shared = Arc::new(FakeShared {
            pid,
            size: Mutex::new((request.cols, request.rows)),
            request,
            observer: Mutex::new(None),
            input: Mutex::new(Vec::new()),
            killed: AtomicBool::new(false),
        });
        self.handles.lock().push(FakeHandle {
            shared: shared.clone(),
        });
        Ok(Box::new(FakeProcess { shared }))
    }
}

// ============================================================================
// Shell
// ============================================================================

pub struct FixedShell;

impl ShellResolver for FixedShell {
    fn resolve(&self, _config: &Config) -> Result<ShellSpec> {
        Ok(ShellSpec::new("/bin/fake-sh").with_args(["-i"]))
    }
}

pub struct BrokenShell;

impl ShellResolver for BrokenShell {
    fn resolve(&self, _config: &Config) -> Result<ShellSpec> {
        bail!("no shell on this host")
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub manager: TerminalManager,
    pub spawner: Arc<FakeSpawner>,
    pub tree: Arc<FakeTree>,
}

impl Harness {
    pub fn new() -> Self {
        let tree = FakeTree::new();
        let spawner = FakeSpawner::new(tree.clone());
        let manager = TerminalManager::builder(quick_config())
            .spawner(spawner.clone())
            .shell(Arc::new(FixedShell))
            .terminator(tree.clone())
            .build();
        Self {
            manager,
            spawner,
            tree,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the next event, failing the test after [`EVENT_TIMEOUT`].
pub async fn next_event(rx: &mut UnboundedReceiver<TerminalEvent>) -> TerminalEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Everything already queued, without waiting.
pub fn drain(rx: &mut UnboundedReceiver<TerminalEvent>) -> Vec<TerminalEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
