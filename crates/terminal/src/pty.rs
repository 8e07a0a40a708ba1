//! PTY process management.
//!
//! [`PtySpawner`] is the seam between the session manager and the operating
//! system: the manager only ever sees a [`PtyProcess`] it can write to, resize
//! and destroy, plus the callbacks it registers through [`PtyProcess::start`].
//! [`NativePtySpawner`] implements it on top of `portable-pty`.

use anyhow::{anyhow, Context, Result};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use settings::constants;

/// Everything needed to start one shell on a fresh pseudo-terminal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
    /// Short label used to name I/O threads.
    pub label: String,
}

/// How a PTY process ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PtyExit {
    pub exit_code: u32,
    pub signal: Option<String>,
}

/// Receives a process's output and its exit.
///
/// `on_data` calls arrive in production order and all of them precede
/// `on_exit`, which is called at most once.
pub trait PtyObserver: Send + Sync {
    fn on_data(&self, data: &[u8]);
    fn on_exit(&self, exit: PtyExit);
}

/// A process attached to a pseudo-terminal.
pub trait PtyProcess: Send {
    /// OS process id of the shell, if the platform exposes one.
    fn pid(&self) -> Option<u32>;

    /// Begin delivering output and exit notifications.
    ///
    /// Implementations must not invoke `observer` before this returns.
    fn start(&mut self, observer: Arc<dyn PtyObserver>) -> Result<()>;

    /// Queue bytes for the process's input. Never blocks on the OS.
    fn write(&self, data: &[u8]) -> Result<()>;

    fn resize(&self, cols: u16, rows: u16) -> Result<()>;

    /// Ask the PTY layer to destroy the process.
    fn kill(&mut self) -> Result<()>;
}

/// Creates [`PtyProcess`]es.
#[cfg_attr(test, mockall::automock)]
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn PtyProcess>>;
}

/// `portable-pty` backed spawner.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn PtyProcess>> {
        Ok(Box::new(NativePty::spawn(request)?))
    }
}

/// Owns a `portable-pty` master, its child, and a writer thread.
///
/// Output is read on a dedicated thread started by [`PtyProcess::start`];
/// that thread also reaps the child once the PTY reaches EOF.
pub struct NativePty {
    master: Box<dyn MasterPty + Send>,
    input_tx: Sender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    label: String,
    exited: Arc<AtomicBool>,
    pending: Option<(Box<dyn Read + Send>, Box<dyn Child + Send + Sync>)>,
}

impl NativePty {
    pub fn spawn(request: SpawnRequest) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| anyhow!("{e}"))
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("Failed to spawn {}", request.program))?;

        // Release the slave so the master sees EOF once the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| anyhow!("{e}"))
            .context("Failed to get PTY reader")?;

        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| anyhow!("{e}"))
            .context("Failed to get PTY writer")?;

        let pid = child.process_id();
        let killer = child.clone_killer();

        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>();
        thread::Builder::new()
            .name(format!("pty-writer-{}", request.label))
            .spawn(move || {
                while let Ok(data) = input_rx.recv() {
                    if let Err(error) = writer.write_all(&data).and_then(|()| writer.flush()) {
                        tracing::debug!("PTY write failed, stopping writer: {}", error);
                        break;
                    }
                }
            })
            .context("Failed to start PTY writer thread")?;

        tracing::debug!(pid = ?pid, program = %request.program, "Spawned PTY process");

        Ok(Self {
            master: pair.master,
            input_tx,
            killer,
            pid,
            label: request.label,
            exited: Arc::new(AtomicBool::new(false)),
            pending: Some((reader, child)),
        })
    }
}

impl PtyProcess for NativePty {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn start(&mut self, observer: Arc<dyn PtyObserver>) -> Result<()> {
        let (mut reader, mut child) = self
            .pending
            .take()
            .context("PTY reader already started")?;
        let exited = self.exited.clone();

        thread::Builder::new()
            .name(format!("pty-reader-{}", self.label))
            .spawn(move || {
                let mut buf = [0u8; constants::terminal::READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        // EOF, or EIO on Linux once the child side is gone.
                        Ok(0) | Err(_) => break,
                        Ok(n) => observer.on_data(&buf[..n]),
                    }
                }

                let exit = match child.wait() {
                    Ok(status) => PtyExit {
                        exit_code: status.exit_code(),
                        signal: status.signal().map(str::to_string),
                    },
                    Err(error) => {
                        tracing::debug!("Wait for child process: {}", error);
                        PtyExit {
                            exit_code: 1,
                            signal: None,
                        }
                    }
                };
                exited.store(true, Ordering::SeqCst);
                observer.on_exit(exit);
            })
            .context("Failed to start PTY reader thread")?;

        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| anyhow!("PTY input closed"))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| anyhow!("{e}"))
            .context("Failed to resize PTY")
    }

    fn kill(&mut self) -> Result<()> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.killer.kill().context("Failed to kill PTY child")
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        // Once reaped the pid may belong to someone else.
        if !self.exited.load(Ordering::SeqCst) {
            if let Err(e) = self.killer.kill() {
                // ESRCH (no such process) is expected if already exited
                tracing::debug!("Kill child process: {}", e);
            }
        }
        tracing::debug!(label = %self.label, "PTY handle dropped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serial_test::serial;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collect {
        output: Mutex<Vec<u8>>,
        exit: Mutex<Option<PtyExit>>,
    }

    impl PtyObserver for Collect {
        fn on_data(&self, data: &[u8]) {
            self.output.lock().extend_from_slice(data);
        }

        fn on_exit(&self, exit: PtyExit) {
            *self.exit.lock() = Some(exit);
        }
    }

    fn sh_request() -> SpawnRequest {
        SpawnRequest {
            program: "/bin/sh".to_string(),
            args: Vec::new(),
            cwd: std::env::temp_dir(),
            env: vec![("PANELMUX_TEST".to_string(), "marker-42".to_string())],
            cols: 80,
            rows: 24,
            label: "test".to_string(),
        }
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    #[serial]
    fn spawned_shell_echoes_environment() {
        let mut pty = NativePty::spawn(sh_request()).unwrap();
        assert!(pty.pid().is_some());
        let observer = Arc::new(Collect::default());
        pty.start(observer.clone()).unwrap();

        pty.write(b"echo $PANELMUX_TEST\n").unwrap();
        let seen = wait_until(Duration::from_secs(5), || {
            String::from_utf8_lossy(&observer.output.lock()).contains("marker-42")
        });
        assert!(
            seen,
            "expected marker in output, got: {}",
            String::from_utf8_lossy(&observer.output.lock())
        );
    }

    #[test]
    #[serial]
    fn exit_is_reported_after_output() {
        let mut pty = NativePty::spawn(sh_request()).unwrap();
        let observer = Arc::new(Collect::default());
        pty.start(observer.clone()).unwrap();

        pty.write(b"exit 3\n").unwrap();
        let exited = wait_until(Duration::from_secs(5), || observer.exit.lock().is_some());
        assert!(exited, "child should have exited");
        assert_eq!(observer.exit.lock().as_ref().map(|e| e.exit_code), Some(3));
        assert!(pty.kill().is_ok(), "killing a reaped child is a no-op");
    }

    #[test]
    #[serial]
    fn resize_succeeds() {
        let pty = NativePty::spawn(sh_request()).unwrap();
        assert!(pty.resize(120, 40).is_ok());
    }

    #[test]
    #[serial]
    fn start_twice_fails() {
        let mut pty = NativePty::spawn(sh_request()).unwrap();
        let observer = Arc::new(Collect::default());
        pty.start(observer.clone()).unwrap();
        assert!(pty.start(observer).is_err());
    }

    #[test]
    fn spawn_failure_is_reported() {
        let mut request = sh_request();
        request.program = "/definitely/not/a/shell".to_string();
        request.label = "missing".to_string();
        assert!(NativePty::spawn(request).is_err());
    }
}
