//! PTY host (spec §4.1): spawn a child under a pseudo-terminal, expose
//! byte-level duplex I/O, resize, signals, and a one-shot exit report.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{CoreError, CoreResult};
use crate::title;

/// Signals the control plane can ask the PTY host to deliver (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Int,
    Term,
    Kill,
}

/// Outcome of a child process. Negative values encode signal-only
/// termination (e.g. -15 for SIGTERM), matching POSIX's `128 + signal`
/// shell convention inverted to a negative signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: i32,
}

/// A chunk of raw PTY output, forwarded to the Stream hub immediately after read.
pub type OutputChunk = Vec<u8>;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Duplex handle to a spawned PTY child (spec §4.1 public contract).
pub struct PtyHandle {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    #[cfg(unix)]
    pid: Option<i32>,
    #[cfg(not(unix))]
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    resize_tx: std::sync::mpsc::Sender<(u16, u16)>,
    exited: Arc<std::sync::atomic::AtomicBool>,
}

impl PtyHandle {
    /// Unbuffered write to the master side. Fails if the child has exited.
    pub fn write(&self, bytes: &[u8]) -> CoreResult<()> {
        if self.exited.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::AlreadyExited);
        }
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| CoreError::Io(std::io::Error::other("pty writer mutex poisoned")))?;
        guard.write_all(bytes)?;
        guard.flush()?;
        Ok(())
    }

    /// Applied via the platform window-size ioctl; idempotent for identical dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> CoreResult<()> {
        if cols == 0 || rows == 0 {
            return Err(CoreError::InvalidDimensions);
        }
        self.resize_tx
            .send((cols, rows))
            .map_err(|_| CoreError::Io(std::io::Error::other("resize thread gone")))
    }

    /// Process id of the child, when known (spec §3 `pid`). `None` once the
    /// child has exited or on platforms where the pid isn't tracked.
    pub fn pid(&self) -> Option<i32> {
        #[cfg(unix)]
        {
            if self.exited.load(std::sync::atomic::Ordering::SeqCst) {
                None
            } else {
                self.pid
            }
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    /// Send a signal to the child. At minimum INT, TERM, KILL (spec §4.1).
    pub fn signal(&self, sig: Signal) -> CoreResult<()> {
        #[cfg(unix)]
        {
            let Some(pid) = self.pid else {
                return Err(CoreError::AlreadyExited);
            };
            let nix_sig = match sig {
                Signal::Int => nix::sys::signal::Signal::SIGINT,
                Signal::Term => nix::sys::signal::Signal::SIGTERM,
                Signal::Kill => nix::sys::signal::Signal::SIGKILL,
            };
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix_sig)
                .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let mut guard = self
                .child
                .lock()
                .map_err(|_| CoreError::Io(std::io::Error::other("pty child mutex poisoned")))?;
            let _ = sig;
            guard.kill().map_err(CoreError::Io)
        }
    }
}

/// Spawn `argv[0]` with `argv[1..]` under a new PTY in `working_dir`, with
/// `env` layered over the inherited environment. Returns the duplex
/// handle, a receiver of raw output chunks, and a one-shot receiver of the
/// final exit report.
pub fn spawn(
    argv: &[String],
    working_dir: &Path,
    env: &HashMap<String, String>,
    cols: u16,
    rows: u16,
) -> CoreResult<(PtyHandle, mpsc::Receiver<OutputChunk>, oneshot::Receiver<ExitReport>)> {
    if argv.is_empty() {
        return Err(CoreError::InvalidCommand);
    }
    if !working_dir.is_dir() {
        return Err(CoreError::WorkingDirMissing(working_dir.display().to_string()));
    }
    if cols == 0 || rows == 0 {
        return Err(CoreError::InvalidDimensions);
    }

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
        .map_err(|e| CoreError::ResourceExhausted(e.to_string()))?;

    let mut cmd = CommandBuilder::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.cwd(working_dir);
    for (k, v) in env {
        cmd.env(k, v);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| CoreError::ExecFailed(e.to_string()))?;
    #[cfg(unix)]
    let pid = child.process_id().map(|p| p as i32);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
    let master = pair.master;

    let (out_tx, out_rx) = mpsc::channel::<OutputChunk>(256);
    let (exit_tx, exit_rx) = oneshot::channel::<ExitReport>();
    let (resize_tx, resize_rx) = std::sync::mpsc::channel::<(u16, u16)>();
    let exited = Arc::new(std::sync::atomic::AtomicBool::new(false));

    // Output reader: dedicated worker, forwards chunks immediately (spec §4.1).
    std::thread::spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // Resize worker: applies the platform ioctl off the async runtime.
    std::thread::spawn(move || {
        while let Ok((cols, rows)) = resize_rx.recv() {
            let _ = master.resize(PtySize { cols, rows, pixel_width: 0, pixel_height: 0 });
        }
    });

    // Exit watcher: either nix::waitpid (unix, distinguishes signal
    // termination) or portable_pty's own try_wait loop (other platforms).
    let child = Arc::new(Mutex::new(child));
    #[cfg(unix)]
    spawn_exit_watcher(pid, child, exit_tx, exited.clone());
    #[cfg(not(unix))]
    spawn_exit_watcher(child, exit_tx, exited.clone());

    let handle = PtyHandle {
        writer: Arc::new(Mutex::new(writer)),
        #[cfg(unix)]
        pid,
        #[cfg(not(unix))]
        child: Arc::new(Mutex::new(Box::new(()) as Box<dyn portable_pty::Child + Send + Sync>)),
        resize_tx,
        exited,
    };

    Ok((handle, out_rx, exit_rx))
}

#[cfg(unix)]
fn spawn_exit_watcher(
    pid: Option<i32>,
    _child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    exit_tx: oneshot::Sender<ExitReport>,
    exited: Arc<std::sync::atomic::AtomicBool>,
) {
    let Some(pid) = pid else {
        let _ = exit_tx.send(ExitReport { code: 1 });
        exited.store(true, std::sync::atomic::Ordering::SeqCst);
        return;
    };
    std::thread::spawn(move || {
        let nix_pid = nix::unistd::Pid::from_raw(pid);
        let code = loop {
            match nix::sys::wait::waitpid(nix_pid, None) {
                Ok(nix::sys::wait::WaitStatus::Exited(_, code)) => break code,
                Ok(nix::sys::wait::WaitStatus::Signaled(_, sig, _)) => break -(sig as i32),
                Ok(_) => continue,
                Err(_) => break 1,
            }
        };
        exited.store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = exit_tx.send(ExitReport { code });
    });
}

#[cfg(not(unix))]
fn spawn_exit_watcher(
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    exit_tx: oneshot::Sender<ExitReport>,
    exited: Arc<std::sync::atomic::AtomicBool>,
) {
    std::thread::spawn(move || {
        let code = loop {
            let status = {
                let mut guard = match child.lock() {
                    Ok(g) => g,
                    Err(_) => break 1,
                };
                match guard.try_wait() {
                    Ok(None) => None,
                    Ok(Some(s)) => Some(s.exit_code() as i32),
                    Err(_) => break 1,
                }
            };
            match status {
                Some(code) => break code,
                None => std::thread::sleep(std::time::Duration::from_millis(100)),
            }
        };
        exited.store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = exit_tx.send(ExitReport { code });
    });
}

/// Best-effort shell working-directory tracker, used only to drive title
/// injection when `titleMode = dynamic` (spec §4.1). Watches for `cd`
/// invocations in bytes written by the client; cannot see `pushd`/`popd`
/// or shell functions that wrap `cd` (open question, spec §9).
#[derive(Default)]
pub struct CwdTracker {
    current: Option<PathBuf>,
}

impl CwdTracker {
    pub fn new(initial: PathBuf) -> CwdTracker {
        CwdTracker { current: Some(initial) }
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Observe a chunk of input bytes written by a client. Looks for a
    /// trailing `cd <path>` line; best-effort, shell-agnostic.
    pub fn observe_input(&mut self, bytes: &[u8]) {
        let Ok(text) = std::str::from_utf8(bytes) else { return };
        for line in text.lines() {
            if let Some(target) = title::parse_cd_target(line) {
                let base = self.current.clone().unwrap_or_else(|| PathBuf::from("."));
                self.current = Some(base.join(target));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn spawn_rejects_empty_argv() {
        let err = spawn(&[], Path::new("/tmp"), &HashMap::new(), 80, 24).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand));
    }

    #[test]
    fn spawn_rejects_missing_working_dir() {
        let err = spawn(
            &["true".to_string()],
            Path::new("/definitely/not/a/real/path"),
            &HashMap::new(),
            80,
            24,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::WorkingDirMissing(_)));
    }

    #[test]
    fn spawn_rejects_zero_dimensions() {
        let err = spawn(&["true".to_string()], Path::new("/tmp"), &HashMap::new(), 0, 24).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDimensions));
    }

    #[test]
    fn cwd_tracker_follows_plain_cd() {
        let mut tracker = CwdTracker::new(PathBuf::from("/home/user"));
        tracker.observe_input(b"cd projects\n");
        assert_eq!(tracker.current(), Some(Path::new("/home/user/projects")));
    }
}
