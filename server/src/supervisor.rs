//! Server-process lifecycle: port binding with conflict resolution, crash
//! restart with backoff, and a periodic health probe (spec §4.6).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpListener;

use vibetunnel_core::session::SessionManager;

/// Consecutive restarts allowed within `CRASH_WINDOW` before giving up.
const MAX_RESTARTS: u32 = 3;
const CRASH_WINDOW: Duration = Duration::from_secs(60);
const BACKOFFS: [Duration; 3] =
    [Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)];

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Progressive backoff between termination signal and the next liveness
/// check; also the retry spacing while waiting for the holder to go away.
const TERMINATION_BACKOFFS: [Duration; 3] =
    [Duration::from_millis(250), Duration::from_millis(500), Duration::from_secs(1)];

const PID_FILE_NAME: &str = "server.pid";

/// Server-binary exit codes (spec §6 "Exit codes of the server binary").
pub mod exit_code {
    pub const NORMAL: i32 = 0;
    pub const UNSPECIFIED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const PORT_IN_USE: i32 = 9;
}

fn pid_file_path(control_dir: &Path) -> PathBuf {
    control_dir.join(PID_FILE_NAME)
}

/// Record our own pid so a later instance of this same binary can recognize
/// us if it ever needs to bind the same port.
fn write_pid_file(control_dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(control_dir)
        .and_then(|()| std::fs::write(pid_file_path(control_dir), std::process::id().to_string()))
    {
        tracing::warn!(error = %e, ?control_dir, "failed to write server pid file");
    }
}

fn read_prior_pid(control_dir: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_file_path(control_dir)).ok()?.trim().parse().ok()
}

fn refresh_sysinfo() -> sysinfo::System {
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    sys
}

/// Whether `pid` is a live process whose executable matches our own, i.e. an
/// earlier instance of this same server rather than an unrelated process
/// that happens to hold the port.
fn is_prior_server_instance(pid: u32, sys: &sysinfo::System) -> bool {
    let Some(process) = sys.process(sysinfo::Pid::from_u32(pid)) else {
        return false;
    };
    let our_exe_name = std::env::current_exe().ok().and_then(|p| p.file_name().map(|n| n.to_owned()));
    let their_exe_name = process.exe().and_then(|p| p.file_name().map(|n| n.to_owned()));
    our_exe_name.is_some() && our_exe_name == their_exe_name
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
}

#[cfg(unix)]
async fn terminate_with_backoff(pid: u32) {
    send_signal(pid, nix::sys::signal::Signal::SIGTERM);
    for (attempt, delay) in TERMINATION_BACKOFFS.iter().enumerate() {
        tokio::time::sleep(*delay).await;
        if refresh_sysinfo().process(sysinfo::Pid::from_u32(pid)).is_none() {
            return;
        }
        if attempt == TERMINATION_BACKOFFS.len() - 1 {
            tracing::warn!(pid, "prior instance did not exit after SIGTERM, sending SIGKILL");
            send_signal(pid, nix::sys::signal::Signal::SIGKILL);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_with_backoff(_pid: u32) {}

/// Bind the listen port. On `AddrInUse`, inspect the holder recorded in
/// `control_dir`'s pid file: a prior instance of this same server is
/// terminated (SIGTERM, escalating to SIGKILL after `TERMINATION_BACKOFFS`
/// elapses) and the bind retried once. A holder we can't attribute to a
/// previous instance of this binary is reported as-is, with a suggested
/// alternative port, and is never killed.
pub async fn bind_with_conflict_resolution(
    addr: SocketAddr,
    control_dir: &Path,
) -> anyhow::Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            write_pid_file(control_dir);
            return Ok(listener);
        }
        Err(e) if e.kind() != std::io::ErrorKind::AddrInUse => return Err(e.into()),
        Err(_) => {}
    }

    if let Some(prior_pid) = read_prior_pid(control_dir) {
        if is_prior_server_instance(prior_pid, &refresh_sysinfo()) {
            tracing::warn!(pid = prior_pid, %addr, "port held by a prior instance of this server, terminating it");
            terminate_with_backoff(prior_pid).await;
            return match TcpListener::bind(addr).await {
                Ok(listener) => {
                    write_pid_file(control_dir);
                    Ok(listener)
                }
                Err(e) => anyhow::bail!(
                    "port {} still in use after terminating prior instance (pid {prior_pid}): {e}",
                    addr.port()
                ),
            };
        }
    }

    anyhow::bail!(
        "port {} is in use by another process, not a prior instance of this server; try --port {}",
        addr.port(),
        addr.port().wrapping_add(1)
    )
}

/// Run `run_server` under a crash-restart policy: up to `MAX_RESTARTS`
/// restarts inside `CRASH_WINDOW`, exponential backoff between them.
pub async fn supervise<F, Fut>(mut run_server: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut restarts = 0u32;
    let mut window_start = tokio::time::Instant::now();

    loop {
        match run_server().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if window_start.elapsed() > CRASH_WINDOW {
                    restarts = 0;
                    window_start = tokio::time::Instant::now();
                }
                if restarts >= MAX_RESTARTS {
                    anyhow::bail!("server crashed {MAX_RESTARTS} times within {CRASH_WINDOW:?}, giving up: {e}");
                }
                let backoff = BACKOFFS[restarts as usize];
                tracing::error!(error = %e, restarts, ?backoff, "server crashed, restarting");
                tokio::time::sleep(backoff).await;
                restarts += 1;
            }
        }
    }
}

/// Periodically verify no session is stuck: a session in `starting` for far
/// longer than the startup grace window indicates the PTY reader died
/// without reporting exit.
pub fn spawn_health_probe(sessions: std::sync::Arc<SessionManager>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_PROBE_INTERVAL);
        loop {
            ticker.tick().await;
            let stuck = sessions
                .list()
                .into_iter()
                .filter(|s| s.status == vibetunnel_core::session::Status::Starting)
                .count();
            if stuck > 0 {
                tracing::warn!(stuck, "health probe: sessions stuck in starting state");
            } else {
                tracing::debug!("health probe: ok");
            }
        }
    });
}
