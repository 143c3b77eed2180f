//! Server-wide tunables (spec §6 env vars + §6.1 additions).
//!
//! Deliberately not a global singleton: `main` builds one `Config` from the
//! environment and passes it explicitly into the session manager, the
//! control API state and the supervisor (spec §9 "module-level singletons"
//! re-architecture note).

use std::path::PathBuf;
use std::time::Duration;

/// Tunables shared by the session manager, stream hub and recording store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for recordings and state (`VIBETUNNEL_CONTROL_DIR`).
    pub control_dir: PathBuf,
    /// Idle window after which a session's activity flips to `false` (default 500 ms).
    pub idle_interval: Duration,
    /// Grace period between `kill`'s TERM and escalation to KILL (default 5 s).
    pub kill_grace: Duration,
    /// Activity tracker tick cadence (target 200 ms, not independently configurable yet).
    pub activity_tick: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_dir: default_control_dir(),
            idle_interval: Duration::from_millis(500),
            kill_grace: Duration::from_secs(5),
            activity_tick: Duration::from_millis(200),
        }
    }
}

fn default_control_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".vibetunnel")
}

fn env_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl Config {
    /// Build a `Config` from the process environment (spec §6 table).
    pub fn from_env() -> Config {
        let mut cfg = Config::default();
        if let Ok(dir) = std::env::var("VIBETUNNEL_CONTROL_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                cfg.control_dir = PathBuf::from(trimmed);
            }
        }
        if let Some(d) = env_duration_ms("VIBETUNNEL_IDLE_INTERVAL_MS") {
            cfg.idle_interval = d;
        }
        if let Some(secs) = std::env::var("VIBETUNNEL_KILL_GRACE_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            cfg.kill_grace = Duration::from_secs(secs);
        }
        cfg
    }
}

/// Directory holding one session's recording + metadata files (spec §6 filesystem layout).
pub fn session_dir(control_dir: &std::path::Path, session_id: &str) -> PathBuf {
    control_dir.join("sessions").join(session_id)
}
