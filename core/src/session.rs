//! Session manager (spec §4.4): the registry that owns every `Session`'s
//! lifecycle, metadata, activity tracking and title tracking. The only
//! component that creates or removes sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::git;
use crate::hub::{Frame, JoinMode, SessionHub};
use crate::pty::{self, CwdTracker, PtyHandle, Signal};
use crate::recording::{
    split_utf8_boundary, EventKind, Recording, RecordingEvent, RecordingHeader, RecordingWriter,
};
use crate::snapshot::TerminalGrid;
use crate::title::{self, TitleMode};

/// Lifecycle status (spec §3): transitions are monotonic, no revivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Starting,
    Running,
    Exited,
}

/// Request body for `SessionManager::create` (spec §6 POST /api/sessions).
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env: HashMap<String, String>,
    pub title_mode: TitleMode,
    pub prevent_title_change: bool,
}

impl Default for CreateSpec {
    fn default() -> Self {
        CreateSpec {
            id: None,
            name: None,
            command: Vec::new(),
            working_dir: PathBuf::from("."),
            cols: 80,
            rows: 24,
            env: HashMap::new(),
            title_mode: TitleMode::None,
            prevent_title_change: false,
        }
    }
}

/// A read-only, serializable view of a `Session` (spec §3 `Session`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub command: Vec<String>,
    pub working_dir: String,
    pub cols: u16,
    pub rows: u16,
    pub status: Status,
    pub pid: Option<i32>,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub title_mode: TitleMode,
    pub git_repo_path: Option<String>,
    pub git_branch: Option<String>,
    pub recording_path: String,
}

/// Per-session derived activity (spec §3 "Activity record").
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub is_active: bool,
    pub last_output_at: DateTime<Utc>,
    pub bytes_since_idle: u64,
}

struct Mutable {
    status: Status,
    pid: Option<i32>,
    exit_code: Option<i32>,
    exited_at: Option<DateTime<Utc>>,
    title: Option<String>,
    last_activity_at: DateTime<Utc>,
    last_output_at: DateTime<Utc>,
    bytes_since_idle: u64,
    is_active: bool,
}

/// One PTY-backed session: identity, immutable metadata, mutable state
/// guarded by its own lock, and the collaborators (PTY, hub, recording,
/// grid) it owns exclusively.
pub struct Session {
    pub id: String,
    pub name: Option<String>,
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub title_mode: TitleMode,
    pub prevent_title_change: bool,
    pub git_repo_path: Option<String>,
    pub git_branch: Option<String>,
    pub recording_path: PathBuf,
    pub started_at: DateTime<Utc>,
    session_dir: PathBuf,
    cols: AtomicU16,
    rows: AtomicU16,
    mutable: StdRwLock<Mutable>,
    pty: PtyHandle,
    hub: SessionHub,
    recording: Arc<Recording>,
    grid: TerminalGrid,
    cwd_tracker: std::sync::Mutex<CwdTracker>,
    title_carry: std::sync::Mutex<Vec<u8>>,
    output_utf8_carry: std::sync::Mutex<Vec<u8>>,
    input_utf8_carry: std::sync::Mutex<Vec<u8>>,
}

impl Session {
    pub fn snapshot(&self) -> SessionSnapshot {
        let m = self.mutable.read().expect("session mutex");
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            command: self.command.clone(),
            working_dir: self.working_dir.display().to_string(),
            cols: self.cols.load(Ordering::SeqCst),
            rows: self.rows.load(Ordering::SeqCst),
            status: m.status,
            pid: m.pid,
            exit_code: m.exit_code,
            started_at: self.started_at,
            last_activity_at: m.last_activity_at,
            exited_at: m.exited_at,
            title: m.title.clone(),
            title_mode: self.title_mode,
            git_repo_path: self.git_repo_path.clone(),
            git_branch: self.git_branch.clone(),
            recording_path: self.recording_path.display().to_string(),
        }
    }

    pub fn activity(&self) -> Activity {
        let m = self.mutable.read().expect("session mutex");
        Activity {
            is_active: m.is_active,
            last_output_at: m.last_output_at,
            bytes_since_idle: m.bytes_since_idle,
        }
    }

    pub fn status(&self) -> Status {
        self.mutable.read().expect("session mutex").status
    }

    fn mark_running_if_starting(&self) {
        let mut m = self.mutable.write().expect("session mutex");
        if m.status == Status::Starting {
            m.status = Status::Running;
        }
    }

    fn record_output(&self, now: DateTime<Utc>, len: usize) {
        let mut m = self.mutable.write().expect("session mutex");
        m.last_activity_at = now;
        m.last_output_at = now;
        m.bytes_since_idle = m.bytes_since_idle.saturating_add(len as u64);
        m.is_active = true;
    }

    fn recompute_activity(&self, now: DateTime<Utc>, idle_interval: Duration) {
        let mut m = self.mutable.write().expect("session mutex");
        let idle_for = now.signed_duration_since(m.last_output_at);
        let still_active = idle_for.num_milliseconds() < idle_interval.as_millis() as i64;
        if !still_active && m.is_active {
            m.is_active = false;
            m.bytes_since_idle = 0;
        }
    }

    fn mark_exited(&self, code: i32, now: DateTime<Utc>) {
        let mut m = self.mutable.write().expect("session mutex");
        m.status = Status::Exited;
        m.exit_code = Some(code);
        m.exited_at = Some(now);
        m.pid = None;
    }

    fn persist_status(&self) {
        if let Err(e) = write_status_json(&self.session_dir, &self.snapshot()) {
            tracing::warn!(session = %self.id, error = %e, "failed to persist status.json");
        }
    }

    /// Append one record to the recording and (subject to title filtering
    /// for `kind == Output`) publish it to the hub. Returns the recording
    /// size immediately after the append (append-before-send, spec §3).
    ///
    /// `output`/`input` payloads are carried through a UTF-8 boundary buffer
    /// before being written to the recording: the store's on-disk format is
    /// JSON text (spec §6 "Recording format"), and a multi-byte character
    /// split across two PTY reads would otherwise be torn in half and
    /// lossily replaced on every append, not just once. The hub is always
    /// published the true raw bytes, so live subscribers never see this
    /// buffering — only the persisted recording does.
    fn append_and_publish(&self, kind: EventKind, t_rel_ms: i64, raw: &[u8]) -> CoreResult<u64> {
        let recorded = match kind {
            EventKind::Output => {
                let mut carry = self.output_utf8_carry.lock().expect("utf8 carry mutex");
                split_utf8_boundary(&mut carry, raw)
            }
            EventKind::Input => {
                let mut carry = self.input_utf8_carry.lock().expect("utf8 carry mutex");
                split_utf8_boundary(&mut carry, raw)
            }
            EventKind::Resize | EventKind::Exit | EventKind::Marker => raw.to_vec(),
        };

        let offset_after = {
            let mut writer = self
                .recording
                .writer
                .try_lock()
                .map_err(|_| CoreError::Io(std::io::Error::other("recording writer busy")))?;
            if kind == EventKind::Exit {
                flush_utf8_carry(&mut writer, &self.output_utf8_carry, EventKind::Output, t_rel_ms)?;
                flush_utf8_carry(&mut writer, &self.input_utf8_carry, EventKind::Input, t_rel_ms)?;
            }
            let holding_back_entire_chunk =
                recorded.is_empty() && matches!(kind, EventKind::Output | EventKind::Input);
            if !holding_back_entire_chunk {
                writer.append(&RecordingEvent { t_rel_ms, kind, payload: recorded })?;
            }
            writer.flush()?;
            writer.size()?
        };

        let publish_bytes = if kind == EventKind::Output && self.prevent_title_change {
            let mut carry = self.title_carry.lock().expect("title carry mutex");
            let (filtered, pending) = title::filter_title_escapes(&carry, raw);
            *carry = pending;
            Bytes::from(filtered)
        } else {
            Bytes::copy_from_slice(raw)
        };
        self.hub.publish(offset_after, t_rel_ms, kind, publish_bytes);
        Ok(offset_after)
    }
}

/// Global registry of all active sessions (spec §4.4). Lock-free reads via
/// `DashMap`; `create`/`cleanup_exited` are the only mutating operations.
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    config: Config,
}

impl SessionManager {
    pub fn new(config: Config) -> SessionManager {
        SessionManager {
            sessions: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a session: spawn its PTY, open its recording, and register it
    /// before returning (spec §4.4 `create`).
    pub fn create(&self, spec: CreateSpec) -> CoreResult<SessionSnapshot> {
        if spec.command.is_empty() {
            return Err(CoreError::InvalidCommand);
        }
        if !spec.working_dir.is_dir() {
            return Err(CoreError::WorkingDirMissing(spec.working_dir.display().to_string()));
        }
        let id = spec.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.sessions.contains_key(&id) {
            return Err(CoreError::IdCollision(id));
        }

        let git_info = git::detect(&spec.working_dir);
        let session_dir = crate::config::session_dir(&self.config.control_dir, &id);
        let recording_path = session_dir.join(crate::recording::RECORDING_FILE_NAME);

        let header = RecordingHeader {
            version: 2,
            width: spec.cols,
            height: spec.rows,
            timestamp: Utc::now().timestamp() as u64,
            title: spec.name.clone(),
            env: spec.env.clone(),
            command: spec.command.clone(),
        };
        let recording = Arc::new(Recording::open(recording_path.clone(), &header)?);
        write_meta_json(&session_dir, &id, &spec)?;

        let (pty, out_rx, exit_rx) =
            pty::spawn(&spec.command, &spec.working_dir, &spec.env, spec.cols, spec.rows)?;

        let hub = SessionHub::new(recording.clone());
        let now = Utc::now();
        let pid = pty.pid();
        let session = Arc::new(Session {
            id: id.clone(),
            name: spec.name.clone(),
            command: spec.command.clone(),
            working_dir: spec.working_dir.clone(),
            title_mode: spec.title_mode,
            prevent_title_change: spec.prevent_title_change,
            git_repo_path: git_info.repo_path.clone(),
            git_branch: git_info.branch.clone(),
            recording_path,
            started_at: now,
            session_dir: session_dir.clone(),
            cols: AtomicU16::new(spec.cols),
            rows: AtomicU16::new(spec.rows),
            mutable: StdRwLock::new(Mutable {
                status: Status::Starting,
                pid,
                exit_code: None,
                exited_at: None,
                title: None,
                last_activity_at: now,
                last_output_at: now,
                bytes_since_idle: 0,
                is_active: false,
            }),
            pty,
            hub,
            recording,
            grid: TerminalGrid::new(spec.cols, spec.rows),
            cwd_tracker: std::sync::Mutex::new(CwdTracker::new(spec.working_dir.clone())),
            title_carry: std::sync::Mutex::new(Vec::new()),
            output_utf8_carry: std::sync::Mutex::new(Vec::new()),
            input_utf8_carry: std::sync::Mutex::new(Vec::new()),
        });

        session.persist_status();
        self.sessions.insert(id.clone(), session.clone());

        spawn_output_reader(session.clone(), out_rx);
        spawn_exit_watcher(session.clone(), exit_rx);
        spawn_startup_grace(session.clone());
        if spec.title_mode == TitleMode::Dynamic {
            spawn_title_tracker(session.clone());
        }

        Ok(session.snapshot())
    }

    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(id).map(|s| s.snapshot())
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|e| e.value().snapshot()).collect()
    }

    pub fn activity(&self, id: &str) -> Option<Activity> {
        self.sessions.get(id).map(|s| s.activity())
    }

    pub fn all_activity(&self) -> HashMap<String, Activity> {
        self.sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().activity()))
            .collect()
    }

    /// Forward raw bytes to the child; updates `lastActivityAt` and the
    /// best-effort cwd tracker (spec §4.4 `write`).
    pub fn write(&self, id: &str, bytes: &[u8]) -> CoreResult<()> {
        let session = self.sessions.get(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if session.status() == Status::Exited {
            return Err(CoreError::AlreadyExited);
        }
        session.pty.write(bytes)?;
        session.append_and_publish(EventKind::Input, session_elapsed_ms(&session), bytes)?;
        {
            let mut tracker = session.cwd_tracker.lock().expect("cwd tracker mutex");
            tracker.observe_input(bytes);
        }
        {
            let mut m = session.mutable.write().expect("session mutex");
            m.last_activity_at = Utc::now();
        }
        Ok(())
    }

    /// Forward a resize; also records a `resize` event (spec §4.4 `resize`).
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> CoreResult<()> {
        if cols == 0 || rows == 0 {
            return Err(CoreError::InvalidDimensions);
        }
        let session = self.sessions.get(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        session.pty.resize(cols, rows)?;
        session.cols.store(cols, Ordering::SeqCst);
        session.rows.store(rows, Ordering::SeqCst);
        session.grid.resize(cols, rows);
        let text = format!("{cols}x{rows}");
        session.append_and_publish(EventKind::Resize, session_elapsed_ms(&session), text.as_bytes())?;
        Ok(())
    }

    /// Send `signal` (default TERM); escalates to KILL after the configured
    /// grace period. The session becomes `exited` only via the PTY's own
    /// exit event, never synchronously here (spec §4.4 `kill`).
    pub fn kill(&self, id: &str, signal: Signal) -> CoreResult<()> {
        let session = self.sessions.get(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if session.status() == Status::Exited {
            return Ok(());
        }
        session.pty.signal(signal)?;

        if signal != Signal::Kill {
            let session = session.clone();
            let grace = self.config.kill_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if session.status() != Status::Exited {
                    tracing::warn!(session = %session.id, "kill grace expired, escalating to SIGKILL");
                    let _ = session.pty.signal(Signal::Kill);
                }
            });
        }
        Ok(())
    }

    /// Remove exited sessions from the registry (spec §4.4 `cleanupExited`).
    /// Kept forever until this is explicitly called.
    pub fn cleanup_exited(&self) -> usize {
        let exited: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().status() == Status::Exited)
            .map(|e| e.key().clone())
            .collect();
        for id in &exited {
            self.sessions.remove(id);
        }
        exited.len()
    }

    pub fn subscribe(&self, id: &str, mode: JoinMode) -> CoreResult<tokio::sync::mpsc::Receiver<Frame>> {
        let session = self.sessions.get(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        Ok(session.hub.subscribe(mode))
    }

    pub fn text_snapshot(&self, id: &str, styles: bool) -> CoreResult<String> {
        let session = self.sessions.get(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        Ok(session.grid.text_snapshot(styles))
    }

    pub fn binary_snapshot(&self, id: &str, styles: bool) -> CoreResult<Vec<u8>> {
        let session = self.sessions.get(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        Ok(session.grid.binary_snapshot(styles))
    }

    /// Spawn the periodic activity-recompute task (spec §4.4 "Activity tracker").
    pub fn spawn_activity_tracker(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.activity_tick);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                for entry in manager.sessions.iter() {
                    entry.value().recompute_activity(now, manager.config.idle_interval);
                }
            }
        });
    }
}

/// Flush whatever's left in a UTF-8 boundary carry into the recording as
/// one final record of `kind`, called once on session exit when no further
/// chunk will ever arrive to complete a dangling multi-byte sequence. Unlike
/// the steady-state path, a lossy decode here is unavoidable (and correct):
/// nothing more is coming, so the leftover bytes genuinely can't be
/// reassembled.
fn flush_utf8_carry(
    writer: &mut RecordingWriter,
    carry: &std::sync::Mutex<Vec<u8>>,
    kind: EventKind,
    t_rel_ms: i64,
) -> CoreResult<()> {
    let payload = std::mem::take(&mut *carry.lock().expect("utf8 carry mutex"));
    if payload.is_empty() {
        return Ok(());
    }
    writer.append(&RecordingEvent { t_rel_ms, kind, payload })
}

fn session_elapsed_ms(session: &Session) -> i64 {
    Utc::now().signed_duration_since(session.started_at).num_milliseconds()
}

fn json_err(e: serde_json::Error) -> CoreError {
    CoreError::Io(std::io::Error::other(e.to_string()))
}

fn write_meta_json(session_dir: &std::path::Path, id: &str, spec: &CreateSpec) -> CoreResult<()> {
    std::fs::create_dir_all(session_dir)?;
    let meta = serde_json::json!({
        "id": id,
        "name": spec.name,
        "command": spec.command,
        "workingDir": spec.working_dir,
        "cols": spec.cols,
        "rows": spec.rows,
        "titleMode": spec.title_mode,
        "createdAt": Utc::now(),
    });
    let bytes = serde_json::to_vec_pretty(&meta).map_err(json_err)?;
    std::fs::write(session_dir.join("meta.json"), bytes)?;
    Ok(())
}

/// Atomic write: `status.json.tmp` then rename (spec §6 filesystem layout).
fn write_status_json(session_dir: &std::path::Path, snapshot: &SessionSnapshot) -> CoreResult<()> {
    std::fs::create_dir_all(session_dir)?;
    let tmp = session_dir.join("status.json.tmp");
    let final_path = session_dir.join("status.json");
    let bytes = serde_json::to_vec_pretty(snapshot).map_err(json_err)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, final_path)?;
    Ok(())
}

fn spawn_output_reader(session: Arc<Session>, mut out_rx: tokio::sync::mpsc::Receiver<Vec<u8>>) {
    tokio::spawn(async move {
        let mut first = true;
        while let Some(chunk) = out_rx.recv().await {
            if first {
                session.mark_running_if_starting();
                first = false;
            }
            session.grid.process(&chunk);
            let t_rel = session_elapsed_ms(&session);
            if let Err(e) = session.append_and_publish(EventKind::Output, t_rel, &chunk) {
                tracing::warn!(session = %session.id, error = %e, "failed to append output record");
                continue;
            }
            session.record_output(Utc::now(), chunk.len());
        }
    });
}

fn spawn_startup_grace(session: Arc<Session>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        session.mark_running_if_starting();
    });
}

fn spawn_exit_watcher(session: Arc<Session>, exit_rx: tokio::sync::oneshot::Receiver<pty::ExitReport>) {
    tokio::spawn(async move {
        let report = match exit_rx.await {
            Ok(r) => r,
            Err(_) => pty::ExitReport { code: 1 },
        };
        let now = Utc::now();
        session.mark_exited(report.code, now);
        let t_rel = session_elapsed_ms(&session);
        let payload = report.code.to_string();
        let _ = session.append_and_publish(EventKind::Exit, t_rel, payload.as_bytes());
        session.persist_status();
        tracing::info!(session = %session.id, exit_code = report.code, "session exited");
        // Registry keeps the entry until an explicit cleanupExited call (spec §4.4).
    });
}

fn spawn_title_tracker(session: Arc<Session>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if session.status() == Status::Exited {
                break;
            }
            let cwd = {
                let tracker = session.cwd_tracker.lock().expect("cwd tracker mutex");
                tracker
                    .current()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| session.working_dir.display().to_string())
            };
            let title = title::compose_title(session.name.as_deref(), &cwd, session.git_branch.as_deref());
            {
                let mut m = session.mutable.write().expect("session mutex");
                m.title = Some(title.clone());
            }
            let escape = title::osc2(&title);
            let t_rel = session_elapsed_ms(&session);
            let _ = session.append_and_publish(EventKind::Marker, t_rel, &escape);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut cfg = Config::default();
        cfg.control_dir = dir.to_path_buf();
        cfg.idle_interval = Duration::from_millis(50);
        cfg.kill_grace = Duration::from_millis(200);
        cfg
    }

    #[tokio::test]
    async fn create_rejects_missing_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let spec = CreateSpec {
            command: vec!["true".into()],
            working_dir: PathBuf::from("/definitely/not/real"),
            ..Default::default()
        };
        let err = manager.create(spec).unwrap_err();
        assert!(matches!(err, CoreError::WorkingDirMissing(_)));
    }

    #[tokio::test]
    async fn create_rejects_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let spec = CreateSpec { command: vec![], working_dir: dir.path().to_path_buf(), ..Default::default() };
        let err = manager.create(spec).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let spec = CreateSpec {
            id: Some("dup1234".into()),
            command: vec!["true".into()],
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        manager.create(spec.clone()).unwrap();
        let err = manager.create(spec).unwrap_err();
        assert!(matches!(err, CoreError::IdCollision(_)));
    }

    #[tokio::test]
    async fn echo_session_runs_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let spec = CreateSpec {
            command: vec!["echo".into(), "hi".into()],
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let snap = manager.create(spec).unwrap();
        let id = snap.id.clone();

        for _ in 0..50 {
            if manager.get(&id).unwrap().status == Status::Exited {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let final_snap = manager.get(&id).unwrap();
        assert_eq!(final_snap.status, Status::Exited);
        assert_eq!(final_snap.exit_code, Some(0));
    }

    #[tokio::test]
    async fn resize_with_zero_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let spec = CreateSpec {
            command: vec!["sleep".into(), "2".into()],
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let snap = manager.create(spec).unwrap();
        let err = manager.resize(&snap.id, 0, 24).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDimensions));
    }

    #[tokio::test]
    async fn write_to_exited_session_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let spec = CreateSpec {
            command: vec!["true".into()],
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let snap = manager.create(spec).unwrap();
        for _ in 0..50 {
            if manager.get(&snap.id).unwrap().status == Status::Exited {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let err = manager.write(&snap.id, b"x").unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExited));
    }
}
