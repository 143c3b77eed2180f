//! Stream hub: fans a session's output to N subscribers with bounded memory
//! (spec §4.3). The hub never blocks the PTY reader — appending to the
//! recording is synchronous in the reader path, broadcasting is async and
//! owned by each subscription's own delivery task.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use crate::recording::{EventKind, Recording};

/// A transport-agnostic frame handed to whatever owns the client connection
/// (SSE encoder, binary writer, test harness).
#[derive(Debug, Clone)]
pub enum Frame {
    Output { t_rel_ms: i64, bytes: Bytes },
    Resize { cols: u16, rows: u16 },
    Exit { code: i32 },
    /// Sent once when delivery resumes after the live broadcast dropped
    /// frames for this subscriber; `skipped` is the number of dropped frames.
    Lag { skipped: u64 },
}

/// Internal event carried on the live broadcast channel; tagged with the
/// recording offset immediately after it was appended so a joining
/// subscriber can deduplicate at the historical/live splice seam.
#[derive(Debug, Clone)]
struct LiveEvent {
    offset_after: u64,
    t_rel_ms: i64,
    kind: EventKind,
    bytes: Bytes,
}

/// How a subscriber wants to join a session's stream (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Historical prefix, then live tail (the default "viewer reconnect" mode).
    FromStart,
    /// Live frames only, no historical replay.
    LiveOnly,
    /// A single binary snapshot; not an ongoing subscription (handled by `core::snapshot`).
    BinarySnapshot,
}

/// Live broadcast ring size: bounded to "1024 frames" from spec §4.3. The
/// 4 MiB byte bound is enforced by the binary snapshot/recording file size,
/// not by this in-memory ring (documented trade-off, see DESIGN.md).
const LIVE_RING_CAPACITY: usize = 1024;
/// Bound on the per-subscription output channel to the transport layer.
const OUTPUT_QUEUE_CAPACITY: usize = 1024;
/// Deadline for a recording-catch-up client before it is evicted (spec §4.3).
const CATCHUP_DEADLINE: Duration = Duration::from_secs(30);

/// Per-session fan-out state. Cheap to clone (all fields are `Arc`/`Sender`).
#[derive(Clone)]
pub struct SessionHub {
    recording: Arc<Recording>,
    live_tx: broadcast::Sender<LiveEvent>,
}

impl SessionHub {
    pub fn new(recording: Arc<Recording>) -> SessionHub {
        let (live_tx, _) = broadcast::channel(LIVE_RING_CAPACITY);
        SessionHub { recording, live_tx }
    }

    /// Called by the session's single PTY-reader/recording-writer task after
    /// each successful append. `offset_after` is the recording size
    /// immediately following this record (append-before-send, spec §3).
    pub fn publish(&self, offset_after: u64, t_rel_ms: i64, kind: EventKind, bytes: Bytes) {
        let _ = self.live_tx.send(LiveEvent {
            offset_after,
            t_rel_ms,
            kind,
            bytes,
        });
    }

    /// Register a new subscription and spawn its delivery task. Returns the
    /// receiving half the caller (the control API's SSE/snapshot handler)
    /// reads frames from until it observes `None` (end of stream).
    pub fn subscribe(&self, mode: JoinMode) -> mpsc::Receiver<Frame> {
        assert_ne!(mode, JoinMode::BinarySnapshot, "snapshot is not a subscription");
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let live_rx = self.live_tx.subscribe();
        let recording = self.recording.clone();

        tokio::spawn(async move {
            run_subscription(recording, live_rx, out_tx, mode).await;
        });

        out_rx
    }
}

async fn run_subscription(
    recording: Arc<Recording>,
    mut live_rx: broadcast::Receiver<LiveEvent>,
    out_tx: mpsc::Sender<Frame>,
    mode: JoinMode,
) {
    let mut prefix_end: u64 = 0;

    if mode == JoinMode::FromStart {
        // Step 1+2: snapshot current size, open a cursor at offset 0.
        let size = { recording.writer.lock().await.size().unwrap_or(0) };
        let reader = recording.reader_from(0);
        // Step 4: stream the historical prefix. This is the
        // "recording-catch-up" phase: block (with a deadline) rather than drop.
        let (events, consumed) = match reader.read_to_end().await {
            Ok(v) => v,
            Err(_) => return,
        };
        prefix_end = consumed.max(size);
        for event in events {
            let frame = to_frame(event.t_rel_ms, event.kind, Bytes::from(event.payload));
            if tokio::time::timeout(CATCHUP_DEADLINE, out_tx.send(frame))
                .await
                .is_err()
            {
                tracing::warn!("subscriber evicted: historical catch-up deadline exceeded");
                return;
            }
            if out_tx.is_closed() {
                return;
            }
        }
    }

    // Splice: drain any live events already buffered during the historical
    // phase, deduplicating by recording offset so the seam has no gap and
    // no duplication.
    let mut skipped_before_join: u64 = 0;
    loop {
        match live_rx.try_recv() {
            Ok(event) => {
                if event.offset_after <= prefix_end {
                    continue; // already covered by the historical read
                }
                if forward_live(&out_tx, event).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::TryRecvError::Empty) => break,
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                skipped_before_join += n;
                continue;
            }
            Err(broadcast::error::TryRecvError::Closed) => return,
        }
    }
    if skipped_before_join > 0 {
        let _ = out_tx
            .try_send(Frame::Lag {
                skipped: skipped_before_join,
            });
    }

    // Live tail: drop-oldest-and-notify is tokio::broadcast's native
    // behavior (`Lagged(n)`), matching the viewer backpressure policy.
    loop {
        match live_rx.recv().await {
            Ok(event) => {
                let is_exit = matches!(event.kind, EventKind::Exit);
                if forward_live(&out_tx, event).await.is_err() {
                    return;
                }
                if is_exit {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                if out_tx.try_send(Frame::Lag { skipped: n }).is_err() && out_tx.is_closed() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Forward a live event using `try_send` (never blocks the hub): the output
/// queue being full here means the transport itself is lagging, which is
/// the live-tail drop policy, not the catch-up block policy.
async fn forward_live(
    out_tx: &mpsc::Sender<Frame>,
    event: LiveEvent,
) -> Result<(), ()> {
    let frame = to_frame(event.t_rel_ms, event.kind, event.bytes);
    match out_tx.try_send(frame) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => Ok(()), // drop silently; next Lagged() reports it
        Err(mpsc::error::TrySendError::Closed(_)) => Err(()),
    }
}

fn to_frame(t_rel_ms: i64, kind: EventKind, bytes: Bytes) -> Frame {
    match kind {
        EventKind::Output | EventKind::Input => Frame::Output { t_rel_ms, bytes },
        EventKind::Resize => {
            let text = String::from_utf8_lossy(&bytes);
            let (cols, rows) = text
                .split_once('x')
                .and_then(|(c, r)| Some((c.parse().ok()?, r.parse().ok()?)))
                .unwrap_or((0, 0));
            Frame::Resize { cols, rows }
        }
        EventKind::Exit => {
            let text = String::from_utf8_lossy(&bytes);
            let code: i32 = text.trim().parse().unwrap_or(0);
            Frame::Exit { code }
        }
        EventKind::Marker => Frame::Output { t_rel_ms, bytes },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Recording, RecordingEvent, RecordingHeader};

    fn header() -> RecordingHeader {
        RecordingHeader {
            version: 2,
            width: 80,
            height: 24,
            timestamp: 0,
            title: None,
            env: Default::default(),
            command: vec!["bash".into()],
        }
    }

    async fn new_recording(dir: &std::path::Path) -> Arc<Recording> {
        let path = dir.join("recording.cast");
        Arc::new(Recording::open(path, &header()).unwrap())
    }

    #[tokio::test]
    async fn late_subscriber_sees_prefix_then_live_tail_with_no_gap() {
        let dir = tempfile::tempdir().unwrap();
        let recording = new_recording(dir.path()).await;
        let hub = SessionHub::new(recording.clone());

        // Write one historical record before any subscriber joins.
        let offset_after = {
            let mut w = recording.writer.lock().await;
            w.append(&RecordingEvent {
                t_rel_ms: 0,
                kind: EventKind::Output,
                payload: b"hello ".to_vec(),
            })
            .unwrap();
            w.flush().unwrap();
            w.size().unwrap()
        };
        hub.publish(offset_after, 0, EventKind::Output, Bytes::from_static(b"hello "));

        let mut rx = hub.subscribe(JoinMode::FromStart);

        // Now append a live record after the subscriber has joined.
        let offset_after2 = {
            let mut w = recording.writer.lock().await;
            w.append(&RecordingEvent {
                t_rel_ms: 1,
                kind: EventKind::Output,
                payload: b"world".to_vec(),
            })
            .unwrap();
            w.flush().unwrap();
            w.size().unwrap()
        };
        hub.publish(offset_after2, 1, EventKind::Output, Bytes::from_static(b"world"));

        let mut collected = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            if let Frame::Output { bytes, .. } = frame {
                collected.extend_from_slice(&bytes);
            }
            if collected == b"hello world" {
                break;
            }
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn exit_frame_terminates_the_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let recording = new_recording(dir.path()).await;
        let hub = SessionHub::new(recording.clone());
        let mut rx = hub.subscribe(JoinMode::LiveOnly);

        let offset_after = {
            let mut w = recording.writer.lock().await;
            w.append(&RecordingEvent {
                t_rel_ms: 0,
                kind: EventKind::Exit,
                payload: b"0".to_vec(),
            })
            .unwrap();
            w.flush().unwrap();
            w.size().unwrap()
        };
        hub.publish(offset_after, 0, EventKind::Exit, Bytes::from_static(b"0"));

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Frame::Exit { code: 0 }));
        assert!(rx.recv().await.is_none());
    }

    /// Seed scenario #5 / Testable Property #6: a subscriber slower than the
    /// live ring drops frames and gets a `Lag` notice, then recovery is a
    /// clean, well-defined suffix of the authoritative stream with no gap or
    /// duplication in what survives it.
    #[tokio::test]
    async fn slow_subscriber_gets_a_lag_frame_then_a_clean_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let recording = new_recording(dir.path()).await;
        let hub = SessionHub::new(recording.clone());

        let mut rx = hub.subscribe(JoinMode::LiveOnly);

        // Drain concurrently, the way a real transport consumer (SSE writer,
        // binary writer) would, instead of batching reads at the end: this
        // lets the bounded output queue keep draining while the subscription
        // task is replaying its catch-up backlog, rather than racing it.
        let collected = Arc::new(std::sync::Mutex::new(Vec::new()));
        let collected_reader = collected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let is_exit = matches!(frame, Frame::Exit { .. });
                collected_reader.lock().unwrap().push(frame);
                if is_exit {
                    break;
                }
            }
        });

        // Let the subscriber settle into the live tail before the flood:
        // with no historical data, its splice phase finds nothing buffered
        // and it parks on `live_rx.recv().await`.
        tokio::task::yield_now().await;

        // Publish past the live ring's capacity in one synchronous burst
        // (no `.await` in between): `tokio::sync::broadcast` drops its
        // oldest frames exactly like a subscriber reading slower than a PTY
        // producing output would (spec §8 seed scenario #5).
        let overflow = LIVE_RING_CAPACITY as u64 + 16;
        for i in 0..overflow {
            hub.publish(i + 1, i as i64, EventKind::Output, Bytes::from_static(b"x"));
        }
        // Publish past the lag: this is the well-defined suffix a recovered
        // subscriber must see intact, ending in the session's exit.
        let marker_offset = overflow + 1;
        hub.publish(marker_offset, overflow as i64, EventKind::Output, Bytes::from_static(b"recovered"));
        hub.publish(marker_offset + 1, overflow as i64 + 1, EventKind::Exit, Bytes::from_static(b"0"));

        tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("subscriber reader task timed out")
            .unwrap();

        let frames = collected.lock().unwrap();
        let lags: Vec<u64> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Lag { skipped } => Some(*skipped),
                _ => None,
            })
            .collect();
        assert!(!lags.is_empty(), "a ring-overflowed subscriber must observe at least one Lag frame");
        assert!(lags.iter().all(|&n| n > 0), "every Lag frame must report a positive skipped count");

        let recovered = frames
            .iter()
            .filter(|f| matches!(f, Frame::Output { bytes, .. } if &bytes[..] == b"recovered"))
            .count();
        assert_eq!(recovered, 1, "the post-lag suffix frame must be delivered exactly once, not dropped or duplicated");

        assert!(
            matches!(frames.last(), Some(Frame::Exit { code: 0 })),
            "the recovered stream must end in the session's exit frame"
        );
    }
}
