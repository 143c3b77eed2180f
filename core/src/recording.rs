//! Append-only per-session recording log (spec §4.2, §6 "Recording format").
//!
//! UTF-8 text file. First line is a JSON header object; every subsequent
//! line is a JSON array `[t_rel_seconds, kind, payload]`. Appends are
//! flushed at a record boundary so a reader never observes a partial
//! record; a partial trailing line left by a prior crash is truncated away
//! on the next `open`.

use std::io::{BufRead, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::CoreResult;

pub const RECORDING_FILE_NAME: &str = "recording.cast";

/// One event kind, matching the single-letter tags in the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "o")]
    Output,
    #[serde(rename = "i")]
    Input,
    #[serde(rename = "r")]
    Resize,
    #[serde(rename = "x")]
    Exit,
    #[serde(rename = "m")]
    Marker,
}

/// Header record written once when a recording file is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub env: std::collections::HashMap<String, String>,
    pub command: Vec<String>,
}

/// One decoded record, as yielded by a `RecordingReader`.
#[derive(Debug, Clone)]
pub struct RecordingEvent {
    pub t_rel_ms: i64,
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

impl RecordingEvent {
    fn to_line(&self) -> String {
        let tag = match self.kind {
            EventKind::Output => "o",
            EventKind::Input => "i",
            EventKind::Resize => "r",
            EventKind::Exit => "x",
            EventKind::Marker => "m",
        };
        let payload = match self.kind {
            EventKind::Output | EventKind::Input => {
                String::from_utf8_lossy(&self.payload).into_owned()
            }
            EventKind::Resize | EventKind::Exit | EventKind::Marker => {
                String::from_utf8_lossy(&self.payload).into_owned()
            }
        };
        let t_secs = self.t_rel_ms as f64 / 1000.0;
        serde_json::to_string(&serde_json::json!([t_secs, tag, payload]))
            .unwrap_or_else(|_| "[0,\"m\",\"\"]".to_string())
    }

    fn parse_line(line: &str) -> Option<RecordingEvent> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let arr = value.as_array()?;
        if arr.len() != 3 {
            return None;
        }
        let t_secs = arr[0].as_f64()?;
        let tag = arr[1].as_str()?;
        let payload = arr[2].as_str()?.as_bytes().to_vec();
        let kind = match tag {
            "o" => EventKind::Output,
            "i" => EventKind::Input,
            "r" => EventKind::Resize,
            "x" => EventKind::Exit,
            "m" => EventKind::Marker,
            _ => return None,
        };
        Some(RecordingEvent {
            t_rel_ms: (t_secs * 1000.0).round() as i64,
            kind,
            payload,
        })
    }
}

/// Split a byte chunk at the last complete UTF-8 character boundary so a
/// multi-byte sequence straddling two PTY reads is never torn apart: the
/// incomplete tail is left in `carry` for the caller to prepend to the next
/// chunk rather than lossily decoded now. Mirrors the carry-over
/// `title::filter_title_escapes` already does for OSC sequences split
/// across reads.
///
/// A byte that's invalid regardless of what follows (not just an
/// in-progress multi-byte sequence) is treated as ready immediately —
/// waiting for more input would never make it valid, so holding it back
/// would just leak it into `carry` forever.
pub fn split_utf8_boundary(carry: &mut Vec<u8>, chunk: &[u8]) -> Vec<u8> {
    carry.extend_from_slice(chunk);
    let ready_len = match std::str::from_utf8(carry) {
        Ok(_) => carry.len(),
        Err(e) => match e.error_len() {
            None => e.valid_up_to(),
            Some(_) => carry.len(),
        },
    };
    let remainder = carry.split_off(ready_len);
    std::mem::replace(carry, remainder)
}

/// Flush the writer at least this often even if the byte threshold isn't hit.
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Flush the writer once this many unflushed bytes have accumulated.
const FLUSH_BYTES: usize = 64 * 1024;

/// Single-owner append handle (owned exclusively by the session's PTY reader task).
pub struct RecordingWriter {
    file: std::fs::File,
    started_at: Instant,
    pending_bytes: usize,
    last_flush: Instant,
}

impl RecordingWriter {
    /// Open (creating if absent) and write the header. Recovers a partially
    /// written trailing record left by a prior crash by truncating to the
    /// last complete line.
    pub fn open(path: &Path, header: &RecordingHeader) -> CoreResult<RecordingWriter> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existed = path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if existed {
            truncate_partial_trailing_line(&mut file)?;
        } else {
            let line = serde_json::to_string(header).unwrap_or_default();
            writeln!(file, "{line}")?;
            file.flush()?;
        }

        Ok(RecordingWriter {
            file,
            started_at: Instant::now(),
            pending_bytes: 0,
            last_flush: Instant::now(),
        })
    }

    /// Relative timestamp in ms since this writer was opened (approximates
    /// "since header" for a freshly created recording).
    pub fn elapsed_ms(&self) -> i64 {
        self.started_at.elapsed().as_millis() as i64
    }

    /// Append one record. A single `write_all` + conditional flush keeps
    /// the flush boundary aligned with the record boundary, so readers
    /// never observe a partial record.
    pub fn append(&mut self, event: &RecordingEvent) -> CoreResult<()> {
        let line = event.to_line();
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.pending_bytes += line.len() + 1;

        if self.pending_bytes >= FLUSH_BYTES || self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> CoreResult<()> {
        self.file.flush()?;
        self.pending_bytes = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Current length in bytes; used as a subscriber join cursor (spec §4.3 step 1).
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Truncate to the last `\n` boundary, dropping any unterminated trailing bytes.
fn truncate_partial_trailing_line(file: &mut std::fs::File) -> CoreResult<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(0))?;
    let reader = std::io::BufReader::new(&mut *file);
    let mut good_end: u64 = 0;
    let mut offset: u64 = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        offset += line.len() as u64 + 1;
        if offset <= len {
            good_end = offset;
        }
    }
    if good_end < len {
        file.set_len(good_end)?;
    }
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

/// A reader positioned at a byte offset, used for both the historical
/// prefix of a fresh subscriber and for offline replay tooling.
pub struct RecordingReader {
    path: PathBuf,
    offset: u64,
}

impl RecordingReader {
    pub fn open(path: &Path, offset: u64) -> RecordingReader {
        RecordingReader {
            path: path.to_path_buf(),
            offset,
        }
    }

    /// Read every complete record from `offset` through the current end of
    /// file. Safe to call concurrently with an open `RecordingWriter`: a
    /// partial trailing line (a concurrent append in flight) is simply not
    /// yet terminated by `\n` and is left for the next read.
    pub async fn read_to_end(&self) -> CoreResult<(Vec<RecordingEvent>, u64)> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut reader = tokio::io::BufReader::new(file);
        let mut events = Vec::new();
        let mut consumed: u64 = 0;
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Partial trailing line: stop before consuming it.
                break;
            }
            consumed += n as u64;
            let trimmed = line.trim_end_matches('\n');
            if let Some(event) = RecordingEvent::parse_line(trimmed) {
                events.push(event);
            }
        }
        Ok((events, self.offset + consumed))
    }
}

/// Thread-safe handle shared between the PTY reader (writer side) and API
/// handlers that need the header or current size.
pub struct Recording {
    pub path: PathBuf,
    pub writer: AsyncMutex<RecordingWriter>,
}

impl Recording {
    pub fn open(path: PathBuf, header: &RecordingHeader) -> CoreResult<Recording> {
        let writer = RecordingWriter::open(&path, header)?;
        Ok(Recording {
            path,
            writer: AsyncMutex::new(writer),
        })
    }

    pub fn reader_from(&self, offset: u64) -> RecordingReader {
        RecordingReader::open(&self.path, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn append_then_read_roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.cast");
        let mut writer = RecordingWriter::open(&path, &header()).unwrap();
        writer
            .append(&RecordingEvent {
                t_rel_ms: 10,
                kind: EventKind::Output,
                payload: b"hi\n".to_vec(),
            })
            .unwrap();
        writer.flush().unwrap();

        let reader = RecordingReader::open(&path, 0);
        let (events, _) = reader.read_to_end().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, b"hi\n");
        assert_eq!(events[0].kind, EventKind::Output);
    }

    #[tokio::test]
    async fn partial_trailing_line_is_truncated_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.cast");
        {
            let mut writer = RecordingWriter::open(&path, &header()).unwrap();
            writer
                .append(&RecordingEvent {
                    t_rel_ms: 0,
                    kind: EventKind::Output,
                    payload: b"ok\n".to_vec(),
                })
                .unwrap();
            writer.flush().unwrap();
        }
        // Simulate a crash mid-record: append bytes with no trailing newline.
        {
            use std::io::Write as _;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            write!(f, "[1,\"o\",\"partial").unwrap();
        }
        let writer = RecordingWriter::open(&path, &header()).unwrap();
        let size_after_reopen = writer.size().unwrap();

        let reader = RecordingReader::open(&path, 0);
        let (events, consumed) = reader.read_to_end().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, b"ok\n");
        assert_eq!(consumed, size_after_reopen);
    }

    #[tokio::test]
    async fn reader_mid_append_stops_before_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.cast");
        let mut writer = RecordingWriter::open(&path, &header()).unwrap();
        writer
            .append(&RecordingEvent {
                t_rel_ms: 0,
                kind: EventKind::Output,
                payload: b"first\n".to_vec(),
            })
            .unwrap();
        writer.flush().unwrap();

        // Write a partial record directly, bypassing flush-on-boundary, to
        // simulate a reader racing an in-flight append.
        {
            use std::io::Write as _;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            write!(f, "[1,\"o\",\"still-wri").unwrap();
        }

        let reader = RecordingReader::open(&path, 0);
        let (events, _) = reader.read_to_end().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, b"first\n");
    }

    #[test]
    fn split_utf8_boundary_holds_back_a_torn_multibyte_char() {
        // "é" is 0xC3 0xA9; split the PTY read right between the two bytes.
        let full = "caf\u{e9}".as_bytes().to_vec();
        let (first, second) = full.split_at(full.len() - 1);

        let mut carry = Vec::new();
        let ready = split_utf8_boundary(&mut carry, first);
        assert_eq!(ready, b"caf");
        assert_eq!(carry, vec![0xC3]);

        let ready = split_utf8_boundary(&mut carry, second);
        assert_eq!(ready, full);
        assert!(carry.is_empty());
    }

    #[test]
    fn split_utf8_boundary_does_not_hold_back_genuinely_invalid_bytes() {
        let mut carry = Vec::new();
        let ready = split_utf8_boundary(&mut carry, &[b'a', 0xFF, b'b']);
        assert_eq!(ready, vec![b'a', 0xFF, b'b']);
        assert!(carry.is_empty());
    }
}
