//! Window-title escape handling (spec §4.1, §4.4).
//!
//! Two independent concerns live here: synthesizing an OSC 2 title the host
//! injects into the PTY master when `titleMode = dynamic`, and scanning
//! output chunks for OSC 0/1/2 sequences so they can be excised from the
//! broadcast stream when `preventTitleChange = true` (still appended to the
//! recording verbatim, so replay stays faithful).

use regex::bytes::Regex;
use std::sync::OnceLock;

/// How the host drives window titles for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TitleMode {
    #[default]
    None,
    Static,
    Dynamic,
}

/// Build an OSC 2 "set window title" escape sequence terminated with BEL.
pub fn osc2(title: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(title.len() + 8);
    out.extend_from_slice(b"\x1b]2;");
    out.extend_from_slice(title.as_bytes());
    out.push(0x07);
    out
}

/// Compose the default dynamic title from session name, cwd, and git branch.
pub fn compose_title(session_name: Option<&str>, cwd: &str, git_branch: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = session_name {
        if !name.is_empty() {
            parts.push(name.to_string());
        }
    }
    parts.push(cwd.to_string());
    if let Some(branch) = git_branch {
        parts.push(format!("({branch})"));
    }
    parts.join(" — ")
}

fn osc_title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\x1b\](?:0|1|2);[^\x07\x1b]*(?:\x07|\x1b\\)").expect("valid OSC regex")
    })
}

/// Excise every OSC 0/1/2 title-setting escape from `input`, returning the
/// filtered bytes plus any trailing partial sequence that should be
/// prepended to the next chunk (sequences can straddle a chunk boundary).
pub fn filter_title_escapes(carry: &[u8], input: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut buf = Vec::with_capacity(carry.len() + input.len());
    buf.extend_from_slice(carry);
    buf.extend_from_slice(input);

    // If the buffer ends mid-sequence (an unterminated ESC ] 0|1|2 ; ...),
    // hold it back for the next chunk instead of emitting it as plain text.
    if let Some(start) = find_unterminated_osc_start(&buf) {
        let (complete, pending) = buf.split_at(start);
        let filtered = osc_title_regex().replace_all(complete, &b""[..]).into_owned();
        return (filtered, pending.to_vec());
    }

    let filtered = osc_title_regex().replace_all(&buf, &b""[..]).into_owned();
    (filtered, Vec::new())
}

/// Find the start of a trailing `ESC ] 0|1|2 ;` introducer that has no
/// terminator (`BEL` or `ESC \`) yet within `buf`.
fn find_unterminated_osc_start(buf: &[u8]) -> Option<usize> {
    let intro = [0x1b, b']'];
    let mut search_from = 0;
    while let Some(rel) = buf[search_from..]
        .windows(2)
        .position(|w| w == intro)
    {
        let pos = search_from + rel;
        let after = &buf[pos..];
        let looks_like_title = after.len() >= 3
            && matches!(after[2], b'0' | b'1' | b'2')
            && after.get(3) == Some(&b';');
        if looks_like_title {
            let terminated = after.iter().position(|&b| b == 0x07).is_some()
                || after.windows(2).any(|w| w == [0x1b, b'\\']);
            if !terminated {
                return Some(pos);
            }
        }
        search_from = pos + 2;
        if search_from >= buf.len() {
            break;
        }
    }
    None
}

/// Parse a best-effort `cd <path>` target from one line of shell input
/// (spec §4.1 cwd tracking). Returns `None` for anything else, including
/// `pushd`/`popd` (open question, spec §9).
pub fn parse_cd_target(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix("cd ")?;
    let target = rest.trim();
    if target.is_empty() || target.starts_with('-') {
        return None;
    }
    Some(target.trim_matches(['"', '\'']))
}
