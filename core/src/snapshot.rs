//! Rendered-grid snapshots for fast first paint (spec §6 "text" and
//! "buffer" endpoints). This is the one place the core looks inside escape
//! sequences beyond title extraction: to answer "what does the viewport
//! look like right now" without replaying the whole recording, it feeds
//! output through `vt100` the same way `shpool`'s TUI scrollback viewer
//! does. Client-side rendering remains out of scope; this only answers a
//! snapshot request.

use std::sync::Mutex;

/// Magic bytes identifying the binary snapshot format ("VT").
pub const MAGIC: [u8; 2] = [0x56, 0x54];
pub const FORMAT_VERSION: u8 = 0x01;
const FLAG_STYLES: u8 = 0b0000_0001;

/// Tracks the rendered viewport for one session by replaying output
/// through a headless VT100 emulator. Viewport-only: scrollback is not
/// included in snapshots (spec §9 open question, decided this way to match
/// the existing magic-byte layout, which reserves no scrollback bit).
pub struct TerminalGrid {
    parser: Mutex<vt100::Parser>,
}

impl TerminalGrid {
    pub fn new(cols: u16, rows: u16) -> TerminalGrid {
        TerminalGrid {
            parser: Mutex::new(vt100::Parser::new(rows, cols, 0)),
        }
    }

    pub fn process(&self, bytes: &[u8]) {
        if let Ok(mut parser) = self.parser.lock() {
            parser.process(bytes);
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        if let Ok(mut parser) = self.parser.lock() {
            parser.set_size(rows, cols);
        }
    }

    /// Plain-text viewport, one line per row; `styles` requests inline SGR
    /// escapes reproducing each cell's attributes (spec `?styles=bool`).
    pub fn text_snapshot(&self, styles: bool) -> String {
        let parser = match self.parser.lock() {
            Ok(p) => p,
            Err(_) => return String::new(),
        };
        let screen = parser.screen();
        let (rows, cols) = screen.size();
        let mut out = String::new();
        for row in 0..rows {
            for col in 0..cols {
                let Some(cell) = screen.cell(row, col) else { continue };
                if styles {
                    out.push_str(&sgr_prefix(cell));
                }
                if cell.has_contents() {
                    out.push_str(&cell.contents());
                } else {
                    out.push(' ');
                }
            }
            if styles {
                out.push_str("\x1b[0m");
            }
            out.push('\n');
        }
        out
    }

    /// Encode the current viewport in the binary "buffer" format (spec §6).
    pub fn binary_snapshot(&self, with_styles: bool) -> Vec<u8> {
        let parser = match self.parser.lock() {
            Ok(p) => p,
            Err(_) => return Vec::new(),
        };
        let screen = parser.screen();
        let (rows, cols) = screen.size();

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&cols.to_le_bytes());
        out.extend_from_slice(&rows.to_le_bytes());
        out.push(if with_styles { FLAG_STYLES } else { 0 });

        for row in 0..rows {
            for col in 0..cols {
                let Some(cell) = screen.cell(row, col) else { continue };
                let ch = cell.contents().chars().next().unwrap_or(' ');
                if with_styles {
                    out.push(cell_style_flags(cell));
                    encode_color(&mut out, cell.fgcolor());
                    encode_color(&mut out, cell.bgcolor());
                }
                out.extend_from_slice(&(ch as u32).to_le_bytes());
            }
        }
        out
    }
}

fn cell_style_flags(cell: &vt100::Cell) -> u8 {
    let mut flags = 0u8;
    if cell.bold() {
        flags |= 0b0000_0001;
    }
    if cell.italic() {
        flags |= 0b0000_0010;
    }
    if cell.underline() {
        flags |= 0b0000_0100;
    }
    if cell.inverse() {
        flags |= 0b0000_1000;
    }
    flags
}

/// Encode a `vt100::Color` as a 1-byte mode tag followed by a mode-specific
/// value (0 bytes for default, 1 for indexed, 3 for RGB) — the
/// variable-width TLV the spec's styled-cell layout calls for.
fn encode_color(out: &mut Vec<u8>, color: vt100::Color) {
    match color {
        vt100::Color::Default => out.push(0),
        vt100::Color::Idx(i) => {
            out.push(1);
            out.push(i);
        }
        vt100::Color::Rgb(r, g, b) => {
            out.push(2);
            out.extend_from_slice(&[r, g, b]);
        }
    }
}

fn sgr_prefix(cell: &vt100::Cell) -> String {
    let mut codes = Vec::new();
    if cell.bold() {
        codes.push("1".to_string());
    }
    if cell.italic() {
        codes.push("3".to_string());
    }
    if cell.underline() {
        codes.push("4".to_string());
    }
    if codes.is_empty() {
        String::new()
    } else {
        format!("\x1b[{}m", codes.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_header_matches_spec_layout() {
        let grid = TerminalGrid::new(80, 24);
        grid.process(b"hi");
        let bytes = grid.binary_snapshot(false);
        assert_eq!(&bytes[0..2], &MAGIC);
        assert_eq!(bytes[2], FORMAT_VERSION);
        let cols = u16::from_le_bytes([bytes[3], bytes[4]]);
        let rows = u16::from_le_bytes([bytes[5], bytes[6]]);
        assert_eq!(cols, 80);
        assert_eq!(rows, 24);
        assert_eq!(bytes[7], 0);
    }

    #[test]
    fn text_snapshot_contains_written_bytes() {
        let grid = TerminalGrid::new(80, 24);
        grid.process(b"hello");
        let text = grid.text_snapshot(false);
        assert!(text.starts_with("hello"));
    }
}
