//! Line index (component G, §4.7): PC/line/file queries over a CU's
//! line-number program rows.
//!
//! Grounded in `debugger/dwarf/parse.rs`'s `parse_lines`/`parse_files`/
//! `render_file_path` (reading `gimli::LineRows`, resolving each file
//! entry's directory + comp_dir) and `find_place_by_pc`'s
//! binary-search-then-back-up lookup, simplified to this crate's single
//! `(address, file, line)` triple (§3's `LineRecord`) instead of that
//! file's richer `Place`/column/is_stmt model, which nothing in this
//! specification's surface needs.

use crate::error::{die, DwarfError};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub address: u64,
    pub file: PathBuf,
    pub line: u64,
}

/// Result of a line→PC lookup: the address found, and the line number
/// actually used — equal to the request unless auto-adjustment picked
/// the nearest available line (§9 "Open questions — resolved" (i)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLookup {
    pub address: u64,
    pub line: u64,
}

/// A CU's line table, kept sorted by address — matching the order the
/// external reader's line-program replay already produces (§4.7).
#[derive(Debug, Default, Clone)]
pub struct LineIndex {
    rows: Vec<LineRecord>,
}

impl LineIndex {
    pub fn new(mut rows: Vec<LineRecord>) -> Self {
        rows.sort_by_key(|r| r.address);
        LineIndex { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[LineRecord] {
        &self.rows
    }

    /// Exact match on `address`.
    pub fn pc_to_line(&self, pc: u64) -> Result<u64, DwarfError> {
        self.rows
            .iter()
            .find(|r| r.address == pc)
            .map(|r| r.line)
            .ok_or_else(|| DwarfError::die(die::LINE_NOT_FOUND))
    }

    /// Nearest-by-line-number match; reports the line actually used.
    pub fn line_to_pc(&self, line: u64) -> Result<LineLookup, DwarfError> {
        self.rows
            .iter()
            .min_by_key(|r| r.line.abs_diff(line))
            .map(|r| LineLookup {
                address: r.address,
                line: r.line,
            })
            .ok_or_else(|| DwarfError::die(die::LINE_NOT_FOUND))
    }

    /// Every record address for an exact line number.
    pub fn line_to_pcs(&self, line: u64) -> Vec<u64> {
        self.rows
            .iter()
            .filter(|r| r.line == line)
            .map(|r| r.address)
            .collect()
    }

    /// First executable line strictly after `p`, skipping rows that
    /// repeat `p`'s own line number (§4.7).
    pub fn next_line(&self, p: u64) -> Result<LineLookup, DwarfError> {
        let here = self.pc_to_line(p)?;
        self.rows
            .iter()
            .filter(|r| r.address > p && r.line > 0 && r.line != here)
            .min_by_key(|r| r.address)
            .map(|r| LineLookup {
                address: r.address,
                line: r.line,
            })
            .ok_or_else(|| DwarfError::die(die::NEXT_LINE_NOT_FOUND))
    }

    pub fn basename(&self, pc: u64) -> Option<String> {
        self.rows
            .iter()
            .find(|r| r.address == pc)
            .and_then(|r| r.file.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx() -> LineIndex {
        LineIndex::new(vec![
            LineRecord { address: 0x1000, file: "a.c".into(), line: 10 },
            LineRecord { address: 0x1010, file: "a.c".into(), line: 11 },
            LineRecord { address: 0x1020, file: "a.c".into(), line: 12 },
            LineRecord { address: 0x1030, file: "a.c".into(), line: 200 },
        ])
    }

    #[test]
    fn pc_to_line_round_trips_with_line_to_pc() {
        let idx = idx();
        let line = idx.pc_to_line(0x1010).unwrap();
        assert_eq!(line, 11);
        let lookup = idx.line_to_pc(line).unwrap();
        assert_eq!(lookup, LineLookup { address: 0x1010, line: 11 });
    }

    #[test]
    fn line_to_pc_auto_adjusts_to_nearest_line() {
        let idx = idx();
        let lookup = idx.line_to_pc(9999).unwrap();
        assert_eq!(lookup.line, 200);
        assert_eq!(lookup.address, 0x1030);
    }

    #[test]
    fn next_line_fails_past_the_last_row() {
        let idx = idx();
        assert!(idx.next_line(0x1030).is_err());
    }

    #[test]
    fn next_line_skips_rows_with_unchanged_line_number() {
        let mut rows = idx().rows().to_vec();
        rows.push(LineRecord { address: 0x1011, file: "a.c".into(), line: 11 });
        let idx = LineIndex::new(rows);
        let next = idx.next_line(0x1010).unwrap();
        assert_eq!(next.line, 12);
    }
}
