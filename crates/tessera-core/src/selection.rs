//! Selection model + copy extraction over grid + scrollback.
//!
//! Pure data/logic: no I/O, deterministic output for the same buffer state.
//!
//! Selection coordinates are defined over the *combined* buffer:
//! `0..scrollback.len()` are scrollback lines (oldest → newest), followed by
//! `grid.rows()` page lines (top → bottom).

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::grid::Grid;
use crate::scrollback::Scrollback;

/// A cell position in the combined buffer (scrollback + page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferPos {
    /// 0-indexed line in the combined buffer.
    pub line: u32,
    /// 0-indexed column.
    pub col: u16,
}

impl BufferPos {
    #[must_use]
    pub const fn new(line: u32, col: u16) -> Self {
        Self { line, col }
    }

    /// Convert a page-relative (row, col) into a combined-buffer position.
    #[must_use]
    pub fn from_viewport(scrollback_lines: usize, row: u16, col: u16) -> Self {
        Self {
            line: scrollback_lines as u32 + row as u32,
            col,
        }
    }
}

/// How the anchor/cursor pair is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Text-flow order between the two endpoints.
    #[default]
    Linear,
    /// The rectangle spanned by the two endpoints.
    Block,
    /// Whole lines between the two endpoints.
    Lines,
}

/// An anchor/cursor selection over the combined buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: BufferPos,
    pub cursor: BufferPos,
    pub mode: SelectionMode,
}

impl Selection {
    #[must_use]
    pub const fn new(anchor: BufferPos, cursor: BufferPos, mode: SelectionMode) -> Self {
        Self {
            anchor,
            cursor,
            mode,
        }
    }

    /// Move the cursor endpoint (anchor stays put).
    pub fn extend_to(&mut self, pos: BufferPos) {
        self.cursor = pos;
    }

    /// Endpoints in buffer order `(start, end)`.
    #[must_use]
    pub fn ordered(&self) -> (BufferPos, BufferPos) {
        if (self.anchor.line, self.anchor.col) <= (self.cursor.line, self.cursor.col) {
            (self.anchor, self.cursor)
        } else {
            (self.cursor, self.anchor)
        }
    }

    /// Whether `(line, col)` falls inside the selection.
    #[must_use]
    pub fn contains(&self, line: u32, col: u16) -> bool {
        let (start, end) = self.ordered();
        match self.mode {
            SelectionMode::Linear => {
                if line < start.line || line > end.line {
                    return false;
                }
                if start.line == end.line {
                    return col >= start.col && col <= end.col;
                }
                if line == start.line {
                    col >= start.col
                } else if line == end.line {
                    col <= end.col
                } else {
                    true
                }
            }
            SelectionMode::Block => {
                let (lo, hi) = ord2(start.col, end.col);
                line >= start.line && line <= end.line && col >= lo && col <= hi
            }
            SelectionMode::Lines => line >= start.line && line <= end.line,
        }
    }

    /// Extract the selected text as a UTF-8 string.
    ///
    /// - Wide phantoms are skipped (wide chars appear once).
    /// - Trailing blanks on each emitted row are trimmed.
    /// - In linear/lines mode, soft-wrapped lines join without a newline
    ///   (logical line boundaries only); block mode always breaks rows.
    #[must_use]
    pub fn extract_text(&self, grid: &Grid, scrollback: &Scrollback) -> String {
        let cols = grid.cols();
        let total = total_lines(grid, scrollback);
        if cols == 0 || total == 0 {
            return String::new();
        }

        let (start, end) = self.ordered();
        let start_line = start.line.min(total - 1);
        let end_line = end.line.min(total - 1);

        let mut out = String::new();
        for line in start_line..=end_line {
            let (sc, ec) = match self.mode {
                SelectionMode::Linear => {
                    let sc = if line == start_line { start.col } else { 0 };
                    let ec = if line == end_line {
                        end.col
                    } else {
                        cols.saturating_sub(1)
                    };
                    (sc, ec)
                }
                SelectionMode::Block => ord2(start.col, end.col),
                SelectionMode::Lines => (0, cols.saturating_sub(1)),
            };
            let sc = sc.min(cols.saturating_sub(1));
            let ec = ec.min(cols.saturating_sub(1));

            let mut row_buf = String::new();
            for col in sc..=ec {
                match cell_at(line, col, grid, scrollback) {
                    Some(cell) if cell.is_wide_continuation() => {}
                    Some(cell) => row_buf.push_str(&cell.grapheme()),
                    None => row_buf.push(' '),
                }
            }
            while row_buf.ends_with(' ') {
                row_buf.pop();
            }
            out.push_str(&row_buf);

            if line != end_line && self.breaks_after(line, scrollback) {
                out.push('\n');
            }
        }
        out
    }

    /// Whether a newline belongs after `line` in the extracted text.
    fn breaks_after(&self, line: u32, scrollback: &Scrollback) -> bool {
        if self.mode == SelectionMode::Block {
            return true;
        }
        // The next line continues this one iff it carries the wrapped flag.
        let next = line + 1;
        let sb_len = scrollback.len() as u32;
        if next < sb_len {
            return !scrollback
                .line(next as usize)
                .map(|l| l.wrapped())
                .unwrap_or(false);
        }
        true
    }
}

fn ord2(a: u16, b: u16) -> (u16, u16) {
    if a <= b { (a, b) } else { (b, a) }
}

fn total_lines(grid: &Grid, scrollback: &Scrollback) -> u32 {
    (scrollback.len() + grid.rows() as usize) as u32
}

fn cell_at<'a>(
    line: u32,
    col: u16,
    grid: &'a Grid,
    scrollback: &'a Scrollback,
) -> Option<&'a Cell> {
    let sb_len = scrollback.len() as u32;
    if line < sb_len {
        scrollback
            .line(line as usize)
            .and_then(|l| l.cells.get(col as usize))
    } else {
        let row = (line - sb_len) as u16;
        grid.cell(row, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SgrAttrs;
    use crate::grid::{Line, LineFlags};

    fn grid_from_lines(cols: u16, lines: &[&str]) -> Grid {
        let rows = lines.len() as u16;
        let mut g = Grid::new(cols, rows);
        for (r, text) in lines.iter().enumerate() {
            for (c, ch) in text.chars().enumerate() {
                if c >= cols as usize {
                    break;
                }
                if let Some(cell) = g.cell_mut(r as u16, c as u16) {
                    cell.set_content(ch, 1);
                }
            }
        }
        g
    }

    fn scrollback_from_lines(lines: &[(&str, bool)]) -> Scrollback {
        let mut sb = Scrollback::new(64);
        for (text, wrapped) in lines {
            let mut line = Line {
                cells: text.chars().map(Cell::new).collect(),
                flags: LineFlags::empty(),
            };
            line.set_wrapped(*wrapped);
            sb.push_line(line);
        }
        sb
    }

    fn linear(a: (u32, u16), b: (u32, u16)) -> Selection {
        Selection::new(
            BufferPos::new(a.0, a.1),
            BufferPos::new(b.0, b.1),
            SelectionMode::Linear,
        )
    }

    #[test]
    fn linear_extract_within_one_line() {
        let sb = Scrollback::new(0);
        let grid = grid_from_lines(10, &["hello wld"]);
        let sel = linear((0, 0), (0, 4));
        assert_eq!(sel.extract_text(&grid, &sb), "hello");
    }

    #[test]
    fn linear_extract_reversed_endpoints() {
        let sb = Scrollback::new(0);
        let grid = grid_from_lines(10, &["hello"]);
        let sel = linear((0, 4), (0, 0));
        assert_eq!(sel.extract_text(&grid, &sb), "hello");
    }

    #[test]
    fn linear_spans_lines_with_newlines() {
        let sb = scrollback_from_lines(&[("aa", false), ("bb", false)]);
        let grid = grid_from_lines(10, &["cc", "dd"]);
        let sel = linear((1, 0), (3, 1));
        assert_eq!(sel.extract_text(&grid, &sb), "bb\ncc\ndd");
    }

    #[test]
    fn wrapped_scrollback_lines_join_without_newline() {
        let sb = scrollback_from_lines(&[("foo", false), ("bar", true)]);
        let grid = grid_from_lines(10, &["baz"]);
        let sel = linear((0, 0), (1, 2));
        assert_eq!(sel.extract_text(&grid, &sb), "foobar");
    }

    #[test]
    fn block_mode_extracts_rectangle() {
        let sb = Scrollback::new(0);
        let grid = grid_from_lines(6, &["abcdef", "ghijkl", "mnopqr"]);
        let sel = Selection::new(
            BufferPos::new(0, 1),
            BufferPos::new(2, 3),
            SelectionMode::Block,
        );
        assert_eq!(sel.extract_text(&grid, &sb), "bcd\nhij\nnop");
    }

    #[test]
    fn block_mode_normalizes_columns() {
        let sb = Scrollback::new(0);
        let grid = grid_from_lines(6, &["abcdef", "ghijkl"]);
        // Cursor left of anchor: same rectangle.
        let sel = Selection::new(
            BufferPos::new(0, 3),
            BufferPos::new(1, 1),
            SelectionMode::Block,
        );
        assert_eq!(sel.extract_text(&grid, &sb), "bcd\nhij");
    }

    #[test]
    fn lines_mode_takes_full_lines() {
        let sb = Scrollback::new(0);
        let grid = grid_from_lines(8, &["first", "second", "third"]);
        let sel = Selection::new(
            BufferPos::new(1, 3),
            BufferPos::new(1, 4),
            SelectionMode::Lines,
        );
        assert_eq!(sel.extract_text(&grid, &sb), "second");
        let sel = Selection::new(
            BufferPos::new(0, 3),
            BufferPos::new(1, 0),
            SelectionMode::Lines,
        );
        assert_eq!(sel.extract_text(&grid, &sb), "first\nsecond");
    }

    #[test]
    fn wide_chars_appear_once() {
        let sb = Scrollback::new(0);
        let mut grid = Grid::new(6, 1);
        grid.write_narrow(0, 0, 'a', SgrAttrs::default());
        grid.write_wide(0, 1, '中', SgrAttrs::default());
        grid.write_narrow(0, 3, 'b', SgrAttrs::default());
        let sel = linear((0, 0), (0, 3));
        assert_eq!(sel.extract_text(&grid, &sb), "a中b");
    }

    #[test]
    fn combining_marks_survive_extraction() {
        let sb = Scrollback::new(0);
        let mut grid = Grid::new(4, 1);
        grid.write_narrow(0, 0, 'e', SgrAttrs::default());
        if let Some(cell) = grid.cell_mut(0, 0) {
            cell.push_combining('\u{0301}');
        }
        let sel = linear((0, 0), (0, 0));
        assert_eq!(sel.extract_text(&grid, &sb), "e\u{0301}");
    }

    #[test]
    fn contains_matches_extraction_shape() {
        let sel = Selection::new(
            BufferPos::new(1, 2),
            BufferPos::new(3, 1),
            SelectionMode::Linear,
        );
        assert!(!sel.contains(0, 5));
        assert!(sel.contains(1, 2));
        assert!(!sel.contains(1, 1));
        assert!(sel.contains(2, 0));
        assert!(sel.contains(3, 1));
        assert!(!sel.contains(3, 2));

        let block = Selection::new(
            BufferPos::new(1, 4),
            BufferPos::new(3, 2),
            SelectionMode::Block,
        );
        assert!(block.contains(2, 3));
        assert!(!block.contains(2, 1));
        assert!(!block.contains(0, 3));
    }

    #[test]
    fn out_of_range_endpoints_are_clamped() {
        let sb = Scrollback::new(0);
        let grid = grid_from_lines(4, &["abcd"]);
        let sel = linear((0, 0), (99, 99));
        assert_eq!(sel.extract_text(&grid, &sb), "abcd");
    }

    #[test]
    fn empty_grid_extracts_empty() {
        let sb = Scrollback::new(0);
        let grid = Grid::new(0, 0);
        let sel = linear((0, 0), (0, 0));
        assert_eq!(sel.extract_text(&grid, &sb), "");
    }
}
