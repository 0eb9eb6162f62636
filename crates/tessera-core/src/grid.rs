//! Terminal grid: the page's line/cell matrix.
//!
//! The grid owns the visible page as a vector of [`Line`]s and provides the
//! operations the VT dispatcher needs (print, erase, scroll, insert/delete,
//! resize with or without reflow). Scrollback is owned separately — see
//! [`Scrollback`](crate::Scrollback) — and cooperates through
//! `scroll_up_into` / `scroll_down_from` and `reflow_resize`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, Color, SgrAttrs};
use crate::scrollback::Scrollback;

bitflags! {
    /// Per-line flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct LineFlags: u8 {
        /// The line is a soft-wrap continuation of the previous one.
        /// Drives reflow on resize and copy without inserted newlines.
        const WRAPPED = 1 << 0;
        /// User-defined anchor for scrollback navigation (e.g. prompt marks).
        const MARKED = 1 << 1;
    }
}

/// One grid row: exactly `cols` cells plus line flags.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Line {
    pub cells: Vec<Cell>,
    pub flags: LineFlags,
}

impl Line {
    /// A blank line of `cols` default cells.
    pub fn blank(cols: u16) -> Self {
        Self {
            cells: vec![Cell::blank(); cols as usize],
            flags: LineFlags::empty(),
        }
    }

    /// A blank line erased with the given background color.
    pub fn erased(cols: u16, bg: Color) -> Self {
        let mut cell = Cell::blank();
        cell.erase(bg);
        Self {
            cells: vec![cell; cols as usize],
            flags: LineFlags::empty(),
        }
    }

    pub fn wrapped(&self) -> bool {
        self.flags.contains(LineFlags::WRAPPED)
    }

    pub fn set_wrapped(&mut self, wrapped: bool) {
        self.flags.set(LineFlags::WRAPPED, wrapped);
    }

    pub fn marked(&self) -> bool {
        self.flags.contains(LineFlags::MARKED)
    }

    /// Truncate or pad to exactly `cols` cells.
    pub fn resize(&mut self, cols: u16) {
        self.cells.resize(cols as usize, Cell::blank());
        // A wide lead cut off from its phantom at the new edge is orphaned.
        if let Some(last) = self.cells.last_mut() {
            if last.is_wide() {
                last.clear();
            }
        }
        if let Some(first) = self.cells.first_mut() {
            if first.is_wide_continuation() {
                first.clear();
            }
        }
    }

    /// The line's text content (primary scalars, phantoms skipped).
    pub fn text(&self) -> String {
        self.cells
            .iter()
            .filter(|c| !c.is_wide_continuation())
            .map(Cell::content)
            .collect()
    }

    /// Index one past the last non-blank cell.
    pub fn content_len(&self) -> usize {
        self.cells
            .iter()
            .rposition(|c| c.content() != ' ' || !c.combining().is_empty() || c.fragment.is_some())
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

/// The page: a `rows × cols` matrix of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    lines: Vec<Line>,
    cols: u16,
    rows: u16,
}

impl Grid {
    /// Create a new grid filled with blank cells.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            lines: (0..rows).map(|_| Line::blank(cols)).collect(),
            cols,
            rows,
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn line(&self, row: u16) -> Option<&Line> {
        self.lines.get(row as usize)
    }

    pub fn line_mut(&mut self, row: u16) -> Option<&mut Line> {
        self.lines.get_mut(row as usize)
    }

    /// Iterate the page's lines top to bottom.
    pub fn iter_lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter()
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<&Cell> {
        self.lines
            .get(row as usize)
            .and_then(|l| l.cells.get(col as usize))
    }

    pub fn cell_mut(&mut self, row: u16, col: u16) -> Option<&mut Cell> {
        self.lines
            .get_mut(row as usize)
            .and_then(|l| l.cells.get_mut(col as usize))
    }

    // ── Erase operations ────────────────────────────────────────────

    /// ED 0: erase from `(row, col)` to the end of the display.
    pub fn erase_below(&mut self, row: u16, col: u16, bg: Color) {
        if row >= self.rows {
            return;
        }
        self.erase_in_row(row, col, self.cols, bg);
        for r in row + 1..self.rows {
            self.erase_in_row(r, 0, self.cols, bg);
            self.lines[r as usize].flags = LineFlags::empty();
        }
    }

    /// ED 1: erase from the start of the display through `(row, col)`.
    pub fn erase_above(&mut self, row: u16, col: u16, bg: Color) {
        if row >= self.rows {
            return;
        }
        for r in 0..row {
            self.erase_in_row(r, 0, self.cols, bg);
            self.lines[r as usize].flags = LineFlags::empty();
        }
        self.erase_in_row(row, 0, (col + 1).min(self.cols), bg);
    }

    /// ED 2: erase the entire display.
    pub fn erase_all(&mut self, bg: Color) {
        for line in &mut self.lines {
            for cell in &mut line.cells {
                cell.erase(bg);
            }
            line.flags = LineFlags::empty();
        }
    }

    /// EL 0: erase from the cursor to the end of the line.
    pub fn erase_line_right(&mut self, row: u16, col: u16, bg: Color) {
        self.erase_in_row(row, col, self.cols, bg);
        if let Some(line) = self.line_mut(row) {
            line.set_wrapped(false);
        }
    }

    /// EL 1: erase from the start of the line through the cursor.
    pub fn erase_line_left(&mut self, row: u16, col: u16, bg: Color) {
        self.erase_in_row(row, 0, (col + 1).min(self.cols), bg);
    }

    /// EL 2: erase the entire line.
    pub fn erase_line(&mut self, row: u16, bg: Color) {
        self.erase_in_row(row, 0, self.cols, bg);
        if let Some(line) = self.line_mut(row) {
            line.set_wrapped(false);
        }
    }

    /// ECH: erase `count` cells starting at `(row, col)`.
    pub fn erase_chars(&mut self, row: u16, col: u16, count: u16, bg: Color) {
        if col >= self.cols {
            return;
        }
        let end = col.saturating_add(count).min(self.cols);
        self.erase_in_row(row, col, end, bg);
    }

    /// Erase `[start_col, end_col)` of one row, fixing up wide pairs that
    /// straddle either boundary.
    fn erase_in_row(&mut self, row: u16, start_col: u16, end_col: u16, bg: Color) {
        let Some(line) = self.lines.get_mut(row as usize) else {
            return;
        };
        let sc = (start_col as usize).min(line.cells.len());
        let ec = (end_col as usize).min(line.cells.len());
        if sc >= ec {
            return;
        }
        // Left boundary: erasing a phantom orphans its lead.
        if sc > 0 && line.cells[sc].is_wide_continuation() {
            line.cells[sc - 1].erase(bg);
        }
        // Right boundary: erasing a lead orphans the phantom just outside.
        if ec < line.cells.len() && line.cells[ec].is_wide_continuation() {
            line.cells[ec].erase(bg);
        }
        for cell in &mut line.cells[sc..ec] {
            cell.erase(bg);
        }
    }

    /// Fill every cell with `ch` (DECALN).
    pub fn fill_all(&mut self, ch: char) {
        for line in &mut self.lines {
            for cell in &mut line.cells {
                cell.clear();
                cell.set_content(ch, 1);
            }
            line.flags = LineFlags::empty();
        }
    }

    /// Clear the entire grid to defaults.
    pub fn clear(&mut self) {
        for line in &mut self.lines {
            *line = Line::blank(self.cols);
        }
    }

    // ── Insert / delete characters ──────────────────────────────────

    /// ICH: insert `count` blank cells at `(row, col)`, shifting the tail of
    /// the line right within `[col, right)`. Cells pushed past `right` are
    /// lost.
    pub fn insert_chars(&mut self, row: u16, col: u16, right: u16, count: u16, bg: Color) {
        let right = right.min(self.cols);
        if row >= self.rows || col >= right || count == 0 {
            return;
        }
        let line = &mut self.lines[row as usize];
        let c = col as usize;
        let r = right as usize;
        let n = (count as usize).min(r - c);

        if line.cells[c].is_wide_continuation() && c > 0 {
            line.cells[c - 1].erase(bg);
        }

        line.cells[c..r].rotate_right(n);
        for cell in &mut line.cells[c..c + n] {
            cell.erase(bg);
        }
        // A phantom rotated to the front of the shifted run lost its lead.
        if c + n < r && line.cells[c + n].is_wide_continuation() {
            line.cells[c + n].erase(bg);
        }
        // A lead pushed against the right boundary lost its phantom.
        if line.cells[r - 1].is_wide() {
            line.cells[r - 1].erase(bg);
        }
    }

    /// DCH: delete `count` cells at `(row, col)` within `[col, right)`,
    /// shifting the tail left and blanking the vacated cells.
    pub fn delete_chars(&mut self, row: u16, col: u16, right: u16, count: u16, bg: Color) {
        let right = right.min(self.cols);
        if row >= self.rows || col >= right || count == 0 {
            return;
        }
        let line = &mut self.lines[row as usize];
        let c = col as usize;
        let r = right as usize;
        let n = (count as usize).min(r - c);

        if line.cells[c].is_wide_continuation() && c > 0 {
            line.cells[c - 1].erase(bg);
        }

        line.cells[c..r].rotate_left(n);
        for cell in &mut line.cells[r - n..r] {
            cell.erase(bg);
        }
        // After the shift an orphaned phantom may land at the deletion point.
        if line.cells[c].is_wide_continuation() {
            line.cells[c].erase(bg);
        }
    }

    // ── Scroll operations ───────────────────────────────────────────

    /// Scroll `[top, bottom)` up by `count` lines within columns
    /// `[left, right)`. Vacated rows at the bottom are blanked with `bg`.
    pub fn scroll_up(&mut self, top: u16, bottom: u16, left: u16, right: u16, count: u16, bg: Color) {
        let top = top.min(self.rows);
        let bottom = bottom.min(self.rows);
        let left = left.min(self.cols);
        let right = right.min(self.cols);
        if top >= bottom || left >= right || count == 0 {
            return;
        }
        let count = count.min(bottom - top);

        if left == 0 && right == self.cols {
            // Whole-line scroll: rotate and blank.
            self.lines[top as usize..bottom as usize].rotate_left(count as usize);
            for r in (bottom - count)..bottom {
                self.lines[r as usize] = Line::erased(self.cols, bg);
            }
        } else {
            // Column-restricted scroll: move cell rectangles.
            for r in top..bottom - count {
                let (src_row, dst_row) = (r + count, r);
                for c in left..right {
                    let cell = self.lines[src_row as usize].cells[c as usize].clone();
                    self.lines[dst_row as usize].cells[c as usize] = cell;
                }
            }
            for r in (bottom - count)..bottom {
                for c in left..right {
                    self.lines[r as usize].cells[c as usize].erase(bg);
                }
            }
            for r in top..bottom {
                self.fix_straddled_pairs(r, left, right, bg);
            }
        }
    }

    /// After a rectangle move, wide pairs that straddled a column margin
    /// are split; erase the orphaned halves on both sides of each edge.
    fn fix_straddled_pairs(&mut self, row: u16, left: u16, right: u16, bg: Color) {
        let Some(line) = self.lines.get_mut(row as usize) else {
            return;
        };
        let l = left as usize;
        let r = right as usize;
        if l > 0 && line.cells[l - 1].is_wide() {
            line.cells[l - 1].erase(bg);
        }
        if l < line.cells.len() && line.cells[l].is_wide_continuation() {
            line.cells[l].erase(bg);
        }
        if r > 0 && line.cells[r - 1].is_wide() {
            line.cells[r - 1].erase(bg);
        }
        if r < line.cells.len() && line.cells[r].is_wide_continuation() {
            line.cells[r].erase(bg);
        }
    }

    /// Scroll `[top, bottom)` down by `count` lines within columns
    /// `[left, right)`. Vacated rows at the top are blanked with `bg`.
    pub fn scroll_down(
        &mut self,
        top: u16,
        bottom: u16,
        left: u16,
        right: u16,
        count: u16,
        bg: Color,
    ) {
        let top = top.min(self.rows);
        let bottom = bottom.min(self.rows);
        let left = left.min(self.cols);
        let right = right.min(self.cols);
        if top >= bottom || left >= right || count == 0 {
            return;
        }
        let count = count.min(bottom - top);

        if left == 0 && right == self.cols {
            self.lines[top as usize..bottom as usize].rotate_right(count as usize);
            for r in top..top + count {
                self.lines[r as usize] = Line::erased(self.cols, bg);
            }
        } else {
            for r in (top + count..bottom).rev() {
                let (src_row, dst_row) = (r - count, r);
                for c in left..right {
                    let cell = self.lines[src_row as usize].cells[c as usize].clone();
                    self.lines[dst_row as usize].cells[c as usize] = cell;
                }
            }
            for r in top..top + count {
                for c in left..right {
                    self.lines[r as usize].cells[c as usize].erase(bg);
                }
            }
            for r in top..bottom {
                self.fix_straddled_pairs(r, left, right, bg);
            }
        }
    }

    /// Scroll up, appending the evicted top rows to `scrollback`.
    ///
    /// This is the normal "content scrolls up" path for a newline at the
    /// bottom margin of the primary buffer with full-width margins.
    pub fn scroll_up_into(
        &mut self,
        top: u16,
        bottom: u16,
        count: u16,
        scrollback: &mut Scrollback,
        bg: Color,
    ) -> Vec<Line> {
        let top = top.min(self.rows);
        let bottom = bottom.min(self.rows);
        if top >= bottom || count == 0 {
            return Vec::new();
        }
        let count = count.min(bottom - top);

        let mut evicted = Vec::new();
        for r in top..top + count {
            if let Some(dropped) = scrollback.push_line(self.lines[r as usize].clone()) {
                evicted.push(dropped);
            }
        }
        self.scroll_up(top, bottom, 0, self.cols, count, bg);
        evicted
    }

    /// Scroll down, refilling the vacated top rows from `scrollback`.
    pub fn scroll_down_from(
        &mut self,
        top: u16,
        bottom: u16,
        count: u16,
        scrollback: &mut Scrollback,
        bg: Color,
    ) {
        let top = top.min(self.rows);
        let bottom = bottom.min(self.rows);
        if top >= bottom || count == 0 {
            return;
        }
        let count = count.min(bottom - top);

        self.scroll_down(top, bottom, 0, self.cols, count, bg);
        for r in (top..top + count).rev() {
            if let Some(mut line) = scrollback.pop_newest() {
                line.resize(self.cols);
                self.lines[r as usize] = line;
            }
        }
    }

    /// IL: insert `count` blank lines at `row` within `[top, bottom)`.
    pub fn insert_lines(&mut self, row: u16, count: u16, top: u16, bottom: u16, bg: Color) {
        if row < top || row >= bottom {
            return;
        }
        self.scroll_down(row, bottom, 0, self.cols, count, bg);
    }

    /// DL: delete `count` lines at `row` within `[top, bottom)`.
    pub fn delete_lines(&mut self, row: u16, count: u16, top: u16, bottom: u16, bg: Color) {
        if row < top || row >= bottom {
            return;
        }
        self.scroll_up(row, bottom, 0, self.cols, count, bg);
    }

    // ── Printing ────────────────────────────────────────────────────

    /// Write a single-width grapheme at `(row, col)`, fixing up any wide
    /// pair it overwrites.
    pub fn write_narrow(&mut self, row: u16, col: u16, ch: char, attrs: SgrAttrs) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        let line = &mut self.lines[row as usize];
        if col > 0 && line.cells[col as usize].is_wide_continuation() {
            line.cells[col as usize - 1].clear();
        }
        if line.cells[col as usize].is_wide() && col + 1 < self.cols {
            line.cells[col as usize + 1].clear();
        }
        let cell = &mut line.cells[col as usize];
        cell.set_content(ch, 1);
        cell.attrs = attrs;
        cell.hyperlink = 0;
    }

    /// Write a wide (2-column) grapheme at `(row, col)` and its phantom at
    /// `col + 1`. No-op when the pair does not fit.
    pub fn write_wide(&mut self, row: u16, col: u16, ch: char, attrs: SgrAttrs) {
        if row >= self.rows || col + 1 >= self.cols {
            return;
        }
        let line = &mut self.lines[row as usize];
        // Overwriting a phantom orphans the lead to the left.
        if col > 0 && line.cells[col as usize].is_wide_continuation() {
            line.cells[col as usize - 1].clear();
        }
        // Overwriting a lead at col+1 orphans its phantom at col+2.
        if line.cells[col as usize + 1].is_wide() && col + 2 < self.cols {
            line.cells[col as usize + 2].clear();
        }
        let (lead, phantom) = Cell::wide(ch, attrs);
        line.cells[col as usize] = lead;
        line.cells[col as usize + 1] = phantom;
    }

    // ── Resize ──────────────────────────────────────────────────────

    /// Resize without reflow: truncate or pad each line to `cols`, truncate
    /// or pad the row count (dropped rows at the top go to `scrollback`;
    /// growth pulls rows back). Returns the cursor's new row.
    pub fn resize_clip(
        &mut self,
        new_cols: u16,
        new_rows: u16,
        cursor_row: u16,
        scrollback: &mut Scrollback,
    ) -> u16 {
        let mut cursor_row = cursor_row;
        for line in &mut self.lines {
            line.resize(new_cols);
        }
        self.cols = new_cols;

        if new_rows < self.rows {
            // Keep the cursor visible: push rows from the top.
            let excess = self.rows - new_rows;
            let push = excess.min(cursor_row);
            for _ in 0..push {
                let line = self.lines.remove(0);
                scrollback.push_line(line);
            }
            cursor_row -= push;
            self.lines.truncate(new_rows as usize);
        } else if new_rows > self.rows {
            let mut extra = new_rows - self.rows;
            // Pull rows back from scrollback first.
            while extra > 0 {
                let Some(mut line) = scrollback.pop_newest() else {
                    break;
                };
                line.resize(new_cols);
                self.lines.insert(0, line);
                cursor_row += 1;
                extra -= 1;
            }
            for _ in 0..extra {
                self.lines.push(Line::blank(new_cols));
            }
        }
        self.rows = new_rows;
        cursor_row.min(new_rows.saturating_sub(1))
    }

    /// Resize with reflow: wrapped lines are joined into logical lines,
    /// re-split at the new width, and redistributed over scrollback + page.
    ///
    /// Returns the cursor's new `(row, col)`; the cursor follows its
    /// logical character position when possible and is clamped otherwise.
    pub fn reflow_resize(
        &mut self,
        new_cols: u16,
        new_rows: u16,
        cursor: (u16, u16),
        scrollback: &mut Scrollback,
    ) -> (u16, u16) {
        if new_cols == 0 || new_rows == 0 {
            return (0, 0);
        }

        // Absolute index of the cursor's line in scrollback + page order.
        let cursor_abs = scrollback.len() + cursor.0 as usize;

        // 1. Join into logical lines, remembering the cursor's logical
        //    position as (logical line index, cell offset within it).
        let mut logical: Vec<(Vec<Cell>, LineFlags)> = Vec::new();
        let mut cursor_logical: (usize, usize) = (0, 0);

        let all_lines = scrollback
            .drain()
            .chain(std::mem::take(&mut self.lines))
            .collect::<Vec<_>>();
        for abs_idx in 0..all_lines.len() {
            // A line followed by a WRAPPED continuation keeps all of its
            // cells; otherwise trailing blanks are trimmed so that widening
            // does not glue padding between joined halves.
            let next_wrapped = all_lines
                .get(abs_idx + 1)
                .is_some_and(Line::wrapped);
            let line = &all_lines[abs_idx];
            let continues = line.wrapped() && !logical.is_empty();
            if !continues {
                logical.push((Vec::new(), line.flags & LineFlags::MARKED));
            }
            let logical_idx = logical.len() - 1;
            let accumulated = logical[logical_idx].0.len();
            if abs_idx == cursor_abs {
                cursor_logical = (
                    logical_idx,
                    accumulated + (cursor.1 as usize).min(line.cells.len()),
                );
            }
            let keep = if next_wrapped {
                line.cells.len()
            } else if abs_idx == cursor_abs {
                // Keep enough cells for the cursor to stay addressable.
                line.content_len()
                    .max(cursor.1 as usize + 1)
                    .min(line.cells.len())
            } else {
                line.content_len()
            };
            logical[logical_idx]
                .0
                .extend(line.cells.iter().take(keep).cloned());
        }

        // 2. Re-split each logical line at the new width. Wide pairs never
        //    straddle the boundary: a lead that does not fit moves to the
        //    next segment whole (the phantom is re-derived there).
        let mut segments: Vec<Line> = Vec::new();
        let mut cursor_seg: (usize, u16) = (0, 0);
        for (li, (cells, marked)) in logical.into_iter().enumerate() {
            let first_segment = segments.len();
            let mut current: Vec<Cell> = Vec::with_capacity(new_cols as usize);
            let track = li == cursor_logical.0;
            let mut offset = 0usize;
            let mut iter = cells.into_iter().peekable();

            while let Some(cell) = iter.next() {
                if cell.is_wide_continuation() {
                    // Orphaned phantom (its lead was emitted or dropped).
                    offset += 1;
                    continue;
                }
                let needed = if cell.is_wide() { 2 } else { 1 };
                if needed > new_cols as usize {
                    // A wide cell cannot fit a 1-column grid at all.
                    if iter.peek().is_some_and(Cell::is_wide_continuation) {
                        let _ = iter.next();
                        offset += 1;
                    }
                    offset += 1;
                    continue;
                }
                if current.len() + needed > new_cols as usize {
                    current.resize(new_cols as usize, Cell::blank());
                    let flags = if segments.len() == first_segment {
                        marked
                    } else {
                        LineFlags::WRAPPED
                    };
                    segments.push(Line {
                        cells: std::mem::take(&mut current),
                        flags,
                    });
                }
                if track && offset == cursor_logical.1 {
                    cursor_seg = (segments.len(), current.len() as u16);
                }
                if cell.is_wide() {
                    let consumed_phantom = iter.peek().is_some_and(Cell::is_wide_continuation);
                    if consumed_phantom {
                        let _ = iter.next();
                    }
                    if track && consumed_phantom && offset + 1 == cursor_logical.1 {
                        // Cursor sat on the phantom: anchor it to the lead.
                        cursor_seg = (segments.len(), current.len() as u16);
                    }
                    let attrs = cell.attrs;
                    current.push(cell);
                    let (_, phantom) = Cell::wide(' ', attrs);
                    current.push(phantom);
                    if consumed_phantom {
                        offset += 1;
                    }
                } else {
                    current.push(cell);
                }
                offset += 1;
            }

            if track && cursor_logical.1 >= offset {
                // Cursor sat at/past the end of the logical content.
                cursor_seg = (
                    segments.len(),
                    (current.len() as u16).min(new_cols.saturating_sub(1)),
                );
            }
            current.resize(new_cols as usize, Cell::blank());
            let flags = if segments.len() == first_segment {
                marked
            } else {
                LineFlags::WRAPPED
            };
            segments.push(Line {
                cells: current,
                flags,
            });
        }

        // Trim trailing all-blank segments (below the cursor) so shrinking
        // does not push content into scrollback just to preserve empty
        // bottom rows.
        while segments.len() > 1 {
            let last = segments.len() - 1;
            if last <= cursor_seg.0 {
                break;
            }
            let line = &segments[last];
            let has_content = line.wrapped()
                || line
                    .cells
                    .iter()
                    .any(|c| c.content() != ' ' || !c.combining().is_empty() || c.fragment.is_some());
            if has_content {
                break;
            }
            segments.pop();
        }

        // 3. Redistribute: the last `new_rows` segments form the page, the
        //    rest flow into scrollback (oldest first, capacity bounded).
        let total = segments.len();
        let page_count = total.min(new_rows as usize);
        let to_scrollback = total - page_count;
        let mut iter = segments.into_iter();
        for _ in 0..to_scrollback {
            if let Some(line) = iter.next() {
                scrollback.push_line(line);
            }
        }
        self.lines = iter.collect();
        while self.lines.len() < new_rows as usize {
            self.lines.push(Line::blank(new_cols));
        }
        self.cols = new_cols;
        self.rows = new_rows;

        // 4. Map the cursor's segment back to a page row.
        let row = cursor_seg
            .0
            .saturating_sub(to_scrollback)
            .min(new_rows as usize - 1) as u16;
        let col = cursor_seg.1.min(new_cols - 1);
        (row, col)
    }
}
