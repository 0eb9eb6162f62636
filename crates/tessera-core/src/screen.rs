//! The screen: applies parser events to the grid and owns all per-terminal
//! state — cursor, margins, tab stops, modes, charsets, hyperlinks, images,
//! and the DEC locator.
//!
//! `Screen` implements [`parser::Listener`]; a session feeds PTY bytes
//! through a [`Parser`](crate::Parser) with the screen as the listener.
//! Replies the application requested (DA, DSR, CPR, locator reports) are
//! buffered and drained by the session with [`Screen::take_replies`].

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::cell::{Cell, Color, HyperlinkId, HyperlinkRegistry, SgrAttrs, SgrFlags};
use crate::cursor::{Charset, Cursor, SavedCursor};
use crate::grid::{Grid, Line, LineFlags};
use crate::image::{
    AlignmentPolicy, CellSpan, Image, ImageFormat, ImageFragment, ImageLimits, ImagePool,
    PixelSize, ResizePolicy, Rgba,
};
use crate::locator::{
    Button, CellPosition, CoordinateUnits, EventSet, FilterRect, Locator, PixelPosition,
};
use crate::modes::{AnsiModes, DecModes, MouseEncoding, MouseProtocol};
use crate::parser;
use crate::scrollback::Scrollback;
use crate::selection::Selection;

/// Upper bound on accumulated CSI parameters; excess is dropped.
const MAX_PARAMS: usize = 32;
/// Upper bound on accumulated OSC/DCS/APC payload bytes.
const MAX_STRING_LEN: usize = 4 * 1024 * 1024;
/// Default tab interval.
const TAB_INTERVAL: u16 = 8;

/// One top-level CSI parameter with its colon-separated sub-parameters.
pub type Param = SmallVec<[u16; 4]>;

/// Cursor shapes selected by DECSCUSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorStyle {
    #[default]
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

impl CursorStyle {
    fn from_param(p: u16) -> Self {
        match p {
            1 => Self::BlinkingBlock,
            2 => Self::SteadyBlock,
            3 => Self::BlinkingUnderline,
            4 => Self::SteadyUnderline,
            5 => Self::BlinkingBar,
            6 => Self::SteadyBar,
            _ => Self::Default,
        }
    }
}

/// Out-of-band happenings the host (session/UI) consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenEvent {
    Bell,
    TitleChanged(String),
    /// The application asked for a different page size (DECCOLM, XTWINOPS 8).
    ResizeRequest { cols: u16, rows: u16 },
}

/// Scroll/addressing bounds: `top`/`left` inclusive, `bottom`/`right`
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Margins {
    pub top: u16,
    pub bottom: u16,
    pub left: u16,
    pub right: u16,
}

/// Construction parameters for a [`Screen`].
#[derive(Debug, Clone)]
pub struct ScreenConfig {
    pub cols: u16,
    pub rows: u16,
    pub scrollback_capacity: usize,
    /// Pixel size of one cell; drives image placement and pixel-unit
    /// locator reports.
    pub cell_pixel_size: PixelSize,
    /// Reflow lines on resize instead of clipping.
    pub reflow: bool,
    pub image_limits: ImageLimits,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            scrollback_capacity: 10_000,
            cell_pixel_size: PixelSize::new(8, 16),
            reflow: true,
            image_limits: ImageLimits::default(),
        }
    }
}

/// In-flight control sequence state (cleared by the parser's `clear`).
#[derive(Debug, Default)]
struct Sequence {
    leader: Option<u8>,
    intermediates: SmallVec<[u8; 2]>,
    params: Vec<Param>,
    /// Set once any parameter byte arrived (distinguishes `CSI H` from
    /// `CSI 0 H`).
    has_params: bool,
}

impl Sequence {
    fn reset(&mut self) {
        self.leader = None;
        self.intermediates.clear();
        self.params.clear();
        self.has_params = false;
    }

    fn current(&mut self) -> &mut Param {
        if self.params.is_empty() {
            self.params.push(Param::new());
            self.params[0].push(0);
        }
        let last = self.params.len() - 1;
        &mut self.params[last]
    }

    fn push_digit(&mut self, digit: u8) {
        self.has_params = true;
        if self.params.len() > MAX_PARAMS {
            return;
        }
        let param = self.current();
        let slot = param.len() - 1;
        param[slot] = param[slot].saturating_mul(10).saturating_add((digit - b'0') as u16);
    }

    fn next_param(&mut self) {
        self.has_params = true;
        if self.params.is_empty() {
            self.params.push(Param::new());
            self.params[0].push(0);
        }
        if self.params.len() > MAX_PARAMS {
            return;
        }
        let mut p = Param::new();
        p.push(0);
        self.params.push(p);
    }

    fn next_sub_param(&mut self) {
        self.has_params = true;
        self.current().push(0);
    }

    /// Top-level value of parameter `i`, or `default` when absent/zero…
    /// except that zero is meaningful for some controls, so this only
    /// substitutes when the parameter is missing.
    fn param_or(&self, i: usize, default: u16) -> u16 {
        self.params
            .get(i)
            .and_then(|p| p.first())
            .copied()
            .unwrap_or(default)
    }

    /// Like `param_or` but also mapping 0 to `default` (cursor motions).
    fn count_or(&self, i: usize, default: u16) -> u16 {
        let v = self.param_or(i, default);
        if v == 0 { default } else { v }
    }
}

/// Pending DCS classification after `hook`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DcsKind {
    /// Unrecognized; payload is skipped.
    Unknown(u8),
}

/// The terminal screen model.
pub struct Screen {
    primary: Grid,
    alternate: Grid,
    scrollback: Scrollback,

    cursor: Cursor,
    saved_primary: Vec<SavedCursor>,
    saved_alternate: Vec<SavedCursor>,
    cursor_style: CursorStyle,

    margins: Margins,
    tabs: BTreeSet<u16>,

    dec_modes: DecModes,
    ansi_modes: AnsiModes,

    hyperlinks: HyperlinkRegistry,
    current_hyperlink: HyperlinkId,

    images: Arc<ImagePool>,
    /// Application-chosen image numbers (`i=` key) → stored images.
    images_by_number: HashMap<u32, Arc<Image>>,

    locator: Locator,
    selection: Option<Selection>,

    title: String,
    cell_pixel_size: PixelSize,
    reflow: bool,

    seq: Sequence,
    osc_buf: Vec<u8>,
    dcs: Option<DcsKind>,
    dcs_buf: Vec<u8>,
    apc_buf: Vec<u8>,

    reply: Vec<u8>,
    events: VecDeque<ScreenEvent>,
    /// For REP: the most recently printed grapheme.
    last_printed: Option<(char, u8)>,
    /// Host-configured backdrop, forwarded to render frames.
    background_image: Option<Arc<Image>>,
    background_opacity: f32,
    dirty: bool,
}

impl Screen {
    pub fn new(config: ScreenConfig) -> Self {
        let mut screen = Self {
            primary: Grid::new(config.cols, config.rows),
            alternate: Grid::new(config.cols, config.rows),
            scrollback: Scrollback::new(config.scrollback_capacity),
            cursor: Cursor::default(),
            saved_primary: Vec::new(),
            saved_alternate: Vec::new(),
            cursor_style: CursorStyle::default(),
            margins: Margins {
                top: 0,
                bottom: config.rows,
                left: 0,
                right: config.cols,
            },
            tabs: BTreeSet::new(),
            dec_modes: DecModes::default(),
            ansi_modes: AnsiModes::default(),
            hyperlinks: HyperlinkRegistry::new(),
            current_hyperlink: 0,
            images: Arc::new(ImagePool::new(config.image_limits, Arc::new(|_| {}))),
            images_by_number: HashMap::new(),
            locator: Locator::new(),
            selection: None,
            title: String::new(),
            cell_pixel_size: config.cell_pixel_size,
            reflow: config.reflow,
            seq: Sequence::default(),
            osc_buf: Vec::new(),
            dcs: None,
            dcs_buf: Vec::new(),
            apc_buf: Vec::new(),
            reply: Vec::new(),
            events: VecDeque::new(),
            last_printed: None,
            background_image: None,
            background_opacity: 1.0,
            dirty: true,
        };
        screen.reset_tabs();
        screen
    }

    /// Configure the backdrop handed to render frames.
    pub fn set_background(&mut self, image: Option<Arc<Image>>, opacity: f32) {
        self.background_image = image;
        self.background_opacity = opacity.clamp(0.0, 1.0);
        self.dirty = true;
    }

    /// Replace the image pool (e.g. to install a GPU `on_remove` hook).
    pub fn set_image_pool(&mut self, pool: Arc<ImagePool>) {
        self.images = pool;
    }

    // ── accessors ───────────────────────────────────────────────────

    pub fn grid(&self) -> &Grid {
        if self.dec_modes.alternate_screen {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn grid_mut(&mut self) -> &mut Grid {
        if self.dec_modes.alternate_screen {
            &mut self.alternate
        } else {
            &mut self.primary
        }
    }

    pub fn scrollback(&self) -> &Scrollback {
        &self.scrollback
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn cursor_style(&self) -> CursorStyle {
        self.cursor_style
    }

    pub fn margins(&self) -> Margins {
        self.margins
    }

    pub fn modes(&self) -> &DecModes {
        &self.dec_modes
    }

    pub fn ansi_modes(&self) -> &AnsiModes {
        &self.ansi_modes
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn hyperlinks(&self) -> &HyperlinkRegistry {
        &self.hyperlinks
    }

    pub fn images(&self) -> &Arc<ImagePool> {
        &self.images
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn locator_mut(&mut self) -> &mut Locator {
        &mut self.locator
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
        self.dirty = true;
    }

    /// Extract the selected text, if a selection exists.
    pub fn selection_text(&self) -> Option<String> {
        let grid = self.grid();
        self.selection
            .as_ref()
            .map(|s| s.extract_text(grid, &self.scrollback))
    }

    pub fn cols(&self) -> u16 {
        self.grid().cols()
    }

    pub fn rows(&self) -> u16 {
        self.grid().rows()
    }

    /// Drain pending reply bytes (DA/DSR/CPR + locator reports).
    pub fn take_replies(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.reply);
        let locator_reply = self.locator.fetch_reply_and_clear();
        out.extend_from_slice(locator_reply.as_bytes());
        out
    }

    /// Pop the next out-of-band event.
    pub fn pop_event(&mut self) -> Option<ScreenEvent> {
        self.events.pop_front()
    }

    /// Whether the screen changed since the last `clear_dirty`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Feed a mouse update into the locator subsystem.
    pub fn locator_update(&mut self, button: Button, pressed: bool, cell: CellPosition) {
        let pixel = PixelPosition {
            x: cell.col as u32 * self.cell_pixel_size.width,
            y: cell.row as u32 * self.cell_pixel_size.height,
        };
        self.locator.update(button, pressed, cell, pixel);
    }

    // ── geometry helpers ────────────────────────────────────────────

    fn left(&self) -> u16 {
        self.margins.left
    }

    fn right(&self) -> u16 {
        self.margins.right
    }

    fn top(&self) -> u16 {
        self.margins.top
    }

    fn bottom(&self) -> u16 {
        self.margins.bottom
    }

    fn in_horizontal_margins(&self) -> bool {
        self.cursor.col >= self.left() && self.cursor.col < self.right()
    }

    /// Whether the scroll region covers the whole page (scrollback feeds
    /// only from full-region scrolls of the primary buffer).
    fn full_region(&self) -> bool {
        self.margins.top == 0
            && self.margins.bottom == self.rows()
            && self.margins.left == 0
            && self.margins.right == self.cols()
    }

    fn reset_tabs(&mut self) {
        self.tabs.clear();
        let mut col = TAB_INTERVAL;
        while col < self.cols() {
            self.tabs.insert(col);
            col += TAB_INTERVAL;
        }
    }

    fn reset_margins(&mut self) {
        self.margins = Margins {
            top: 0,
            bottom: self.rows(),
            left: 0,
            right: self.cols(),
        };
    }

    // ── resize ──────────────────────────────────────────────────────

    /// Apply a new page size (UI- or application-originated).
    pub fn resize(&mut self, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 || (cols == self.cols() && rows == self.rows()) {
            return;
        }
        let cursor = (self.cursor.row, self.cursor.col);
        if self.dec_modes.alternate_screen {
            // The alternate buffer never reflows and has no scrollback.
            let mut empty = Scrollback::new(0);
            let row = self
                .alternate
                .resize_clip(cols, rows, cursor.0, &mut empty);
            self.cursor.row = row;
            self.primary.resize_clip(cols, rows, 0, &mut self.scrollback);
        } else if self.reflow {
            let (row, col) = self
                .primary
                .reflow_resize(cols, rows, cursor, &mut self.scrollback);
            self.cursor.row = row;
            self.cursor.col = col;
            self.alternate = Grid::new(cols, rows);
        } else {
            let row = self
                .primary
                .resize_clip(cols, rows, cursor.0, &mut self.scrollback);
            self.cursor.row = row;
            self.alternate = Grid::new(cols, rows);
        }
        self.cursor.col = self.cursor.col.min(cols - 1);
        self.cursor.row = self.cursor.row.min(rows - 1);
        self.cursor.wrap_pending = false;
        self.reset_margins();
        self.reset_tabs();
        self.selection = None;
        self.dirty = true;
    }

    // ── rendering snapshot ──────────────────────────────────────────

    /// Fill `frame` with the current viewport, reusing its allocations.
    pub fn snapshot_into(&self, frame: &mut RenderFrame) {
        frame.cols = self.cols();
        frame.rows = self.rows();
        frame.cells.clear();
        let grid = self.grid();
        for line in grid.iter_lines() {
            for cell in &line.cells {
                frame.cells.push(RenderCell {
                    text: cell.grapheme(),
                    width: cell.width(),
                    flags: cell.flags,
                    attrs: cell.attrs,
                    hyperlink: cell.hyperlink,
                    fragment: cell.fragment.clone(),
                });
            }
        }
        frame.cursor_row = self.cursor.row;
        frame.cursor_col = self.cursor.col;
        frame.cursor_visible = self.dec_modes.cursor_visible;
        frame.cursor_style = self.cursor_style;
        frame.reverse_video = self.dec_modes.reverse_video;
        frame.selection = self.selection;
        frame.background_image = self.background_image.clone();
        frame.background_opacity = self.background_opacity;
        frame.title.clear();
        frame.title.push_str(&self.title);
    }

    // ── cursor movement ─────────────────────────────────────────────

    fn clamp_cursor(&mut self) {
        self.cursor.row = self.cursor.row.min(self.rows().saturating_sub(1));
        self.cursor.col = self.cursor.col.min(self.cols().saturating_sub(1));
    }

    /// Move to an absolute position, margin-relative under origin mode.
    fn move_cursor_to(&mut self, row: u16, col: u16) {
        if self.dec_modes.origin {
            self.cursor.row = (self.top() + row).min(self.bottom().saturating_sub(1));
            self.cursor.col = (self.left() + col).min(self.right().saturating_sub(1));
        } else {
            self.cursor.row = row;
            self.cursor.col = col;
            self.clamp_cursor();
        }
        self.cursor.wrap_pending = false;
    }

    fn cursor_up(&mut self, n: u16) {
        let limit = if self.cursor.row >= self.top() {
            self.top()
        } else {
            0
        };
        self.cursor.row = self.cursor.row.saturating_sub(n).max(limit);
        self.cursor.wrap_pending = false;
    }

    fn cursor_down(&mut self, n: u16) {
        let limit = if self.cursor.row < self.bottom() {
            self.bottom().saturating_sub(1)
        } else {
            self.rows().saturating_sub(1)
        };
        self.cursor.row = self.cursor.row.saturating_add(n).min(limit);
        self.cursor.wrap_pending = false;
    }

    fn cursor_left(&mut self, n: u16) {
        let limit = if self.cursor.col >= self.left() {
            self.left()
        } else {
            0
        };
        self.cursor.col = self.cursor.col.saturating_sub(n).max(limit);
        self.cursor.wrap_pending = false;
    }

    fn cursor_right(&mut self, n: u16) {
        let limit = if self.cursor.col < self.right() {
            self.right().saturating_sub(1)
        } else {
            self.cols().saturating_sub(1)
        };
        self.cursor.col = self.cursor.col.saturating_add(n).min(limit);
        self.cursor.wrap_pending = false;
    }

    /// LF/IND: move down one line, scrolling at the bottom margin.
    fn linefeed(&mut self) {
        if self.cursor.row + 1 == self.bottom() && self.in_horizontal_margins() {
            self.scroll_region_up(1);
        } else if self.cursor.row + 1 < self.rows() {
            self.cursor.row += 1;
        }
        if self.ansi_modes.newline {
            self.carriage_return();
        }
        self.cursor.wrap_pending = false;
    }

    /// RI: move up one line, scrolling at the top margin.
    fn reverse_index(&mut self) {
        if self.cursor.row == self.top() && self.in_horizontal_margins() {
            self.scroll_region_down(1);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
        self.cursor.wrap_pending = false;
    }

    fn carriage_return(&mut self) {
        self.cursor.col = if self.cursor.col >= self.left() {
            self.left()
        } else {
            0
        };
        self.cursor.wrap_pending = false;
    }

    fn horizontal_tab(&mut self) {
        let next = self
            .tabs
            .range(self.cursor.col + 1..)
            .next()
            .copied()
            .unwrap_or(self.right().saturating_sub(1));
        self.cursor.col = next.min(self.right().saturating_sub(1));
        self.cursor.wrap_pending = false;
    }

    fn back_tab(&mut self, n: u16) {
        for _ in 0..n {
            let prev = self
                .tabs
                .range(..self.cursor.col)
                .next_back()
                .copied()
                .unwrap_or(self.left());
            self.cursor.col = prev.max(self.left());
        }
        self.cursor.wrap_pending = false;
    }

    // ── scrolling ───────────────────────────────────────────────────

    fn scroll_region_up(&mut self, n: u16) {
        let bg = self.cursor.attrs.bg;
        let (top, bottom, left, right) = (self.top(), self.bottom(), self.left(), self.right());
        if !self.dec_modes.alternate_screen && self.full_region() {
            let dropped =
                self.primary
                    .scroll_up_into(top, bottom, n, &mut self.scrollback, bg);
            for line in &dropped {
                self.hyperlinks.release_cells(&line.cells);
            }
        } else {
            self.grid_mut().scroll_up(top, bottom, left, right, n, bg);
        }
        self.dirty = true;
    }

    fn scroll_region_down(&mut self, n: u16) {
        let bg = self.cursor.attrs.bg;
        let (top, bottom, left, right) = (self.top(), self.bottom(), self.left(), self.right());
        if !self.dec_modes.alternate_screen && self.full_region() {
            self.primary
                .scroll_down_from(top, bottom, n, &mut self.scrollback, bg);
        } else {
            self.grid_mut().scroll_down(top, bottom, left, right, n, bg);
        }
        self.dirty = true;
    }

    // ── printing ────────────────────────────────────────────────────

    /// Write one grapheme cluster at the cursor per the wrap rules.
    fn write_grapheme(&mut self, cluster: &str, width: usize) {
        let mut chars = cluster.chars();
        let Some(mut primary) = chars.next() else {
            return;
        };

        if width == 0 {
            // Combining marks attach to the previously written cell.
            self.attach_combining(cluster);
            return;
        }

        // Charset translation applies to single ASCII scalars (GL range).
        if cluster.len() == 1 && primary.is_ascii() {
            primary = self.cursor.charsets.map(primary);
        }

        let width = width.min(2) as u16;

        if self.cursor.wrap_pending && self.dec_modes.auto_wrap {
            self.wrap_to_next_line();
        }
        // A wide char that cannot fit before the right margin wraps first.
        if width == 2 && self.cursor.col + 2 > self.right() {
            if self.dec_modes.auto_wrap {
                self.wrap_to_next_line();
            } else if self.right() >= 2 {
                self.cursor.col = self.right() - 2;
            }
        }

        if self.ansi_modes.insert {
            let (row, col, right) = (self.cursor.row, self.cursor.col, self.right());
            let bg = self.cursor.attrs.bg;
            self.grid_mut().insert_chars(row, col, right, width, bg);
        }

        let (row, col) = (self.cursor.row, self.cursor.col);
        let attrs = self.cursor.attrs;
        let link = self.current_hyperlink;

        self.release_link_at(row, col);
        if width == 2 {
            self.release_link_at(row, col + 1);
            self.grid_mut().write_wide(row, col, primary, attrs);
        } else {
            self.grid_mut().write_narrow(row, col, primary, attrs);
        }
        if link != 0 {
            self.hyperlinks.acquire_id(link);
            if let Some(cell) = self.grid_mut().cell_mut(row, col) {
                cell.hyperlink = link;
            }
        }
        // Trailing combining marks of the cluster live with the cell.
        let marks: SmallVec<[char; 4]> = chars.collect();
        if !marks.is_empty() {
            if let Some(cell) = self.grid_mut().cell_mut(row, col) {
                for mark in marks {
                    cell.push_combining(mark);
                }
            }
        }

        self.last_printed = Some((primary, width as u8));

        let new_col = self.cursor.col + width;
        if new_col >= self.right() {
            self.cursor.col = self.right().saturating_sub(1);
            self.cursor.wrap_pending = true;
        } else {
            self.cursor.col = new_col;
            self.cursor.wrap_pending = false;
        }
        self.dirty = true;
    }

    fn attach_combining(&mut self, cluster: &str) {
        let (row, mut col) = (self.cursor.row, self.cursor.col);
        // The target is the cell just written: when not wrap-pending the
        // cursor already advanced past it.
        if !self.cursor.wrap_pending && col > 0 {
            col -= 1;
        }
        // A phantom redirects to its lead.
        if self
            .grid()
            .cell(row, col)
            .is_some_and(Cell::is_wide_continuation)
            && col > 0
        {
            col -= 1;
        }
        let marks: SmallVec<[char; 4]> = cluster.chars().collect();
        if let Some(cell) = self.grid_mut().cell_mut(row, col) {
            for mark in marks {
                cell.push_combining(mark);
            }
        }
        self.dirty = true;
    }

    fn wrap_to_next_line(&mut self) {
        self.cursor.wrap_pending = false;
        self.carriage_return();
        if self.cursor.row + 1 == self.bottom() && self.in_horizontal_margins() {
            self.scroll_region_up(1);
        } else if self.cursor.row + 1 < self.rows() {
            self.cursor.row += 1;
        }
        let row = self.cursor.row;
        if let Some(line) = self.grid_mut().line_mut(row) {
            line.set_wrapped(true);
        }
    }

    fn release_link_at(&mut self, row: u16, col: u16) {
        let old = self.grid().cell(row, col).map(|c| c.hyperlink).unwrap_or(0);
        if old != 0 {
            self.hyperlinks.release_id(old);
        }
    }

    // ── alternate screen ────────────────────────────────────────────

    fn enter_alternate(&mut self, clear: bool) {
        if self.dec_modes.alternate_screen {
            return;
        }
        let saved = self.cursor.save(self.dec_modes.origin);
        self.saved_primary.push(saved);
        self.dec_modes.alternate_screen = true;
        if clear {
            self.alternate.erase_all(Color::Default);
        }
        self.cursor = Cursor::default();
        self.reset_margins();
        self.selection = None;
        self.dirty = true;
    }

    fn leave_alternate(&mut self) {
        if !self.dec_modes.alternate_screen {
            return;
        }
        self.dec_modes.alternate_screen = false;
        if let Some(saved) = self.saved_primary.pop() {
            let origin = self.cursor.restore(&saved);
            self.dec_modes.origin = origin;
        }
        self.reset_margins();
        self.clamp_cursor();
        self.selection = None;
        self.dirty = true;
    }

    // ── resets ──────────────────────────────────────────────────────

    /// RIS: full reset.
    fn full_reset(&mut self) {
        let cols = self.cols();
        let rows = self.rows();
        self.primary = Grid::new(cols, rows);
        self.alternate = Grid::new(cols, rows);
        self.scrollback.clear();
        self.cursor = Cursor::default();
        self.saved_primary.clear();
        self.saved_alternate.clear();
        self.cursor_style = CursorStyle::default();
        self.dec_modes = DecModes::default();
        self.ansi_modes = AnsiModes::default();
        self.hyperlinks.clear();
        self.current_hyperlink = 0;
        self.images_by_number.clear();
        self.images.clear();
        self.locator.reset();
        self.selection = None;
        self.reset_margins();
        self.reset_tabs();
        self.last_printed = None;
        self.dirty = true;
    }

    /// DECSTR: soft reset — modes and rendition, not the display.
    fn soft_reset(&mut self) {
        self.cursor.attrs = SgrAttrs::default();
        self.cursor.wrap_pending = false;
        self.dec_modes.origin = false;
        self.dec_modes.cursor_visible = true;
        self.dec_modes.application_cursor_keys = false;
        self.dec_modes.application_keypad = false;
        self.ansi_modes.insert = false;
        self.reset_margins();
        self.dirty = true;
    }

    // ── CSI dispatch ────────────────────────────────────────────────

    fn csi_dispatch(&mut self, final_byte: u8) {
        match (self.seq.leader, self.seq.intermediates.as_slice()) {
            (None, []) => self.csi_standard(final_byte),
            (Some(b'?'), []) => self.csi_private(final_byte),
            (Some(b'>'), []) => self.csi_gt(final_byte),
            (None, [b' ']) => {
                if final_byte == b'q' {
                    self.cursor_style = CursorStyle::from_param(self.seq.param_or(0, 0));
                }
            }
            (None, [b'!']) => {
                if final_byte == b'p' {
                    self.soft_reset();
                }
            }
            (None, [b'\'']) => self.csi_locator(final_byte),
            _ => debug!(
                final_byte = final_byte as char as u32,
                "ignoring unknown CSI variant"
            ),
        }
    }

    fn csi_standard(&mut self, final_byte: u8) {
        let bg = self.cursor.attrs.bg;
        match final_byte {
            b'A' => self.cursor_up(self.seq.count_or(0, 1)),
            b'B' | b'e' => self.cursor_down(self.seq.count_or(0, 1)),
            b'C' | b'a' => self.cursor_right(self.seq.count_or(0, 1)),
            b'D' => self.cursor_left(self.seq.count_or(0, 1)),
            b'E' => {
                self.cursor_down(self.seq.count_or(0, 1));
                self.carriage_return();
            }
            b'F' => {
                self.cursor_up(self.seq.count_or(0, 1));
                self.carriage_return();
            }
            b'G' | b'`' => {
                let col = self.seq.count_or(0, 1) - 1;
                let row = if self.dec_modes.origin {
                    self.cursor.row.saturating_sub(self.top())
                } else {
                    self.cursor.row
                };
                self.move_cursor_to(row, col);
            }
            b'H' | b'f' => {
                let row = self.seq.count_or(0, 1) - 1;
                let col = self.seq.count_or(1, 1) - 1;
                self.move_cursor_to(row, col);
            }
            b'd' => {
                let row = self.seq.count_or(0, 1) - 1;
                let col = if self.dec_modes.origin {
                    self.cursor.col.saturating_sub(self.left())
                } else {
                    self.cursor.col
                };
                self.move_cursor_to(row, col);
            }
            b'I' => {
                for _ in 0..self.seq.count_or(0, 1) {
                    self.horizontal_tab();
                }
            }
            b'Z' => self.back_tab(self.seq.count_or(0, 1)),
            b'J' => self.erase_in_display(self.seq.param_or(0, 0)),
            b'K' => self.erase_in_line(self.seq.param_or(0, 0)),
            b'@' => {
                let (row, col, right) = (self.cursor.row, self.cursor.col, self.right());
                let n = self.seq.count_or(0, 1);
                self.grid_mut().insert_chars(row, col, right, n, bg);
                self.dirty = true;
            }
            b'P' => {
                let (row, col, right) = (self.cursor.row, self.cursor.col, self.right());
                let n = self.seq.count_or(0, 1);
                self.grid_mut().delete_chars(row, col, right, n, bg);
                self.dirty = true;
            }
            b'X' => {
                let (row, col) = (self.cursor.row, self.cursor.col);
                let n = self.seq.count_or(0, 1);
                self.grid_mut().erase_chars(row, col, n, bg);
                self.dirty = true;
            }
            b'L' => {
                let (row, top, bottom) = (self.cursor.row, self.top(), self.bottom());
                let n = self.seq.count_or(0, 1);
                self.grid_mut().insert_lines(row, n, top, bottom, bg);
                self.cursor.col = self.left();
                self.dirty = true;
            }
            b'M' => {
                let (row, top, bottom) = (self.cursor.row, self.top(), self.bottom());
                let n = self.seq.count_or(0, 1);
                self.grid_mut().delete_lines(row, n, top, bottom, bg);
                self.cursor.col = self.left();
                self.dirty = true;
            }
            b'S' => self.scroll_region_up(self.seq.count_or(0, 1)),
            b'T' => self.scroll_region_down(self.seq.count_or(0, 1)),
            b'b' => {
                if let Some((ch, width)) = self.last_printed {
                    let n = self.seq.count_or(0, 1);
                    let mut buf = [0u8; 4];
                    let s = ch.encode_utf8(&mut buf).to_string();
                    for _ in 0..n {
                        self.write_grapheme(&s, width as usize);
                    }
                }
            }
            b'r' => {
                let top = self.seq.count_or(0, 1) - 1;
                let bottom = self.seq.param_or(1, 0);
                let bottom = if bottom == 0 { self.rows() } else { bottom };
                if top + 1 < bottom && bottom <= self.rows() {
                    self.margins.top = top;
                    self.margins.bottom = bottom;
                    self.move_cursor_to(0, 0);
                }
            }
            b's' => {
                if self.dec_modes.left_right_margins {
                    let left = self.seq.count_or(0, 1) - 1;
                    let right = self.seq.param_or(1, 0);
                    let right = if right == 0 { self.cols() } else { right };
                    if left + 1 < right && right <= self.cols() {
                        self.margins.left = left;
                        self.margins.right = right;
                        self.move_cursor_to(0, 0);
                    }
                } else if !self.seq.has_params {
                    self.save_cursor();
                }
            }
            b'u' => self.restore_cursor(),
            b'c' => {
                if self.seq.param_or(0, 0) == 0 {
                    // DA1: VT220 family with sixel-free feature list; 29
                    // advertises the text locator.
                    self.reply.extend_from_slice(b"\x1b[?62;4;6;9;15;22;29c");
                }
            }
            b'n' => match self.seq.param_or(0, 0) {
                5 => self.reply.extend_from_slice(b"\x1b[0n"),
                6 => {
                    let (row, col) = if self.dec_modes.origin {
                        (
                            self.cursor.row.saturating_sub(self.top()),
                            self.cursor.col.saturating_sub(self.left()),
                        )
                    } else {
                        (self.cursor.row, self.cursor.col)
                    };
                    self.reply
                        .extend_from_slice(format!("\x1b[{};{}R", row + 1, col + 1).as_bytes());
                }
                _ => {}
            },
            b'g' => match self.seq.param_or(0, 0) {
                0 => {
                    self.tabs.remove(&self.cursor.col);
                }
                3 => self.tabs.clear(),
                _ => {}
            },
            b'h' => self.ansi_set_modes(true),
            b'l' => self.ansi_set_modes(false),
            b'm' => self.select_graphic_rendition(),
            b't' => {
                if self.seq.param_or(0, 0) == 8 {
                    let rows = self.seq.param_or(1, 0);
                    let cols = self.seq.param_or(2, 0);
                    if rows > 0 && cols > 0 {
                        self.events
                            .push_back(ScreenEvent::ResizeRequest { cols, rows });
                    }
                }
            }
            _ => debug!(final_byte, "ignoring unknown CSI"),
        }
    }

    fn csi_gt(&mut self, final_byte: u8) {
        if final_byte == b'c' {
            // DA2: identify as a VT220 descendant.
            self.reply.extend_from_slice(b"\x1b[>1;10;0c");
        }
    }

    fn csi_locator(&mut self, final_byte: u8) {
        match final_byte {
            // DECELR
            b'z' => {
                let units = match self.seq.param_or(1, 0) {
                    1 => CoordinateUnits::Pixels,
                    _ => CoordinateUnits::Cells,
                };
                match self.seq.param_or(0, 0) {
                    0 => self.locator.disable(),
                    1 => self.locator.enable(units),
                    2 => self.locator.enable_once(units),
                    _ => {}
                }
            }
            // DECSLE
            b'{' => {
                for i in 0..self.seq.params.len().max(1) {
                    match self.seq.param_or(i, 0) {
                        0 => self.locator.select_events(EventSet::all(), false),
                        1 => self.locator.select_events(EventSet::BUTTON_DOWN, true),
                        2 => self.locator.select_events(EventSet::BUTTON_DOWN, false),
                        3 => self.locator.select_events(EventSet::BUTTON_UP, true),
                        4 => self.locator.select_events(EventSet::BUTTON_UP, false),
                        _ => {}
                    }
                }
            }
            // DECEFR
            b'w' => {
                let rect = FilterRect {
                    top: self.seq.param_or(0, 0) as u32,
                    left: self.seq.param_or(1, 0) as u32,
                    bottom: self.seq.param_or(2, u16::MAX) as u32,
                    right: self.seq.param_or(3, u16::MAX) as u32,
                };
                self.locator.enable_filter_rect(rect);
            }
            // DECRQLP
            b'|' => self.locator.request_position(),
            _ => {}
        }
    }

    fn erase_in_display(&mut self, mode: u16) {
        let bg = self.cursor.attrs.bg;
        let (row, col) = (self.cursor.row, self.cursor.col);
        match mode {
            0 => self.grid_mut().erase_below(row, col, bg),
            1 => self.grid_mut().erase_above(row, col, bg),
            2 => self.grid_mut().erase_all(bg),
            3 => {
                let lines: Vec<Line> = self.scrollback.drain().collect();
                for line in &lines {
                    self.hyperlinks.release_cells(&line.cells);
                }
            }
            _ => return,
        }
        self.dirty = true;
    }

    fn erase_in_line(&mut self, mode: u16) {
        let bg = self.cursor.attrs.bg;
        let (row, col) = (self.cursor.row, self.cursor.col);
        match mode {
            0 => self.grid_mut().erase_line_right(row, col, bg),
            1 => self.grid_mut().erase_line_left(row, col, bg),
            2 => self.grid_mut().erase_line(row, bg),
            _ => return,
        }
        self.dirty = true;
    }

    fn save_cursor(&mut self) {
        let saved = self.cursor.save(self.dec_modes.origin);
        if self.dec_modes.alternate_screen {
            self.saved_alternate.push(saved);
        } else {
            self.saved_primary.push(saved);
        }
    }

    fn restore_cursor(&mut self) {
        let stack = if self.dec_modes.alternate_screen {
            &mut self.saved_alternate
        } else {
            &mut self.saved_primary
        };
        if let Some(saved) = stack.pop() {
            let origin = self.cursor.restore(&saved);
            self.dec_modes.origin = origin;
            self.clamp_cursor();
        } else {
            // DECRC without DECSC homes the cursor with defaults.
            self.cursor = Cursor::default();
        }
    }

    fn ansi_set_modes(&mut self, enable: bool) {
        for i in 0..self.seq.params.len().max(1) {
            match self.seq.param_or(i, 0) {
                4 => self.ansi_modes.insert = enable,
                20 => self.ansi_modes.newline = enable,
                other => debug!(mode = other, enable, "ignoring ANSI mode"),
            }
        }
    }

    fn dec_set_modes(&mut self, enable: bool) {
        for i in 0..self.seq.params.len().max(1) {
            let mode = self.seq.param_or(i, 0);
            match mode {
                1 => self.dec_modes.application_cursor_keys = enable,
                3 => {
                    // DECCOLM: 132/80 columns. The host performs the actual
                    // resize; the screen clears and homes per the standard.
                    let cols = if enable { 132 } else { 80 };
                    let rows = self.rows();
                    self.events
                        .push_back(ScreenEvent::ResizeRequest { cols, rows });
                    let bg = self.cursor.attrs.bg;
                    self.grid_mut().erase_all(bg);
                    self.reset_margins();
                    self.move_cursor_to(0, 0);
                }
                5 => self.dec_modes.reverse_video = enable,
                6 => {
                    self.dec_modes.origin = enable;
                    self.move_cursor_to(0, 0);
                }
                7 => self.dec_modes.auto_wrap = enable,
                9 => {
                    self.dec_modes.mouse_protocol = if enable {
                        MouseProtocol::X10
                    } else {
                        MouseProtocol::None
                    };
                }
                12 => self.dec_modes.cursor_blink = enable,
                25 => self.dec_modes.cursor_visible = enable,
                47 => {
                    if enable {
                        self.enter_alternate(false);
                    } else {
                        self.leave_alternate();
                    }
                }
                69 => {
                    self.dec_modes.left_right_margins = enable;
                    if !enable {
                        self.margins.left = 0;
                        self.margins.right = self.cols();
                    }
                }
                1000 => {
                    self.dec_modes.mouse_protocol = if enable {
                        MouseProtocol::Normal
                    } else {
                        MouseProtocol::None
                    };
                }
                1002 => {
                    self.dec_modes.mouse_protocol = if enable {
                        MouseProtocol::ButtonEvent
                    } else {
                        MouseProtocol::None
                    };
                }
                1003 => {
                    self.dec_modes.mouse_protocol = if enable {
                        MouseProtocol::AnyEvent
                    } else {
                        MouseProtocol::None
                    };
                }
                1004 => self.dec_modes.focus_events = enable,
                1005 => {
                    self.dec_modes.mouse_encoding = if enable {
                        MouseEncoding::Utf8
                    } else {
                        MouseEncoding::X10
                    };
                }
                1006 => {
                    self.dec_modes.mouse_encoding = if enable {
                        MouseEncoding::Sgr
                    } else {
                        MouseEncoding::X10
                    };
                }
                1015 => {
                    self.dec_modes.mouse_encoding = if enable {
                        MouseEncoding::Urxvt
                    } else {
                        MouseEncoding::X10
                    };
                }
                1047 => {
                    if enable {
                        self.enter_alternate(false);
                    } else {
                        self.leave_alternate();
                    }
                }
                1048 => {
                    if enable {
                        self.save_cursor();
                    } else {
                        self.restore_cursor();
                    }
                }
                1049 => {
                    if enable {
                        self.enter_alternate(true);
                    } else {
                        self.leave_alternate();
                    }
                }
                2004 => self.dec_modes.bracketed_paste = enable,
                other => debug!(mode = other, enable, "ignoring DEC private mode"),
            }
        }
    }

    fn csi_private(&mut self, final_byte: u8) {
        match final_byte {
            b'h' => self.dec_set_modes(true),
            b'l' => self.dec_set_modes(false),
            // DECSED/DECSEL: treat the selective variants like ED/EL.
            b'J' => self.erase_in_display(self.seq.param_or(0, 0)),
            b'K' => self.erase_in_line(self.seq.param_or(0, 0)),
            _ => debug!(final_byte, "ignoring unknown private CSI"),
        }
    }

    // ── SGR ─────────────────────────────────────────────────────────

    fn select_graphic_rendition(&mut self) {
        if self.seq.params.is_empty() {
            self.cursor.attrs.reset();
            return;
        }
        let params = std::mem::take(&mut self.seq.params);
        let mut i = 0;
        while i < params.len() {
            let param = &params[i];
            let code = param.first().copied().unwrap_or(0);
            match code {
                0 => self.cursor.attrs.reset(),
                1 => self.cursor.attrs.flags |= SgrFlags::BOLD,
                2 => self.cursor.attrs.flags |= SgrFlags::DIM,
                3 => self.cursor.attrs.flags |= SgrFlags::ITALIC,
                4 => {
                    // 4:x sub-parameters select the underline style.
                    let style = param.get(1).copied().unwrap_or(1);
                    let flags = &mut self.cursor.attrs.flags;
                    flags.remove(
                        SgrFlags::UNDERLINE | SgrFlags::DOUBLE_UNDERLINE | SgrFlags::CURLY_UNDERLINE,
                    );
                    match style {
                        0 => {}
                        2 => *flags |= SgrFlags::DOUBLE_UNDERLINE,
                        3 => *flags |= SgrFlags::CURLY_UNDERLINE,
                        _ => *flags |= SgrFlags::UNDERLINE,
                    }
                }
                5 | 6 => self.cursor.attrs.flags |= SgrFlags::BLINK,
                7 => self.cursor.attrs.flags |= SgrFlags::INVERSE,
                8 => self.cursor.attrs.flags |= SgrFlags::HIDDEN,
                9 => self.cursor.attrs.flags |= SgrFlags::STRIKETHROUGH,
                21 => self.cursor.attrs.flags |= SgrFlags::DOUBLE_UNDERLINE,
                22 => self
                    .cursor
                    .attrs
                    .flags
                    .remove(SgrFlags::BOLD | SgrFlags::DIM),
                23 => self.cursor.attrs.flags.remove(SgrFlags::ITALIC),
                24 => self.cursor.attrs.flags.remove(
                    SgrFlags::UNDERLINE | SgrFlags::DOUBLE_UNDERLINE | SgrFlags::CURLY_UNDERLINE,
                ),
                25 => self.cursor.attrs.flags.remove(SgrFlags::BLINK),
                27 => self.cursor.attrs.flags.remove(SgrFlags::INVERSE),
                28 => self.cursor.attrs.flags.remove(SgrFlags::HIDDEN),
                29 => self.cursor.attrs.flags.remove(SgrFlags::STRIKETHROUGH),
                30..=37 => self.cursor.attrs.fg = Color::Named((code - 30) as u8),
                38 => {
                    if let Some((color, consumed)) = Self::extended_color(&params, i) {
                        self.cursor.attrs.fg = color;
                        i += consumed;
                    }
                }
                39 => self.cursor.attrs.fg = Color::Default,
                40..=47 => self.cursor.attrs.bg = Color::Named((code - 40) as u8),
                48 => {
                    if let Some((color, consumed)) = Self::extended_color(&params, i) {
                        self.cursor.attrs.bg = color;
                        i += consumed;
                    }
                }
                49 => self.cursor.attrs.bg = Color::Default,
                53 => self.cursor.attrs.flags |= SgrFlags::OVERLINE,
                55 => self.cursor.attrs.flags.remove(SgrFlags::OVERLINE),
                58 => {
                    if let Some((color, consumed)) = Self::extended_color(&params, i) {
                        self.cursor.attrs.underline_color = Some(color);
                        i += consumed;
                    }
                }
                59 => self.cursor.attrs.underline_color = None,
                90..=97 => self.cursor.attrs.fg = Color::Named((code - 90 + 8) as u8),
                100..=107 => self.cursor.attrs.bg = Color::Named((code - 100 + 8) as u8),
                other => debug!(sgr = other, "ignoring SGR parameter"),
            }
            i += 1;
        }
    }

    /// Decode SGR 38/48/58 extended colors, both the colon sub-parameter
    /// form (`38:2::r:g:b`, `38:5:idx`) and the legacy semicolon form
    /// (`38;2;r;g;b`, `38;5;idx`). Returns the color and how many extra
    /// top-level parameters were consumed.
    fn extended_color(params: &[Param], i: usize) -> Option<(Color, usize)> {
        let param = &params[i];
        if param.len() > 1 {
            // Colon form: everything in sub-parameters.
            match param.get(1).copied().unwrap_or(0) {
                2 => {
                    // `38:2:r:g:b` or ISO-style `38:2::r:g:b` (colorspace id).
                    let (r, g, b) = if param.len() >= 6 {
                        (param[3], param[4], param[5])
                    } else if param.len() >= 5 {
                        (param[2], param[3], param[4])
                    } else {
                        return None;
                    };
                    Some((Color::Rgb(r as u8, g as u8, b as u8), 0))
                }
                5 => {
                    let idx = param.get(2).copied().unwrap_or(0);
                    Some((Color::Indexed(idx as u8), 0))
                }
                _ => None,
            }
        } else {
            // Semicolon form: following top-level parameters.
            match params.get(i + 1).and_then(|p| p.first()).copied() {
                Some(2) => {
                    let r = params.get(i + 2).and_then(|p| p.first()).copied()?;
                    let g = params.get(i + 3).and_then(|p| p.first()).copied()?;
                    let b = params.get(i + 4).and_then(|p| p.first()).copied()?;
                    Some((Color::Rgb(r as u8, g as u8, b as u8), 4))
                }
                Some(5) => {
                    let idx = params.get(i + 2).and_then(|p| p.first()).copied()?;
                    Some((Color::Indexed(idx as u8), 2))
                }
                _ => None,
            }
        }
    }

    // ── OSC ─────────────────────────────────────────────────────────

    fn osc_dispatch(&mut self) {
        let buf = std::mem::take(&mut self.osc_buf);
        let Some(semi) = buf.iter().position(|&b| b == b';') else {
            return;
        };
        let Ok(code) = std::str::from_utf8(&buf[..semi]).map(str::parse::<u16>) else {
            return;
        };
        let Ok(code) = code else {
            return;
        };
        let rest = &buf[semi + 1..];

        match code {
            0 | 2 => {
                let title = String::from_utf8_lossy(rest).into_owned();
                self.events
                    .push_back(ScreenEvent::TitleChanged(title.clone()));
                self.title = title;
            }
            8 => self.osc_hyperlink(rest),
            133 => {
                // Shell-integration prompt marks: `OSC 133 ; A` marks the
                // current line as a scrollback anchor.
                if rest.first() == Some(&b'A') {
                    let row = self.cursor.row;
                    if let Some(line) = self.grid_mut().line_mut(row) {
                        line.flags |= LineFlags::MARKED;
                    }
                }
            }
            other => debug!(osc = other, "ignoring OSC"),
        }
    }

    /// `OSC 8 ; params ; uri` — params may carry `id=hint`.
    fn osc_hyperlink(&mut self, rest: &[u8]) {
        let Some(semi) = rest.iter().position(|&b| b == b';') else {
            return;
        };
        let params = &rest[..semi];
        let uri = String::from_utf8_lossy(&rest[semi + 1..]).into_owned();
        if uri.is_empty() {
            self.current_hyperlink = 0;
            return;
        }
        let id_hint = params
            .split(|&b| b == b':')
            .filter_map(|kv| {
                let eq = kv.iter().position(|&b| b == b'=')?;
                if &kv[..eq] == b"id" {
                    Some(String::from_utf8_lossy(&kv[eq + 1..]).into_owned())
                } else {
                    None
                }
            })
            .next();
        self.current_hyperlink = self.hyperlinks.intern(&uri, id_hint.as_deref());
    }

    // ── APC graphics ────────────────────────────────────────────────

    /// Kitty-style graphics: `APC G <k=v,...> ; <base64 payload> ST`.
    fn apc_dispatch(&mut self) {
        let buf = std::mem::take(&mut self.apc_buf);
        if buf.first() != Some(&b'G') {
            debug!(len = buf.len(), "ignoring non-graphics APC");
            return;
        }
        let body = &buf[1..];
        let (control, payload) = match body.iter().position(|&b| b == b';') {
            Some(semi) => (&body[..semi], &body[semi + 1..]),
            None => (body, &[][..]),
        };

        let mut action = b't';
        let mut format = 32u16;
        let mut width = 0u32;
        let mut height = 0u32;
        let mut number = 0u32;
        let mut cols = 0u16;
        let mut rows = 0u16;
        for kv in control.split(|&b| b == b',') {
            let Some(eq) = kv.iter().position(|&b| b == b'=') else {
                continue;
            };
            let (key, value) = (&kv[..eq], &kv[eq + 1..]);
            let as_num = |v: &[u8]| -> u32 {
                std::str::from_utf8(v)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0)
            };
            match key {
                b"a" => action = value.first().copied().unwrap_or(b't'),
                b"f" => format = as_num(value) as u16,
                b"s" => width = as_num(value),
                b"v" => height = as_num(value),
                b"i" => number = as_num(value),
                b"c" => cols = as_num(value) as u16,
                b"r" => rows = as_num(value) as u16,
                _ => {}
            }
        }

        match action {
            b't' | b'T' => {
                let Some(data) = decode_base64(payload) else {
                    warn!("graphics upload with undecodable payload rejected");
                    return;
                };
                let format = match format {
                    24 => ImageFormat::Rgb,
                    32 => ImageFormat::Rgba,
                    100 => ImageFormat::Png,
                    other => {
                        warn!(format = other, "graphics upload with unknown format");
                        return;
                    }
                };
                let size = if format == ImageFormat::Png {
                    // PNG carries its own dimensions; probe them now so
                    // placement can size the raster.
                    match png_dimensions(&data) {
                        Some(size) => size,
                        None => {
                            warn!("png upload with unreadable header rejected");
                            return;
                        }
                    }
                } else {
                    PixelSize::new(width, height)
                };
                let image = match self.images.create(format, size, data) {
                    Ok(image) => image,
                    Err(err) => {
                        warn!(%err, "image upload rejected");
                        return;
                    }
                };
                if number != 0 {
                    self.images_by_number.insert(number, image.clone());
                }
                if action == b'T' {
                    self.place_image(image, cols, rows);
                }
            }
            b'p' => {
                if let Some(image) = self.images_by_number.get(&number).cloned() {
                    self.place_image(image, cols, rows);
                } else {
                    warn!(number, "placement of unknown image");
                }
            }
            b'd' => {
                let id = if number != 0 {
                    self.images_by_number.remove(&number).map(|i| i.id())
                } else {
                    self.images_by_number.clear();
                    None
                };
                self.clear_fragments(id);
            }
            other => debug!(action = other, "ignoring graphics action"),
        }
    }

    /// Rasterize `image` over a rectangle of cells at the cursor and write
    /// fragment references into each cell. The cursor moves below the
    /// placed image.
    fn place_image(&mut self, image: Arc<Image>, cols: u16, rows: u16) {
        let cell_px = self.cell_pixel_size;
        let cw = cell_px.width.max(1);
        let ch = cell_px.height.max(1);
        let span_cols = if cols > 0 {
            cols
        } else {
            ((image.size().width + cw - 1) / cw) as u16
        };
        let span_rows = if rows > 0 {
            rows
        } else {
            ((image.size().height + ch - 1) / ch) as u16
        };
        let span_cols = span_cols.clamp(1, self.cols().max(1));
        let span_rows = span_rows.max(1);

        let raster = self.images.rasterize(
            image,
            AlignmentPolicy::default(),
            ResizePolicy::default(),
            Rgba::TRANSPARENT,
            CellSpan::new(span_cols, span_rows),
            cell_px,
        );

        let start_col = self.cursor.col;
        for r in 0..span_rows {
            if r > 0 {
                self.linefeed();
            }
            let row = self.cursor.row;
            for c in 0..span_cols {
                let col = start_col + c;
                if col >= self.cols() {
                    break;
                }
                if let Some(cell) = self.grid_mut().cell_mut(row, col) {
                    cell.erase(Color::Default);
                    cell.fragment = Some(ImageFragment::new(raster.clone(), c, r));
                }
            }
        }
        self.linefeed();
        self.carriage_return();
        self.dirty = true;
    }

    // ── state snapshot (session resume) ─────────────────────────────

    /// Capture the restorable screen state: grid buffers, scrollback,
    /// cursor, margins, and mode flags. Image fragments are not part of
    /// the blob (uploads do not survive a resume).
    pub fn save_state(&self) -> ScreenSnapshot {
        ScreenSnapshot {
            primary: self.primary.clone(),
            alternate: self.alternate.clone(),
            scrollback: self.scrollback.clone(),
            cursor: self.cursor.clone(),
            margins: self.margins,
            dec_modes: self.dec_modes.clone(),
            ansi_modes: self.ansi_modes,
            tabs: self.tabs.iter().copied().collect(),
            title: self.title.clone(),
        }
    }

    /// Restore state captured by [`Screen::save_state`].
    pub fn restore_state(&mut self, snapshot: ScreenSnapshot) {
        self.primary = snapshot.primary;
        self.alternate = snapshot.alternate;
        self.scrollback = snapshot.scrollback;
        self.cursor = snapshot.cursor;
        self.margins = snapshot.margins;
        self.dec_modes = snapshot.dec_modes;
        self.ansi_modes = snapshot.ansi_modes;
        self.tabs = snapshot.tabs.into_iter().collect();
        self.title = snapshot.title;
        self.selection = None;
        self.clamp_cursor();
        self.dirty = true;
    }

    /// Drop fragment references: all of them, or only one image's.
    fn clear_fragments(&mut self, id: Option<crate::image::ImageId>) {
        let rows = self.rows();
        let cols = self.cols();
        for row in 0..rows {
            for col in 0..cols {
                if let Some(cell) = self.grid_mut().cell_mut(row, col) {
                    let matches = cell
                        .fragment
                        .as_ref()
                        .map(|f| id.map_or(true, |id| f.image_id() == id))
                        .unwrap_or(false);
                    if matches {
                        cell.fragment = None;
                    }
                }
            }
        }
        self.dirty = true;
    }
}

/// Restorable screen state; serialized by the session as an opaque blob.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScreenSnapshot {
    primary: Grid,
    alternate: Grid,
    scrollback: Scrollback,
    cursor: Cursor,
    margins: Margins,
    dec_modes: DecModes,
    ansi_modes: AnsiModes,
    tabs: Vec<u16>,
    title: String,
}

/// One cell of a render frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCell {
    /// Grapheme cluster to draw.
    pub text: String,
    pub width: u8,
    pub flags: crate::cell::CellFlags,
    pub attrs: SgrAttrs,
    pub hyperlink: HyperlinkId,
    pub fragment: Option<ImageFragment>,
}

/// A snapshot of the viewport handed to the render sink.
///
/// Pre-allocate one and refill it each frame with
/// [`Screen::snapshot_into`].
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub cols: u16,
    pub rows: u16,
    pub cells: Vec<RenderCell>,
    pub cursor_row: u16,
    pub cursor_col: u16,
    pub cursor_visible: bool,
    pub cursor_style: CursorStyle,
    pub reverse_video: bool,
    pub selection: Option<Selection>,
    pub background_image: Option<Arc<Image>>,
    pub background_opacity: f32,
    pub title: String,
}

impl Default for RenderFrame {
    fn default() -> Self {
        Self {
            cols: 0,
            rows: 0,
            cells: Vec::new(),
            cursor_row: 0,
            cursor_col: 0,
            cursor_visible: true,
            cursor_style: CursorStyle::default(),
            reverse_video: false,
            selection: None,
            background_image: None,
            background_opacity: 1.0,
            title: String::new(),
        }
    }
}

impl Default for RenderCell {
    fn default() -> Self {
        Self {
            text: " ".to_string(),
            width: 1,
            flags: crate::cell::CellFlags::empty(),
            attrs: SgrAttrs::default(),
            hyperlink: 0,
            fragment: None,
        }
    }
}

// ── parser listener ─────────────────────────────────────────────────

impl parser::Listener for Screen {
    fn print(&mut self, text: &str, _cell_count: usize) {
        for cluster in text.graphemes(true) {
            let width = UnicodeWidthStr::width(cluster);
            self.write_grapheme(cluster, width);
        }
    }

    fn execute(&mut self, control: u8) {
        match control {
            0x07 => self.events.push_back(ScreenEvent::Bell),
            0x08 => {
                let floor = if self.cursor.col > self.left() {
                    self.left()
                } else {
                    0
                };
                if self.cursor.col > floor {
                    self.cursor.col -= 1;
                }
                self.cursor.wrap_pending = false;
            }
            0x09 => self.horizontal_tab(),
            0x0A | 0x0B | 0x0C => self.linefeed(),
            0x0D => self.carriage_return(),
            0x0E => self.cursor.charsets.shift_gl(1), // SO
            0x0F => self.cursor.charsets.shift_gl(0), // SI
            _ => {}
        }
        self.dirty = true;
    }

    fn clear(&mut self) {
        self.seq.reset();
    }

    fn collect(&mut self, byte: u8) {
        if self.seq.intermediates.len() < 2 {
            self.seq.intermediates.push(byte);
        }
    }

    fn collect_leader(&mut self, byte: u8) {
        self.seq.leader = Some(byte);
    }

    fn param(&mut self, byte: u8) {
        // DCS parameter bytes: digits and ';'.
        match byte {
            b'0'..=b'9' => self.seq.push_digit(byte),
            b';' => self.seq.next_param(),
            _ => {}
        }
    }

    fn param_digit(&mut self, digit: u8) {
        self.seq.push_digit(digit);
    }

    fn param_separator(&mut self) {
        self.seq.next_param();
    }

    fn param_sub_separator(&mut self) {
        self.seq.next_sub_param();
    }

    fn dispatch_esc(&mut self, byte: u8) {
        match (self.seq.intermediates.as_slice(), byte) {
            ([], b'7') => self.save_cursor(),
            ([], b'8') => self.restore_cursor(),
            ([], b'D') => self.linefeed(),
            ([], b'E') => {
                self.linefeed();
                self.carriage_return();
            }
            ([], b'H') => {
                self.tabs.insert(self.cursor.col);
            }
            ([], b'M') => self.reverse_index(),
            ([], b'N') => self.cursor.charsets.single_shift(2),
            ([], b'O') => self.cursor.charsets.single_shift(3),
            ([], b'c') => self.full_reset(),
            ([], b'=') => self.dec_modes.application_keypad = true,
            ([], b'>') => self.dec_modes.application_keypad = false,
            ([b'#'], b'8') => {
                self.grid_mut().fill_all('E');
                self.dirty = true;
            }
            ([slot @ (b'(' | b')' | b'*' | b'+')], designator) => {
                let index = match slot {
                    b'(' => 0,
                    b')' => 1,
                    b'*' => 2,
                    _ => 3,
                };
                self.cursor
                    .charsets
                    .designate(index, Charset::from_designator(designator));
            }
            _ => debug!(byte, "ignoring unknown ESC sequence"),
        }
    }

    fn dispatch_csi(&mut self, byte: u8) {
        self.csi_dispatch(byte);
    }

    fn start_osc(&mut self) {
        self.osc_buf.clear();
    }

    fn put_osc(&mut self, byte: u8) {
        if self.osc_buf.len() < MAX_STRING_LEN {
            self.osc_buf.push(byte);
        }
    }

    fn dispatch_osc(&mut self) {
        self.osc_dispatch();
    }

    fn hook(&mut self, byte: u8) {
        self.dcs = Some(DcsKind::Unknown(byte));
        self.dcs_buf.clear();
    }

    fn put(&mut self, byte: u8) {
        if self.dcs_buf.len() < MAX_STRING_LEN {
            self.dcs_buf.push(byte);
        }
    }

    fn unhook(&mut self) {
        if let Some(DcsKind::Unknown(final_byte)) = self.dcs.take() {
            debug!(
                final_byte,
                payload_len = self.dcs_buf.len(),
                "discarding unhandled DCS"
            );
        }
        self.dcs_buf.clear();
    }

    fn start_apc(&mut self) {
        self.apc_buf.clear();
    }

    fn put_apc(&mut self, byte: u8) {
        if self.apc_buf.len() < MAX_STRING_LEN {
            self.apc_buf.push(byte);
        }
    }

    fn dispatch_apc(&mut self) {
        self.apc_dispatch();
    }

    fn start_pm(&mut self) {}

    fn put_pm(&mut self, _byte: u8) {}

    fn dispatch_pm(&mut self) {
        // Privacy messages are accepted and discarded.
    }

    fn error(&mut self, message: &str) {
        debug!(message, "parser error");
    }

    fn print_budget(&self) -> usize {
        // One bulk print never runs past the right margin.
        (self.right().saturating_sub(self.cursor.col)).max(1) as usize
    }
}

// ── base64 / png helpers ────────────────────────────────────────────

/// Decode standard base64 (with `=` padding); whitespace is rejected.
fn decode_base64(data: &[u8]) -> Option<Vec<u8>> {
    fn value(b: u8) -> Option<u32> {
        match b {
            b'A'..=b'Z' => Some((b - b'A') as u32),
            b'a'..=b'z' => Some((b - b'a' + 26) as u32),
            b'0'..=b'9' => Some((b - b'0' + 52) as u32),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let data: Vec<u8> = data.iter().copied().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(data.len() * 3 / 4);
    for chunk in data.chunks(4) {
        let mut acc = 0u32;
        for &b in chunk {
            acc = (acc << 6) | value(b)?;
        }
        match chunk.len() {
            4 => out.extend_from_slice(&[(acc >> 16) as u8, (acc >> 8) as u8, acc as u8]),
            3 => {
                acc <<= 6;
                out.extend_from_slice(&[(acc >> 16) as u8, (acc >> 8) as u8]);
            }
            2 => {
                acc <<= 12;
                out.push((acc >> 16) as u8);
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Read width/height from a PNG IHDR without a full decode.
fn png_dimensions(data: &[u8]) -> Option<PixelSize> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
    if data.len() < 24 || data[..8] != SIGNATURE || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    Some(PixelSize::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn screen(cols: u16, rows: u16) -> (Parser, Screen) {
        let parser = Parser::new();
        let screen = Screen::new(ScreenConfig {
            cols,
            rows,
            scrollback_capacity: 100,
            ..ScreenConfig::default()
        });
        (parser, screen)
    }

    fn feed(parser: &mut Parser, screen: &mut Screen, bytes: &[u8]) {
        parser.feed(bytes, screen);
    }

    fn cell_char(screen: &Screen, row: u16, col: u16) -> char {
        screen
            .grid()
            .cell(row, col)
            .map(Cell::content)
            .unwrap_or('\0')
    }

    fn row_text(screen: &Screen, row: u16) -> String {
        screen
            .grid()
            .line(row)
            .map(|l| l.text())
            .unwrap_or_default()
    }

    // ── printing & cursor ───────────────────────────────────────────

    #[test]
    fn plain_text_advances_cursor() {
        let (mut p, mut s) = screen(10, 3);
        feed(&mut p, &mut s, b"abc");
        assert_eq!(row_text(&s, 0).trim_end(), "abc");
        assert_eq!((s.cursor().row, s.cursor().col), (0, 3));
    }

    #[test]
    fn crlf_moves_to_next_line() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"A\r\nB");
        assert_eq!(cell_char(&s, 0, 0), 'A');
        assert_eq!(cell_char(&s, 1, 0), 'B');
        assert_eq!((s.cursor().row, s.cursor().col), (1, 1));
    }

    #[test]
    fn wrap_pending_defers_the_wrap() {
        let (mut p, mut s) = screen(3, 3);
        feed(&mut p, &mut s, b"abc");
        // Cursor parks on the last column with wrap pending.
        assert_eq!((s.cursor().row, s.cursor().col), (0, 2));
        assert!(s.cursor().wrap_pending);
        feed(&mut p, &mut s, b"d");
        assert_eq!(cell_char(&s, 1, 0), 'd');
        assert!(s.grid().line(1).is_some_and(Line::wrapped));
    }

    #[test]
    fn autowrap_off_overwrites_last_column() {
        let (mut p, mut s) = screen(3, 2);
        feed(&mut p, &mut s, b"\x1b[?7labcd");
        assert_eq!(row_text(&s, 0), "abd");
        assert_eq!(s.cursor().row, 0);
    }

    #[test]
    fn wide_char_occupies_two_cells() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, "中".as_bytes());
        assert!(s.grid().cell(0, 0).is_some_and(Cell::is_wide));
        assert!(s.grid().cell(0, 1).is_some_and(Cell::is_wide_continuation));
        assert_eq!(s.cursor().col, 2);
    }

    #[test]
    fn wide_char_wraps_when_one_column_remains() {
        let (mut p, mut s) = screen(3, 2);
        feed(&mut p, &mut s, b"ab");
        feed(&mut p, &mut s, "中".as_bytes());
        // Does not fit in the last column: wraps whole.
        assert_eq!(cell_char(&s, 1, 0), '中');
        assert!(s.grid().line(1).is_some_and(Line::wrapped));
    }

    #[test]
    fn combining_mark_attaches_to_previous_cell() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, "e\u{0301}".as_bytes());
        let cell = s.grid().cell(0, 0).expect("cell");
        assert_eq!(cell.grapheme(), "e\u{0301}");
        assert_eq!(s.cursor().col, 1);
    }

    #[test]
    fn backspace_then_overwrite_clears_cell() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"x\x08 ");
        assert_eq!(cell_char(&s, 0, 0), ' ');
    }

    #[test]
    fn tabs_stop_every_eight_columns() {
        let (mut p, mut s) = screen(20, 2);
        feed(&mut p, &mut s, b"\ta");
        assert_eq!(cell_char(&s, 0, 8), 'a');
    }

    #[test]
    fn set_and_clear_tab_stops() {
        let (mut p, mut s) = screen(20, 2);
        feed(&mut p, &mut s, b"\x1b[5G\x1bH\r\t");
        assert_eq!(s.cursor().col, 4);
        feed(&mut p, &mut s, b"\x1b[3g\r\t");
        // All stops cleared: tab runs to the right margin.
        assert_eq!(s.cursor().col, 19);
    }

    // ── CSI cursor movement ─────────────────────────────────────────

    #[test]
    fn cup_moves_cursor_one_based() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b[5;10H");
        assert_eq!((s.cursor().row, s.cursor().col), (4, 9));
    }

    #[test]
    fn relative_moves_clamp_to_margins() {
        let (mut p, mut s) = screen(10, 5);
        feed(&mut p, &mut s, b"\x1b[99B\x1b[99C");
        assert_eq!((s.cursor().row, s.cursor().col), (4, 9));
        feed(&mut p, &mut s, b"\x1b[99A\x1b[99D");
        assert_eq!((s.cursor().row, s.cursor().col), (0, 0));
    }

    #[test]
    fn rep_repeats_last_grapheme() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"x\x1b[3b");
        assert_eq!(row_text(&s, 0).trim_end(), "xxxx");
    }

    // ── erase ───────────────────────────────────────────────────────

    #[test]
    fn erase_display_variants() {
        let (mut p, mut s) = screen(4, 3);
        feed(&mut p, &mut s, b"aaaa\r\nbbbb\r\ncccc\x1b[2;2H\x1b[0J");
        assert_eq!(row_text(&s, 0), "aaaa");
        assert_eq!(row_text(&s, 1), "b   ");
        assert_eq!(row_text(&s, 2), "    ");
    }

    #[test]
    fn erase_scrollback_with_ed3() {
        let (mut p, mut s) = screen(2, 2);
        feed(&mut p, &mut s, b"a\r\nb\r\nc\r\nd");
        assert!(s.scrollback().len() > 0);
        feed(&mut p, &mut s, b"\x1b[3J");
        assert_eq!(s.scrollback().len(), 0);
    }

    #[test]
    fn bce_fills_erased_cells_with_background() {
        let (mut p, mut s) = screen(4, 2);
        feed(&mut p, &mut s, b"\x1b[44mx\x1b[K");
        assert_eq!(
            s.grid().cell(0, 2).map(|c| c.attrs.bg),
            Some(Color::Named(4))
        );
    }

    // ── scrolling & margins ─────────────────────────────────────────

    #[test]
    fn linefeed_at_bottom_scrolls_into_scrollback() {
        let (mut p, mut s) = screen(2, 2);
        feed(&mut p, &mut s, b"a\r\nb\r\nc");
        assert_eq!(s.scrollback().len(), 1);
        assert_eq!(
            s.scrollback().line(0).map(|l| l.text()),
            Some("a ".to_string())
        );
        assert_eq!(row_text(&s, 0), "b ");
        assert_eq!(row_text(&s, 1), "c ");
    }

    #[test]
    fn decstbm_limits_scrolling() {
        let (mut p, mut s) = screen(2, 4);
        feed(&mut p, &mut s, b"a\r\nb\r\nc\r\nd");
        // Region rows 2..3 (1-based), scroll once.
        feed(&mut p, &mut s, b"\x1b[2;3r\x1b[2;1Hx\x1b[3;1H\ny");
        // Row 0 (a) and row 3 (d) are outside the region and untouched.
        assert_eq!(row_text(&s, 0), "a ");
        assert_eq!(row_text(&s, 3), "d ");
    }

    #[test]
    fn decstbm_homes_cursor() {
        let (mut p, mut s) = screen(10, 6);
        feed(&mut p, &mut s, b"\x1b[3;3H\x1b[2;5r");
        assert_eq!((s.cursor().row, s.cursor().col), (0, 0));
    }

    #[test]
    fn origin_mode_addresses_relative_to_margins() {
        let (mut p, mut s) = screen(10, 6);
        feed(&mut p, &mut s, b"\x1b[2;5r\x1b[?6h\x1b[1;1HX");
        assert_eq!(cell_char(&s, 1, 0), 'X');
    }

    #[test]
    fn scrollback_respects_capacity() {
        let mut parser = Parser::new();
        let mut s = Screen::new(ScreenConfig {
            cols: 2,
            rows: 2,
            scrollback_capacity: 2,
            ..ScreenConfig::default()
        });
        for i in 0..6 {
            feed(&mut parser, &mut s, format!("{i}\r\n").as_bytes());
        }
        assert_eq!(s.scrollback().len(), 2);
    }

    #[test]
    fn decslrm_sets_left_right_margins() {
        let (mut p, mut s) = screen(8, 3);
        feed(&mut p, &mut s, b"\x1b[?69h\x1b[3;6s");
        assert_eq!(s.margins().left, 2);
        assert_eq!(s.margins().right, 6);
        // Without DECLRMM, CSI s saves the cursor instead.
        feed(&mut p, &mut s, b"\x1b[?69l");
        assert_eq!(s.margins().left, 0);
        assert_eq!(s.margins().right, 8);
    }

    #[test]
    fn ri_at_top_scrolls_down() {
        let (mut p, mut s) = screen(2, 3);
        feed(&mut p, &mut s, b"a\r\nb\x1b[1;1H\x1bM");
        assert_eq!(row_text(&s, 1), "a ");
    }

    // ── SGR ─────────────────────────────────────────────────────────

    #[test]
    fn sgr_named_and_reset() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b[31mX\x1b[0mY");
        assert_eq!(
            s.grid().cell(0, 0).map(|c| c.attrs.fg),
            Some(Color::Named(1))
        );
        assert_eq!(s.grid().cell(0, 1).map(|c| c.attrs.fg), Some(Color::Default));
    }

    #[test]
    fn sgr_truecolor_semicolon_form() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b[38;2;10;20;30m");
        assert_eq!(s.cursor().attrs.fg, Color::Rgb(10, 20, 30));
    }

    #[test]
    fn sgr_truecolor_colon_form() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b[38:2:10:20:30m");
        assert_eq!(s.cursor().attrs.fg, Color::Rgb(10, 20, 30));
        feed(&mut p, &mut s, b"\x1b[48:5:42m");
        assert_eq!(s.cursor().attrs.bg, Color::Indexed(42));
    }

    #[test]
    fn sgr_indexed_and_bright() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b[38;5;100m\x1b[92m");
        // 92 (bright green) overrides the indexed color.
        assert_eq!(s.cursor().attrs.fg, Color::Named(10));
    }

    #[test]
    fn sgr_underline_styles_via_subparams() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b[4:3m");
        assert!(s.cursor().attrs.flags.contains(SgrFlags::CURLY_UNDERLINE));
        feed(&mut p, &mut s, b"\x1b[24m");
        assert!(!s.cursor().attrs.flags.contains(SgrFlags::CURLY_UNDERLINE));
    }

    #[test]
    fn sgr_underline_color() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b[58;2;1;2;3m");
        assert_eq!(s.cursor().attrs.underline_color, Some(Color::Rgb(1, 2, 3)));
        feed(&mut p, &mut s, b"\x1b[59m");
        assert_eq!(s.cursor().attrs.underline_color, None);
    }

    #[test]
    fn sgr_flags_accumulate_and_clear() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b[1;3;7m");
        let flags = s.cursor().attrs.flags;
        assert!(flags.contains(SgrFlags::BOLD));
        assert!(flags.contains(SgrFlags::ITALIC));
        assert!(flags.contains(SgrFlags::INVERSE));
        feed(&mut p, &mut s, b"\x1b[22;23;27m");
        assert!(s.cursor().attrs.flags.is_empty());
    }

    // ── modes ───────────────────────────────────────────────────────

    #[test]
    fn decset_roundtrip_for_common_modes() {
        let (mut p, mut s) = screen(10, 4);
        feed(&mut p, &mut s, b"\x1b[?1h\x1b[?25l\x1b[?2004h\x1b[?1004h");
        assert!(s.modes().application_cursor_keys);
        assert!(!s.modes().cursor_visible);
        assert!(s.modes().bracketed_paste);
        assert!(s.modes().focus_events);
        feed(&mut p, &mut s, b"\x1b[?1l\x1b[?25h\x1b[?2004l\x1b[?1004l");
        assert!(!s.modes().application_cursor_keys);
        assert!(s.modes().cursor_visible);
        assert!(!s.modes().bracketed_paste);
        assert!(!s.modes().focus_events);
    }

    #[test]
    fn mouse_mode_negotiation() {
        let (mut p, mut s) = screen(10, 4);
        feed(&mut p, &mut s, b"\x1b[?1002h\x1b[?1006h");
        assert_eq!(s.modes().mouse_protocol, MouseProtocol::ButtonEvent);
        assert_eq!(s.modes().mouse_encoding, MouseEncoding::Sgr);
        feed(&mut p, &mut s, b"\x1b[?1006l\x1b[?1002l");
        assert_eq!(s.modes().mouse_protocol, MouseProtocol::None);
        assert_eq!(s.modes().mouse_encoding, MouseEncoding::X10);
    }

    #[test]
    fn insert_mode_shifts_existing_text() {
        let (mut p, mut s) = screen(6, 2);
        feed(&mut p, &mut s, b"abc\x1b[1;1H\x1b[4hX");
        assert_eq!(row_text(&s, 0), "Xabc  ");
        feed(&mut p, &mut s, b"\x1b[4l");
        assert!(!s.ansi_modes().insert);
    }

    // ── alternate screen ────────────────────────────────────────────

    #[test]
    fn alt_screen_1049_saves_and_restores() {
        let (mut p, mut s) = screen(10, 4);
        feed(&mut p, &mut s, b"primary\x1b[?1049h");
        assert!(s.modes().alternate_screen);
        assert_eq!(row_text(&s, 0).trim_end(), "");
        assert_eq!((s.cursor().row, s.cursor().col), (0, 0));
        feed(&mut p, &mut s, b"alt");
        feed(&mut p, &mut s, b"\x1b[?1049l");
        assert!(!s.modes().alternate_screen);
        assert_eq!(row_text(&s, 0).trim_end(), "primary");
        assert_eq!(s.cursor().col, 7);
    }

    #[test]
    fn alt_screen_47_preserves_content() {
        let (mut p, mut s) = screen(10, 4);
        feed(&mut p, &mut s, b"\x1b[?47halt\x1b[?47l\x1b[?47h");
        // Mode 47 re-entry does not clear the alternate buffer.
        assert_eq!(row_text(&s, 0).trim_end(), "alt");
    }

    #[test]
    fn alt_screen_has_no_scrollback() {
        let (mut p, mut s) = screen(2, 2);
        feed(&mut p, &mut s, b"\x1b[?1049h");
        for _ in 0..5 {
            feed(&mut p, &mut s, b"x\r\n");
        }
        assert_eq!(s.scrollback().len(), 0);
    }

    // ── reports ─────────────────────────────────────────────────────

    #[test]
    fn cpr_reports_cursor_position() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b[5;10H\x1b[6n");
        assert_eq!(s.take_replies(), b"\x1b[5;10R".to_vec());
    }

    #[test]
    fn dsr_reports_ok() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b[5n");
        assert_eq!(s.take_replies(), b"\x1b[0n".to_vec());
    }

    #[test]
    fn da1_and_da2_reply() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b[c");
        let reply = s.take_replies();
        assert!(reply.starts_with(b"\x1b[?62"));
        feed(&mut p, &mut s, b"\x1b[>c");
        assert_eq!(s.take_replies(), b"\x1b[>1;10;0c".to_vec());
    }

    #[test]
    fn xtwinops_8_requests_resize() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b[8;30;100t");
        assert_eq!(
            s.pop_event(),
            Some(ScreenEvent::ResizeRequest {
                cols: 100,
                rows: 30
            })
        );
    }

    // ── OSC ─────────────────────────────────────────────────────────

    #[test]
    fn osc_title() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b]2;hello\x07");
        assert_eq!(s.title(), "hello");
        assert_eq!(
            s.pop_event(),
            Some(ScreenEvent::TitleChanged("hello".to_string()))
        );
    }

    #[test]
    fn osc8_hyperlinks_span_cells() {
        let (mut p, mut s) = screen(20, 2);
        feed(&mut p, &mut s, b"\x1b]8;;https://example\x07LINK\x1b]8;;\x07X");
        let id = s.grid().cell(0, 0).map(|c| c.hyperlink).unwrap_or(0);
        assert_ne!(id, 0);
        for col in 1..4 {
            assert_eq!(s.grid().cell(0, col).map(|c| c.hyperlink), Some(id));
        }
        assert_eq!(s.hyperlinks().uri(id), Some("https://example"));
        // The cell after the link end carries no hyperlink.
        assert_eq!(s.grid().cell(0, 4).map(|c| c.hyperlink), Some(0));
    }

    #[test]
    fn osc8_id_hint_distinguishes_links() {
        let (mut p, mut s) = screen(20, 2);
        feed(&mut p, &mut s, b"\x1b]8;id=a;https://x\x07P\x1b]8;id=b;https://x\x07Q");
        let id_a = s.grid().cell(0, 0).map(|c| c.hyperlink).unwrap_or(0);
        let id_b = s.grid().cell(0, 1).map(|c| c.hyperlink).unwrap_or(0);
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn osc133_marks_prompt_line() {
        let (mut p, mut s) = screen(10, 3);
        feed(&mut p, &mut s, b"\x1b]133;A\x07$ ");
        assert!(s.grid().line(0).is_some_and(Line::marked));
    }

    // ── charsets ────────────────────────────────────────────────────

    #[test]
    fn dec_special_graphics_via_designation() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b(0qx\x1b(Bq");
        assert_eq!(cell_char(&s, 0, 0), '─');
        assert_eq!(cell_char(&s, 0, 1), '│');
        assert_eq!(cell_char(&s, 0, 2), 'q');
    }

    #[test]
    fn shift_out_in_switch_charsets() {
        let (mut p, mut s) = screen(10, 2);
        feed(&mut p, &mut s, b"\x1b)0\x0eq\x0fq");
        assert_eq!(cell_char(&s, 0, 0), '─');
        assert_eq!(cell_char(&s, 0, 1), 'q');
    }

    // ── reset ───────────────────────────────────────────────────────

    #[test]
    fn ris_resets_everything() {
        let (mut p, mut s) = screen(10, 3);
        feed(&mut p, &mut s, b"\x1b[31mhello\x1b]2;t\x07\x1b[2;5r\x1bc");
        assert_eq!(row_text(&s, 0).trim_end(), "");
        assert_eq!(s.cursor().attrs, SgrAttrs::default());
        assert_eq!(s.margins().top, 0);
        assert_eq!(s.margins().bottom, 3);
    }

    #[test]
    fn decstr_preserves_display() {
        let (mut p, mut s) = screen(10, 3);
        feed(&mut p, &mut s, b"hi\x1b[31m\x1b[2;3r\x1b[!p");
        assert_eq!(row_text(&s, 0).trim_end(), "hi");
        assert_eq!(s.cursor().attrs, SgrAttrs::default());
        assert_eq!(s.margins().bottom, 3);
    }

    // ── resize ──────────────────────────────────────────────────────

    #[test]
    fn resize_updates_dimensions_and_margins() {
        let (mut p, mut s) = screen(10, 4);
        feed(&mut p, &mut s, b"hello");
        s.resize(20, 6);
        assert_eq!(s.cols(), 20);
        assert_eq!(s.rows(), 6);
        assert_eq!(s.margins().right, 20);
        assert_eq!(s.margins().bottom, 6);
        assert_eq!(row_text(&s, 0).trim_end(), "hello");
    }

    #[test]
    fn reflow_resize_rewraps_long_line() {
        let mut parser = Parser::new();
        let mut s = Screen::new(ScreenConfig {
            cols: 8,
            rows: 3,
            reflow: true,
            ..ScreenConfig::default()
        });
        feed(&mut parser, &mut s, b"abcdefgh");
        s.resize(4, 3);
        assert_eq!(row_text(&s, 0), "abcd");
        assert_eq!(row_text(&s, 1), "efgh");
        assert!(s.grid().line(1).is_some_and(Line::wrapped));
    }

    // ── locator wiring ──────────────────────────────────────────────

    #[test]
    fn decelr_decsle_enable_reporting() {
        let (mut p, mut s) = screen(80, 24);
        // DECELR 1 (cells), DECSLE 1 (button down).
        feed(&mut p, &mut s, b"\x1b[1'z\x1b[1'{");
        s.locator_update(
            Button::Left,
            true,
            CellPosition { row: 10, col: 5 },
        );
        assert_eq!(s.take_replies(), b"\x1b[2;1;10;5;1&w".to_vec());
    }

    #[test]
    fn decrqlp_appends_position_report() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b[1'z");
        s.locator_update(Button::None, false, CellPosition { row: 3, col: 7 });
        feed(&mut p, &mut s, b"\x1b[0'|");
        assert_eq!(s.take_replies(), b"\x1b[1;0;3;7;1&w".to_vec());
    }

    #[test]
    fn decefr_filter_rectangle() {
        let (mut p, mut s) = screen(80, 24);
        feed(&mut p, &mut s, b"\x1b[1'z\x1b[0;0;5;5'w");
        s.locator_update(Button::None, false, CellPosition { row: 9, col: 0 });
        let reply = s.take_replies();
        assert!(reply.starts_with(b"\x1b[10;"), "outside event: {reply:?}");
    }

    // ── images ──────────────────────────────────────────────────────

    fn b64(data: &[u8]) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        let mut out = String::new();
        for chunk in data.chunks(3) {
            let b = [
                chunk[0],
                chunk.get(1).copied().unwrap_or(0),
                chunk.get(2).copied().unwrap_or(0),
            ];
            let acc = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
            out.push(ALPHABET[(acc >> 18) as usize & 63] as char);
            out.push(ALPHABET[(acc >> 12) as usize & 63] as char);
            out.push(if chunk.len() > 1 {
                ALPHABET[(acc >> 6) as usize & 63] as char
            } else {
                '='
            });
            out.push(if chunk.len() > 2 {
                ALPHABET[acc as usize & 63] as char
            } else {
                '='
            });
        }
        out
    }

    #[test]
    fn apc_graphics_upload_and_place() {
        let (mut p, mut s) = screen(10, 5);
        // 1x1 RGBA pixel placed over a 2x1 cell rectangle.
        let payload = b64(&[1, 2, 3, 255]);
        let seq = format!("\x1b_Ga=T,f=32,s=1,v=1,i=7,c=2,r=1;{payload}\x1b\\");
        feed(&mut p, &mut s, seq.as_bytes());
        let frag = s.grid().cell(0, 0).and_then(|c| c.fragment.clone());
        let frag = frag.expect("fragment placed");
        assert_eq!(frag.offset(), (0, 0));
        assert!(s.grid().cell(0, 1).and_then(|c| c.fragment.clone()).is_some());
        assert!(s.grid().cell(0, 2).and_then(|c| c.fragment.clone()).is_none());
        assert_eq!(s.images().stats().instances(), 1);
        // Cursor moved below the image.
        assert_eq!(s.cursor().row, 1);
    }

    #[test]
    fn apc_graphics_place_by_number_and_delete() {
        let (mut p, mut s) = screen(10, 5);
        let payload = b64(&[9, 9, 9, 255]);
        let upload = format!("\x1b_Ga=t,f=32,s=1,v=1,i=3;{payload}\x1b\\");
        feed(&mut p, &mut s, upload.as_bytes());
        assert!(s.grid().cell(0, 0).and_then(|c| c.fragment.clone()).is_none());

        feed(&mut p, &mut s, b"\x1b_Ga=p,i=3,c=1,r=1;\x1b\\");
        assert!(s.grid().cell(0, 0).and_then(|c| c.fragment.clone()).is_some());

        feed(&mut p, &mut s, b"\x1b_Ga=d,i=3;\x1b\\");
        assert!(s.grid().cell(0, 0).and_then(|c| c.fragment.clone()).is_none());
    }

    #[test]
    fn apc_graphics_rejects_bad_payload() {
        let (mut p, mut s) = screen(10, 5);
        feed(&mut p, &mut s, b"\x1b_Ga=T,f=32,s=1,v=1;!!!\x1b\\");
        assert!(s.grid().cell(0, 0).and_then(|c| c.fragment.clone()).is_none());
        assert_eq!(s.images().stats().instances(), 0);
    }

    // ── scenario: hyperlink refcounts through scrollback ────────────

    #[test]
    fn hyperlink_released_when_scrolled_out_and_erased() {
        let (mut p, mut s) = screen(4, 2);
        feed(&mut p, &mut s, b"\x1b]8;;https://t\x07ab\x1b]8;;\x07\r\n");
        let id = s.grid().cell(0, 0).map(|c| c.hyperlink).unwrap_or(0);
        assert!(s.hyperlinks().contains(id));
        // Scroll the link line out and drop the scrollback.
        feed(&mut p, &mut s, b"\r\nx\r\ny\r\nz\x1b[3J");
        assert!(!s.hyperlinks().contains(id));
    }

    // ── snapshot ────────────────────────────────────────────────────

    #[test]
    fn snapshot_reflects_grid_and_cursor() {
        let (mut p, mut s) = screen(4, 2);
        feed(&mut p, &mut s, b"\x1b[31mhi\x1b]2;t\x07");
        let mut frame = RenderFrame::default();
        s.snapshot_into(&mut frame);
        assert_eq!(frame.cols, 4);
        assert_eq!(frame.rows, 2);
        assert_eq!(frame.cells.len(), 8);
        assert_eq!(frame.cells[0].text, "h");
        assert_eq!(frame.cells[0].attrs.fg, Color::Named(1));
        assert_eq!((frame.cursor_row, frame.cursor_col), (0, 2));
        assert!(frame.cursor_visible);
        assert_eq!(frame.title, "t");
        // Refill reuses the same frame.
        s.snapshot_into(&mut frame);
        assert_eq!(frame.cells.len(), 8);
    }

    #[test]
    fn base64_roundtrip() {
        for data in [&b"f"[..], b"fo", b"foo", b"foob", b"fooba", b"foobar"] {
            let encoded = b64(data);
            assert_eq!(
                decode_base64(encoded.as_bytes()).as_deref(),
                Some(data),
                "roundtrip of {data:?}"
            );
        }
        assert!(decode_base64(b"!!").is_none());
    }

    #[test]
    fn png_dimensions_read_ihdr() {
        let mut data = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&640u32.to_be_bytes());
        data.extend_from_slice(&480u32.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        assert_eq!(png_dimensions(&data), Some(PixelSize::new(640, 480)));
        assert_eq!(png_dimensions(b"not a png"), None);
    }
}
