//! DEC Text Locator extension (DEC STD 070, section 13).
//!
//! The locator is a mouse reporting mode predating xterm tracking: the
//! application selects which events it wants (DECSLE), arms reporting in
//! cell or pixel units (DECELR), optionally with a one-shot filter
//! rectangle (DECEFR), and the terminal appends `CSI Pe;Pb;Pr;Pc;Pp &w`
//! reports to a reply buffer that the session drains to the PTY.
//!
//! Replies are double-buffered: events append to the back slot while a
//! reader may fetch the previously built slot, so appenders always write
//! into an empty buffer after a fetch.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Locator reporting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportingMode {
    /// DECELR 0.
    #[default]
    Disabled,
    /// DECELR 1: report every selected event.
    Enabled,
    /// DECELR 2: report one selected event, then disable.
    EnabledOnce,
    /// DECEFR: report once when the locator leaves the filter rectangle.
    FilterRectangular,
}

/// Units for locator coordinates (DECELR parameter 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordinateUnits {
    #[default]
    Cells,
    Pixels,
}

bitflags! {
    /// Which events DECSLE selected. An empty set means explicit
    /// (DECRQLP-only) reporting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct EventSet: u8 {
        const BUTTON_DOWN = 1 << 0;
        const BUTTON_UP   = 1 << 1;
    }
}

/// Mouse buttons as the locator sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Button {
    /// Plain motion, no button change.
    None,
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
}

/// `Pe` event codes of DECLRP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum EventCode {
    LocatorUnavailable = 0,
    Request = 1,
    LeftDown = 2,
    LeftUp = 3,
    MiddleDown = 4,
    MiddleUp = 5,
    RightDown = 6,
    RightUp = 7,
    WheelDown = 8,
    WheelUp = 9,
    Outside = 10,
}

/// A cell position (`row`, `col`), zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellPosition {
    pub row: u16,
    pub col: u16,
}

/// A pixel position (`y`, `x`) relative to the grid's top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelPosition {
    pub y: u32,
    pub x: u32,
}

/// Filter rectangle in the active coordinate units, inclusive edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterRect {
    pub top: u32,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
}

impl FilterRect {
    fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.top && row <= self.bottom && col >= self.left && col <= self.right
    }
}

/// DEC Text Locator state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Locator {
    mode: ReportingMode,
    units: CoordinateUnits,
    selected: EventSet,
    filter: FilterRect,

    cell: CellPosition,
    pixel: PixelPosition,
    /// Bitmask of currently pressed buttons: Left=1, Middle=2, Right=4.
    pressed: u8,

    /// Two reply slots; `back` indexes the one being built.
    reply: [String; 2],
    back: usize,
}

impl Locator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to power-on state; pending replies are dropped.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mode(&self) -> ReportingMode {
        self.mode
    }

    pub fn units(&self) -> CoordinateUnits {
        self.units
    }

    // ── DECSLE ──────────────────────────────────────────────────────

    /// Select or deselect an event class.
    pub fn select_events(&mut self, events: EventSet, enabled: bool) {
        self.selected.set(events, enabled);
    }

    /// Whether the locator only answers explicit DECRQLP requests.
    pub fn explicit_only(&self) -> bool {
        self.selected.is_empty()
    }

    // ── DECELR / DECEFR ─────────────────────────────────────────────

    /// DECELR 0: disable reporting (cancels any filter rectangle).
    pub fn disable(&mut self) {
        self.mode = ReportingMode::Disabled;
    }

    /// DECELR 1.
    pub fn enable(&mut self, units: CoordinateUnits) {
        self.mode = ReportingMode::Enabled;
        self.units = units;
    }

    /// DECELR 2: one-shot reporting.
    pub fn enable_once(&mut self, units: CoordinateUnits) {
        self.mode = ReportingMode::EnabledOnce;
        self.units = units;
    }

    /// DECEFR: arm a one-shot filter rectangle. Cancelled by any DECELR.
    pub fn enable_filter_rect(&mut self, rect: FilterRect) {
        self.mode = ReportingMode::FilterRectangular;
        self.filter = rect;
    }

    pub fn filter_rect_enabled(&self) -> bool {
        self.mode == ReportingMode::FilterRectangular
    }

    // ── Reports ─────────────────────────────────────────────────────

    /// DECRQLP: append a locator position report.
    ///
    /// Disabled reporting answers `CSI 0 & w` (locator unavailable).
    pub fn request_position(&mut self) {
        if self.mode == ReportingMode::Disabled {
            self.reply[self.back].push_str("\x1b[0&w");
            return;
        }
        let (row, col) = self.report_coordinates();
        self.append_report(EventCode::Request, row, col);
    }

    /// Feed a mouse update: `button` (`Button::None` for pure motion),
    /// whether it was pressed, and the position in both unit systems.
    pub fn update(
        &mut self,
        button: Button,
        pressed: bool,
        cell: CellPosition,
        pixel: PixelPosition,
    ) {
        self.cell = cell;
        self.pixel = pixel;
        self.track_buttons(button, pressed);

        match self.mode {
            ReportingMode::Disabled => {}
            ReportingMode::Enabled => {
                if let Some(code) = self.selected_event(button, pressed) {
                    let (row, col) = self.report_coordinates();
                    self.append_report(code, row, col);
                }
            }
            ReportingMode::EnabledOnce => {
                // Fires on the first event that is both selected and
                // delivered, then disables.
                if let Some(code) = self.selected_event(button, pressed) {
                    let (row, col) = self.report_coordinates();
                    self.append_report(code, row, col);
                    self.mode = ReportingMode::Disabled;
                }
            }
            ReportingMode::FilterRectangular => {
                let (row, col) = self.report_coordinates();
                if !self.filter.contains(row, col) {
                    self.append_report(EventCode::Outside, row, col);
                    self.mode = ReportingMode::Disabled;
                }
            }
        }
    }

    /// Peek at the pending reply without consuming it.
    pub fn peek_reply(&self) -> &str {
        &self.reply[self.back]
    }

    /// Swap the reply slots, returning the previously buffered content.
    /// New events append to the now-empty other slot.
    pub fn fetch_reply_and_clear(&mut self) -> String {
        let fetched = std::mem::take(&mut self.reply[self.back]);
        self.back = (self.back + 1) % 2;
        fetched
    }

    // ── internals ───────────────────────────────────────────────────

    fn track_buttons(&mut self, button: Button, pressed: bool) {
        let bit = match button {
            Button::Left => 1,
            Button::Middle => 2,
            Button::Right => 4,
            // Wheel "buttons" never stay pressed.
            Button::None | Button::WheelUp | Button::WheelDown => 0,
        };
        if pressed {
            self.pressed |= bit;
        } else {
            self.pressed &= !bit;
        }
    }

    /// Map a button change to its event code, filtered by the selected
    /// event set. Wheel produces down/up codes only and counts as a
    /// button-down event for selection purposes.
    fn selected_event(&self, button: Button, pressed: bool) -> Option<EventCode> {
        let (code, is_down) = match (button, pressed) {
            (Button::None, _) => return None,
            (Button::Left, true) => (EventCode::LeftDown, true),
            (Button::Left, false) => (EventCode::LeftUp, false),
            (Button::Middle, true) => (EventCode::MiddleDown, true),
            (Button::Middle, false) => (EventCode::MiddleUp, false),
            (Button::Right, true) => (EventCode::RightDown, true),
            (Button::Right, false) => (EventCode::RightUp, false),
            (Button::WheelDown, _) => (EventCode::WheelDown, true),
            (Button::WheelUp, _) => (EventCode::WheelUp, true),
        };
        let wanted = if is_down {
            EventSet::BUTTON_DOWN
        } else {
            EventSet::BUTTON_UP
        };
        self.selected.contains(wanted).then_some(code)
    }

    fn report_coordinates(&self) -> (u32, u32) {
        match self.units {
            CoordinateUnits::Cells => (self.cell.row as u32, self.cell.col as u32),
            CoordinateUnits::Pixels => (self.pixel.y, self.pixel.x),
        }
    }

    /// `CSI Pe ; Pb ; Pr ; Pc ; Pp & w` — event, button bitmask, row,
    /// column, page (always 1).
    fn append_report(&mut self, event: EventCode, row: u32, col: u32) {
        let report = format!(
            "\x1b[{};{};{};{};1&w",
            event as u8, self.pressed, row, col
        );
        self.reply[self.back].push_str(&report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(row: u16, col: u16) -> CellPosition {
        CellPosition { row, col }
    }

    fn pixel(y: u32, x: u32) -> PixelPosition {
        PixelPosition { y, x }
    }

    #[test]
    fn disabled_emits_nothing() {
        let mut loc = Locator::new();
        loc.update(Button::Left, true, cell(1, 2), pixel(10, 20));
        assert_eq!(loc.peek_reply(), "");
    }

    #[test]
    fn enabled_cell_mode_button_down_report() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Cells);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        loc.update(Button::Left, true, cell(10, 5), pixel(160, 40));
        assert_eq!(loc.fetch_reply_and_clear(), "\x1b[2;1;10;5;1&w");
        assert_eq!(loc.fetch_reply_and_clear(), "");
    }

    #[test]
    fn button_up_requires_selection() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Cells);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        loc.update(Button::Left, true, cell(0, 0), pixel(0, 0));
        let _ = loc.fetch_reply_and_clear();
        // Release is not selected: nothing is appended.
        loc.update(Button::Left, false, cell(0, 0), pixel(0, 0));
        assert_eq!(loc.peek_reply(), "");

        loc.select_events(EventSet::BUTTON_UP, true);
        loc.update(Button::Left, true, cell(0, 0), pixel(0, 0));
        loc.update(Button::Left, false, cell(0, 0), pixel(0, 0));
        let reply = loc.fetch_reply_and_clear();
        assert!(reply.contains("\x1b[3;0;0;0;1&w"), "up code 3: {reply:?}");
    }

    #[test]
    fn pixel_units_report_pixel_coordinates() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Pixels);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        loc.update(Button::Right, true, cell(2, 3), pixel(99, 47));
        // Right down = 6, bitmask right = 4, row = y, col = x.
        assert_eq!(loc.fetch_reply_and_clear(), "\x1b[6;4;99;47;1&w");
    }

    #[test]
    fn button_bitmask_accumulates() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Cells);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        loc.update(Button::Left, true, cell(0, 0), pixel(0, 0));
        loc.update(Button::Middle, true, cell(0, 0), pixel(0, 0));
        let reply = loc.fetch_reply_and_clear();
        // Second report carries left|middle = 3.
        assert!(reply.ends_with("\x1b[4;3;0;0;1&w"), "got {reply:?}");
    }

    #[test]
    fn wheel_reports_down_up_codes_and_never_latches() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Cells);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        loc.update(Button::WheelDown, true, cell(0, 0), pixel(0, 0));
        loc.update(Button::WheelUp, true, cell(0, 0), pixel(0, 0));
        let reply = loc.fetch_reply_and_clear();
        assert!(reply.contains("\x1b[8;0;"), "wheel down code 8: {reply:?}");
        assert!(reply.contains("\x1b[9;0;"), "wheel up code 9: {reply:?}");
    }

    #[test]
    fn enabled_once_fires_exactly_once() {
        let mut loc = Locator::new();
        loc.enable_once(CoordinateUnits::Cells);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        // An unselected event does not consume the one-shot.
        loc.update(Button::Left, false, cell(0, 0), pixel(0, 0));
        assert_eq!(loc.mode(), ReportingMode::EnabledOnce);
        loc.update(Button::Left, true, cell(3, 4), pixel(0, 0));
        assert_eq!(loc.mode(), ReportingMode::Disabled);
        loc.update(Button::Left, true, cell(5, 6), pixel(0, 0));
        let reply = loc.fetch_reply_and_clear();
        assert_eq!(reply.matches("&w").count(), 1, "exactly one report");
    }

    #[test]
    fn filter_rect_fires_outside_once_then_disables() {
        let mut loc = Locator::new();
        loc.enable_filter_rect(FilterRect {
            top: 0,
            left: 0,
            bottom: 5,
            right: 5,
        });
        // Inside: nothing.
        loc.update(Button::None, false, cell(3, 3), pixel(0, 0));
        assert_eq!(loc.peek_reply(), "");
        assert!(loc.filter_rect_enabled());
        // Outside: code 10, then disabled.
        loc.update(Button::None, false, cell(7, 2), pixel(0, 0));
        let reply = loc.fetch_reply_and_clear();
        assert!(reply.starts_with("\x1b[10;"), "outside code 10: {reply:?}");
        assert_eq!(loc.mode(), ReportingMode::Disabled);
        // Further motion is silent.
        loc.update(Button::None, false, cell(9, 9), pixel(0, 0));
        assert_eq!(loc.peek_reply(), "");
    }

    #[test]
    fn request_position_when_disabled_reports_unavailable() {
        let mut loc = Locator::new();
        loc.request_position();
        assert_eq!(loc.fetch_reply_and_clear(), "\x1b[0&w");
    }

    #[test]
    fn request_position_reports_current_cell() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Cells);
        loc.update(Button::None, false, cell(4, 9), pixel(0, 0));
        loc.request_position();
        assert_eq!(loc.fetch_reply_and_clear(), "\x1b[1;0;4;9;1&w");
    }

    #[test]
    fn reply_double_buffering_appends_to_empty_slot() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Cells);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        loc.update(Button::Left, true, cell(1, 1), pixel(0, 0));
        let first = loc.fetch_reply_and_clear();
        assert!(!first.is_empty());
        // New events land in the other (empty) slot.
        loc.update(Button::Left, false, cell(1, 1), pixel(0, 0));
        loc.update(Button::Middle, true, cell(2, 2), pixel(0, 0));
        let second = loc.fetch_reply_and_clear();
        assert!(second.contains("\x1b[4;"), "middle down in second batch");
        assert!(!second.contains(&first), "batches do not overlap");
    }

    #[test]
    fn peek_does_not_consume() {
        let mut loc = Locator::new();
        loc.enable(CoordinateUnits::Cells);
        loc.select_events(EventSet::BUTTON_DOWN, true);
        loc.update(Button::Left, true, cell(0, 0), pixel(0, 0));
        let peeked = loc.peek_reply().to_string();
        assert_eq!(loc.fetch_reply_and_clear(), peeked);
    }

    #[test]
    fn decelr_cancels_filter_rect() {
        let mut loc = Locator::new();
        loc.enable_filter_rect(FilterRect::default());
        assert!(loc.filter_rect_enabled());
        loc.enable(CoordinateUnits::Cells);
        assert!(!loc.filter_rect_enabled());
    }
}
