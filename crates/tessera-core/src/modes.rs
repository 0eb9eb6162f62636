//! Terminal input/output mode flags: DEC private modes and ANSI modes.

use serde::{Deserialize, Serialize};

/// Which mouse events the application asked for (DECSET 9/1000/1002/1003).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MouseProtocol {
    /// No mouse reporting.
    #[default]
    None,
    /// X10 compatibility: button presses only (DECSET 9).
    X10,
    /// Normal tracking: presses and releases (DECSET 1000).
    Normal,
    /// Button-event tracking: presses, releases, drag motion (DECSET 1002).
    ButtonEvent,
    /// Any-event tracking: all motion (DECSET 1003).
    AnyEvent,
}

/// How mouse reports are encoded on the wire (DECSET 1005/1006/1015).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MouseEncoding {
    /// Legacy X10 single-byte coordinates (limited to column/row 223).
    #[default]
    X10,
    /// UTF-8 extended coordinates (DECSET 1005).
    Utf8,
    /// SGR `CSI < b ; x ; y M/m` (DECSET 1006).
    Sgr,
    /// URXVT `CSI b ; x ; y M` (DECSET 1015).
    Urxvt,
}

/// DEC private modes (DECSET/DECRST) tracked by the screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecModes {
    /// DECCKM (1): application cursor keys.
    pub application_cursor_keys: bool,
    /// DECOM (6): origin mode — cursor addressing is margin-relative.
    pub origin: bool,
    /// DECAWM (7): auto-wrap at the right margin.
    pub auto_wrap: bool,
    /// DECTCEM (25): cursor visible.
    pub cursor_visible: bool,
    /// DECSCNM (5): reverse video for the whole screen.
    pub reverse_video: bool,
    /// Blinking cursor (12).
    pub cursor_blink: bool,
    /// DECLRMM (69): left/right margin mode (enables DECSLRM).
    pub left_right_margins: bool,
    /// Alternate screen active (47/1047/1049).
    pub alternate_screen: bool,
    /// Bracketed paste (2004).
    pub bracketed_paste: bool,
    /// Focus in/out reporting (1004).
    pub focus_events: bool,
    /// DECKPAM/DECKPNM: application keypad.
    pub application_keypad: bool,
    pub mouse_protocol: MouseProtocol,
    pub mouse_encoding: MouseEncoding,
}

impl Default for DecModes {
    fn default() -> Self {
        Self {
            application_cursor_keys: false,
            origin: false,
            auto_wrap: true,
            cursor_visible: true,
            reverse_video: false,
            cursor_blink: false,
            left_right_margins: false,
            alternate_screen: false,
            bracketed_paste: false,
            focus_events: false,
            application_keypad: false,
            mouse_protocol: MouseProtocol::default(),
            mouse_encoding: MouseEncoding::default(),
        }
    }
}

/// ANSI standard modes (SM/RM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnsiModes {
    /// IRM (4): insert mode — printed characters shift the line right.
    pub insert: bool,
    /// LNM (20): newline mode — LF implies CR.
    pub newline: bool,
}
