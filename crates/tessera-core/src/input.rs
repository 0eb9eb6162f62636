//! Encoding of UI input events into PTY byte sequences.
//!
//! Key encoding honors the cursor-key and keypad modes; mouse reports are
//! produced in the negotiated encoding (X10, UTF-8, SGR, URXVT) gated by
//! the active protocol; paste is framed when bracketed paste is on.

use bitflags::bitflags;

use crate::modes::{DecModes, MouseEncoding, MouseProtocol};

bitflags! {
    /// Keyboard modifiers, xterm bit order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyModifiers: u8 {
        const SHIFT = 1 << 0;
        const ALT   = 1 << 1;
        const CTRL  = 1 << 2;
    }
}

impl KeyModifiers {
    /// xterm modifier parameter: 1 + bitmask.
    fn param(self) -> u8 {
        1 + self.bits()
    }
}

/// A key press from the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Right,
    Left,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    /// Function keys F1..=F12.
    F(u8),
    /// Numeric keypad key, identified by its legend
    /// (`'0'..='9'`, `'.'`, `'+'`, `'-'`, `'*'`, `'/'`, `'='`, `'\r'`).
    Keypad(char),
}

/// Encode a key press into the byte sequence written to the PTY.
///
/// Returns an empty vector for combinations that have no encoding.
pub fn encode_key(code: KeyCode, mods: KeyModifiers, modes: &DecModes) -> Vec<u8> {
    let mut out = Vec::new();
    let app_cursor = modes.application_cursor_keys;

    match code {
        KeyCode::Char(ch) => {
            if mods.contains(KeyModifiers::ALT) {
                out.push(0x1B);
            }
            if mods.contains(KeyModifiers::CTRL) {
                if let Some(ctrl) = control_byte(ch) {
                    out.push(ctrl);
                    return out;
                }
            }
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        KeyCode::Enter => out.push(b'\r'),
        KeyCode::Tab => {
            if mods.contains(KeyModifiers::SHIFT) {
                out.extend_from_slice(b"\x1b[Z");
            } else {
                out.push(b'\t');
            }
        }
        KeyCode::Backspace => out.push(0x7F),
        KeyCode::Escape => out.push(0x1B),
        KeyCode::Up => cursor_key(&mut out, b'A', mods, app_cursor),
        KeyCode::Down => cursor_key(&mut out, b'B', mods, app_cursor),
        KeyCode::Right => cursor_key(&mut out, b'C', mods, app_cursor),
        KeyCode::Left => cursor_key(&mut out, b'D', mods, app_cursor),
        KeyCode::Home => cursor_key(&mut out, b'H', mods, app_cursor),
        KeyCode::End => cursor_key(&mut out, b'F', mods, app_cursor),
        KeyCode::PageUp => tilde_key(&mut out, 5, mods),
        KeyCode::PageDown => tilde_key(&mut out, 6, mods),
        KeyCode::Insert => tilde_key(&mut out, 2, mods),
        KeyCode::Delete => tilde_key(&mut out, 3, mods),
        KeyCode::F(n @ 1..=4) => {
            // F1..F4 are legacy SS3 P/Q/R/S, CSI-form when modified.
            let final_byte = b'P' + (n - 1);
            if mods.is_empty() {
                out.extend_from_slice(&[0x1B, b'O', final_byte]);
            } else {
                out.extend_from_slice(format!("\x1b[1;{}{}", mods.param(), final_byte as char).as_bytes());
            }
        }
        KeyCode::F(n @ 5..=12) => {
            let num = match n {
                5 => 15,
                6 => 17,
                7 => 18,
                8 => 19,
                9 => 20,
                10 => 21,
                11 => 23,
                _ => 24,
            };
            tilde_key(&mut out, num, mods);
        }
        KeyCode::F(_) => {}
        KeyCode::Keypad(legend) => {
            if modes.application_keypad {
                // DECKPAM: keypad keys send SS3 sequences.
                let code = match legend {
                    '0'..='9' => Some(b'p' + (legend as u8 - b'0')),
                    '.' => Some(b'n'),
                    '+' => Some(b'l'),
                    '-' => Some(b'm'),
                    '*' => Some(b'j'),
                    '/' => Some(b'o'),
                    '=' => Some(b'X'),
                    '\r' => Some(b'M'),
                    _ => None,
                };
                if let Some(code) = code {
                    out.extend_from_slice(&[0x1B, b'O', code]);
                }
            } else if legend == '\r' {
                out.push(b'\r');
            } else {
                let mut buf = [0u8; 4];
                out.extend_from_slice(legend.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out
}

/// Arrow/Home/End: `SS3 X` in application mode, `CSI X` otherwise,
/// `CSI 1 ; mod X` when modified.
fn cursor_key(out: &mut Vec<u8>, final_byte: u8, mods: KeyModifiers, app_mode: bool) {
    if !mods.is_empty() {
        out.extend_from_slice(format!("\x1b[1;{}{}", mods.param(), final_byte as char).as_bytes());
    } else if app_mode {
        out.extend_from_slice(&[0x1B, b'O', final_byte]);
    } else {
        out.extend_from_slice(&[0x1B, b'[', final_byte]);
    }
}

/// `CSI num ~` / `CSI num ; mod ~` editing-keypad keys.
fn tilde_key(out: &mut Vec<u8>, num: u8, mods: KeyModifiers) {
    if mods.is_empty() {
        out.extend_from_slice(format!("\x1b[{num}~").as_bytes());
    } else {
        out.extend_from_slice(format!("\x1b[{num};{}~", mods.param()).as_bytes());
    }
}

fn control_byte(ch: char) -> Option<u8> {
    match ch {
        'a'..='z' => Some(ch as u8 - b'a' + 1),
        'A'..='Z' => Some(ch as u8 - b'A' + 1),
        '@' => Some(0),
        '[' => Some(0x1B),
        '\\' => Some(0x1C),
        ']' => Some(0x1D),
        '^' => Some(0x1E),
        '_' => Some(0x1F),
        '?' => Some(0x7F),
        _ => None,
    }
}

/// Mouse buttons from the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
}

/// What happened to the button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Press,
    Release,
    /// Motion with `button` held (or hover when no button is down).
    Motion,
}

/// Encode a mouse event per the negotiated protocol/encoding.
///
/// `col`/`row` are 0-based cell coordinates. Returns `None` when the
/// active protocol does not report this event.
pub fn encode_mouse(
    modes: &DecModes,
    action: MouseAction,
    button: Option<MouseButton>,
    col: u16,
    row: u16,
    mods: KeyModifiers,
) -> Option<Vec<u8>> {
    match modes.mouse_protocol {
        MouseProtocol::None => return None,
        MouseProtocol::X10 => {
            if action != MouseAction::Press {
                return None;
            }
        }
        MouseProtocol::Normal => {
            if action == MouseAction::Motion {
                return None;
            }
        }
        MouseProtocol::ButtonEvent => {
            if action == MouseAction::Motion && button.is_none() {
                return None;
            }
        }
        MouseProtocol::AnyEvent => {}
    }

    let base = match button {
        Some(MouseButton::Left) | None => 0,
        Some(MouseButton::Middle) => 1,
        Some(MouseButton::Right) => 2,
        Some(MouseButton::WheelUp) => 64,
        Some(MouseButton::WheelDown) => 65,
    };
    let mut code: u16 = base;
    if action == MouseAction::Motion {
        code += 32;
        if button.is_none() {
            code += 3; // "no button" motion
        }
    }
    if mods.contains(KeyModifiers::SHIFT) {
        code += 4;
    }
    if mods.contains(KeyModifiers::ALT) {
        code += 8;
    }
    if mods.contains(KeyModifiers::CTRL) {
        code += 16;
    }

    let release = action == MouseAction::Release;
    let out = match modes.mouse_encoding {
        MouseEncoding::Sgr => {
            let final_byte = if release { 'm' } else { 'M' };
            format!("\x1b[<{};{};{}{}", code, col + 1, row + 1, final_byte).into_bytes()
        }
        MouseEncoding::Urxvt => {
            let code = if release { 3 + 32 } else { code + 32 };
            format!("\x1b[{};{};{}M", code, col + 1, row + 1).into_bytes()
        }
        MouseEncoding::X10 => {
            // Single-byte coordinates cap at 222 (255 - 33).
            let code = if release { 3 } else { code };
            let cb = (code as u8).saturating_add(32);
            let cx = (col + 1).min(222) as u8 + 32;
            let cy = (row + 1).min(222) as u8 + 32;
            vec![0x1B, b'[', b'M', cb, cx, cy]
        }
        MouseEncoding::Utf8 => {
            let code = if release { 3 } else { code };
            let mut out = vec![0x1B, b'[', b'M'];
            for value in [code + 32, col + 1 + 32, row + 1 + 32] {
                let ch = char::from_u32(value as u32).unwrap_or(' ');
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            out
        }
    };
    Some(out)
}

/// Frame pasted text for the PTY.
///
/// With bracketed paste the payload is wrapped in `CSI 200~`/`CSI 201~`
/// and any embedded end-guard is stripped so applications cannot be broken
/// out of paste mode. Without it, newlines become carriage returns.
pub fn encode_paste(text: &str, bracketed: bool) -> Vec<u8> {
    if bracketed {
        let sanitized = text.replace("\x1b[201~", "");
        let mut out = Vec::with_capacity(sanitized.len() + 12);
        out.extend_from_slice(b"\x1b[200~");
        out.extend_from_slice(sanitized.as_bytes());
        out.extend_from_slice(b"\x1b[201~");
        out
    } else {
        text.replace("\r\n", "\r").replace('\n', "\r").into_bytes()
    }
}

/// Focus in/out report (`CSI I` / `CSI O`) when focus events are enabled.
pub fn encode_focus(gained: bool, modes: &DecModes) -> Option<Vec<u8>> {
    if !modes.focus_events {
        return None;
    }
    Some(if gained {
        b"\x1b[I".to_vec()
    } else {
        b"\x1b[O".to_vec()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> DecModes {
        DecModes::default()
    }

    #[test]
    fn plain_char_passes_through() {
        assert_eq!(encode_key(KeyCode::Char('a'), KeyModifiers::empty(), &modes()), b"a");
        assert_eq!(
            encode_key(KeyCode::Char('é'), KeyModifiers::empty(), &modes()),
            "é".as_bytes()
        );
    }

    #[test]
    fn ctrl_chars_map_to_control_bytes() {
        assert_eq!(
            encode_key(KeyCode::Char('c'), KeyModifiers::CTRL, &modes()),
            vec![0x03]
        );
        assert_eq!(
            encode_key(KeyCode::Char('['), KeyModifiers::CTRL, &modes()),
            vec![0x1B]
        );
    }

    #[test]
    fn alt_prefixes_escape() {
        assert_eq!(
            encode_key(KeyCode::Char('x'), KeyModifiers::ALT, &modes()),
            vec![0x1B, b'x']
        );
    }

    #[test]
    fn arrows_follow_cursor_key_mode() {
        let mut m = modes();
        assert_eq!(encode_key(KeyCode::Up, KeyModifiers::empty(), &m), b"\x1b[A");
        m.application_cursor_keys = true;
        assert_eq!(encode_key(KeyCode::Up, KeyModifiers::empty(), &m), b"\x1bOA");
        // Modifiers force the CSI form even in application mode.
        assert_eq!(
            encode_key(KeyCode::Up, KeyModifiers::CTRL, &m),
            b"\x1b[1;5A"
        );
    }

    #[test]
    fn editing_keys_use_tilde_form() {
        assert_eq!(encode_key(KeyCode::PageUp, KeyModifiers::empty(), &modes()), b"\x1b[5~");
        assert_eq!(
            encode_key(KeyCode::Delete, KeyModifiers::SHIFT, &modes()),
            b"\x1b[3;2~"
        );
    }

    #[test]
    fn function_keys() {
        assert_eq!(encode_key(KeyCode::F(1), KeyModifiers::empty(), &modes()), b"\x1bOP");
        assert_eq!(encode_key(KeyCode::F(5), KeyModifiers::empty(), &modes()), b"\x1b[15~");
        assert_eq!(encode_key(KeyCode::F(12), KeyModifiers::empty(), &modes()), b"\x1b[24~");
    }

    #[test]
    fn keypad_follows_keypad_mode() {
        let mut m = modes();
        assert_eq!(encode_key(KeyCode::Keypad('5'), KeyModifiers::empty(), &m), b"5");
        assert_eq!(encode_key(KeyCode::Keypad('\r'), KeyModifiers::empty(), &m), b"\r");
        m.application_keypad = true;
        assert_eq!(encode_key(KeyCode::Keypad('5'), KeyModifiers::empty(), &m), b"\x1bOu");
        assert_eq!(encode_key(KeyCode::Keypad('-'), KeyModifiers::empty(), &m), b"\x1bOm");
        assert_eq!(encode_key(KeyCode::Keypad('\r'), KeyModifiers::empty(), &m), b"\x1bOM");
    }

    #[test]
    fn shift_tab_is_backtab() {
        assert_eq!(encode_key(KeyCode::Tab, KeyModifiers::SHIFT, &modes()), b"\x1b[Z");
    }

    #[test]
    fn mouse_none_protocol_reports_nothing() {
        let m = modes();
        assert!(encode_mouse(
            &m,
            MouseAction::Press,
            Some(MouseButton::Left),
            0,
            0,
            KeyModifiers::empty()
        )
        .is_none());
    }

    #[test]
    fn sgr_mouse_press_and_release() {
        let mut m = modes();
        m.mouse_protocol = MouseProtocol::Normal;
        m.mouse_encoding = MouseEncoding::Sgr;
        let press = encode_mouse(
            &m,
            MouseAction::Press,
            Some(MouseButton::Left),
            4,
            9,
            KeyModifiers::empty(),
        );
        assert_eq!(press.as_deref(), Some(b"\x1b[<0;5;10M".as_ref()));
        let release = encode_mouse(
            &m,
            MouseAction::Release,
            Some(MouseButton::Left),
            4,
            9,
            KeyModifiers::empty(),
        );
        assert_eq!(release.as_deref(), Some(b"\x1b[<0;5;10m".as_ref()));
    }

    #[test]
    fn x10_mouse_encoding_offsets_bytes() {
        let mut m = modes();
        m.mouse_protocol = MouseProtocol::Normal;
        m.mouse_encoding = MouseEncoding::X10;
        let press = encode_mouse(
            &m,
            MouseAction::Press,
            Some(MouseButton::Middle),
            0,
            0,
            KeyModifiers::empty(),
        );
        assert_eq!(press, Some(vec![0x1B, b'[', b'M', 33, 34, 34]));
        // Release collapses to button 3.
        let release = encode_mouse(
            &m,
            MouseAction::Release,
            Some(MouseButton::Middle),
            0,
            0,
            KeyModifiers::empty(),
        );
        assert_eq!(release, Some(vec![0x1B, b'[', b'M', 35, 34, 34]));
    }

    #[test]
    fn urxvt_mouse_encoding() {
        let mut m = modes();
        m.mouse_protocol = MouseProtocol::Normal;
        m.mouse_encoding = MouseEncoding::Urxvt;
        let press = encode_mouse(
            &m,
            MouseAction::Press,
            Some(MouseButton::Right),
            2,
            3,
            KeyModifiers::empty(),
        );
        assert_eq!(press.as_deref(), Some(b"\x1b[34;3;4M".as_ref()));
    }

    #[test]
    fn wheel_uses_codes_64_65() {
        let mut m = modes();
        m.mouse_protocol = MouseProtocol::Normal;
        m.mouse_encoding = MouseEncoding::Sgr;
        let up = encode_mouse(
            &m,
            MouseAction::Press,
            Some(MouseButton::WheelUp),
            0,
            0,
            KeyModifiers::empty(),
        );
        assert_eq!(up.as_deref(), Some(b"\x1b[<64;1;1M".as_ref()));
    }

    #[test]
    fn motion_gating_per_protocol() {
        let mut m = modes();
        m.mouse_encoding = MouseEncoding::Sgr;

        m.mouse_protocol = MouseProtocol::Normal;
        assert!(encode_mouse(&m, MouseAction::Motion, Some(MouseButton::Left), 0, 0, KeyModifiers::empty()).is_none());

        m.mouse_protocol = MouseProtocol::ButtonEvent;
        assert!(encode_mouse(&m, MouseAction::Motion, Some(MouseButton::Left), 0, 0, KeyModifiers::empty()).is_some());
        assert!(encode_mouse(&m, MouseAction::Motion, None, 0, 0, KeyModifiers::empty()).is_none());

        m.mouse_protocol = MouseProtocol::AnyEvent;
        let hover = encode_mouse(&m, MouseAction::Motion, None, 0, 0, KeyModifiers::empty());
        assert_eq!(hover.as_deref(), Some(b"\x1b[<35;1;1M".as_ref()));
    }

    #[test]
    fn modifier_bits_add_to_button_code() {
        let mut m = modes();
        m.mouse_protocol = MouseProtocol::Normal;
        m.mouse_encoding = MouseEncoding::Sgr;
        let press = encode_mouse(
            &m,
            MouseAction::Press,
            Some(MouseButton::Left),
            0,
            0,
            KeyModifiers::CTRL | KeyModifiers::SHIFT,
        );
        assert_eq!(press.as_deref(), Some(b"\x1b[<20;1;1M".as_ref()));
    }

    #[test]
    fn x10_protocol_only_reports_presses() {
        let mut m = modes();
        m.mouse_protocol = MouseProtocol::X10;
        m.mouse_encoding = MouseEncoding::Sgr;
        assert!(encode_mouse(&m, MouseAction::Press, Some(MouseButton::Left), 0, 0, KeyModifiers::empty()).is_some());
        assert!(encode_mouse(&m, MouseAction::Release, Some(MouseButton::Left), 0, 0, KeyModifiers::empty()).is_none());
    }

    #[test]
    fn bracketed_paste_frames_and_sanitizes() {
        let out = encode_paste("hi\x1b[201~there", true);
        assert_eq!(out, b"\x1b[200~hithere\x1b[201~".to_vec());
    }

    #[test]
    fn unbracketed_paste_normalizes_newlines() {
        assert_eq!(encode_paste("a\nb\r\nc", false), b"a\rb\rc".to_vec());
    }

    #[test]
    fn focus_reports_gated_by_mode() {
        let mut m = modes();
        assert!(encode_focus(true, &m).is_none());
        m.focus_events = true;
        assert_eq!(encode_focus(true, &m).as_deref(), Some(b"\x1b[I".as_ref()));
        assert_eq!(encode_focus(false, &m).as_deref(), Some(b"\x1b[O".as_ref()));
    }
}
