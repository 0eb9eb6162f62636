//! Cursor state and character-set (G0..G3) handling.

use serde::{Deserialize, Serialize};

use crate::cell::SgrAttrs;

/// One of the four designatable character sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Charset {
    /// USASCII (`ESC ( B`).
    #[default]
    Ascii,
    /// DEC Special Graphics / line drawing (`ESC ( 0`).
    DecSpecial,
}

impl Charset {
    /// Map a designator final byte to a charset. Unknown designators fall
    /// back to ASCII.
    pub fn from_designator(byte: u8) -> Self {
        match byte {
            b'0' => Charset::DecSpecial,
            _ => Charset::Ascii,
        }
    }

    /// Translate a scalar through this charset.
    pub fn map(self, ch: char) -> char {
        match self {
            Charset::Ascii => ch,
            Charset::DecSpecial => translate_dec_special(ch),
        }
    }
}

/// DEC Special Graphics: the line-drawing range `0x60..=0x7E`.
fn translate_dec_special(ch: char) -> char {
    match ch {
        '`' => '◆',
        'a' => '▒',
        'b' => '␉',
        'c' => '␌',
        'd' => '␍',
        'e' => '␊',
        'f' => '°',
        'g' => '±',
        'h' => '␤',
        'i' => '␋',
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺',
        'p' => '⎻',
        'q' => '─',
        'r' => '⎼',
        's' => '⎽',
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        _ => ch,
    }
}

/// The G0..G3 charset slots plus the active GL/GR selectors and a pending
/// single shift (SS2/SS3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charsets {
    slots: [Charset; 4],
    /// Active slot for GL (0x20..0x7E). SO selects G1, SI selects G0.
    gl: usize,
    /// Active slot for GR (0xA0..0xFE). Unused while input is UTF-8 but
    /// kept for completeness and save/restore.
    gr: usize,
    /// One-shot slot override from SS2/SS3.
    single_shift: Option<usize>,
}

impl Default for Charsets {
    fn default() -> Self {
        Self {
            slots: [Charset::Ascii; 4],
            gl: 0,
            gr: 1,
            single_shift: None,
        }
    }
}

impl Charsets {
    /// Designate `charset` into slot `G<slot>` (0..=3).
    pub fn designate(&mut self, slot: usize, charset: Charset) {
        if slot < 4 {
            self.slots[slot] = charset;
        }
    }

    /// Select the GL slot (SO = G1, SI = G0, LS2 = G2, LS3 = G3).
    pub fn shift_gl(&mut self, slot: usize) {
        if slot < 4 {
            self.gl = slot;
        }
    }

    /// Arm a single shift (SS2 → G2, SS3 → G3) for the next printed scalar.
    pub fn single_shift(&mut self, slot: usize) {
        if slot < 4 {
            self.single_shift = Some(slot);
        }
    }

    /// Translate one printed scalar, consuming any pending single shift.
    pub fn map(&mut self, ch: char) -> char {
        let slot = self.single_shift.take().unwrap_or(self.gl);
        self.slots[slot].map(ch)
    }

    /// Active GL charset (diagnostics).
    pub fn gl(&self) -> Charset {
        self.slots[self.gl]
    }
}

/// Cursor: position, pending-wrap state, and current graphic rendition.
///
/// `row`/`col` are zero-based offsets from the page top-left, independent of
/// origin mode (origin-relative addressing is resolved by the screen).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub row: u16,
    pub col: u16,
    /// Attributes applied to subsequently printed cells.
    pub attrs: SgrAttrs,
    /// Set when the cursor has filled the last column; the next print wraps
    /// first (deferred wrap).
    pub wrap_pending: bool,
    /// Charset state travels with the cursor (DECSC/DECRC save it).
    pub charsets: Charsets,
}

/// Cursor state captured by DECSC and restored by DECRC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCursor {
    pub row: u16,
    pub col: u16,
    pub attrs: SgrAttrs,
    pub wrap_pending: bool,
    pub charsets: Charsets,
    pub origin: bool,
}

impl Cursor {
    /// Capture the state DECSC preserves.
    pub fn save(&self, origin: bool) -> SavedCursor {
        SavedCursor {
            row: self.row,
            col: self.col,
            attrs: self.attrs,
            wrap_pending: self.wrap_pending,
            charsets: self.charsets,
            origin,
        }
    }

    /// Restore from a DECSC snapshot. Returns the saved origin-mode flag
    /// for the screen to reinstate.
    pub fn restore(&mut self, saved: &SavedCursor) -> bool {
        self.row = saved.row;
        self.col = saved.col;
        self.attrs = saved.attrs;
        self.wrap_pending = saved.wrap_pending;
        self.charsets = saved.charsets;
        saved.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_charset_is_identity() {
        let mut cs = Charsets::default();
        assert_eq!(cs.map('q'), 'q');
    }

    #[test]
    fn dec_special_maps_line_drawing() {
        let mut cs = Charsets::default();
        cs.designate(0, Charset::DecSpecial);
        assert_eq!(cs.map('q'), '─');
        assert_eq!(cs.map('x'), '│');
        assert_eq!(cs.map('A'), 'A'); // outside the graphics range
    }

    #[test]
    fn shift_out_selects_g1() {
        let mut cs = Charsets::default();
        cs.designate(1, Charset::DecSpecial);
        cs.shift_gl(1); // SO
        assert_eq!(cs.map('q'), '─');
        cs.shift_gl(0); // SI
        assert_eq!(cs.map('q'), 'q');
    }

    #[test]
    fn single_shift_applies_once() {
        let mut cs = Charsets::default();
        cs.designate(2, Charset::DecSpecial);
        cs.single_shift(2); // SS2
        assert_eq!(cs.map('q'), '─');
        assert_eq!(cs.map('q'), 'q'); // shift consumed
    }

    #[test]
    fn save_restore_roundtrip() {
        let mut cursor = Cursor {
            row: 3,
            col: 7,
            wrap_pending: true,
            ..Cursor::default()
        };
        cursor.charsets.designate(0, Charset::DecSpecial);
        let saved = cursor.save(true);

        cursor.row = 0;
        cursor.col = 0;
        cursor.wrap_pending = false;
        cursor.charsets = Charsets::default();

        let origin = cursor.restore(&saved);
        assert!(origin);
        assert_eq!(cursor.row, 3);
        assert_eq!(cursor.col, 7);
        assert!(cursor.wrap_pending);
        assert_eq!(cursor.charsets.gl(), Charset::DecSpecial);
    }
}
