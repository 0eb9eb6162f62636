//! VT/ANSI parser: table-driven DEC/ECMA-48 state machine.
//!
//! The parser converts an output byte stream into a sequence of semantic
//! events delivered to a [`Listener`]. It follows the canonical DEC parser
//! model (Paul Flo Williams), with these deviations:
//!
//! - `CAN` (0x18) and `SUB` (0x1A) cancel from any state; `ESC` re-enters
//!   `Escape` from any state.
//! - `ESC \` reaches `Ground` silently (string terminator for OSC/DCS/APC/PM
//!   that were already dispatched by the state's exit action).
//! - `BEL` (0x07) terminates OSC/APC/PM strings (xterm extension).
//! - Input is assumed UTF-8: C1 controls are not recognized as single
//!   bytes. Bytes `0x80..=0xFF` print in `Ground` (assembled into scalars)
//!   and pass through verbatim inside string states.
//!
//! In `Ground` a fast path scans whole printable runs — bounded by the
//! listener's column budget — and emits them as a single `print` event,
//! bypassing per-byte table dispatch. A run followed by `\n` also emits the
//! newline directly, which keeps `cat`-style output off the table entirely.
//!
//! The parser never fails: unknown (state, byte) pairs emit `error` and the
//! byte is dropped.

use unicode_width::UnicodeWidthChar;

/// Receiver of parser events.
///
/// All methods default to no-ops so partial listeners (tests, probes) stay
/// small. When the concrete listener type is known at the call site the
/// dispatch compiles to direct calls.
pub trait Listener {
    /// Printable text plus the total number of terminal columns it occupies.
    fn print(&mut self, _text: &str, _cell_count: usize) {}
    /// A C0 control byte.
    fn execute(&mut self, _control: u8) {}

    /// Begin a new control-sequence accumulation.
    fn clear(&mut self) {}
    /// An intermediate byte (`0x20..=0x2F`).
    fn collect(&mut self, _byte: u8) {}
    /// A private-marker / parameter-prefix byte (`0x3C..=0x3F`).
    fn collect_leader(&mut self, _byte: u8) {}

    /// A DCS parameter byte (digit or `;`).
    fn param(&mut self, _byte: u8) {}
    /// A CSI parameter digit.
    fn param_digit(&mut self, _digit: u8) {}
    /// Top-level CSI parameter separator (`;`).
    fn param_separator(&mut self) {}
    /// Sub-parameter separator (`:`).
    fn param_sub_separator(&mut self) {}

    /// Final byte of an ESC sequence.
    fn dispatch_esc(&mut self, _byte: u8) {}
    /// Final byte of a CSI sequence.
    fn dispatch_csi(&mut self, _byte: u8) {}

    fn start_osc(&mut self) {}
    fn put_osc(&mut self, _byte: u8) {}
    fn dispatch_osc(&mut self) {}

    /// DCS final byte; payload follows via `put` until `unhook`.
    fn hook(&mut self, _byte: u8) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}

    fn start_apc(&mut self) {}
    fn put_apc(&mut self, _byte: u8) {}
    fn dispatch_apc(&mut self) {}

    fn start_pm(&mut self) {}
    fn put_pm(&mut self, _byte: u8) {}
    fn dispatch_pm(&mut self) {}

    /// Unrecoverable malformed input at the current state. The offending
    /// byte has been dropped; parsing continues.
    fn error(&mut self, _message: &str) {}

    /// Column budget for the `Ground` text fast path.
    ///
    /// Callers that feed a screen return the number of columns a single
    /// bulk `print` may cover (e.g. until the right margin); the default
    /// is effectively unbounded.
    fn print_budget(&self) -> usize {
        usize::MAX
    }
}

/// Parser states (DEC/ECMA-48 model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Ground = 0,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    DcsEntry,
    DcsParam,
    DcsIntermediate,
    DcsPassThrough,
    DcsIgnore,
    OscString,
    ApcString,
    PmString,
    IgnoreUntilSt,
}

const STATE_COUNT: usize = 16;

const STATES: [State; STATE_COUNT] = [
    State::Ground,
    State::Escape,
    State::EscapeIntermediate,
    State::CsiEntry,
    State::CsiParam,
    State::CsiIntermediate,
    State::CsiIgnore,
    State::DcsEntry,
    State::DcsParam,
    State::DcsIntermediate,
    State::DcsPassThrough,
    State::DcsIgnore,
    State::OscString,
    State::ApcString,
    State::PmString,
    State::IgnoreUntilSt,
];

/// Per-(state, byte) table action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableAction {
    Undefined,
    Ignore,
    Print,
    Execute,
    Clear,
    Collect,
    CollectLeader,
    Param,
    ParamDigit,
    ParamSeparator,
    ParamSubSeparator,
    EscDispatch,
    CsiDispatch,
    OscStart,
    OscPut,
    OscEnd,
    Hook,
    Put,
    Unhook,
    ApcStart,
    ApcPut,
    ApcEnd,
    PmStart,
    PmPut,
    PmEnd,
}

/// "No transition" marker in the transition table.
const NO_STATE: u8 = u8::MAX;

/// The static transition/event tables, built once at compile time from the
/// declarative rules below.
struct ParserTable {
    /// Next state per (state, byte); `NO_STATE` when no transition fires.
    transitions: [[u8; 256]; STATE_COUNT],
    /// Event action per (state, byte).
    events: [[TableAction; 256]; STATE_COUNT],
    /// Entry action per state.
    entry: [TableAction; STATE_COUNT],
    /// Exit action per state.
    exit: [TableAction; STATE_COUNT],
}

const fn set_events(
    t: &mut ParserTable,
    state: State,
    action: TableAction,
    lo: u8,
    hi: u8,
) {
    let s = state as usize;
    let mut b = lo as usize;
    while b <= hi as usize {
        t.events[s][b] = action;
        b += 1;
    }
}

const fn set_event(t: &mut ParserTable, state: State, action: TableAction, byte: u8) {
    t.events[state as usize][byte as usize] = action;
}

/// C0 bytes that act inside most states: `0x00..=0x17`, `0x19`,
/// `0x1C..=0x1F` — i.e. everything except CAN, SUB, and ESC, which are
/// routed by the anywhere-rules.
const fn set_c0_events(t: &mut ParserTable, state: State, action: TableAction) {
    set_events(t, state, action, 0x00, 0x17);
    set_event(t, state, action, 0x19);
    set_events(t, state, action, 0x1C, 0x1F);
}

const fn set_transitions(
    t: &mut ParserTable,
    from: State,
    to: State,
    action: TableAction,
    lo: u8,
    hi: u8,
) {
    let s = from as usize;
    let mut b = lo as usize;
    while b <= hi as usize {
        t.transitions[s][b] = to as u8;
        if !matches!(action, TableAction::Undefined) {
            t.events[s][b] = action;
        }
        b += 1;
    }
}

const fn set_transition(t: &mut ParserTable, from: State, to: State, action: TableAction, byte: u8) {
    set_transitions(t, from, to, action, byte, byte);
}

impl ParserTable {
    const fn build() -> Self {
        use State::*;
        use TableAction::*;

        let mut t = ParserTable {
            transitions: [[NO_STATE; 256]; STATE_COUNT],
            events: [[Undefined; 256]; STATE_COUNT],
            entry: [Undefined; STATE_COUNT],
            exit: [Undefined; STATE_COUNT],
        };

        // Ground
        set_c0_events(&mut t, Ground, Execute);
        set_events(&mut t, Ground, Print, 0x20, 0x7F);
        set_events(&mut t, Ground, Print, 0x80, 0xFF);

        // Escape
        t.entry[Escape as usize] = Clear;
        set_c0_events(&mut t, Escape, Execute);
        set_event(&mut t, Escape, Ignore, 0x7F);
        set_transitions(&mut t, Escape, EscapeIntermediate, Collect, 0x20, 0x2F);
        set_transitions(&mut t, Escape, Ground, EscDispatch, 0x30, 0x4F);
        set_transition(&mut t, Escape, DcsEntry, Undefined, 0x50);
        set_transitions(&mut t, Escape, Ground, EscDispatch, 0x51, 0x57);
        set_transition(&mut t, Escape, IgnoreUntilSt, Undefined, 0x58); // SOS
        set_transition(&mut t, Escape, Ground, EscDispatch, 0x59);
        set_transition(&mut t, Escape, Ground, EscDispatch, 0x5A);
        set_transition(&mut t, Escape, CsiEntry, Undefined, 0x5B);
        set_transition(&mut t, Escape, Ground, Ignore, 0x5C); // ST for OSC, DCS, ...
        set_transition(&mut t, Escape, OscString, Undefined, 0x5D);
        set_transition(&mut t, Escape, PmString, Undefined, 0x5E);
        set_transition(&mut t, Escape, ApcString, Undefined, 0x5F);
        set_transitions(&mut t, Escape, Ground, EscDispatch, 0x60, 0x7E);

        // EscapeIntermediate
        set_c0_events(&mut t, EscapeIntermediate, Execute);
        set_events(&mut t, EscapeIntermediate, Collect, 0x20, 0x2F);
        set_event(&mut t, EscapeIntermediate, Ignore, 0x7F);
        set_transitions(&mut t, EscapeIntermediate, Ground, EscDispatch, 0x30, 0x7E);

        // CsiEntry
        t.entry[CsiEntry as usize] = Clear;
        set_c0_events(&mut t, CsiEntry, Execute);
        set_event(&mut t, CsiEntry, Ignore, 0x7F);
        set_transitions(&mut t, CsiEntry, CsiIntermediate, Collect, 0x20, 0x2F);
        set_transitions(&mut t, CsiEntry, CsiParam, ParamDigit, 0x30, 0x39);
        set_transition(&mut t, CsiEntry, CsiIgnore, Undefined, 0x3A);
        set_transition(&mut t, CsiEntry, CsiParam, ParamSeparator, 0x3B);
        set_transitions(&mut t, CsiEntry, CsiParam, CollectLeader, 0x3C, 0x3F);
        set_transitions(&mut t, CsiEntry, Ground, CsiDispatch, 0x40, 0x7E);

        // CsiParam
        set_c0_events(&mut t, CsiParam, Execute);
        set_events(&mut t, CsiParam, ParamDigit, 0x30, 0x39);
        set_event(&mut t, CsiParam, ParamSubSeparator, 0x3A);
        set_event(&mut t, CsiParam, ParamSeparator, 0x3B);
        set_event(&mut t, CsiParam, Ignore, 0x7F);
        set_transitions(&mut t, CsiParam, CsiIntermediate, Collect, 0x20, 0x2F);
        set_transitions(&mut t, CsiParam, CsiIgnore, Undefined, 0x3C, 0x3F);
        set_transitions(&mut t, CsiParam, Ground, CsiDispatch, 0x40, 0x7E);

        // CsiIntermediate
        set_c0_events(&mut t, CsiIntermediate, Execute);
        set_events(&mut t, CsiIntermediate, Collect, 0x20, 0x2F);
        set_event(&mut t, CsiIntermediate, Ignore, 0x7F);
        set_transitions(&mut t, CsiIntermediate, CsiIgnore, Undefined, 0x30, 0x3F);
        set_transitions(&mut t, CsiIntermediate, Ground, CsiDispatch, 0x40, 0x7E);

        // CsiIgnore
        set_c0_events(&mut t, CsiIgnore, Execute);
        set_events(&mut t, CsiIgnore, Ignore, 0x20, 0x3F);
        set_event(&mut t, CsiIgnore, Ignore, 0x7F);
        set_transitions(&mut t, CsiIgnore, Ground, Undefined, 0x40, 0x7E);

        // DcsEntry
        t.entry[DcsEntry as usize] = Clear;
        set_c0_events(&mut t, DcsEntry, Ignore);
        set_event(&mut t, DcsEntry, Ignore, 0x7F);
        set_transitions(&mut t, DcsEntry, DcsIntermediate, Collect, 0x20, 0x2F);
        set_transitions(&mut t, DcsEntry, DcsParam, Param, 0x30, 0x39);
        set_transition(&mut t, DcsEntry, DcsIgnore, Undefined, 0x3A);
        set_transition(&mut t, DcsEntry, DcsParam, Param, 0x3B);
        set_transitions(&mut t, DcsEntry, DcsParam, CollectLeader, 0x3C, 0x3F);
        set_transitions(&mut t, DcsEntry, DcsPassThrough, Undefined, 0x40, 0x7E);

        // DcsParam
        set_c0_events(&mut t, DcsParam, Execute);
        set_events(&mut t, DcsParam, Param, 0x30, 0x39);
        set_event(&mut t, DcsParam, Param, 0x3B);
        set_event(&mut t, DcsParam, Ignore, 0x7F);
        set_transitions(&mut t, DcsParam, DcsIntermediate, Undefined, 0x20, 0x2F);
        set_transition(&mut t, DcsParam, DcsIgnore, Undefined, 0x3A);
        set_transitions(&mut t, DcsParam, DcsIgnore, Undefined, 0x3C, 0x3F);
        set_transitions(&mut t, DcsParam, DcsPassThrough, Undefined, 0x40, 0x7E);

        // DcsIntermediate
        set_c0_events(&mut t, DcsIntermediate, Ignore);
        set_events(&mut t, DcsIntermediate, Collect, 0x20, 0x2F);
        set_event(&mut t, DcsIntermediate, Ignore, 0x7F);
        set_transitions(&mut t, DcsIntermediate, DcsPassThrough, Undefined, 0x40, 0x7E);

        // DcsPassThrough
        t.entry[DcsPassThrough as usize] = Hook;
        t.exit[DcsPassThrough as usize] = Unhook;
        set_c0_events(&mut t, DcsPassThrough, Put);
        set_events(&mut t, DcsPassThrough, Put, 0x20, 0x7E);
        set_event(&mut t, DcsPassThrough, Ignore, 0x7F);
        set_events(&mut t, DcsPassThrough, Put, 0x80, 0xFF);

        // DcsIgnore
        set_c0_events(&mut t, DcsIgnore, Ignore);
        set_events(&mut t, DcsIgnore, Ignore, 0x20, 0x7F);
        set_events(&mut t, DcsIgnore, Ignore, 0x80, 0xFF);

        // OscString (BEL is an xterm-extension terminator)
        t.entry[OscString as usize] = OscStart;
        t.exit[OscString as usize] = OscEnd;
        set_events(&mut t, OscString, Ignore, 0x00, 0x06);
        set_events(&mut t, OscString, Ignore, 0x08, 0x17);
        set_event(&mut t, OscString, Ignore, 0x19);
        set_events(&mut t, OscString, Ignore, 0x1C, 0x1F);
        set_events(&mut t, OscString, OscPut, 0x20, 0x7F);
        set_events(&mut t, OscString, OscPut, 0x80, 0xFF);
        set_transition(&mut t, OscString, Ground, Undefined, 0x07);

        // ApcString
        t.entry[ApcString as usize] = ApcStart;
        t.exit[ApcString as usize] = ApcEnd;
        set_events(&mut t, ApcString, ApcPut, 0x20, 0x7F);
        set_events(&mut t, ApcString, ApcPut, 0x80, 0xFF);
        set_transition(&mut t, ApcString, Ground, Undefined, 0x07);

        // PmString
        t.entry[PmString as usize] = PmStart;
        t.exit[PmString as usize] = PmEnd;
        set_c0_events(&mut t, PmString, PmPut);
        set_events(&mut t, PmString, PmPut, 0x20, 0x7F);
        set_events(&mut t, PmString, PmPut, 0x80, 0xFF);
        set_transition(&mut t, PmString, Ground, Undefined, 0x07);

        // IgnoreUntilSt (SOS consumes everything up to ST/cancel)
        set_c0_events(&mut t, IgnoreUntilSt, Ignore);
        set_events(&mut t, IgnoreUntilSt, Ignore, 0x20, 0x7F);
        set_events(&mut t, IgnoreUntilSt, Ignore, 0x80, 0xFF);

        // Anywhere: CAN/SUB cancel, ESC re-enters.
        let mut s = 0;
        while s < STATE_COUNT {
            let state = STATES[s];
            set_transition(&mut t, state, Ground, Undefined, 0x18);
            set_transition(&mut t, state, Ground, Undefined, 0x1A);
            set_transition(&mut t, state, Escape, Undefined, 0x1B);
            s += 1;
        }

        t
    }
}

static TABLE: ParserTable = ParserTable::build();

/// VT/ANSI parser state.
///
/// Tolerant of split input: a chunk boundary may fall anywhere — including
/// inside a UTF-8 sequence or an escape sequence — without losing or
/// corrupting events.
#[derive(Debug, Clone)]
pub struct Parser {
    state: State,
    /// Accumulator for multi-byte UTF-8 assembly in `Ground`.
    utf8_buf: [u8; 4],
    utf8_len: u8,
    utf8_remaining: u8,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a new parser in ground state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            utf8_buf: [0; 4],
            utf8_len: 0,
            utf8_remaining: 0,
        }
    }

    /// Current state. Mostly useful for diagnostics and tests.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the parser is in `Ground` with no partial UTF-8 sequence.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground && self.utf8_remaining == 0
    }

    /// Feed a chunk of bytes, delivering events to `listener`.
    pub fn feed<L: Listener>(&mut self, bytes: &[u8], listener: &mut L) {
        let mut input = bytes;
        while !input.is_empty() {
            // Ground fast path: emit the longest printable prefix as one
            // print event, bounded by the listener's column budget.
            if self.state == State::Ground && self.utf8_remaining == 0 {
                let budget = listener.print_budget().max(1);
                let (byte_len, cells) = scan_text(input, budget);
                if byte_len > 0 {
                    if let Ok(text) = core::str::from_utf8(&input[..byte_len]) {
                        listener.print(text, cells);
                    }
                    input = &input[byte_len..];
                    // `(TEXT LF+)`: dispatch the newline without re-entering
                    // the table.
                    if input.first() == Some(&b'\n') {
                        listener.execute(b'\n');
                        input = &input[1..];
                    }
                    continue;
                }
            }

            let byte = input[0];
            input = &input[1..];
            self.advance(byte, listener);
        }
    }

    /// Advance the parser by exactly one byte.
    pub fn advance<L: Listener>(&mut self, byte: u8, listener: &mut L) {
        // Pending UTF-8 assembly intercepts bytes before table dispatch.
        if self.utf8_remaining > 0 {
            if (0x80..=0xBF).contains(&byte) {
                let idx = self.utf8_len as usize;
                if idx < 4 {
                    self.utf8_buf[idx] = byte;
                    self.utf8_len += 1;
                }
                self.utf8_remaining -= 1;
                if self.utf8_remaining == 0 {
                    self.flush_utf8(listener);
                }
                return;
            }
            // Invalid continuation: drop the partial sequence and reprocess
            // this byte normally (malformed sequences are discarded).
            self.utf8_len = 0;
            self.utf8_remaining = 0;
        }

        let s = self.state as usize;
        let b = byte as usize;

        let next = TABLE.transitions[s][b];
        if next != NO_STATE {
            // exit action → transition event action → entry action
            self.handle(TABLE.exit[s], byte, listener);
            self.handle(TABLE.events[s][b], byte, listener);
            self.state = STATES[next as usize];
            self.handle(TABLE.entry[self.state as usize], byte, listener);
            return;
        }

        let action = TABLE.events[s][b];
        if action != TableAction::Undefined {
            self.handle(action, byte, listener);
        } else {
            listener.error(&format!(
                "unknown action for state/input pair ({:?}, 0x{byte:02X})",
                self.state
            ));
        }
    }

    fn handle<L: Listener>(&mut self, action: TableAction, byte: u8, listener: &mut L) {
        match action {
            TableAction::Undefined | TableAction::Ignore => {}
            TableAction::Print => self.print_byte(byte, listener),
            TableAction::Execute => listener.execute(byte),
            TableAction::Clear => listener.clear(),
            TableAction::Collect => listener.collect(byte),
            TableAction::CollectLeader => listener.collect_leader(byte),
            TableAction::Param => listener.param(byte),
            TableAction::ParamDigit => listener.param_digit(byte),
            TableAction::ParamSeparator => listener.param_separator(),
            TableAction::ParamSubSeparator => listener.param_sub_separator(),
            TableAction::EscDispatch => listener.dispatch_esc(byte),
            TableAction::CsiDispatch => listener.dispatch_csi(byte),
            TableAction::OscStart => listener.start_osc(),
            TableAction::OscPut => listener.put_osc(byte),
            TableAction::OscEnd => listener.dispatch_osc(),
            TableAction::Hook => listener.hook(byte),
            TableAction::Put => listener.put(byte),
            TableAction::Unhook => listener.unhook(),
            TableAction::ApcStart => listener.start_apc(),
            TableAction::ApcPut => listener.put_apc(byte),
            TableAction::ApcEnd => listener.dispatch_apc(),
            TableAction::PmStart => listener.start_pm(),
            TableAction::PmPut => listener.put_pm(byte),
            TableAction::PmEnd => listener.dispatch_pm(),
        }
    }

    /// Handle a `Print` table action: ASCII prints directly, high bytes
    /// start or continue UTF-8 assembly.
    fn print_byte<L: Listener>(&mut self, byte: u8, listener: &mut L) {
        match byte {
            0x20..=0x7F => {
                let ch = byte as char;
                let cells = UnicodeWidthChar::width(ch).unwrap_or(0);
                let mut buf = [0u8; 4];
                listener.print(ch.encode_utf8(&mut buf), cells);
            }
            0xC2..=0xDF => {
                self.utf8_buf[0] = byte;
                self.utf8_len = 1;
                self.utf8_remaining = 1;
            }
            0xE0..=0xEF => {
                self.utf8_buf[0] = byte;
                self.utf8_len = 1;
                self.utf8_remaining = 2;
            }
            0xF0..=0xF4 => {
                self.utf8_buf[0] = byte;
                self.utf8_len = 1;
                self.utf8_remaining = 3;
            }
            // Stray continuation bytes, overlong leads (0xC0/0xC1), and
            // out-of-range leads (0xF5..) are dropped.
            _ => {}
        }
    }

    fn flush_utf8<L: Listener>(&mut self, listener: &mut L) {
        let len = self.utf8_len as usize;
        self.utf8_len = 0;
        self.utf8_remaining = 0;
        if let Ok(s) = core::str::from_utf8(&self.utf8_buf[..len]) {
            if let Some(ch) = s.chars().next() {
                let cells = UnicodeWidthChar::width(ch).unwrap_or(0);
                listener.print(s, cells);
            }
        }
    }
}

/// Scan the longest prefix of `bytes` that is entirely printable text whose
/// total column width does not exceed `budget`.
///
/// Returns `(byte_len, cell_count)`. Stops at control bytes, invalid UTF-8,
/// and incomplete trailing sequences (those are left for per-byte assembly).
fn scan_text(bytes: &[u8], budget: usize) -> (usize, usize) {
    let mut i = 0;
    let mut cells = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if (0x20..=0x7E).contains(&b) {
            if cells + 1 > budget {
                break;
            }
            cells += 1;
            i += 1;
            continue;
        }
        if b < 0x80 || b == 0x7F {
            break; // control byte ends the run (0x7F prints as nothing useful)
        }
        // Multi-byte UTF-8.
        let seq_len = match b {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => break, // invalid lead byte
        };
        if i + seq_len > bytes.len() {
            break; // incomplete at chunk end
        }
        let Ok(s) = core::str::from_utf8(&bytes[i..i + seq_len]) else {
            break;
        };
        let Some(ch) = s.chars().next() else {
            break;
        };
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if cells + w > budget {
            break;
        }
        cells += w;
        i += seq_len;
    }
    (i, cells)
}
