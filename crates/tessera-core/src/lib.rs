#![forbid(unsafe_code)]

//! Host-agnostic VT/ANSI terminal engine.
//!
//! `tessera-core` is the platform-independent terminal model at the heart of
//! Tessera. It owns grid state, VT/ANSI parsing, cursor positioning,
//! scrollback, inline images, and mouse locator reporting — all without any
//! host I/O dependencies.
//!
//! # Primary responsibilities
//!
//! - **Parser**: table-driven VT/ANSI state machine (Paul Flo Williams
//!   model) with a bulk-text fast path.
//! - **Cell / Grid / Scrollback**: the character matrix with wide-char and
//!   combining-mark semantics, soft-wrap tracking, and reflow on resize.
//! - **Screen**: applies parser events; cursor, margins, tab stops, modes,
//!   charsets, hyperlinks, alternate buffer, replies.
//! - **Images**: reference-counted image pool with lazy per-cell
//!   rasterization and name links.
//! - **Locator**: DEC Text Locator reporting (DECELR/DECSLE/DECEFR/DECRQLP).
//! - **Selection**: linear/block/line selection with text extraction.
//! - **Input**: key/mouse/paste/focus encoding back to the application.
//!
//! # Design principles
//!
//! - **No I/O**: all types are pure data + logic; the session supplies bytes.
//! - **Deterministic**: identical byte sequences always produce identical
//!   state, no matter how the input is chunked.
//! - **Robust**: malformed input never panics; it is reported and skipped.

pub mod cell;
pub mod cursor;
pub mod grid;
pub mod image;
pub mod input;
pub mod locator;
pub mod modes;
pub mod parser;
pub mod screen;
pub mod scrollback;
pub mod selection;

pub use cell::{Cell, CellFlags, Color, HyperlinkId, HyperlinkRegistry, SgrAttrs, SgrFlags};
pub use cursor::{Charset, Charsets, Cursor, SavedCursor};
pub use grid::{Grid, Line, LineFlags};
pub use image::{
    AlignmentPolicy, CellSpan, Image, ImageError, ImageFormat, ImageFragment, ImageId,
    ImageLimits, ImagePool, ImageStats, PixelSize, RasterizedImage, ResizePolicy, Rgba,
};
pub use input::{
    encode_focus, encode_key, encode_mouse, encode_paste, KeyCode, KeyModifiers, MouseAction,
    MouseButton,
};
pub use locator::{
    Button, CellPosition, CoordinateUnits, EventSet, FilterRect, Locator, PixelPosition,
    ReportingMode,
};
pub use modes::{AnsiModes, DecModes, MouseEncoding, MouseProtocol};
pub use parser::{Listener, Parser, State};
pub use screen::{
    CursorStyle, Margins, RenderCell, RenderFrame, Screen, ScreenConfig, ScreenEvent,
    ScreenSnapshot,
};
pub use scrollback::Scrollback;
pub use selection::{BufferPos, Selection, SelectionMode};
