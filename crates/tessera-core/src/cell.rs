//! Terminal cell: the fundamental unit of the grid.
//!
//! Each cell stores a grapheme cluster (primary scalar plus combining marks)
//! and its SGR attributes, an optional hyperlink id, and an optional image
//! fragment. This models the terminal's internal state, not the rendering
//! pipeline.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::image::ImageFragment;

bitflags! {
    /// SGR text attribute flags.
    ///
    /// Maps directly to the ECMA-48 / VT100 SGR parameter values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SgrFlags: u16 {
        const BOLD             = 1 << 0;
        const DIM              = 1 << 1;
        const ITALIC           = 1 << 2;
        const UNDERLINE        = 1 << 3;
        const BLINK            = 1 << 4;
        const INVERSE          = 1 << 5;
        const HIDDEN           = 1 << 6;
        const STRIKETHROUGH    = 1 << 7;
        const DOUBLE_UNDERLINE = 1 << 8;
        const CURLY_UNDERLINE  = 1 << 9;
        const OVERLINE         = 1 << 10;
    }
}

bitflags! {
    /// Cell-level flags that are orthogonal to SGR attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CellFlags: u8 {
        /// This cell is the leading (left) cell of a wide (2-column) character.
        const WIDE_CHAR = 1 << 0;
        /// This cell is the trailing (right) phantom of a wide character.
        /// Its content is meaningless; rendering uses the leading cell.
        const WIDE_CONTINUATION = 1 << 1;
    }
}

/// Color representation for terminal cells.
///
/// Supports the standard terminal color model hierarchy:
/// default → 16 named → 256 indexed → 24-bit RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Color {
    /// Terminal default (SGR 39 / SGR 49).
    #[default]
    Default,
    /// Named color index (0-15): standard 8 + bright 8.
    Named(u8),
    /// 256-color palette index (0-255).
    Indexed(u8),
    /// 24-bit true color.
    Rgb(u8, u8, u8),
}

/// SGR attributes for a cell: flags + foreground/background/underline colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SgrAttrs {
    pub flags: SgrFlags,
    pub fg: Color,
    pub bg: Color,
    /// Underline color (SGR 58/59). `None` means use foreground.
    pub underline_color: Option<Color>,
}

impl SgrAttrs {
    /// Reset all attributes to default (SGR 0).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Hyperlink identifier for OSC 8 links.
///
/// Zero means "no link". Non-zero values index into the screen's
/// [`HyperlinkRegistry`].
pub type HyperlinkId = u16;

/// Registry for OSC 8 hyperlink URIs.
///
/// Cells store compact [`HyperlinkId`]s instead of full URI strings. The
/// registry provides id allocation, deduplication on (uri, id-hint), and
/// reference-counted release so links vanish when the last referencing cell
/// is dropped (e.g. scrollback eviction).
#[derive(Debug, Clone)]
pub struct HyperlinkRegistry {
    /// Slots indexed by id (0 reserved for "no link").
    slots: Vec<Option<HyperlinkSlot>>,
    /// (uri, id-hint) -> id lookup for deduplication.
    lookup: HashMap<(String, Option<String>), HyperlinkId>,
    /// Reusable ids from released hyperlinks.
    free_list: Vec<HyperlinkId>,
}

#[derive(Debug, Clone)]
struct HyperlinkSlot {
    uri: String,
    /// Application-chosen `id=` parameter from OSC 8, when given.
    id_hint: Option<String>,
    ref_count: u32,
}

impl HyperlinkRegistry {
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            lookup: HashMap::new(),
            free_list: Vec::new(),
        }
    }

    /// Intern a URI (and optional id-hint), returning its hyperlink id
    /// without changing refcounts. Empty URIs return 0 ("no link").
    pub fn intern(&mut self, uri: &str, id_hint: Option<&str>) -> HyperlinkId {
        if uri.is_empty() {
            return 0;
        }
        let key = (uri.to_string(), id_hint.map(str::to_string));
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }

        let id = if let Some(id) = self.free_list.pop() {
            id
        } else {
            let next = self.slots.len();
            if next > HyperlinkId::MAX as usize {
                return 0;
            }
            self.slots.push(None);
            next as HyperlinkId
        };
        if id == 0 {
            return 0;
        }

        self.slots[id as usize] = Some(HyperlinkSlot {
            uri: key.0.clone(),
            id_hint: key.1.clone(),
            ref_count: 0,
        });
        self.lookup.insert(key, id);
        id
    }

    /// Increment the refcount for an existing id. Invalid ids and 0 are ignored.
    pub fn acquire_id(&mut self, id: HyperlinkId) {
        if id == 0 {
            return;
        }
        if let Some(Some(slot)) = self.slots.get_mut(id as usize) {
            slot.ref_count = slot.ref_count.saturating_add(1);
        }
    }

    /// Decrement the refcount for an id, releasing the slot at zero.
    pub fn release_id(&mut self, id: HyperlinkId) {
        if id == 0 {
            return;
        }
        let Some(entry) = self.slots.get_mut(id as usize) else {
            return;
        };
        let should_remove = match entry.as_mut() {
            Some(slot) if slot.ref_count > 0 => {
                slot.ref_count -= 1;
                slot.ref_count == 0
            }
            _ => false,
        };
        if should_remove {
            if let Some(removed) = entry.take() {
                self.lookup.remove(&(removed.uri, removed.id_hint));
                self.free_list.push(id);
            }
        }
    }

    /// Release hyperlink references held by every cell of a dropped line.
    pub fn release_cells(&mut self, cells: &[Cell]) {
        for cell in cells {
            self.release_id(cell.hyperlink);
        }
    }

    /// Look up the URI for a hyperlink id.
    pub fn uri(&self, id: HyperlinkId) -> Option<&str> {
        self.slots
            .get(id as usize)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.uri.as_str())
    }

    /// Look up the application id-hint for a hyperlink id.
    pub fn id_hint(&self, id: HyperlinkId) -> Option<&str> {
        self.slots
            .get(id as usize)
            .and_then(|slot| slot.as_ref())
            .and_then(|slot| slot.id_hint.as_deref())
    }

    pub fn contains(&self, id: HyperlinkId) -> bool {
        self.uri(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.slots.push(None);
        self.lookup.clear();
        self.free_list.clear();
    }
}

impl Default for HyperlinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A single cell in the terminal grid.
///
/// Not `Copy`: combining marks and image fragments are heap references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// The primary scalar. A space for empty/erased cells.
    content: char,
    /// Combining marks following the primary scalar, if any.
    combining: Option<Box<[char]>>,
    /// Display width of the content in terminal columns (0, 1, or 2).
    width: u8,
    /// Cell-level flags (wide char, continuation).
    pub flags: CellFlags,
    /// SGR text attributes.
    pub attrs: SgrAttrs,
    /// Hyperlink id (0 = no link).
    pub hyperlink: HyperlinkId,
    /// Image fragment placed over this cell, if any.
    #[serde(skip)]
    pub fragment: Option<ImageFragment>,
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank()
    }
}

impl Cell {
    /// Create a new cell with the given character and default attributes.
    pub fn new(ch: char) -> Self {
        Self {
            content: ch,
            ..Self::blank()
        }
    }

    /// A blank single-width space with default attributes.
    pub fn blank() -> Self {
        Self {
            content: ' ',
            combining: None,
            width: 1,
            flags: CellFlags::empty(),
            attrs: SgrAttrs::default(),
            hyperlink: 0,
            fragment: None,
        }
    }

    /// Create a new cell with the given character, width, and attributes.
    pub fn with_attrs(ch: char, width: u8, attrs: SgrAttrs) -> Self {
        Self {
            content: ch,
            width,
            attrs,
            ..Self::blank()
        }
    }

    /// Create a wide (2-column) character cell.
    ///
    /// Returns the `(leading, phantom)` pair. The leading cell holds the
    /// character; the phantom occupies the next column with width 0.
    pub fn wide(ch: char, attrs: SgrAttrs) -> (Self, Self) {
        let leading = Self {
            content: ch,
            width: 2,
            flags: CellFlags::WIDE_CHAR,
            attrs,
            ..Self::blank()
        };
        let phantom = Self {
            content: ' ',
            width: 0,
            flags: CellFlags::WIDE_CONTINUATION,
            attrs,
            ..Self::blank()
        };
        (leading, phantom)
    }

    /// The primary scalar of this cell.
    pub fn content(&self) -> char {
        self.content
    }

    /// Combining marks following the primary scalar.
    pub fn combining(&self) -> &[char] {
        self.combining.as_deref().unwrap_or(&[])
    }

    /// The full grapheme cluster (primary scalar + combining marks).
    pub fn grapheme(&self) -> String {
        let mut s = String::new();
        s.push(self.content);
        s.extend(self.combining());
        s
    }

    /// The display width in terminal columns.
    pub fn width(&self) -> u8 {
        self.width
    }

    /// Whether this cell is the leading half of a wide character.
    pub fn is_wide(&self) -> bool {
        self.flags.contains(CellFlags::WIDE_CHAR)
    }

    /// Whether this cell is the phantom (trailing half) of a wide character.
    pub fn is_wide_continuation(&self) -> bool {
        self.flags.contains(CellFlags::WIDE_CONTINUATION)
    }

    /// Set the character content and display width, dropping any previous
    /// combining marks, wide flags, and image fragment.
    pub fn set_content(&mut self, ch: char, width: u8) {
        self.content = ch;
        self.combining = None;
        self.width = width;
        self.flags
            .remove(CellFlags::WIDE_CHAR | CellFlags::WIDE_CONTINUATION);
        self.fragment = None;
    }

    /// Append a combining mark to this cell's grapheme cluster.
    pub fn push_combining(&mut self, mark: char) {
        let mut marks: Vec<char> = self.combining.take().map(Vec::from).unwrap_or_default();
        marks.push(mark);
        self.combining = Some(marks.into_boxed_slice());
    }

    /// Reset this cell to a blank space keeping the given background color.
    ///
    /// Used by erase operations (ED, EL, ECH) which fill with the current
    /// background color but reset all other attributes.
    pub fn erase(&mut self, bg: Color) {
        *self = Self {
            attrs: SgrAttrs {
                bg,
                ..SgrAttrs::default()
            },
            ..Self::blank()
        };
    }

    /// Reset this cell to a blank space with default attributes.
    pub fn clear(&mut self) {
        *self = Self::blank();
    }
}
