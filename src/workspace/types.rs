//! Position and range types shared by every provider.
//!
//! - `SourceRange`: an LSP range with byte-offset conversion and containment checks
//! - `Rangeable`: anything that occupies a span of a document

use std::ops::{Deref, Range};

use ropey::Rope;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{Location, Position, Url};

/// A wrapper around `tower_lsp::lsp_types::Range`.
///
/// Positions count UTF-16 code units, as LSP clients do by default;
/// [`SourceRange::from_byte_range`] does the conversion through the document's rope.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct SourceRange(pub tower_lsp::lsp_types::Range);

impl SourceRange {
    pub fn new(start: Position, end: Position) -> SourceRange {
        SourceRange(tower_lsp::lsp_types::Range { start, end })
    }

    /// Creates a range from a byte offset range using the rope for position calculation.
    pub fn from_byte_range(rope: &Rope, range: Range<usize>) -> SourceRange {
        SourceRange::new(
            byte_to_position(rope, range.start),
            byte_to_position(rope, range.end),
        )
    }

    /// Inclusive on both ends, so a cursor right after the last character still counts.
    pub fn contains(&self, position: Position) -> bool {
        let Self(range) = self;
        (range.start.line < position.line
            || (range.start.line == position.line && range.start.character <= position.character))
            && (range.end.line > position.line
                || (range.end.line == position.line && range.end.character >= position.character))
    }

    /// The same range with its start moved by `delta` characters on the same line.
    pub fn with_start_shifted(&self, delta: i64) -> SourceRange {
        let mut range = self.0;
        range.start.character = shift(range.start.character, delta);
        SourceRange(range)
    }

    /// The same range ending at `end`.
    pub fn with_end(&self, end: Position) -> SourceRange {
        SourceRange::new(self.0.start, end)
    }

    pub fn location(&self, uri: &Url) -> Location {
        Location {
            uri: uri.clone(),
            range: self.0,
        }
    }
}

fn shift(character: u32, delta: i64) -> u32 {
    u32::try_from((i64::from(character) + delta).max(0)).unwrap_or(character)
}

fn byte_to_position(rope: &Rope, byte: usize) -> Position {
    let byte = byte.min(rope.len_bytes());
    let char_index = rope.byte_to_char(byte);
    let line = rope.char_to_line(char_index);
    let character =
        rope.char_to_utf16_cu(char_index) - rope.char_to_utf16_cu(rope.line_to_char(line));

    Position {
        line: line as u32,
        character: character as u32,
    }
}

/// The char index of `position`, clamped to the content of its line.
pub fn position_to_char(rope: &Rope, position: Position) -> usize {
    let line = (position.line as usize).min(rope.len_lines().saturating_sub(1));
    let line_start = rope.line_to_char(line);
    let content_end = line_start + line_content_chars(rope, line);

    let units = rope.char_to_utf16_cu(line_start) + position.character as usize;
    rope.utf16_cu_to_char(units.min(rope.len_utf16_cu()))
        .min(content_end)
}

/// Chars on `line` before its terminator.
pub(crate) fn line_content_chars(rope: &Rope, line: usize) -> usize {
    let Some(slice) = rope.get_line(line) else {
        return 0;
    };
    let terminator = slice
        .chars_at(slice.len_chars())
        .reversed()
        .take(2)
        .take_while(|c| matches!(c, '\n' | '\r'))
        .count();
    slice.len_chars() - terminator
}

impl Deref for SourceRange {
    type Target = tower_lsp::lsp_types::Range;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<tower_lsp::lsp_types::Range> for SourceRange {
    fn from(range: tower_lsp::lsp_types::Range) -> Self {
        SourceRange(range)
    }
}

/// Trait for types that occupy a span of a document.
pub trait Rangeable {
    fn range(&self) -> &SourceRange;

    fn includes_position(&self, position: Position) -> bool {
        self.range().contains(position)
    }
}
