use std::ops::Range;
use std::path::PathBuf;

use ropey::Rope;
use tower_lsp::lsp_types::{Position, Url};

use super::types::{line_content_chars, position_to_char, SourceRange};

/// An immutable snapshot of one workspace document.
///
/// `(uri, version)` identifies the content: two snapshots with the same pair
/// hold the same text. Every mutation produces a new snapshot with a higher
/// version.
#[derive(Debug, Clone)]
pub struct Document {
    uri: Url,
    version: i32,
    rope: Rope,
}

impl Document {
    pub fn new(uri: Url, version: i32, text: &str) -> Document {
        Document {
            uri,
            version,
            rope: Rope::from_str(text),
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.uri.to_file_path().ok()
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Line `n` without its line terminator.
    pub fn line_at(&self, n: usize) -> Option<String> {
        let line = self.rope.get_line(n)?.to_string();
        Some(line.trim_end_matches(['\n', '\r']).to_string())
    }

    pub fn range(&self, bytes: Range<usize>) -> SourceRange {
        SourceRange::from_byte_range(&self.rope, bytes)
    }

    /// The text covered by `range`, clamped to the document.
    pub fn text_in(&self, range: &SourceRange) -> String {
        let start = self.char_index(range.start);
        let end = self.char_index(range.end).max(start);
        self.rope.slice(start..end).to_string()
    }

    /// End position of line `n` (after its last character, before the terminator).
    pub fn line_end(&self, n: usize) -> Position {
        let length = match self.rope.get_line(n) {
            Some(line) => line.slice(..line_content_chars(&self.rope, n)).len_utf16_cu(),
            None => 0,
        };
        Position {
            line: n as u32,
            character: length as u32,
        }
    }

    fn char_index(&self, position: Position) -> usize {
        position_to_char(&self.rope, position)
    }
}
