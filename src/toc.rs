//! Per-document header index.
//!
//! Each header gets a slug unique within its document. When two headers slug
//! the same way, the later ones get `-1`, `-2`, ... suffixes in document order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tower_lsp::lsp_types::{Location, Position, Url};

use crate::slug::{slugify, Slug};
use crate::textile_parser::{tokenize, Token};
use crate::workspace::{Document, Rangeable, SourceRange, Workspace, WorkspaceInfoCache};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub slug: Slug,
    /// Header text without the `hN.` signature.
    pub text: String,
    pub level: u8,
    pub line: u32,
    /// From the header line to the end of its section.
    pub section_range: SourceRange,
    /// The whole header line.
    pub header_range: SourceRange,
    /// Just the header text.
    pub header_text_range: SourceRange,
}

impl TocEntry {
    pub fn header_location(&self, uri: &Url) -> Location {
        self.header_range.location(uri)
    }

    pub fn header_text_location(&self, uri: &Url) -> Location {
        self.header_text_range.location(uri)
    }
}

impl Rangeable for TocEntry {
    fn range(&self) -> &SourceRange {
        &self.header_range
    }
}

#[derive(Debug, Clone)]
pub struct TableOfContents {
    uri: Url,
    entries: Vec<TocEntry>,
}

impl TableOfContents {
    pub fn build(document: &Document) -> TableOfContents {
        let headings = tokenize(&document.text())
            .into_iter()
            .filter_map(|token| match token {
                Token::Heading {
                    level,
                    text,
                    line_range,
                    text_range,
                    ..
                } => Some((level, text, line_range, text_range)),
                _ => None,
            })
            .collect::<Vec<_>>();

        // Occurrence counts of base slugs seen so far.
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut entries: Vec<TocEntry> = Vec::with_capacity(headings.len());

        for (level, text, line_range, text_range) in headings {
            let base = slugify(&text);
            let slug = match seen.get_mut(base.value()) {
                Some(count) => {
                    *count += 1;
                    slugify(&format!("{}-{}", base.value(), count))
                }
                None => {
                    seen.insert(base.value().to_string(), 0);
                    base
                }
            };

            // Lines come from the rope so they always agree with the ranges.
            let header_range = document.range(line_range);
            entries.push(TocEntry {
                slug,
                text,
                level,
                line: header_range.start.line,
                section_range: SourceRange::default(),
                header_range,
                header_text_range: document.range(text_range),
            });
        }

        let last_line = document.line_count().saturating_sub(1);
        for i in 0..entries.len() {
            let end_line = entries[i + 1..]
                .iter()
                .find(|next| next.level <= entries[i].level)
                .map(|next| next.line.saturating_sub(1) as usize)
                .unwrap_or(last_line);
            let start = Position {
                line: entries[i].line,
                character: 0,
            };
            entries[i].section_range = SourceRange::new(start, document.line_end(end_line));
        }

        TableOfContents {
            uri: document.uri().clone(),
            entries,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    /// Finds the entry a link fragment points at. Matching is on slugs and ignores case.
    pub fn lookup(&self, fragment: &str) -> Option<&TocEntry> {
        let wanted = slugify(fragment);
        self.entries.iter().find(|entry| entry.slug.matches(&wanted))
    }

    pub fn entry_at_line(&self, line: u32) -> Option<&TocEntry> {
        self.entries.iter().find(|entry| entry.line == line)
    }

    pub fn slugs(&self) -> HashSet<String> {
        self.entries
            .iter()
            .map(|entry| entry.slug.value().to_string())
            .collect()
    }
}

pub type TocProvider = WorkspaceInfoCache<TableOfContents>;

pub fn toc_provider(workspace: Arc<dyn Workspace>) -> TocProvider {
    WorkspaceInfoCache::new(workspace, |document: Arc<Document>| async move {
        TableOfContents::build(&document)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(text: &str) -> TableOfContents {
        let document = Document::new(Url::parse("file:///ws/doc.textile").unwrap(), 1, text);
        TableOfContents::build(&document)
    }

    fn slugs(toc: &TableOfContents) -> Vec<&str> {
        toc.entries().iter().map(|e| e.slug.value()).collect()
    }

    /// Test: repeated headers get numbered suffixes in document order
    #[test]
    fn test_collision_numbering() {
        let toc = build("h1. a\n\nh1. a\n\nh1. a");
        assert_eq!(slugs(&toc), vec!["a", "a-1", "a-2"]);
    }

    /// Test: collisions are detected on the slug, not the raw text
    #[test]
    fn test_collision_uses_slug() {
        let toc = build("h2. Getting Started\n\nh2. getting   started!");
        assert_eq!(slugs(&toc), vec!["getting-started", "getting-started-1"]);
    }

    /// Test: a suffixed slug can coincide with a later literal header
    #[test]
    fn test_suffix_does_not_reserve_slug() {
        let toc = build("h1. a\n\nh1. a\n\nh1. a 1");
        assert_eq!(slugs(&toc), vec!["a", "a-1", "a-1"]);
    }

    /// Test: sections end before the next header of the same or higher level
    #[test]
    fn test_section_ranges() {
        let text = "h1. Top\nintro\nh2. Child\nbody\nh1. Next\ntail";
        let toc = build(text);
        let entries = toc.entries();

        assert_eq!(entries[0].section_range.start, Position { line: 0, character: 0 });
        assert_eq!(entries[0].section_range.end, Position { line: 3, character: 4 });
        assert_eq!(entries[1].section_range.end, Position { line: 3, character: 4 });
        assert_eq!(entries[2].section_range.end, Position { line: 5, character: 4 });
    }

    /// Test: header and header text ranges
    #[test]
    fn test_header_ranges() {
        let toc = build("intro\nh3. Some Title");
        let entry = &toc.entries()[0];

        assert_eq!(entry.line, 1);
        assert_eq!(entry.level, 3);
        assert_eq!(entry.text, "Some Title");
        assert_eq!(entry.header_range.start, Position { line: 1, character: 0 });
        assert_eq!(entry.header_range.end, Position { line: 1, character: 14 });
        assert_eq!(entry.header_text_range.start, Position { line: 1, character: 4 });
    }

    #[test]
    fn test_lookup_normalizes_fragment() {
        let toc = build("h1. A b C\n\nh2. Other");
        assert_eq!(toc.lookup("a-b-c").map(|e| e.line), Some(0));
        assert_eq!(toc.lookup("A-B-C").map(|e| e.line), Some(0));
        assert_eq!(toc.lookup("A b C").map(|e| e.line), Some(0));
        assert!(toc.lookup("missing").is_none());
    }

    #[test]
    fn test_headers_in_code_blocks_are_ignored() {
        let toc = build("bc. h1. not a header\n\nh1. real");
        assert_eq!(slugs(&toc), vec!["real"]);
    }

    /// Test: entry lines agree with header ranges whatever separators precede them
    #[test]
    fn test_entry_line_matches_header_range() {
        let toc = build("intro\u{c}more\rh1. Title\r\n\r\n\"x\":#title");
        let entry = &toc.entries()[0];

        assert_eq!(entry.line, 1);
        assert_eq!(entry.line, entry.header_range.start.line);
        assert_eq!(toc.entry_at_line(1).map(|e| e.slug.value()), Some("title"));
        assert_eq!(entry.section_range.end, Position { line: 3, character: 10 });
    }

    #[test]
    fn test_empty_document() {
        let toc = build("");
        assert!(toc.entries().is_empty());
        assert!(toc.entry_at_line(0).is_none());
    }
}
