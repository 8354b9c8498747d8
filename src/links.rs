//! Link extraction and classification.
//!
//! Every link-like construct in a document becomes a [`TextileLink`]: inline
//! links, images, image links and link definitions (`[name]target`). Hrefs are
//! classified as external URIs, internal workspace paths with an optional
//! fragment, or named references to a definition in the same document.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tower_lsp::lsp_types::{Position, Url};

use crate::textile_parser::{tokenize, Token};
use crate::workspace::{paths, Document, Rangeable, SourceRange, Workspace, WorkspaceInfoCache};

static SCHEME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").unwrap());

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkHref {
    External {
        uri: Url,
    },
    Internal {
        /// Resolved target, without the fragment. May lack an extension.
        path: Url,
        /// Decoded text after `#`, possibly empty.
        fragment: String,
    },
    Reference {
        name: String,
    },
}

impl LinkHref {
    /// External targets are equal when scheme, authority and path match.
    /// Query and fragment are ignored.
    pub fn same_external_target(a: &Url, b: &Url) -> bool {
        a.scheme() == b.scheme()
            && a.host_str() == b.host_str()
            && a.port() == b.port()
            && a.username() == b.username()
            && a.path() == b.path()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Link,
    Definition {
        name: String,
        name_range: SourceRange,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSource {
    pub resource: Url,
    /// The href exactly as written.
    pub text: String,
    pub href_range: SourceRange,
    /// The part of the href before `#`, when there is one.
    pub path_range: Option<SourceRange>,
    /// The part of the href after `#`, when the href has a `#`.
    pub fragment_range: Option<SourceRange>,
}

impl LinkSource {
    /// The href text before `#`.
    pub fn path_text(&self) -> &str {
        self.text.split('#').next().unwrap_or_default()
    }

    /// The href range without the `#` and fragment.
    pub fn file_path_range(&self) -> SourceRange {
        match &self.fragment_range {
            Some(fragment) => self.href_range.with_end(Position {
                line: fragment.start.line,
                character: fragment.start.character.saturating_sub(1),
            }),
            None => self.href_range,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextileLink {
    pub kind: LinkKind,
    pub href: LinkHref,
    pub source: LinkSource,
}

impl TextileLink {
    pub fn is_definition(&self) -> bool {
        matches!(self.kind, LinkKind::Definition { .. })
    }
}

impl Rangeable for TextileLink {
    fn range(&self) -> &SourceRange {
        &self.source.href_range
    }
}

/// Link definitions of one document, keyed by exact name. The first definition
/// of a name wins.
#[derive(Debug, Clone, Default)]
pub struct LinkDefinitionSet {
    definitions: HashMap<String, TextileLink>,
}

impl LinkDefinitionSet {
    fn new(links: &[TextileLink]) -> LinkDefinitionSet {
        let mut definitions = HashMap::new();
        for link in links {
            if let LinkKind::Definition { name, .. } = &link.kind {
                definitions
                    .entry(name.clone())
                    .or_insert_with(|| link.clone());
            }
        }
        LinkDefinitionSet { definitions }
    }

    pub fn lookup(&self, name: &str) -> Option<&TextileLink> {
        self.definitions.get(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentLinks {
    /// All links in document order, definitions included.
    pub links: Vec<TextileLink>,
    pub definitions: LinkDefinitionSet,
}

pub fn extract_links(document: &Document, root: &Path) -> DocumentLinks {
    let tokens = tokenize(&document.text());
    let Some(document_path) = document.path() else {
        return DocumentLinks::default();
    };

    let definition_names: Vec<&str> = tokens
        .iter()
        .filter_map(|token| match token {
            Token::LinkDefinition { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();

    let context = HrefContext {
        document,
        document_path: &document_path,
        root,
        definition_names: &definition_names,
    };

    let mut links = vec![];
    for token in &tokens {
        match token {
            Token::Link {
                href, href_range, ..
            } => links.extend(context.link(LinkKind::Link, href, href_range.clone(), true)),
            Token::Image {
                src,
                src_range,
                href,
                ..
            } => {
                links.extend(context.link(LinkKind::Link, src, src_range.clone(), false));
                if let Some((href, href_range)) = href {
                    links.extend(context.link(LinkKind::Link, href, href_range.clone(), true));
                }
            }
            Token::LinkDefinition {
                name,
                name_range,
                href,
                href_range,
                ..
            } => {
                let kind = LinkKind::Definition {
                    name: name.clone(),
                    name_range: document.range(name_range.clone()),
                };
                links.extend(context.link(kind, href, href_range.clone(), false));
            }
            Token::Heading { .. } => {}
        }
    }

    let definitions = LinkDefinitionSet::new(&links);
    DocumentLinks { links, definitions }
}

struct HrefContext<'a> {
    document: &'a Document,
    document_path: &'a Path,
    root: &'a Path,
    definition_names: &'a [&'a str],
}

impl HrefContext<'_> {
    fn link(
        &self,
        kind: LinkKind,
        text: &str,
        range: Range<usize>,
        allow_reference: bool,
    ) -> Option<TextileLink> {
        let href_range = self.document.range(range.clone());
        let mut source = LinkSource {
            resource: self.document.uri().clone(),
            text: text.to_string(),
            href_range,
            path_range: None,
            fragment_range: None,
        };

        if allow_reference && self.is_reference(text) {
            return Some(TextileLink {
                kind,
                href: LinkHref::Reference {
                    name: text.to_string(),
                },
                source,
            });
        }

        if let Some(scheme) = SCHEME_RE.find(text) {
            if !scheme.as_str().eq_ignore_ascii_case("file:") {
                let uri = Url::parse(text).ok()?;
                return Some(TextileLink {
                    kind,
                    href: LinkHref::External { uri },
                    source,
                });
            }
        }

        let (path_text, fragment) = match text.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (text, None),
        };

        if !path_text.is_empty() {
            source.path_range = Some(
                self.document
                    .range(range.start..range.start + path_text.len()),
            );
        }
        if fragment.is_some() {
            source.fragment_range = Some(
                self.document
                    .range(range.start + path_text.len() + 1..range.end),
            );
        }

        let path = if path_text.is_empty() {
            self.document.uri().clone()
        } else if let Some(file_path) = path_text.strip_prefix("file:") {
            let decoded = paths::decode(file_path.trim_start_matches("//"));
            paths::file_uri(&paths::normalize(Path::new(&decoded)))?
        } else {
            let decoded = paths::decode(path_text);
            paths::file_uri(&paths::resolve_path(&decoded, self.document_path, self.root))?
        };

        Some(TextileLink {
            kind,
            href: LinkHref::Internal {
                path,
                fragment: fragment.map(paths::decode).unwrap_or_default(),
            },
            source,
        })
    }

    /// A bare word names a reference when a definition with that name exists.
    /// A case-only mismatch still counts so the broken reference gets reported.
    fn is_reference(&self, text: &str) -> bool {
        let bare_word = !text.is_empty()
            && !text.contains(['/', '.', '#', ':', '\\'])
            && !SCHEME_RE.is_match(text);
        bare_word
            && self
                .definition_names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(text))
    }
}

pub type LinkProvider = WorkspaceInfoCache<DocumentLinks>;

pub fn link_provider(workspace: Arc<dyn Workspace>) -> LinkProvider {
    let root = workspace.root().to_path_buf();
    WorkspaceInfoCache::new(workspace, move |document: Arc<Document>| {
        let root = root.clone();
        async move { extract_links(&document, &root) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> DocumentLinks {
        let document = Document::new(
            Url::parse("file:///ws/docs/guide.textile").unwrap(),
            1,
            text,
        );
        extract_links(&document, Path::new("/ws"))
    }

    fn internal(link: &TextileLink) -> (String, String) {
        match &link.href {
            LinkHref::Internal { path, fragment } => (path.path().to_string(), fragment.clone()),
            other => panic!("Expected an internal link, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_and_rooted_paths() {
        let links = extract("\"a\":other.textile and \"b\":/api/ref and \"c\":../top#intro");
        let hrefs: Vec<_> = links.links.iter().map(internal).collect();

        assert_eq!(
            hrefs,
            vec![
                ("/ws/docs/other.textile".to_string(), "".to_string()),
                ("/ws/api/ref".to_string(), "".to_string()),
                ("/ws/top".to_string(), "intro".to_string()),
            ]
        );
    }

    #[test]
    fn test_fragment_only_link_targets_own_document() {
        let links = extract("h1. abc\n\n\"x\":#abc");
        let link = &links.links[0];

        assert_eq!(internal(link), ("/ws/docs/guide.textile".to_string(), "abc".to_string()));
        assert!(link.source.path_range.is_none());
        let fragment = link.source.fragment_range.unwrap();
        assert_eq!(fragment.start, Position { line: 2, character: 5 });
        assert_eq!(fragment.end, Position { line: 2, character: 8 });
    }

    #[test]
    fn test_path_and_fragment_ranges() {
        let links = extract("\"x\":doc#sec");
        let source = &links.links[0].source;

        assert_eq!(source.path_text(), "doc");
        assert_eq!(source.path_range.unwrap().end, Position { line: 0, character: 7 });
        assert_eq!(source.fragment_range.unwrap().start, Position { line: 0, character: 8 });
        assert_eq!(source.file_path_range().end, Position { line: 0, character: 7 });
    }

    #[test]
    fn test_percent_decoding() {
        let links = extract("\"x\":my%20doc.textile#a%20b");
        assert_eq!(
            internal(&links.links[0]),
            ("/ws/docs/my%20doc.textile".to_string(), "a b".to_string())
        );
    }

    #[test]
    fn test_external_links() {
        let links = extract("\"a\":https://example.com/x?q=1 \"b\":mailto:me@example.com");
        assert!(matches!(&links.links[0].href, LinkHref::External { uri } if uri.host_str() == Some("example.com")));
        assert!(matches!(&links.links[1].href, LinkHref::External { uri } if uri.scheme() == "mailto"));
    }

    #[test]
    fn test_file_scheme_is_internal() {
        let links = extract("\"a\":file:///ws/x.textile#h");
        assert_eq!(internal(&links.links[0]), ("/ws/x.textile".to_string(), "h".to_string()));
    }

    #[test]
    fn test_external_equality_ignores_query_and_fragment() {
        let a = Url::parse("https://example.com/page?x=1#top").unwrap();
        let b = Url::parse("https://example.com/page").unwrap();
        let c = Url::parse("http://example.com/page").unwrap();

        assert!(LinkHref::same_external_target(&a, &b));
        assert!(!LinkHref::same_external_target(&a, &c));
    }

    #[test]
    fn test_definitions_and_references() {
        let links = extract("See \"rust\":rust and \"other\":Rust.\n\n[rust]https://www.rust-lang.org");

        assert!(matches!(&links.links[0].href, LinkHref::Reference { name } if name == "rust"));
        assert!(
            matches!(&links.links[1].href, LinkHref::Reference { name } if name == "Rust"),
            "A case-only mismatch is still a reference, to be reported as broken"
        );
        let definition = &links.links[2];
        assert!(definition.is_definition());
        assert!(matches!(&definition.href, LinkHref::External { .. }));
        assert!(links.definitions.lookup("rust").is_some());
        assert!(links.definitions.lookup("Rust").is_none());
    }

    #[test]
    fn test_bare_word_without_definition_is_internal() {
        let links = extract("\"x\":readme");
        assert_eq!(internal(&links.links[0]).0, "/ws/docs/readme");
    }

    #[test]
    fn test_images_and_image_links() {
        let links = extract("Logo !img/logo.png!:home.textile here");
        let paths: Vec<_> = links.links.iter().map(|l| internal(l).0).collect();
        assert_eq!(paths, vec!["/ws/docs/img/logo.png", "/ws/docs/home.textile"]);
    }

    #[test]
    fn test_first_definition_wins() {
        let links = extract("[a]one.textile\n[a]two.textile");
        let definition = links.definitions.lookup("a").unwrap();
        assert_eq!(definition.source.text, "one.textile");
        assert_eq!(links.definitions.len(), 1);
    }
}
