//! Find-references across the workspace.
//!
//! The trigger position decides what is being searched for:
//!
//! - a header line: the header itself plus every link whose fragment slugs to it
//! - a definition name (`[name]...`): the definition and its same-document usages
//! - a link href: depending on the href, other links to the same external URI,
//!   the targeted header and its other links, or every link to the targeted file

use std::sync::Arc;

use tower_lsp::lsp_types::{Location, Position, Url};

use crate::cancel::CancellationToken;
use crate::links::{DocumentLinks, LinkHref, LinkKind, LinkProvider, TextileLink};
use crate::slug::slugify;
use crate::toc::{TocEntry, TocProvider};
use crate::workspace::{paths, Document, SourceRange, Workspace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    Header {
        header_text: String,
        header_text_location: Location,
    },
    Link(TextileLink),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub is_definition: bool,
    pub is_trigger_location: bool,
    pub location: Location,
}

impl Reference {
    fn header(uri: &Url, entry: &TocEntry, is_trigger_location: bool) -> Reference {
        Reference {
            kind: ReferenceKind::Header {
                header_text: entry.text.clone(),
                header_text_location: entry.header_text_location(uri),
            },
            is_definition: true,
            is_trigger_location,
            location: entry.header_location(uri),
        }
    }

    fn link(link: &TextileLink, range: &SourceRange, is_trigger_location: bool) -> Reference {
        Reference {
            kind: ReferenceKind::Link(link.clone()),
            is_definition: false,
            is_trigger_location,
            location: range.location(&link.source.resource),
        }
    }
}

pub struct ReferencesResolver {
    workspace: Arc<dyn Workspace>,
    toc: Arc<TocProvider>,
    links: Arc<LinkProvider>,
}

impl ReferencesResolver {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        toc: Arc<TocProvider>,
        links: Arc<LinkProvider>,
    ) -> ReferencesResolver {
        ReferencesResolver {
            workspace,
            toc,
            links,
        }
    }

    /// All references for whatever is at `position`. Empty when nothing
    /// referenceable is there or when `token` is cancelled.
    pub async fn get_references_at_position(
        &self,
        document: &Arc<Document>,
        position: Position,
        token: &CancellationToken,
    ) -> Vec<Reference> {
        let toc = self.toc.get_for_doc(document.clone()).await;
        if token.is_cancelled() {
            return vec![];
        }

        let references = match toc.entry_at_line(position.line) {
            Some(header) => self.references_to_header(document.uri(), header, token).await,
            None => {
                self.references_to_link_at_position(document, position, token)
                    .await
            }
        };

        if token.is_cancelled() {
            return vec![];
        }
        references
    }

    /// Every link in the workspace that points at `uri`, regardless of fragment.
    pub async fn get_references_to_file_in_workspace(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Vec<Reference> {
        let all = self.links.values().await;
        if token.is_cancelled() {
            return vec![];
        }
        self.references_to_linked_file(uri, &all, None)
    }

    /// Resolves an internal link path to an existing resource, trying the path
    /// as written first and then with the default extension appended.
    pub async fn resolve_link_path(&self, path: &Url) -> Option<Url> {
        if self.workspace.path_exists(path).await {
            return Some(path.clone());
        }

        let candidate = paths::uri_path(path)
            .and_then(|p| paths::with_default_extension(&p, self.workspace.file_extension()))
            .and_then(|p| paths::file_uri(&p))?;
        if self.workspace.path_exists(&candidate).await {
            return Some(candidate);
        }
        None
    }

    async fn references_to_header(
        &self,
        uri: &Url,
        header: &TocEntry,
        token: &CancellationToken,
    ) -> Vec<Reference> {
        let all = self.links.values().await;
        if token.is_cancelled() {
            return vec![];
        }

        let mut references = vec![Reference::header(uri, header, true)];
        let extension = self.workspace.file_extension();
        for document_links in &all {
            for link in &document_links.links {
                if let LinkHref::Internal { path, fragment } = &link.href {
                    if has_fragment(link, fragment)
                        && paths::looks_like_link_to(path, uri, extension)
                        && slugify(fragment).matches(&header.slug)
                    {
                        references.push(Reference::link(link, &link.source.href_range, false));
                    }
                }
            }
        }
        references
    }

    async fn references_to_link_at_position(
        &self,
        document: &Arc<Document>,
        position: Position,
        token: &CancellationToken,
    ) -> Vec<Reference> {
        let document_links = self.links.get_for_doc(document.clone()).await;
        if token.is_cancelled() {
            return vec![];
        }

        for link in &document_links.links {
            if let LinkKind::Definition { name, name_range } = &link.kind {
                if name_range.contains(position) {
                    return references_to_link_reference(&document_links, name, name_range);
                }
            }
            if link.source.href_range.contains(position) {
                return self
                    .references_to_link(link, &document_links, position, token)
                    .await;
            }
        }
        vec![]
    }

    async fn references_to_link(
        &self,
        source_link: &TextileLink,
        document_links: &DocumentLinks,
        position: Position,
        token: &CancellationToken,
    ) -> Vec<Reference> {
        match &source_link.href {
            LinkHref::Reference { name } => {
                references_to_link_reference(document_links, name, &source_link.source.href_range)
            }
            LinkHref::External { uri } => {
                let all = self.links.values().await;
                if token.is_cancelled() {
                    return vec![];
                }
                all.iter()
                    .flat_map(|document_links| document_links.links.iter())
                    .filter(|link| match &link.href {
                        LinkHref::External { uri: other } => {
                            LinkHref::same_external_target(uri, other)
                        }
                        _ => false,
                    })
                    .map(|link| {
                        let is_trigger = is_same_location(link, source_link);
                        Reference::link(link, &link.source.href_range, is_trigger)
                    })
                    .collect()
            }
            LinkHref::Internal { path, fragment } => {
                let resolved = self.resolve_link_path(path).await;
                if token.is_cancelled() {
                    return vec![];
                }

                let on_fragment = !fragment.is_empty()
                    && source_link
                        .source
                        .fragment_range
                        .is_some_and(|range| range.contains(position));

                match resolved {
                    Some(resolved) if on_fragment && self.workspace.is_document_uri(&resolved) => {
                        self.references_to_fragment(source_link, &resolved, fragment, token)
                            .await
                    }
                    resolved => {
                        let all = self.links.values().await;
                        if token.is_cancelled() {
                            return vec![];
                        }
                        let target = resolved.unwrap_or_else(|| path.clone());
                        self.references_to_linked_file(&target, &all, Some(source_link))
                    }
                }
            }
        }
    }

    async fn references_to_fragment(
        &self,
        source_link: &TextileLink,
        resolved: &Url,
        fragment: &str,
        token: &CancellationToken,
    ) -> Vec<Reference> {
        let mut references = vec![];

        if let Some(target) = self.workspace.get_or_load_document(resolved).await {
            let toc = self.toc.get_for_doc(target).await;
            if token.is_cancelled() {
                return vec![];
            }
            if let Some(entry) = toc.lookup(fragment) {
                references.push(Reference::header(resolved, entry, false));
            }
        }

        let all = self.links.values().await;
        if token.is_cancelled() {
            return vec![];
        }

        let wanted = slugify(fragment);
        let extension = self.workspace.file_extension();
        for document_links in &all {
            for link in &document_links.links {
                let LinkHref::Internal {
                    path,
                    fragment: other,
                } = &link.href
                else {
                    continue;
                };
                if has_fragment(link, other)
                    && paths::looks_like_link_to(path, resolved, extension)
                    && slugify(other).matches(&wanted)
                {
                    references.push(Reference::link(
                        link,
                        &link.source.href_range,
                        is_same_location(link, source_link),
                    ));
                }
            }
        }
        references
    }

    fn references_to_linked_file(
        &self,
        resource: &Url,
        all: &[Arc<DocumentLinks>],
        source_link: Option<&TextileLink>,
    ) -> Vec<Reference> {
        let extension = self.workspace.file_extension();
        all.iter()
            .flat_map(|document_links| document_links.links.iter())
            .filter(|link| match &link.href {
                LinkHref::Internal { path, .. } => {
                    paths::looks_like_link_to(path, resource, extension)
                        // Fragment-only links inside the file itself are not links to the file.
                        && !(link.source.text.starts_with('#')
                            && paths::same_file(&link.source.resource, resource))
                }
                _ => false,
            })
            .map(|link| {
                let is_trigger = source_link.is_some_and(|source| is_same_location(link, source));
                Reference::link(link, &link.source.href_range, is_trigger)
            })
            .collect()
    }
}

fn references_to_link_reference(
    document_links: &DocumentLinks,
    name: &str,
    trigger_range: &SourceRange,
) -> Vec<Reference> {
    document_links
        .links
        .iter()
        .filter_map(|link| match (&link.kind, &link.href) {
            (
                LinkKind::Definition {
                    name: defined,
                    name_range,
                },
                _,
            ) if defined == name => Some(Reference {
                kind: ReferenceKind::Link(link.clone()),
                is_definition: true,
                is_trigger_location: name_range == trigger_range,
                location: name_range.location(&link.source.resource),
            }),
            (LinkKind::Link, LinkHref::Reference { name: used }) if used == name => {
                Some(Reference::link(
                    link,
                    &link.source.href_range,
                    &link.source.href_range == trigger_range,
                ))
            }
            _ => None,
        })
        .collect()
}

fn is_same_location(a: &TextileLink, b: &TextileLink) -> bool {
    a.source.resource == b.source.resource && a.source.href_range == b.source.href_range
}

/// Only links written with a non-empty `#fragment` can point at a header.
fn has_fragment(link: &TextileLink, fragment: &str) -> bool {
    !fragment.is_empty() && link.source.fragment_range.is_some()
}
