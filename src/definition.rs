use std::sync::Arc;

use tower_lsp::lsp_types::{Location, Position, Range};

use crate::cancel::CancellationToken;
use crate::links::{LinkHref, LinkKind, LinkProvider};
use crate::references::ReferencesResolver;
use crate::toc::TocProvider;
use crate::workspace::{Document, Workspace};

pub struct DefinitionProvider {
    workspace: Arc<dyn Workspace>,
    toc: Arc<TocProvider>,
    links: Arc<LinkProvider>,
    references: Arc<ReferencesResolver>,
}

impl DefinitionProvider {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        toc: Arc<TocProvider>,
        links: Arc<LinkProvider>,
        references: Arc<ReferencesResolver>,
    ) -> DefinitionProvider {
        DefinitionProvider {
            workspace,
            toc,
            links,
            references,
        }
    }

    /// Where the link under the cursor points: a header, a link definition, or
    /// the top of a file. A header line is its own definition.
    pub async fn provide_definition(
        &self,
        document: &Arc<Document>,
        position: Position,
        token: &CancellationToken,
    ) -> Option<Vec<Location>> {
        let toc = self.toc.get_for_doc(document.clone()).await;
        if let Some(header) = toc.entry_at_line(position.line) {
            return Some(vec![header.header_location(document.uri())]);
        }

        let document_links = self.links.get_for_doc(document.clone()).await;
        if token.is_cancelled() {
            return None;
        }

        // First, find the link the cursor is in
        let link = document_links.links.iter().find(|link| {
            link.source.href_range.contains(position)
                || matches!(&link.kind, LinkKind::Definition { name_range, .. } if name_range.contains(position))
        })?;

        if let LinkKind::Definition { name_range, .. } = &link.kind {
            if name_range.contains(position) {
                return Some(vec![name_range.location(document.uri())]);
            }
        }

        match &link.href {
            LinkHref::External { .. } => None,
            LinkHref::Reference { name } => {
                let definition = document_links.definitions.lookup(name)?;
                match &definition.kind {
                    LinkKind::Definition { name_range, .. } => {
                        Some(vec![name_range.location(document.uri())])
                    }
                    LinkKind::Link => None,
                }
            }
            LinkHref::Internal { path, fragment } => {
                let resolved = self.references.resolve_link_path(path).await?;
                if token.is_cancelled() {
                    return None;
                }

                if !fragment.is_empty() {
                    if let Some(target) = self.workspace.get_or_load_document(&resolved).await {
                        let toc = self.toc.get_for_doc(target).await;
                        if let Some(entry) = toc.lookup(fragment) {
                            return Some(vec![entry.header_location(&resolved)]);
                        }
                    }
                }

                Some(vec![Location {
                    uri: resolved,
                    range: Range {
                        start: Position {
                            line: 0,
                            character: 0,
                        },
                        end: Position {
                            line: 0,
                            character: 1,
                        },
                    },
                }])
            }
        }
    }
}
