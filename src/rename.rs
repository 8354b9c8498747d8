//! Rename for headers, link definitions, external links and file paths.
//!
//! Every rename starts from the reference set at the cursor (see
//! [`crate::references`]) and rewrites each occurrence in the shape it was
//! written in: header text verbatim, fragments as slugs, paths relative to
//! the linking document (or to the root for `/` links).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tower_lsp::lsp_types::{
    DocumentChangeOperation, DocumentChanges, OneOf, OptionalVersionedTextDocumentIdentifier,
    Position, Range, RenameFile, ResourceOp, TextDocumentEdit, TextEdit, Url, WorkspaceEdit,
};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::links::{LinkHref, LinkKind, TextileLink};
use crate::references::{Reference, ReferenceKind, ReferencesResolver};
use crate::slug::slugify;
use crate::workspace::{paths, Document, Workspace};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenameError {
    #[error("Renaming is not supported here. Try renaming a header or link.")]
    NotRenamable,
}

/// What the editor shows when a rename starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRename {
    pub range: Range,
    pub placeholder: String,
}

pub struct RenameEngine {
    workspace: Arc<dyn Workspace>,
    references: Arc<ReferencesResolver>,
}

impl RenameEngine {
    pub fn new(workspace: Arc<dyn Workspace>, references: Arc<ReferencesResolver>) -> RenameEngine {
        RenameEngine {
            workspace,
            references,
        }
    }

    pub async fn prepare_rename(
        &self,
        document: &Arc<Document>,
        position: Position,
        token: &CancellationToken,
    ) -> Result<PrepareRename, RenameError> {
        let references = self
            .references
            .get_references_at_position(document, position, token)
            .await;
        let trigger = references
            .iter()
            .find(|reference| reference.is_trigger_location)
            .ok_or(RenameError::NotRenamable)?;

        let link = match &trigger.kind {
            ReferenceKind::Header {
                header_text,
                header_text_location,
            } => {
                return Ok(PrepareRename {
                    range: header_text_location.range,
                    placeholder: header_text.clone(),
                })
            }
            ReferenceKind::Link(link) => link,
        };

        if let LinkKind::Definition { name, name_range } = &link.kind {
            if name_range.contains(position) {
                return Ok(PrepareRename {
                    range: name_range.0,
                    placeholder: name.clone(),
                });
            }
        }

        let source = &link.source;
        match &link.href {
            LinkHref::Reference { name } => Ok(PrepareRename {
                range: source.href_range.0,
                placeholder: name.clone(),
            }),
            LinkHref::External { .. } => Ok(PrepareRename {
                range: source.href_range.0,
                placeholder: document.text_in(&source.href_range),
            }),
            LinkHref::Internal { .. } => {
                if let Some(fragment) = source.fragment_range.filter(|r| r.contains(position)) {
                    let header_text = references.iter().find_map(|reference| match &reference.kind {
                        ReferenceKind::Header { header_text, .. } => Some(header_text.clone()),
                        ReferenceKind::Link(_) => None,
                    });
                    return Ok(PrepareRename {
                        range: fragment.0,
                        placeholder: header_text.unwrap_or_else(|| document.text_in(&fragment)),
                    });
                }

                let range = source.file_path_range();
                Ok(PrepareRename {
                    range: range.0,
                    placeholder: paths::decode(&document.text_in(&range)),
                })
            }
        }
    }

    /// Edits that rename whatever is at `position` to `new_name`. `None` when
    /// nothing renamable is there or the request was cancelled.
    pub async fn provide_rename_edits(
        &self,
        document: &Arc<Document>,
        position: Position,
        new_name: &str,
        token: &CancellationToken,
    ) -> Option<WorkspaceEdit> {
        let references = self
            .references
            .get_references_at_position(document, position, token)
            .await;
        let trigger = references.iter().find(|r| r.is_trigger_location)?;

        let edit = match &trigger.kind {
            ReferenceKind::Header { .. } => rename_fragment(&references, new_name),
            ReferenceKind::Link(link) => {
                let on_name = matches!(
                    &link.kind,
                    LinkKind::Definition { name_range, .. } if name_range.contains(position)
                );
                match &link.href {
                    _ if on_name => rename_link_reference(&references, new_name),
                    LinkHref::Reference { .. } => rename_link_reference(&references, new_name),
                    LinkHref::External { .. } => rename_external(&references, new_name),
                    LinkHref::Internal { fragment, .. }
                        if !fragment.is_empty()
                            && link
                                .source
                                .fragment_range
                                .is_some_and(|r| r.contains(position)) =>
                    {
                        rename_fragment(&references, new_name)
                    }
                    LinkHref::Internal { path, .. } => {
                        self.rename_file_path(document, path, &references, new_name, token)
                            .await?
                    }
                }
            }
        };

        if token.is_cancelled() {
            return None;
        }
        Some(edit.build())
    }

    async fn rename_file_path(
        &self,
        document: &Document,
        target: &Url,
        references: &[Reference],
        new_name: &str,
        token: &CancellationToken,
    ) -> Option<WorkspaceEditBuilder> {
        let root = self.workspace.root();
        let extension = self.workspace.file_extension();
        let document_path = document.path()?;

        let target = match self.references.resolve_link_path(target).await {
            Some(resolved) => resolved,
            None => target.clone(),
        };
        if token.is_cancelled() {
            return None;
        }

        let raw_new_path = paths::resolve_path(new_name, &document_path, root);
        let target_path = paths::uri_path(&target)?;
        let new_file_path = match paths::with_default_extension(&raw_new_path, extension) {
            Some(with_extension) if paths::has_extension(&target_path) => with_extension,
            _ => raw_new_path.clone(),
        };

        let mut builder = WorkspaceEditBuilder::default();
        if self.workspace.path_exists(&target).await {
            builder.rename_file(target.clone(), paths::file_uri(&new_file_path)?);
        } else {
            debug!(%target, "rename target does not exist, only updating links");
        }

        let keep_dot_prefix = new_name.starts_with("./") || new_name.starts_with(".\\");
        for reference in references {
            let ReferenceKind::Link(link) = &reference.kind else {
                continue;
            };
            let Some(new_text) = link_rename_text(link, root, &raw_new_path, keep_dot_prefix)
            else {
                continue;
            };
            builder.replace(
                &link.source.resource,
                link.source.file_path_range().0,
                paths::encode_path(&new_text),
            );
        }

        Some(builder)
    }
}

/// The new path text for `link`, in the same style (rooted or relative) as before.
fn link_rename_text(
    link: &TextileLink,
    root: &Path,
    new_path: &Path,
    keep_dot_prefix: bool,
) -> Option<String> {
    if link.source.path_text().starts_with('/') {
        return Some(format!("/{}", paths::relative_path(root, new_path)));
    }

    let link_dir = paths::uri_path(&link.source.resource)?
        .parent()?
        .to_path_buf();
    let relative = paths::relative_path(&link_dir, new_path);
    if keep_dot_prefix && !relative.starts_with("../") && !relative.starts_with("./") {
        return Some(format!("./{relative}"));
    }
    Some(relative)
}

fn rename_fragment(references: &[Reference], new_name: &str) -> WorkspaceEditBuilder {
    let slug = slugify(new_name);
    let mut builder = WorkspaceEditBuilder::default();

    for reference in references {
        match &reference.kind {
            ReferenceKind::Header {
                header_text_location,
                ..
            } => builder.replace(
                &header_text_location.uri,
                header_text_location.range,
                new_name,
            ),
            ReferenceKind::Link(link) => match (&link.href, link.source.fragment_range) {
                (LinkHref::External { .. }, _) => {
                    builder.replace(&link.source.resource, reference.location.range, new_name)
                }
                (_, Some(fragment)) => {
                    builder.replace(&link.source.resource, fragment.0, slug.value())
                }
                // The path part of an internal link is never a header name.
                (_, None) => {}
            },
        }
    }
    builder
}

fn rename_link_reference(references: &[Reference], new_name: &str) -> WorkspaceEditBuilder {
    let mut builder = WorkspaceEditBuilder::default();
    for reference in references {
        let ReferenceKind::Link(link) = &reference.kind else {
            continue;
        };
        let range = match &link.kind {
            LinkKind::Definition { name_range, .. } if reference.is_definition => name_range.0,
            _ => link.source.href_range.0,
        };
        builder.replace(&link.source.resource, range, new_name);
    }
    builder
}

fn rename_external(references: &[Reference], new_name: &str) -> WorkspaceEditBuilder {
    let mut builder = WorkspaceEditBuilder::default();
    for reference in references {
        if let ReferenceKind::Link(link) = &reference.kind {
            builder.replace(&link.source.resource, link.source.href_range.0, new_name);
        }
    }
    builder
}

/// Collects text edits per document plus file renames. Renames are emitted
/// after every text edit, so edits address documents by their old URIs.
#[derive(Debug, Default)]
struct WorkspaceEditBuilder {
    edits: BTreeMap<Url, Vec<TextEdit>>,
    renames: Vec<(Url, Url)>,
}

impl WorkspaceEditBuilder {
    fn replace(&mut self, uri: &Url, range: Range, new_text: impl Into<String>) {
        self.edits.entry(uri.clone()).or_default().push(TextEdit {
            range,
            new_text: new_text.into(),
        });
    }

    fn rename_file(&mut self, old_uri: Url, new_uri: Url) {
        self.renames.push((old_uri, new_uri));
    }

    fn build(self) -> WorkspaceEdit {
        let edits = self.edits.into_iter().map(|(uri, edits)| {
            DocumentChangeOperation::Edit(TextDocumentEdit {
                text_document: OptionalVersionedTextDocumentIdentifier { uri, version: None },
                edits: edits.into_iter().map(OneOf::Left).collect(),
            })
        });
        let renames = self.renames.into_iter().map(|(old_uri, new_uri)| {
            DocumentChangeOperation::Op(ResourceOp::Rename(RenameFile {
                old_uri,
                new_uri,
                options: None,
                annotation_id: None,
            }))
        });

        WorkspaceEdit {
            document_changes: Some(DocumentChanges::Operations(
                edits.chain(renames).collect(), // order matters here
            )),
            ..Default::default()
        }
    }
}
