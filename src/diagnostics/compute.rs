use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::json;
use tokio::sync::Semaphore;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Url};
use tracing::{trace, warn};

use super::{codes, SOURCE};
use crate::cancel::CancellationToken;
use crate::config::DiagnosticSettings;
use crate::links::{DocumentLinks, LinkHref, LinkProvider, TextileLink};
use crate::references::ReferencesResolver;
use crate::toc::TocProvider;
use crate::workspace::{paths, Document, SourceRange, Workspace};

/// File-link resolutions allowed in flight at once, across all validations.
const MAX_CONCURRENT_FILE_CHECKS: usize = 10;

/// Validation settings in the form the computer uses them.
#[derive(Debug, Clone)]
pub struct DiagnosticOptions {
    pub enabled: bool,
    pub debounce: Duration,
    pub file_links: Option<DiagnosticSeverity>,
    pub fragment_links: Option<DiagnosticSeverity>,
    pub file_link_fragments: Option<DiagnosticSeverity>,
    pub reference_links: Option<DiagnosticSeverity>,
    ignore_links: GlobSet,
}

impl DiagnosticOptions {
    pub fn new(settings: &DiagnosticSettings) -> DiagnosticOptions {
        let mut builder = GlobSetBuilder::new();
        for pattern in &settings.ignore_links {
            match GlobBuilder::new(pattern).literal_separator(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(err) => warn!(%pattern, %err, "ignoring invalid ignore_links glob"),
            }
        }
        let ignore_links = builder.build().unwrap_or_else(|err| {
            warn!(%err, "could not compile ignore_links");
            GlobSet::empty()
        });

        DiagnosticOptions {
            enabled: settings.enabled,
            debounce: settings.debounce(),
            file_links: settings.file_links.to_lsp(),
            fragment_links: settings.fragment_links.to_lsp(),
            file_link_fragments: settings.file_link_fragments().to_lsp(),
            reference_links: settings.reference_links.to_lsp(),
            ignore_links,
        }
    }

    /// Whether `link_text` matches one of the ignore globs.
    pub fn is_ignored(&self, link_text: &str) -> bool {
        self.ignore_links.is_match(link_text)
    }
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        DiagnosticOptions::new(&DiagnosticSettings::default())
    }
}

/// The outcome of validating one document version.
#[derive(Debug, Clone)]
pub struct DocumentValidation {
    pub diagnostics: Vec<Diagnostic>,
    /// The links the diagnostics were computed from.
    pub links: Arc<DocumentLinks>,
}

pub struct DiagnosticComputer {
    workspace: Arc<dyn Workspace>,
    toc: Arc<TocProvider>,
    links: Arc<LinkProvider>,
    references: Arc<ReferencesResolver>,
    file_checks: Arc<Semaphore>,
}

impl DiagnosticComputer {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        toc: Arc<TocProvider>,
        links: Arc<LinkProvider>,
        references: Arc<ReferencesResolver>,
    ) -> DiagnosticComputer {
        DiagnosticComputer {
            workspace,
            toc,
            links,
            references,
            file_checks: Arc::new(Semaphore::new(MAX_CONCURRENT_FILE_CHECKS)),
        }
    }

    /// Validates every link in `document`. `None` when cancelled.
    pub async fn compute(
        &self,
        document: &Arc<Document>,
        options: &DiagnosticOptions,
        token: &CancellationToken,
    ) -> Option<DocumentValidation> {
        let links = self.links.get_for_doc(document.clone()).await;
        if token.is_cancelled() {
            return None;
        }
        if !options.enabled {
            return Some(DocumentValidation {
                diagnostics: vec![],
                links,
            });
        }

        let mut diagnostics = self.validate_fragment_links(document, options, &links).await;
        diagnostics.extend(validate_reference_links(options, &links));
        diagnostics.extend(
            self.validate_file_links(document, options, &links, token)
                .await?,
        );

        if token.is_cancelled() {
            return None;
        }
        Some(DocumentValidation { diagnostics, links })
    }

    async fn validate_fragment_links(
        &self,
        document: &Arc<Document>,
        options: &DiagnosticOptions,
        links: &DocumentLinks,
    ) -> Vec<Diagnostic> {
        let Some(severity) = options.fragment_links else {
            return vec![];
        };
        let toc = self.toc.get_for_doc(document.clone()).await;

        links
            .links
            .iter()
            .filter_map(|link| {
                let LinkHref::Internal { path, fragment } = &link.href else {
                    return None;
                };
                if fragment.is_empty()
                    || !link.source.text.starts_with('#')
                    || !paths::same_file(path, document.uri())
                    || toc.lookup(fragment).is_some()
                    || options.is_ignored(&link.source.text)
                {
                    return None;
                }
                Some(diagnostic(
                    link.source.href_range,
                    format!("No header found: '{fragment}'"),
                    severity,
                    codes::NO_SUCH_HEADER_IN_OWN_FILE,
                    json!({ "hrefText": link.source.text }),
                ))
            })
            .collect()
    }

    async fn validate_file_links(
        &self,
        document: &Document,
        options: &DiagnosticOptions,
        links: &DocumentLinks,
        token: &CancellationToken,
    ) -> Option<Vec<Diagnostic>> {
        let Some(path_severity) = options.file_links else {
            return Some(vec![]);
        };

        // Group by target so each distinct file is resolved once.
        let mut by_target: BTreeMap<Url, Vec<&TextileLink>> = BTreeMap::new();
        for link in &links.links {
            if let LinkHref::Internal { path, .. } = &link.href {
                if !link.source.text.starts_with('#') {
                    by_target.entry(path.clone()).or_default().push(link);
                }
            }
        }

        let checks = by_target.into_iter().map(|(path, links)| async move {
            let _permit = self.file_checks.acquire().await.ok()?;
            if token.is_cancelled() {
                return None;
            }

            let resolved = self.references.resolve_link_path(&path).await;
            if token.is_cancelled() {
                return None;
            }

            let mut diagnostics = vec![];
            match resolved {
                None => {
                    let fs_path = paths::uri_path(&path)
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| path.to_string());
                    for link in links {
                        if options.is_ignored(link.source.path_text()) {
                            trace!(href = %link.source.text, "ignored missing file link");
                            continue;
                        }
                        diagnostics.push(diagnostic(
                            link.source.href_range,
                            format!("File does not exist at path: {fs_path}"),
                            path_severity,
                            codes::NO_SUCH_FILE,
                            json!({ "fsPath": fs_path, "hrefText": link.source.text }),
                        ));
                    }
                }
                Some(resolved) => {
                    let Some(severity) = options.file_link_fragments else {
                        return Some(diagnostics);
                    };
                    let with_fragment: Vec<_> = links
                        .into_iter()
                        .filter(|link| {
                            matches!(&link.href, LinkHref::Internal { fragment, .. } if !fragment.is_empty())
                        })
                        .collect();
                    if with_fragment.is_empty() || paths::same_file(&resolved, document.uri()) {
                        return Some(diagnostics);
                    }

                    // Only workspace documents have headers to check.
                    let Some(target) = self.workspace.get_or_load_document(&resolved).await else {
                        return Some(diagnostics);
                    };
                    let toc = self.toc.get_for_doc(target).await;
                    if token.is_cancelled() {
                        return None;
                    }

                    let file_name = paths::uri_path(&resolved)
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| resolved.to_string());
                    for link in with_fragment {
                        let LinkHref::Internal { fragment, .. } = &link.href else {
                            continue;
                        };
                        if toc.lookup(fragment).is_some()
                            || options.is_ignored(link.source.path_text())
                            || options.is_ignored(&link.source.text)
                        {
                            continue;
                        }
                        let range = link
                            .source
                            .fragment_range
                            .map(|fragment| fragment.with_start_shifted(-1))
                            .unwrap_or(link.source.href_range);
                        diagnostics.push(diagnostic(
                            range,
                            format!("No header found: '{fragment}' in file '{file_name}'"),
                            severity,
                            codes::NO_SUCH_HEADER_IN_FILE,
                            json!({ "fragment": fragment, "hrefText": link.source.text }),
                        ));
                    }
                }
            }
            Some(diagnostics)
        });

        let results = join_all(checks).await;
        if token.is_cancelled() {
            return None;
        }
        Some(results.into_iter().flatten().flatten().collect())
    }
}

fn validate_reference_links(options: &DiagnosticOptions, links: &DocumentLinks) -> Vec<Diagnostic> {
    let Some(severity) = options.reference_links else {
        return vec![];
    };

    links
        .links
        .iter()
        .filter_map(|link| match &link.href {
            LinkHref::Reference { name }
                if links.definitions.lookup(name).is_none()
                    && !options.is_ignored(&link.source.text) =>
            {
                Some(diagnostic(
                    link.source.href_range,
                    format!("No link definition found: '{name}'"),
                    severity,
                    codes::NO_SUCH_REFERENCE,
                    json!({ "ref": name, "hrefText": link.source.text }),
                ))
            }
            _ => None,
        })
        .collect()
}

fn diagnostic(
    range: SourceRange,
    message: String,
    severity: DiagnosticSeverity,
    code: &str,
    data: serde_json::Value,
) -> Diagnostic {
    Diagnostic {
        range: range.0,
        message,
        source: Some(SOURCE.into()),
        severity: Some(severity),
        code: Some(NumberOrString::String(code.into())),
        data: Some(data),
        ..Default::default()
    }
}
