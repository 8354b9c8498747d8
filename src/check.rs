//! One-shot validation of a whole workspace, for `loom check`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Url};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::diagnostics::{DiagnosticComputer, DiagnosticOptions};
use crate::service::LanguageService;
use crate::workspace::{paths, FsWorkspace, Workspace};

/// Diagnostics for every document under `root` that has any, ordered by URI.
pub async fn check_workspace(
    root: &Path,
    settings: &Settings,
) -> anyhow::Result<Vec<(Url, Vec<Diagnostic>)>> {
    let workspace = Arc::new(
        FsWorkspace::construct(settings, root)
            .with_context(|| format!("could not read workspace {}", root.display()))?,
    );
    let service = LanguageService::new(workspace.clone());
    let computer = DiagnosticComputer::new(
        service.workspace.clone(),
        service.toc.clone(),
        service.links.clone(),
        service.references.clone(),
    );
    let options = DiagnosticOptions::new(&settings.diagnostics);

    let mut results = vec![];
    for document in workspace.all_documents().await {
        let Some(validation) = computer
            .compute(&document, &options, &CancellationToken::none())
            .await
        else {
            continue;
        };
        debug!(uri = %document.uri(), count = validation.diagnostics.len(), "checked");
        if !validation.diagnostics.is_empty() {
            results.push((document.uri().clone(), validation.diagnostics));
        }
    }
    Ok(results)
}

/// `path:line:col: severity: message [code]`, with the path relative to `root`
/// and 1-based positions.
pub fn format_diagnostic(root: &Path, uri: &Url, diagnostic: &Diagnostic) -> String {
    let path = paths::uri_path(uri)
        .map(|path| {
            pathdiff::diff_paths(&path, root)
                .unwrap_or(path)
                .display()
                .to_string()
        })
        .unwrap_or_else(|| uri.to_string());
    let severity = match diagnostic.severity {
        Some(DiagnosticSeverity::ERROR) => "error",
        Some(DiagnosticSeverity::INFORMATION) => "info",
        Some(DiagnosticSeverity::HINT) => "hint",
        _ => "warning",
    };
    let code = match &diagnostic.code {
        Some(NumberOrString::String(code)) => code.clone(),
        Some(NumberOrString::Number(code)) => code.to_string(),
        None => String::new(),
    };

    format!(
        "{}:{}:{}: {}: {} [{}]",
        path,
        diagnostic.range.start.line + 1,
        diagnostic.range.start.character + 1,
        severity,
        diagnostic.message,
        code
    )
}

pub fn has_errors(results: &[(Url, Vec<Diagnostic>)]) -> bool {
    results
        .iter()
        .flat_map(|(_, diagnostics)| diagnostics)
        .any(|diagnostic| diagnostic.severity == Some(DiagnosticSeverity::ERROR))
}
