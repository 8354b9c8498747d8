use std::sync::Arc;

use crate::definition::DefinitionProvider;
use crate::links::{link_provider, LinkProvider};
use crate::references::ReferencesResolver;
use crate::rename::RenameEngine;
use crate::toc::{toc_provider, TocProvider};
use crate::workspace::Workspace;

/// The providers of one workspace, wired to share caches.
///
/// Must be created inside a tokio runtime; the caches start listeners for
/// workspace events.
pub struct LanguageService {
    pub workspace: Arc<dyn Workspace>,
    pub toc: Arc<TocProvider>,
    pub links: Arc<LinkProvider>,
    pub references: Arc<ReferencesResolver>,
    pub rename: RenameEngine,
    pub definition: DefinitionProvider,
}

impl LanguageService {
    pub fn new(workspace: Arc<dyn Workspace>) -> LanguageService {
        let toc = Arc::new(toc_provider(workspace.clone()));
        let links = Arc::new(link_provider(workspace.clone()));
        let references = Arc::new(ReferencesResolver::new(
            workspace.clone(),
            toc.clone(),
            links.clone(),
        ));

        LanguageService {
            rename: RenameEngine::new(workspace.clone(), references.clone()),
            definition: DefinitionProvider::new(
                workspace.clone(),
                toc.clone(),
                links.clone(),
                references.clone(),
            ),
            workspace,
            toc,
            links,
            references,
        }
    }
}
