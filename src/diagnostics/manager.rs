//! Keeps published diagnostics in step with the workspace.
//!
//! The manager is a single task that owns all bookkeeping. Editor triggers,
//! workspace events and file watcher events each mark documents pending; once
//! no new mark has arrived for the debounce period the pending documents are
//! validated concurrently. Starting a validation for a document cancels the
//! one already running for it, and results from superseded validations are
//! dropped.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_lsp::lsp_types::{Diagnostic, Url};
use tracing::{debug, info, warn};

use super::compute::{DiagnosticComputer, DiagnosticOptions, DocumentValidation};
use super::watcher::{FileEvent, FileWatcher, LinkWatcher, TableOfContentsWatcher};
use crate::cancel::{CancellationToken, TaskSupervisor};
use crate::config::DiagnosticSettings;
use crate::links::{DocumentLinks, LinkHref};
use crate::references::ReferencesResolver;
use crate::service::LanguageService;
use crate::toc::TocProvider;
use crate::workspace::{paths, Workspace, WorkspaceEvent};

/// Where diagnostics go, and which documents the user has open.
#[tower_lsp::async_trait]
pub trait Reporter: Send + Sync + 'static {
    async fn set(&self, uri: &Url, diagnostics: Vec<Diagnostic>);
    async fn delete(&self, uri: &Url);
    async fn is_open(&self, uri: &Url) -> bool;
    async fn open_documents(&self) -> Vec<Url>;
}

#[derive(Debug)]
enum Command {
    Trigger(Url),
    Closed(Url),
    UpdateSettings(DiagnosticSettings),
    MarkPending(Vec<Url>),
    Validated {
        uri: Url,
        generation: u64,
        result: Option<DocumentValidation>,
    },
}

/// Handle to the diagnostics task. Dropping it stops the task.
pub struct DiagnosticsManager {
    commands: UnboundedSender<Command>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl DiagnosticsManager {
    /// Starts the task. Open documents are validated right away; [`ready`]
    /// resolves once that first pass is published.
    ///
    /// [`ready`]: DiagnosticsManager::ready
    pub fn spawn<W: FileWatcher>(
        service: &LanguageService,
        settings: DiagnosticSettings,
        reporter: Arc<dyn Reporter>,
        watcher: W,
        file_events: UnboundedReceiver<FileEvent>,
    ) -> DiagnosticsManager {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready) = watch::channel(false);
        // Subscribe before spawning so no event between now and the first poll is lost.
        let workspace_events = service.workspace.subscribe();

        let task = ManagerTask {
            workspace: service.workspace.clone(),
            toc: service.toc.clone(),
            references: service.references.clone(),
            computer: Arc::new(DiagnosticComputer::new(
                service.workspace.clone(),
                service.toc.clone(),
                service.links.clone(),
                service.references.clone(),
            )),
            options: Arc::new(DiagnosticOptions::new(&settings)),
            reporter,
            links: LinkWatcher::new(watcher),
            tocs: TableOfContentsWatcher::default(),
            tasks: TaskSupervisor::new(),
            pending: BTreeSet::new(),
            deadline: None,
            reported: HashSet::new(),
            commands: commands.clone(),
            ready: ready_tx,
        };
        let task = tokio::spawn(task.run(command_rx, workspace_events, file_events));

        DiagnosticsManager {
            commands,
            ready,
            task,
        }
    }

    /// Waits for the first full validation pass.
    pub async fn ready(&self) {
        let mut ready = self.ready.clone();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Revalidates `uri` after the debounce period.
    pub fn trigger(&self, uri: Url) {
        self.send(Command::Trigger(uri));
    }

    /// Stops tracking `uri` and clears its diagnostics.
    pub fn document_closed(&self, uri: Url) {
        self.send(Command::Closed(uri));
    }

    /// Applies new settings and revalidates every open document.
    pub fn update_settings(&self, settings: DiagnosticSettings) {
        self.send(Command::UpdateSettings(settings));
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("diagnostics task is gone");
        }
    }
}

impl Drop for DiagnosticsManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ManagerTask<W> {
    workspace: Arc<dyn Workspace>,
    toc: Arc<TocProvider>,
    references: Arc<ReferencesResolver>,
    computer: Arc<DiagnosticComputer>,
    options: Arc<DiagnosticOptions>,
    reporter: Arc<dyn Reporter>,
    links: LinkWatcher<W>,
    tocs: TableOfContentsWatcher,
    tasks: TaskSupervisor<Url>,
    pending: BTreeSet<Url>,
    deadline: Option<Instant>,
    /// Documents with diagnostics currently published.
    reported: HashSet<Url>,
    commands: UnboundedSender<Command>,
    ready: watch::Sender<bool>,
}

impl<W: FileWatcher> ManagerTask<W> {
    async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut workspace_events: broadcast::Receiver<WorkspaceEvent>,
        mut file_events: UnboundedReceiver<FileEvent>,
    ) {
        self.rebuild().await;

        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = workspace_events.recv() => match event {
                    Ok(event) => self.handle_workspace_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed workspace events, revalidating everything");
                        self.rebuild().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(event) = file_events.recv() => self.handle_file_event(event),
                _ = sleep_until(deadline) => {
                    self.deadline = None;
                    self.validate_pending().await;
                }
            }
        }
        debug!("diagnostics task stopped");
    }

    /// Drops all in-flight work and validates every open document from scratch.
    async fn rebuild(&mut self) {
        self.tasks.cancel_all();
        self.pending.clear();
        self.deadline = None;
        let previously_reported = std::mem::take(&mut self.reported);

        self.tocs.clear();
        for document in self.workspace.all_documents().await {
            let toc = self.toc.get_for_doc(document.clone()).await;
            self.tocs.record(document.uri(), toc.slugs());
        }

        if self.options.enabled {
            let open = self.reporter.open_documents().await;
            for uri in open {
                let Some(document) = self.workspace.get_or_load_document(&uri).await else {
                    continue;
                };
                if let Some(validation) = self
                    .computer
                    .compute(&document, &self.options, &CancellationToken::none())
                    .await
                {
                    self.apply(&uri, validation).await;
                }
            }
        } else {
            self.links.clear();
        }

        for uri in previously_reported.difference(&self.reported) {
            self.reporter.delete(uri).await;
        }
        info!(documents = self.reported.len(), "diagnostics up to date");
        self.ready.send_replace(true);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Trigger(uri) => self.mark_pending([uri]),
            Command::MarkPending(uris) => self.mark_pending(uris),
            Command::Closed(uri) => {
                self.forget(&uri).await;
            }
            Command::UpdateSettings(settings) => {
                self.options = Arc::new(DiagnosticOptions::new(&settings));
                self.rebuild().await;
            }
            Command::Validated {
                uri,
                generation,
                result,
            } => {
                if !self.tasks.finish(&uri, generation) {
                    debug!(%uri, generation, "dropping stale validation");
                    return;
                }
                let Some(validation) = result else {
                    return;
                };
                if self.reporter.is_open(&uri).await {
                    self.apply(&uri, validation).await;
                }
            }
        }
    }

    async fn handle_workspace_event(&mut self, event: WorkspaceEvent) {
        match event {
            WorkspaceEvent::Created(document) => {
                let toc = self.toc.get_for_doc(document.clone()).await;
                self.tocs.record(document.uri(), toc.slugs());
                self.revalidate_referencing(document.uri().clone());
                self.mark_pending([document.uri().clone()]);
            }
            WorkspaceEvent::Changed(document) => {
                let toc = self.toc.get_for_doc(document.clone()).await;
                if self.tocs.update(document.uri(), toc.slugs()) {
                    debug!(uri = %document.uri(), "headers changed");
                    self.revalidate_referencing(document.uri().clone());
                }
                self.mark_pending([document.uri().clone()]);
            }
            WorkspaceEvent::Deleted(uri) => {
                self.tocs.remove(&uri);
                self.forget(&uri).await;
                self.revalidate_referencing(uri);
            }
        }
    }

    fn handle_file_event(&mut self, event: FileEvent) {
        let documents = self.links.documents_for(&event.path);
        debug!(path = %event.path.display(), kind = ?event.kind, documents = documents.len(), "link target changed");
        self.mark_pending(documents);
    }

    fn mark_pending(&mut self, uris: impl IntoIterator<Item = Url>) {
        if !self.options.enabled {
            return;
        }
        let before = self.pending.len();
        self.pending.extend(uris);
        if self.pending.len() != before || self.deadline.is_some() {
            self.deadline = Some(Instant::now() + self.options.debounce);
        }
    }

    async fn validate_pending(&mut self) {
        for uri in std::mem::take(&mut self.pending) {
            if !self.reporter.is_open(&uri).await {
                continue;
            }
            let Some(document) = self.workspace.get_or_load_document(&uri).await else {
                continue;
            };

            let (generation, token) = self.tasks.begin(uri.clone());
            let computer = self.computer.clone();
            let options = self.options.clone();
            let commands = self.commands.clone();
            tokio::spawn(async move {
                let result = computer.compute(&document, &options, &token).await;
                let _ = commands.send(Command::Validated {
                    uri,
                    generation,
                    result,
                });
            });
        }
    }

    /// Marks every document linking to `uri` pending, once the links are known.
    fn revalidate_referencing(&self, uri: Url) {
        if !self.options.enabled {
            return;
        }
        let references = self.references.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let referencing = references
                .get_references_to_file_in_workspace(&uri, &CancellationToken::none())
                .await
                .into_iter()
                .map(|reference| reference.location.uri)
                .filter(|referencing| *referencing != uri)
                .unique()
                .collect_vec();
            if !referencing.is_empty() {
                let _ = commands.send(Command::MarkPending(referencing));
            }
        });
    }

    async fn apply(&mut self, uri: &Url, validation: DocumentValidation) {
        let targets = if self.options.file_links.is_some() {
            watch_targets(uri, &validation.links, self.workspace.file_extension())
        } else {
            vec![]
        };
        self.links.update_links_for_document(uri, targets);
        self.reporter.set(uri, validation.diagnostics).await;
        self.reported.insert(uri.clone());
    }

    async fn forget(&mut self, uri: &Url) {
        self.tasks.cancel(uri);
        self.pending.remove(uri);
        self.links.delete_document(uri);
        if self.reported.remove(uri) {
            self.reporter.delete(uri).await;
        }
    }
}

/// Paths whose creation or deletion can change the diagnostics of `uri`.
fn watch_targets(uri: &Url, links: &DocumentLinks, extension: &str) -> Vec<PathBuf> {
    links
        .links
        .iter()
        .filter_map(|link| match &link.href {
            LinkHref::Internal { path, .. }
                if !link.source.text.starts_with('#') && !paths::same_file(path, uri) =>
            {
                paths::uri_path(path)
            }
            _ => None,
        })
        .flat_map(|path| {
            let with_extension = paths::with_default_extension(&path, extension);
            std::iter::once(path).chain(with_extension)
        })
        .unique()
        .collect()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
