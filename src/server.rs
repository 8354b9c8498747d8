//! The language server over stdio.
//!
//! Editor buffers replace disk text in the workspace while a document is open;
//! closing it reloads the file from disk. Everything else is answered by the
//! [`LanguageService`] and the [`DiagnosticsManager`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tower_lsp::jsonrpc::{Error, ErrorCode, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::diagnostics::{DiagnosticsManager, NotifyWatcher, Reporter};
use crate::service::LanguageService;
use crate::workspace::{Document, FsWorkspace, Workspace};

/// Publishes diagnostics to the client and tracks which documents are open.
struct ClientReporter {
    client: Client,
    open: Mutex<HashSet<Url>>,
}

impl ClientReporter {
    fn open(&self) -> std::sync::MutexGuard<'_, HashSet<Url>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[tower_lsp::async_trait]
impl Reporter for ClientReporter {
    async fn set(&self, uri: &Url, diagnostics: Vec<Diagnostic>) {
        self.client
            .publish_diagnostics(uri.clone(), diagnostics, None)
            .await;
    }

    async fn delete(&self, uri: &Url) {
        self.client.publish_diagnostics(uri.clone(), vec![], None).await;
    }

    async fn is_open(&self, uri: &Url) -> bool {
        self.open().contains(uri)
    }

    async fn open_documents(&self) -> Vec<Url> {
        self.open().iter().cloned().collect()
    }
}

struct ServerState {
    root: PathBuf,
    workspace: Arc<FsWorkspace>,
    service: LanguageService,
    reporter: Arc<ClientReporter>,
    diagnostics: OnceCell<DiagnosticsManager>,
    settings: Settings,
}

impl ServerState {
    fn new(client: Client, root: &Path) -> anyhow::Result<ServerState> {
        let settings = Settings::new(root).context("could not load settings")?;
        let workspace = Arc::new(
            FsWorkspace::construct(&settings, root)
                .with_context(|| format!("could not read workspace {}", root.display()))?,
        );
        let service = LanguageService::new(workspace.clone());

        Ok(ServerState {
            root: root.to_path_buf(),
            workspace,
            service,
            reporter: Arc::new(ClientReporter {
                client,
                open: Mutex::default(),
            }),
            diagnostics: OnceCell::new(),
            settings,
        })
    }

    fn trigger(&self, uri: Url) {
        if let Some(diagnostics) = self.diagnostics.get() {
            diagnostics.trigger(uri);
        }
    }
}

pub struct Backend {
    client: Client,
    state: OnceCell<ServerState>,
}

impl Backend {
    pub fn new(client: Client) -> Backend {
        Backend {
            client,
            state: OnceCell::new(),
        }
    }

    fn state(&self) -> Result<&ServerState> {
        self.state.get().ok_or_else(|| Error {
            code: ErrorCode::ServerError(-32002),
            message: "server not initialized".into(),
            data: None,
        })
    }

    async fn document(&self, uri: &Url) -> Result<Option<(&ServerState, Arc<Document>)>> {
        let state = self.state()?;
        Ok(state
            .workspace
            .get_or_load_document(uri)
            .await
            .map(|document| (state, document)))
    }
}

fn root_from_params(params: &InitializeParams) -> anyhow::Result<PathBuf> {
    let uri = params
        .workspace_folders
        .as_ref()
        .and_then(|folders| folders.first())
        .map(|folder| folder.uri.clone())
        .or_else(|| params.root_uri.clone());

    match uri {
        Some(uri) => uri
            .to_file_path()
            .map_err(|()| anyhow::anyhow!("workspace root {uri} is not a file path")),
        None => std::env::current_dir().context("no workspace root given"),
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let state = root_from_params(&params)
            .and_then(|root| ServerState::new(self.client.clone(), &root))
            .map_err(|err| {
                warn!("{err:#}");
                Error {
                    code: ErrorCode::InternalError,
                    message: format!("{err:#}").into(),
                    data: None,
                }
            })?;
        info!(root = %state.root.display(), "initializing");
        let _ = self.state.set(state);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                rename_provider: Some(OneOf::Right(RenameOptions {
                    prepare_provider: Some(true),
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                })),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("loom"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        let Ok(state) = self.state() else {
            return;
        };

        let registration_options = DidChangeWatchedFilesRegistrationOptions {
            watchers: vec![FileSystemWatcher {
                glob_pattern: GlobPattern::String(format!(
                    "**/*.{}",
                    state.workspace.file_extension()
                )),
                kind: None,
            }],
        };
        if let Err(err) = self
            .client
            .register_capability(vec![Registration {
                id: String::from("loom-documents"),
                method: String::from("workspace/didChangeWatchedFiles"),
                register_options: serde_json::to_value(registration_options).ok(),
            }])
            .await
        {
            warn!(%err, "could not register file watching");
        }

        let (file_events, file_event_rx) = mpsc::unbounded_channel();
        let watcher = NotifyWatcher::new(file_events)
            .map_err(|err| warn!("link targets will not be watched: {err:#}"))
            .ok();
        let manager = DiagnosticsManager::spawn(
            &state.service,
            state.settings.diagnostics.clone(),
            state.reporter.clone(),
            watcher,
            file_event_rx,
        );
        let _ = state.diagnostics.set(manager);
        info!("loom initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let Ok(state) = self.state() else {
            return;
        };
        let uri = params.text_document.uri;
        if !state.workspace.is_document_uri(&uri) {
            return;
        }

        state.reporter.open().insert(uri.clone());
        state
            .workspace
            .set_document_text(uri.clone(), &params.text_document.text);
        state.trigger(uri);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Ok(state) = self.state() else {
            return;
        };
        let uri = params.text_document.uri;
        // Full sync: the last change holds the whole text.
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        if !state.workspace.is_document_uri(&uri) {
            return;
        }

        state.workspace.set_document_text(uri.clone(), &change.text);
        state.trigger(uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let Ok(state) = self.state() else {
            return;
        };
        let uri = params.text_document.uri;
        state.reporter.open().remove(&uri);
        if let Some(diagnostics) = state.diagnostics.get() {
            diagnostics.document_closed(uri.clone());
        }
        if state.workspace.is_document_uri(&uri) {
            // The buffer may have been discarded; the file on disk is the truth again.
            state.workspace.reload_from_disk(&uri).await;
        }
    }

    async fn did_change_configuration(&self, _: DidChangeConfigurationParams) {
        let Ok(state) = self.state() else {
            return;
        };
        match Settings::new(&state.root) {
            Ok(settings) => {
                if let Some(diagnostics) = state.diagnostics.get() {
                    diagnostics.update_settings(settings.diagnostics);
                }
            }
            Err(err) => warn!("could not reload settings: {err:#}"),
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        let Ok(state) = self.state() else {
            return;
        };

        for change in params.changes {
            let uri = change.uri;
            if !state.workspace.is_document_uri(&uri) {
                continue;
            }
            debug!(%uri, typ = ?change.typ, "watched file changed");

            let is_open = state.reporter.open().contains(&uri);
            if change.typ == FileChangeType::DELETED {
                state.workspace.remove_document(&uri);
            } else if !is_open {
                // Open documents follow the editor buffer, not the disk.
                state.workspace.reload_from_disk(&uri).await;
            }
        }
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position;
        let Some((state, document)) = self.document(&position.text_document.uri).await? else {
            return Ok(None);
        };

        let include_declaration = params.context.include_declaration;
        let locations = state
            .service
            .references
            .get_references_at_position(&document, position.position, &CancellationToken::none())
            .await
            .into_iter()
            .filter(|reference| include_declaration || !reference.is_definition)
            .map(|reference| reference.location)
            .collect();

        Ok(Some(locations))
    }

    async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<PrepareRenameResponse>> {
        let Some((state, document)) = self.document(&params.text_document.uri).await? else {
            return Ok(None);
        };

        match state
            .service
            .rename
            .prepare_rename(&document, params.position, &CancellationToken::none())
            .await
        {
            Ok(prepared) => Ok(Some(PrepareRenameResponse::RangeWithPlaceholder {
                range: prepared.range,
                placeholder: prepared.placeholder,
            })),
            Err(err) => Err(Error {
                code: ErrorCode::InvalidRequest,
                message: err.to_string().into(),
                data: None,
            }),
        }
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let position = params.text_document_position;
        let Some((state, document)) = self.document(&position.text_document.uri).await? else {
            return Ok(None);
        };

        Ok(state
            .service
            .rename
            .provide_rename_edits(
                &document,
                position.position,
                &params.new_name,
                &CancellationToken::none(),
            )
            .await)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let Some((state, document)) = self.document(&position.text_document.uri).await? else {
            return Ok(None);
        };

        Ok(state
            .service
            .definition
            .provide_definition(&document, position.position, &CancellationToken::none())
            .await
            .map(GotoDefinitionResponse::Array))
    }
}

/// Serves the language server over stdin and stdout until the client exits.
pub async fn run() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
