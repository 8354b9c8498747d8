use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use itertools::Itertools;
use tokio::sync::broadcast;
use tower_lsp::lsp_types::Url;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{paths, Document, Workspace, WorkspaceEvent};
use crate::config::Settings;

const EVENT_CAPACITY: usize = 256;

/// A workspace rooted at a directory on disk.
///
/// Documents are loaded eagerly at construction. Editor buffers replace the
/// disk text through [`FsWorkspace::set_document_text`]; every update gets a
/// fresh version from a workspace-wide counter so versions never repeat for a
/// URI, even across close and reopen.
pub struct FsWorkspace {
    root: PathBuf,
    file_extension: String,
    documents: RwLock<HashMap<Url, Arc<Document>>>,
    next_version: AtomicI32,
    events: broadcast::Sender<WorkspaceEvent>,
}

impl FsWorkspace {
    pub fn construct(settings: &Settings, root_dir: &Path) -> Result<FsWorkspace, std::io::Error> {
        let file_extension = settings.file_extension.trim_start_matches('.').to_string();
        let root_dir = paths::normalize(root_dir);

        let document_paths = WalkDir::new(&root_dir)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e
                        .file_name()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
            })
            .flatten()
            .filter(|f| f.file_type().is_file())
            .filter(|f| f.path().extension().and_then(|e| e.to_str()) == Some(&file_extension))
            .collect_vec();

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let workspace = FsWorkspace {
            root: root_dir,
            file_extension,
            documents: RwLock::new(HashMap::new()),
            next_version: AtomicI32::new(1),
            events,
        };

        let documents = document_paths
            .iter()
            .flat_map(|entry| {
                let text = std::fs::read_to_string(entry.path())?;
                let uri = paths::file_uri(entry.path()).ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "not an absolute path")
                })?;
                let document = Document::new(uri.clone(), workspace.bump_version(), &text);
                Ok::<(Url, Arc<Document>), std::io::Error>((uri, Arc::new(document)))
            })
            .collect::<HashMap<_, _>>();

        debug!(
            root = %workspace.root.display(),
            documents = documents.len(),
            "constructed workspace"
        );
        *workspace.write() = documents;

        Ok(workspace)
    }

    /// Replaces (or creates) the text of `uri` and announces the change.
    pub fn set_document_text(&self, uri: Url, text: &str) -> Arc<Document> {
        let document = Arc::new(Document::new(uri.clone(), self.bump_version(), text));
        let previous = self.write().insert(uri, document.clone());

        let event = match previous {
            Some(_) => WorkspaceEvent::Changed(document.clone()),
            None => WorkspaceEvent::Created(document.clone()),
        };
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(event);

        document
    }

    /// Forgets `uri` and announces the deletion. Returns whether it was known.
    pub fn remove_document(&self, uri: &Url) -> bool {
        let removed = self.write().remove(uri).is_some();
        if removed {
            let _ = self.events.send(WorkspaceEvent::Deleted(uri.clone()));
        }
        removed
    }

    /// Re-reads `uri` from disk, removing it when the file is gone.
    pub async fn reload_from_disk(&self, uri: &Url) -> Option<Arc<Document>> {
        let path = uri.to_file_path().ok()?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(self.set_document_text(uri.clone(), &text)),
            Err(err) => {
                debug!(path = %path.display(), %err, "document no longer readable");
                self.remove_document(uri);
                None
            }
        }
    }

    fn bump_version(&self) -> i32 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Url, Arc<Document>>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Url, Arc<Document>>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[tower_lsp::async_trait]
impl Workspace for FsWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn file_extension(&self) -> &str {
        &self.file_extension
    }

    async fn all_documents(&self) -> Vec<Arc<Document>> {
        self.read()
            .values()
            .cloned()
            .sorted_by(|a, b| a.uri().cmp(b.uri()))
            .collect()
    }

    async fn get_or_load_document(&self, uri: &Url) -> Option<Arc<Document>> {
        if let Some(document) = self.read().get(uri) {
            return Some(document.clone());
        }
        if !self.is_document_uri(uri) {
            return None;
        }

        let path = uri.to_file_path().ok()?;
        let text = tokio::fs::read_to_string(&path).await.ok()?;
        let document = Arc::new(Document::new(uri.clone(), self.bump_version(), &text));

        // Another task may have loaded it while we were reading.
        let document = self
            .write()
            .entry(uri.clone())
            .or_insert(document)
            .clone();
        Some(document)
    }

    async fn path_exists(&self, uri: &Url) -> bool {
        if self.read().contains_key(uri) {
            return true;
        }
        match uri.to_file_path() {
            Ok(path) => tokio::fs::metadata(path).await.is_ok(),
            Err(_) => {
                warn!(%uri, "not a file uri");
                false
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }
}
