//! Per-document derived data, recomputed only when the document version changes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::Url;
use tracing::debug;

use super::{Document, Workspace, WorkspaceEvent};

type Compute<T> = Arc<dyn Fn(Arc<Document>) -> BoxFuture<'static, T> + Send + Sync>;
type Entries<T> = Mutex<HashMap<Url, Entry<T>>>;

struct Entry<T> {
    version: i32,
    value: Arc<OnceCell<Arc<T>>>,
}

/// Caches `compute(document)` per URI.
///
/// An entry is reused while the document version matches and replaced when a
/// newer version is requested. Concurrent requests for the same version share
/// one computation. Entries for deleted documents are dropped by a background
/// listener that lives as long as the cache.
pub struct WorkspaceInfoCache<T> {
    workspace: Arc<dyn Workspace>,
    compute: Compute<T>,
    entries: Arc<Entries<T>>,
    listener: JoinHandle<()>,
}

impl<T: Send + Sync + 'static> WorkspaceInfoCache<T> {
    /// Must be called from within a tokio runtime.
    pub fn new<F, Fut>(workspace: Arc<dyn Workspace>, compute: F) -> Self
    where
        F: Fn(Arc<Document>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let entries: Arc<Entries<T>> = Arc::new(Mutex::new(HashMap::new()));
        let listener = tokio::spawn(listen_for_deletes(
            workspace.clone(),
            workspace.subscribe(),
            Arc::downgrade(&entries),
        ));

        WorkspaceInfoCache {
            workspace,
            compute: Arc::new(move |document| compute(document).boxed()),
            entries,
            listener,
        }
    }

    /// The value for the current snapshot of `uri`, if it is a known document.
    pub async fn get(&self, uri: &Url) -> Option<Arc<T>> {
        let document = self.workspace.get_or_load_document(uri).await?;
        Some(self.get_for_doc(document).await)
    }

    pub async fn get_for_doc(&self, document: Arc<Document>) -> Arc<T> {
        let version = document.version();
        let cell = {
            let mut entries = lock(&self.entries);
            let cached = entries
                .get(document.uri())
                .map(|entry| (entry.version, entry.value.clone()));
            match cached {
                Some((cached_version, value)) if cached_version == version => Some(value),
                // An older snapshot than the cached one: answer without caching.
                Some((cached_version, _)) if cached_version > version => None,
                _ => {
                    let value = Arc::new(OnceCell::new());
                    entries.insert(
                        document.uri().clone(),
                        Entry {
                            version,
                            value: value.clone(),
                        },
                    );
                    Some(value)
                }
            }
        };

        match cell {
            Some(cell) => cell
                .get_or_init(|| {
                    let computation = (self.compute)(document);
                    async move { Arc::new(computation.await) }
                })
                .await
                .clone(),
            None => Arc::new((self.compute)(document).await),
        }
    }

    pub async fn get_for_docs(
        &self,
        documents: impl IntoIterator<Item = Arc<Document>>,
    ) -> Vec<Arc<T>> {
        join_all(documents.into_iter().map(|doc| self.get_for_doc(doc))).await
    }

    /// Values for every document in the workspace.
    pub async fn values(&self) -> Vec<Arc<T>> {
        let documents = self.workspace.all_documents().await;
        self.get_for_docs(documents).await
    }

    /// The version the entry for `uri` was computed for, if any.
    pub fn cached_version(&self, uri: &Url) -> Option<i32> {
        lock(&self.entries).get(uri).map(|entry| entry.version)
    }
}

impl<T> Drop for WorkspaceInfoCache<T> {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn lock<T>(entries: &Entries<T>) -> MutexGuard<'_, HashMap<Url, Entry<T>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn listen_for_deletes<T>(
    workspace: Arc<dyn Workspace>,
    mut events: broadcast::Receiver<WorkspaceEvent>,
    entries: Weak<Entries<T>>,
) {
    loop {
        match events.recv().await {
            Ok(WorkspaceEvent::Deleted(uri)) => {
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                lock(&entries).remove(&uri);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                // Deletes may have been missed; keep only documents that still exist.
                debug!(skipped, "cache listener lagged, pruning entries");
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let known: Vec<Url> = workspace
                    .all_documents()
                    .await
                    .iter()
                    .map(|doc| doc.uri().clone())
                    .collect();
                lock(&entries).retain(|uri, _| known.contains(uri));
            }
            Err(RecvError::Closed) => break,
        }
    }
}
