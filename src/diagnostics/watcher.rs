//! Watches link targets on disk and header sets per document.
//!
//! A [`LinkWatcher`] remembers which documents link to which paths and asks a
//! [`FileWatcher`] to watch each path once, however many documents link to it.
//! When a watched path is created or deleted the manager revalidates the
//! documents linking to it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc::UnboundedSender;
use tower_lsp::lsp_types::Url;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Deleted,
}

/// A watched path appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// Something that can watch individual paths for creation and deletion.
pub trait FileWatcher: Send + 'static {
    fn watch(&mut self, path: &Path) -> anyhow::Result<()>;
    fn unwatch(&mut self, path: &Path);
}

/// `None` watches nothing, for when no watcher could be created.
impl<W: FileWatcher> FileWatcher for Option<W> {
    fn watch(&mut self, path: &Path) -> anyhow::Result<()> {
        match self {
            Some(watcher) => watcher.watch(path),
            None => Ok(()),
        }
    }

    fn unwatch(&mut self, path: &Path) {
        if let Some(watcher) = self {
            watcher.unwatch(path);
        }
    }
}

type Targets = Arc<Mutex<HashMap<PathBuf, PathBuf>>>;

/// A [`FileWatcher`] backed by `notify`.
///
/// Files that do not exist yet cannot be watched directly, so the parent
/// directory is watched instead and events are filtered down to the targets.
pub struct NotifyWatcher {
    watcher: RecommendedWatcher,
    directories: HashMap<PathBuf, usize>,
    /// Canonical path to the path as it was requested.
    targets: Targets,
}

impl NotifyWatcher {
    pub fn new(events: UnboundedSender<FileEvent>) -> anyhow::Result<NotifyWatcher> {
        let targets: Targets = Arc::default();
        let callback_targets = targets.clone();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(%err, "file watcher error");
                    return;
                }
            };

            for path in &event.paths {
                let kind = match event.kind {
                    EventKind::Create(_) => FileEventKind::Created,
                    EventKind::Remove(_) => FileEventKind::Deleted,
                    EventKind::Modify(ModifyKind::Name(_)) if path.exists() => {
                        FileEventKind::Created
                    }
                    EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::Deleted,
                    _ => continue,
                };
                let requested = callback_targets
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(path)
                    .cloned();
                if let Some(requested) = requested {
                    let _ = events.send(FileEvent {
                        path: requested,
                        kind,
                    });
                }
            }
        })
        .context("could not create file watcher")?;

        Ok(NotifyWatcher {
            watcher,
            directories: HashMap::new(),
            targets,
        })
    }

    fn targets(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, PathBuf>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The directory to watch for `path`, and `path` as events will report it.
fn split_target(path: &Path) -> Option<(PathBuf, PathBuf)> {
    let directory = path.parent()?;
    let directory = directory
        .canonicalize()
        .unwrap_or_else(|_| directory.to_path_buf());
    let canonical = directory.join(path.file_name()?);
    Some((directory, canonical))
}

impl FileWatcher for NotifyWatcher {
    fn watch(&mut self, path: &Path) -> anyhow::Result<()> {
        let (directory, canonical) =
            split_target(path).with_context(|| format!("cannot watch {}", path.display()))?;

        if !self.directories.contains_key(&directory) {
            self.watcher
                .watch(&directory, RecursiveMode::NonRecursive)
                .with_context(|| format!("cannot watch {}", directory.display()))?;
            debug!(directory = %directory.display(), "watching directory");
        }
        *self.directories.entry(directory).or_default() += 1;
        self.targets().insert(canonical, path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) {
        let Some((directory, canonical)) = split_target(path) else {
            return;
        };
        if self.targets().remove(&canonical).is_none() {
            return;
        }

        let Some(count) = self.directories.get_mut(&directory) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.directories.remove(&directory);
            if let Err(err) = self.watcher.unwatch(&directory) {
                debug!(directory = %directory.display(), %err, "unwatch failed");
            }
        }
    }
}

/// Which documents link to which paths on disk.
pub struct LinkWatcher<W> {
    watcher: W,
    watched: HashMap<PathBuf, HashSet<Url>>,
}

impl<W: FileWatcher> LinkWatcher<W> {
    pub fn new(watcher: W) -> LinkWatcher<W> {
        LinkWatcher {
            watcher,
            watched: HashMap::new(),
        }
    }

    /// Replaces the set of paths `document` links to.
    pub fn update_links_for_document(
        &mut self,
        document: &Url,
        targets: impl IntoIterator<Item = PathBuf>,
    ) {
        let targets: HashSet<PathBuf> = targets.into_iter().collect();

        let stale: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|(path, documents)| documents.contains(document) && !targets.contains(*path))
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            let now_unwatched = self.watched.get_mut(&path).is_some_and(|documents| {
                documents.remove(document);
                documents.is_empty()
            });
            if now_unwatched {
                self.watched.remove(&path);
                self.watcher.unwatch(&path);
            }
        }

        for path in targets {
            let documents = self.watched.entry(path.clone()).or_default();
            if documents.is_empty() {
                if let Err(err) = self.watcher.watch(&path) {
                    debug!(path = %path.display(), "{err:#}");
                }
            }
            documents.insert(document.clone());
        }
    }

    pub fn delete_document(&mut self, document: &Url) {
        self.update_links_for_document(document, []);
    }

    /// Stops watching everything.
    pub fn clear(&mut self) {
        for (path, _) in self.watched.drain() {
            self.watcher.unwatch(&path);
        }
    }

    /// Documents linking to `path`.
    pub fn documents_for(&self, path: &Path) -> Vec<Url> {
        self.watched
            .get(path)
            .map(|documents| documents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn watched_paths(&self) -> impl Iterator<Item = &Path> {
        self.watched.keys().map(PathBuf::as_path)
    }
}

/// The header slugs last seen per document, to tell whether an edit changed
/// anything other documents can link to.
#[derive(Debug, Default)]
pub struct TableOfContentsWatcher {
    slugs: HashMap<Url, HashSet<String>>,
}

impl TableOfContentsWatcher {
    pub fn record(&mut self, uri: &Url, slugs: HashSet<String>) {
        self.slugs.insert(uri.clone(), slugs);
    }

    /// Stores `slugs` for `uri`. Returns whether they differ from before.
    pub fn update(&mut self, uri: &Url, slugs: HashSet<String>) -> bool {
        let previous = self.slugs.insert(uri.clone(), slugs);
        previous.as_ref() != self.slugs.get(uri)
    }

    pub fn remove(&mut self, uri: &Url) {
        self.slugs.remove(uri);
    }

    pub fn clear(&mut self) {
        self.slugs.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;
    use crate::test_utils::{create_test_workspace_dir, RecordingWatcher};

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///ws/{name}")).unwrap()
    }

    /// Test: a path stays watched until the last document linking to it lets go
    #[test]
    fn test_link_watcher_shares_paths() {
        let recording = RecordingWatcher::default();
        let mut links = LinkWatcher::new(recording.clone());
        let target = PathBuf::from("/ws/target.textile");

        links.update_links_for_document(&uri("a.textile"), [target.clone()]);
        links.update_links_for_document(&uri("b.textile"), [target.clone()]);
        assert!(recording.is_watching(&target));
        assert_eq!(links.documents_for(&target).len(), 2);

        links.delete_document(&uri("a.textile"));
        assert!(recording.is_watching(&target), "b.textile still links here");

        links.update_links_for_document(&uri("b.textile"), []);
        assert!(!recording.is_watching(&target));
        assert!(links.documents_for(&target).is_empty());
        assert_eq!(links.watched_paths().count(), 0);
    }

    /// Test: updating a document's targets drops the ones it no longer links to
    #[test]
    fn test_link_watcher_replaces_targets() {
        let recording = RecordingWatcher::default();
        let mut links = LinkWatcher::new(recording.clone());
        let old = PathBuf::from("/ws/old");
        let new = PathBuf::from("/ws/new");

        links.update_links_for_document(&uri("a.textile"), [old.clone()]);
        links.update_links_for_document(&uri("a.textile"), [new.clone()]);

        assert!(!recording.is_watching(&old));
        assert!(recording.is_watching(&new));
    }

    #[test]
    fn test_toc_watcher_detects_changes() {
        let mut toc = TableOfContentsWatcher::default();
        let doc = uri("a.textile");
        let slugs = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<HashSet<_>>();

        toc.record(&doc, slugs(&["intro"]));
        assert!(!toc.update(&doc, slugs(&["intro"])));
        assert!(toc.update(&doc, slugs(&["intro", "usage"])));

        toc.remove(&doc);
        assert!(toc.update(&doc, slugs(&[])), "Unknown documents count as changed");
    }

    /// Test: a file that does not exist yet is reported once it is created
    #[tokio::test]
    async fn test_notify_watcher_reports_creation() {
        let (_temp_dir, root) = create_test_workspace_dir();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = NotifyWatcher::new(tx).unwrap();
        let target = root.join("later.textile");

        watcher.watch(&target).unwrap();
        fs::write(root.join("unrelated.textile"), "x").unwrap();
        fs::write(&target, "h1. Later").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Expected an event for the watched file")
            .unwrap();
        assert_eq!(event.path, target, "Only the watched file is reported");
        assert_eq!(event.kind, FileEventKind::Created);
    }
}
