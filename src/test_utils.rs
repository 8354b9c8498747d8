//! Shared test utilities for loom.
//!
//! This module provides common helpers used across multiple test modules.
//! It is only compiled when running tests.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ropey::Rope;
use tempfile::TempDir;
use tower_lsp::lsp_types::{
    Diagnostic, DocumentChangeOperation, DocumentChanges, OneOf, Position, ResourceOp, TextEdit,
    Url, WorkspaceEdit,
};

use crate::config::Settings;
use crate::diagnostics::{FileWatcher, Reporter};
use crate::service::LanguageService;
use crate::workspace::{paths, position_to_char, Document, FsWorkspace, Workspace};

/// Creates a temporary workspace directory for testing.
///
/// Returns a tuple of (TempDir, PathBuf) where:
/// - TempDir: The temp directory handle (must be kept alive for the test duration)
/// - PathBuf: The path to the workspace subdirectory
///
/// Workspace construction skips hidden entries, and temp directories can live
/// under hidden paths such as `/tmp/.tmpXXXXX`, so files go into a non-hidden
/// `workspace` subdirectory.
pub fn create_test_workspace_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let root = temp_dir.path().join("workspace");
    fs::create_dir(&root).expect("Failed to create workspace subdirectory");
    (temp_dir, root)
}

/// Writes `files` (relative path, content) under `root`, creating directories.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, content).expect("Failed to write test file");
    }
}

/// A workspace on disk plus the service built over it.
pub struct TestWorkspace {
    _temp_dir: TempDir,
    pub root: PathBuf,
    pub workspace: Arc<FsWorkspace>,
    pub service: LanguageService,
}

impl TestWorkspace {
    pub fn uri(&self, name: &str) -> Url {
        paths::file_uri(&self.root.join(name)).expect("Test paths are absolute")
    }

    pub async fn document(&self, name: &str) -> Arc<Document> {
        self.workspace
            .get_or_load_document(&self.uri(name))
            .await
            .unwrap_or_else(|| panic!("{name} should be a workspace document"))
    }
}

/// Creates a workspace from `files` with default settings.
///
/// Must be called inside a tokio runtime.
pub fn create_test_workspace(files: &[(&str, &str)]) -> TestWorkspace {
    create_test_workspace_with(&Settings::default(), files)
}

pub fn create_test_workspace_with(settings: &Settings, files: &[(&str, &str)]) -> TestWorkspace {
    let (temp_dir, root) = create_test_workspace_dir();
    write_files(&root, files);
    let workspace = Arc::new(
        FsWorkspace::construct(settings, &root).expect("Failed to construct test workspace"),
    );
    let service = LanguageService::new(workspace.clone());
    TestWorkspace {
        _temp_dir: temp_dir,
        root: workspace.root().to_path_buf(),
        workspace,
        service,
    }
}

pub fn pos(line: u32, character: u32) -> Position {
    Position { line, character }
}

/// Applies non-overlapping edits to `text`.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut rope = Rope::from_str(text);
    let mut edits = edits.to_vec();
    edits.sort_by_key(|edit| (edit.range.start.line, edit.range.start.character));

    for edit in edits.iter().rev() {
        let start = position_to_char(&rope, edit.range.start);
        let end = position_to_char(&rope, edit.range.end);
        rope.remove(start..end);
        rope.insert(start, &edit.new_text);
    }
    rope.to_string()
}

/// Text of every workspace document after applying the text edits in `edit`.
pub async fn apply_workspace_edit(
    test: &TestWorkspace,
    edit: &WorkspaceEdit,
) -> HashMap<Url, String> {
    let mut edits: HashMap<Url, Vec<TextEdit>> = HashMap::new();
    if let Some(DocumentChanges::Operations(operations)) = &edit.document_changes {
        for operation in operations {
            if let DocumentChangeOperation::Edit(document_edit) = operation {
                edits
                    .entry(document_edit.text_document.uri.clone())
                    .or_default()
                    .extend(document_edit.edits.iter().filter_map(|edit| match edit {
                        OneOf::Left(edit) => Some(edit.clone()),
                        OneOf::Right(_) => None,
                    }));
            }
        }
    }

    let mut texts = HashMap::new();
    for document in test.workspace.all_documents().await {
        let text = document.text();
        let updated = match edits.get(document.uri()) {
            Some(edits) => apply_text_edits(&text, edits),
            None => text,
        };
        texts.insert(document.uri().clone(), updated);
    }
    texts
}

/// The (old, new) pairs of every file rename in `edit`.
pub fn file_renames(edit: &WorkspaceEdit) -> Vec<(Url, Url)> {
    match &edit.document_changes {
        Some(DocumentChanges::Operations(operations)) => operations
            .iter()
            .filter_map(|operation| match operation {
                DocumentChangeOperation::Op(ResourceOp::Rename(rename)) => {
                    Some((rename.old_uri.clone(), rename.new_uri.clone()))
                }
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

/// Records what the diagnostics manager reports.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    open: Mutex<HashSet<Url>>,
    diagnostics: Mutex<HashMap<Url, Vec<Diagnostic>>>,
    sets: Mutex<HashMap<Url, usize>>,
}

impl RecordingReporter {
    pub fn open(&self, uri: &Url) {
        self.open.lock().unwrap().insert(uri.clone());
    }

    pub fn close(&self, uri: &Url) {
        self.open.lock().unwrap().remove(uri);
    }

    pub fn diagnostics(&self, uri: &Url) -> Option<Vec<Diagnostic>> {
        self.diagnostics.lock().unwrap().get(uri).cloned()
    }

    /// How many times diagnostics were published for `uri`.
    pub fn set_count(&self, uri: &Url) -> usize {
        self.sets.lock().unwrap().get(uri).copied().unwrap_or_default()
    }

    /// Polls until `condition` holds, giving up after a few seconds.
    pub async fn wait_until(&self, condition: impl Fn(&RecordingReporter) -> bool) -> bool {
        for _ in 0..500 {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}

#[tower_lsp::async_trait]
impl Reporter for RecordingReporter {
    async fn set(&self, uri: &Url, diagnostics: Vec<Diagnostic>) {
        *self.sets.lock().unwrap().entry(uri.clone()).or_default() += 1;
        self.diagnostics
            .lock()
            .unwrap()
            .insert(uri.clone(), diagnostics);
    }

    async fn delete(&self, uri: &Url) {
        self.diagnostics.lock().unwrap().remove(uri);
    }

    async fn is_open(&self, uri: &Url) -> bool {
        self.open.lock().unwrap().contains(uri)
    }

    async fn open_documents(&self) -> Vec<Url> {
        self.open.lock().unwrap().iter().cloned().collect()
    }
}

/// A file watcher that only remembers what it was asked to watch.
#[derive(Debug, Clone, Default)]
pub struct RecordingWatcher {
    pub watched: Arc<Mutex<HashSet<PathBuf>>>,
}

impl RecordingWatcher {
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched.lock().unwrap().contains(path)
    }
}

impl FileWatcher for RecordingWatcher {
    fn watch(&mut self, path: &Path) -> anyhow::Result<()> {
        self.watched.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) {
        self.watched.lock().unwrap().remove(path);
    }
}
