//! Cross-document behaviour of the link graph: references, rename and
//! diagnostics working together over a real workspace on disk.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ropey::Rope;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower_lsp::lsp_types::{
    Diagnostic, DocumentChangeOperation, DocumentChanges, OneOf, Position, TextEdit, Url,
    WorkspaceEdit,
};

use loom::cancel::CancellationToken;
use loom::config::DiagnosticSettings;
use loom::diagnostics::{DiagnosticsManager, NotifyWatcher, Reporter};
use loom::references::Reference;
use loom::service::LanguageService;
use loom::workspace::{position_to_char, FsWorkspace, Workspace};

struct Fixture {
    _temp_dir: TempDir,
    root: PathBuf,
    workspace: Arc<FsWorkspace>,
    service: LanguageService,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Fixture {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("workspace");
        for (name, content) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let workspace =
            Arc::new(FsWorkspace::construct(&Default::default(), &root).expect("workspace"));
        let service = LanguageService::new(workspace.clone());
        Fixture {
            _temp_dir: temp_dir,
            root: workspace.root().to_path_buf(),
            workspace,
            service,
        }
    }

    fn uri(&self, name: &str) -> Url {
        Url::from_file_path(self.root.join(name)).unwrap()
    }

    async fn references(&self, name: &str, line: u32, character: u32) -> Vec<Reference> {
        let document = self
            .workspace
            .get_or_load_document(&self.uri(name))
            .await
            .unwrap();
        self.service
            .references
            .get_references_at_position(
                &document,
                Position { line, character },
                &CancellationToken::none(),
            )
            .await
    }

    async fn rename(&self, name: &str, line: u32, character: u32, new_name: &str) -> WorkspaceEdit {
        let document = self
            .workspace
            .get_or_load_document(&self.uri(name))
            .await
            .unwrap();
        self.service
            .rename
            .provide_rename_edits(
                &document,
                Position { line, character },
                new_name,
                &CancellationToken::none(),
            )
            .await
            .expect("Expected rename edits")
    }

    /// Applies the text edits of `edit` to the workspace documents.
    async fn apply(&self, edit: &WorkspaceEdit) {
        let mut edits: HashMap<Url, Vec<TextEdit>> = HashMap::new();
        if let Some(DocumentChanges::Operations(operations)) = &edit.document_changes {
            for operation in operations {
                if let DocumentChangeOperation::Edit(document_edit) = operation {
                    edits
                        .entry(document_edit.text_document.uri.clone())
                        .or_default()
                        .extend(document_edit.edits.iter().filter_map(|e| match e {
                            OneOf::Left(edit) => Some(edit.clone()),
                            OneOf::Right(_) => None,
                        }));
                }
            }
        }

        for (uri, mut edits) in edits {
            let document = self.workspace.get_or_load_document(&uri).await.unwrap();
            let mut rope = Rope::from_str(&document.text());
            edits.sort_by_key(|e| (e.range.start.line, e.range.start.character));
            for edit in edits.iter().rev() {
                let start = position_to_char(&rope, edit.range.start);
                let end = position_to_char(&rope, edit.range.end);
                rope.remove(start..end);
                rope.insert(start, &edit.new_text);
            }
            self.workspace.set_document_text(uri, &rope.to_string());
        }
    }

    async fn text(&self, name: &str) -> String {
        self.workspace
            .get_or_load_document(&self.uri(name))
            .await
            .unwrap()
            .text()
    }
}

fn locations(references: &[Reference]) -> HashSet<(String, u32, u32)> {
    references
        .iter()
        .map(|r| {
            let name = r.location.uri.path().rsplit('/').next().unwrap().to_string();
            (name, r.location.range.start.line, r.location.range.start.character)
        })
        .collect()
}

#[derive(Default)]
struct CollectingReporter {
    open: Mutex<HashSet<Url>>,
    published: Mutex<HashMap<Url, Vec<Diagnostic>>>,
}

impl CollectingReporter {
    fn count(&self, uri: &Url) -> Option<usize> {
        self.published.lock().unwrap().get(uri).map(Vec::len)
    }
}

#[tower_lsp::async_trait]
impl Reporter for CollectingReporter {
    async fn set(&self, uri: &Url, diagnostics: Vec<Diagnostic>) {
        self.published.lock().unwrap().insert(uri.clone(), diagnostics);
    }

    async fn delete(&self, uri: &Url) {
        self.published.lock().unwrap().remove(uri);
    }

    async fn is_open(&self, uri: &Url) -> bool {
        self.open.lock().unwrap().contains(uri)
    }

    async fn open_documents(&self) -> Vec<Url> {
        self.open.lock().unwrap().iter().cloned().collect()
    }
}

// ============================================================================
// References
// ============================================================================

/// Test: a header and its fragment-only link, nothing else
#[tokio::test]
async fn test_references_within_one_document() {
    let fixture = Fixture::new(&[("doc.textile", "h1. abc\n\n\"link\":#abc")]);

    let references = fixture.references("doc.textile", 0, 4).await;

    assert_eq!(references.len(), 2, "Header plus one link: {:?}", references);
    let header = references.iter().find(|r| r.is_definition).unwrap();
    assert_eq!(header.location.range.start.line, 0);
    let link = references.iter().find(|r| !r.is_definition).unwrap();
    assert_eq!(link.location.range.start.line, 2);
}

/// Test: files that end lines with a bare carriage return
#[tokio::test]
async fn test_references_with_cr_line_endings() {
    let fixture = Fixture::new(&[("doc.textile", "h1. abc\r\r\"link\":#abc")]);

    let references = fixture.references("doc.textile", 0, 4).await;

    assert_eq!(
        locations(&references),
        HashSet::from([
            ("doc.textile".to_string(), 0, 0),
            ("doc.textile".to_string(), 2, 7),
        ]),
        "Header on line 0 and its link on line 2"
    );
}

/// Test: positions after an emoji count UTF-16 code units
#[tokio::test]
async fn test_emoji_before_link() {
    let fixture = Fixture::new(&[("doc.textile", "h1. Setup\n\n🦀 \"x\":#setup")]);

    let references = fixture.references("doc.textile", 2, 9).await;
    assert!(
        locations(&references).contains(&("doc.textile".to_string(), 2, 7)),
        "The href starts after two units of crab: {:?}",
        references
    );

    let edit = fixture.rename("doc.textile", 2, 9, "Install").await;
    fixture.apply(&edit).await;
    assert_eq!(
        fixture.text("doc.textile").await,
        "h1. Install\n\n🦀 \"x\":#install"
    );
}

/// Test: searching from a header or from a link to it reaches the same set
#[tokio::test]
async fn test_reference_symmetry() {
    let fixture = Fixture::new(&[
        ("a.textile", "h1. Getting Started\n\nBody."),
        ("b.textile", "\"go\":a#getting-started"),
    ]);

    let from_header = fixture.references("a.textile", 0, 6).await;
    let from_link = fixture.references("b.textile", 0, 12).await;

    assert_eq!(from_header.len(), 2);
    assert_eq!(
        locations(&from_header),
        locations(&from_link),
        "Reachability should be symmetric"
    );
}

/// Test: `doc` and `doc.textile` are the same target
#[tokio::test]
async fn test_extension_less_links_resolve_together() {
    let fixture = Fixture::new(&[
        ("doc.textile", "h1. Doc"),
        ("links.textile", "\"short\":doc and \"long\":doc.textile"),
    ]);

    let from_short = fixture.references("links.textile", 0, 10).await;
    let from_long = fixture.references("links.textile", 0, 25).await;

    assert_eq!(
        locations(&from_short),
        HashSet::from([
            ("links.textile".to_string(), 0, 8),
            ("links.textile".to_string(), 0, 23),
        ])
    );
    assert_eq!(locations(&from_short), locations(&from_long));

    let to_file = fixture
        .service
        .references
        .get_references_to_file_in_workspace(&fixture.uri("doc.textile"), &CancellationToken::none())
        .await;
    assert_eq!(to_file.len(), 2);
}

// ============================================================================
// Rename
// ============================================================================

/// Test: header text is replaced verbatim, fragments become the new slug
#[tokio::test]
async fn test_rename_header_in_single_document() {
    let fixture = Fixture::new(&[(
        "doc.textile",
        "h1. A b C\n\n\"one\":#a-b-c and \"two\":#A-B-C",
    )]);

    let edit = fixture.rename("doc.textile", 0, 5, "New Header").await;
    fixture.apply(&edit).await;

    assert_eq!(
        fixture.text("doc.textile").await,
        "h1. New Header\n\n\"one\":#new-header and \"two\":#new-header"
    );
}

/// Test: after applying a rename the same links are found under the new slug
#[tokio::test]
async fn test_rename_then_references_finds_same_links() {
    let fixture = Fixture::new(&[
        ("a.textile", "h1. Getting Started"),
        ("b.textile", "\"go\":a#getting-started\n\"again\":a.textile#Getting-Started"),
        ("c.textile", "\"elsewhere\":a#other"),
    ]);

    let before = fixture.references("a.textile", 0, 6).await;
    let edit = fixture.rename("a.textile", 0, 6, "First Steps").await;
    fixture.apply(&edit).await;
    let after = fixture.references("a.textile", 0, 6).await;

    assert_eq!(locations(&before), locations(&after));
    assert_eq!(
        fixture.text("b.textile").await,
        "\"go\":a#first-steps\n\"again\":a.textile#first-steps"
    );
    assert_eq!(fixture.text("c.textile").await, "\"elsewhere\":a#other");
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Test: deleting a linked document revalidates the open document linking to it
#[tokio::test]
async fn test_deleting_target_reports_broken_link() {
    let fixture = Fixture::new(&[
        ("index.textile", "See \"the guide\":guide for details."),
        ("guide.textile", "h1. Guide"),
    ]);
    let index = fixture.uri("index.textile");
    let reporter = Arc::new(CollectingReporter::default());
    reporter.open.lock().unwrap().insert(index.clone());

    let (_file_events, file_event_rx) = mpsc::unbounded_channel();
    let manager = DiagnosticsManager::spawn(
        &fixture.service,
        DiagnosticSettings {
            debounce_ms: 10,
            ..Default::default()
        },
        reporter.clone(),
        None::<NotifyWatcher>,
        file_event_rx,
    );
    manager.ready().await;
    assert_eq!(reporter.count(&index), Some(0), "The link is fine to begin with");

    fs::remove_file(fixture.root.join("guide.textile")).unwrap();
    fixture.workspace.remove_document(&fixture.uri("guide.textile"));

    let mut reported = false;
    for _ in 0..500 {
        if reporter.count(&index) == Some(1) {
            reported = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reported, "Expected a broken link diagnostic without an explicit trigger");
}
