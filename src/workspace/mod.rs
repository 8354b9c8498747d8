//! The set of Textile documents the server knows about.
//!
//! # Module Structure
//!
//! - [`document`]: Immutable, versioned document snapshots
//! - [`types`]: `SourceRange` and the `Rangeable` trait
//! - [`paths`]: Lexical link-path resolution and encoding
//! - [`fs`]: `FsWorkspace`, the disk-backed implementation
//! - [`cache`]: `WorkspaceInfoCache`, per-document derived data keyed by version
//!
//! Providers only see the [`Workspace`] trait. Mutations are announced on a
//! broadcast channel so caches and the diagnostics manager can follow along.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tower_lsp::lsp_types::Url;

pub mod cache;
mod document;
pub mod fs;
pub mod paths;
mod types;

pub use cache::WorkspaceInfoCache;
pub use document::Document;
pub use fs::FsWorkspace;
pub use types::{position_to_char, Rangeable, SourceRange};

/// Change notifications emitted by a [`Workspace`].
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    Created(Arc<Document>),
    Changed(Arc<Document>),
    Deleted(Url),
}

/// Read access to the workspace's documents.
#[tower_lsp::async_trait]
pub trait Workspace: Send + Sync + 'static {
    fn root(&self) -> &Path;

    /// Extension (without the dot) of workspace documents and of
    /// extension-less link targets.
    fn file_extension(&self) -> &str;

    /// Every known document, ordered by URI.
    async fn all_documents(&self) -> Vec<Arc<Document>>;

    /// The current snapshot for `uri`, reading it from disk if it is a
    /// workspace document that has not been loaded yet.
    async fn get_or_load_document(&self, uri: &Url) -> Option<Arc<Document>>;

    /// Whether `uri` names a known document or any existing file or directory.
    async fn path_exists(&self, uri: &Url) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent>;

    fn is_document_uri(&self, uri: &Url) -> bool {
        uri.to_file_path()
            .ok()
            .and_then(|path| path.extension().map(|ext| ext == self.file_extension()))
            .unwrap_or(false)
    }
}
