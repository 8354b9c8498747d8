//! Broken-link diagnostics.
//!
//! # Module Structure
//!
//! - [`compute`]: Validates one document's links against the workspace
//! - [`watcher`]: Tracks link targets on disk and header changes per document
//! - [`manager`]: Debounces triggers, runs validations and publishes results
//!
//! Every diagnostic carries a stable code (see [`codes`]) and a JSON `data`
//! payload with the href text, so clients can offer fixes.

pub mod compute;
pub mod manager;
pub mod watcher;

pub use compute::{DiagnosticComputer, DiagnosticOptions, DocumentValidation};
pub use manager::{DiagnosticsManager, Reporter};
pub use watcher::{FileEvent, FileEventKind, FileWatcher, LinkWatcher, NotifyWatcher};

/// Source attached to every diagnostic.
pub const SOURCE: &str = "loom";

pub mod codes {
    pub const NO_SUCH_FILE: &str = "link.no-such-file";
    pub const NO_SUCH_HEADER_IN_OWN_FILE: &str = "link.no-such-header-in-own-file";
    pub const NO_SUCH_HEADER_IN_FILE: &str = "link.no-such-header-in-file";
    pub const NO_SUCH_REFERENCE: &str = "link.no-such-reference";
}
