//! loom: a Language Server for Textile workspaces
//!
//! This crate provides the link graph behind the `loom` language server:
//! cross-document references, consistent multi-document rename, and broken
//! link diagnostics that stay current as documents and files change.
//!
//! # Overview
//!
//! - **Workspace**: Versioned document snapshots and a per-version info cache
//! - **Reference Resolution**: Find-references and go-to-definition for headers,
//!   link definitions, external URLs and file links
//! - **Rename Support**: Header, fragment, definition, URL and file renames that
//!   preserve the style each link was written in
//! - **Diagnostics**: Debounced, cancellable broken-link detection
//!
//! # Architecture
//!
//! - [`workspace`]: Documents, positions, path resolution and the info cache
//! - [`textile_parser`]: Extraction of headers, links, images and link definitions
//! - [`toc`]: Per-document table of contents with slug lookup
//! - [`links`]: Link classification and link definition sets
//! - [`references`], [`rename`], [`definition`]: Cross-document queries
//! - [`diagnostics`]: Validation, link-target watching and the manager task
//! - [`server`]: The tower-lsp front end
//! - [`config`]: Configuration management and settings
//!
//! # Usage
//!
//! ```ignore
//! use loom::config::Settings;
//! use loom::service::LanguageService;
//! use loom::workspace::FsWorkspace;
//!
//! let settings = Settings::new(&root)?;
//! let workspace = Arc::new(FsWorkspace::construct(&settings, &root)?);
//! let service = LanguageService::new(workspace);
//! ```

// Core modules - documents and derived data
pub mod slug;
pub mod textile_parser;
pub mod workspace;

// Providers
pub mod cancel;
pub mod definition;
pub mod diagnostics;
pub mod links;
pub mod references;
pub mod rename;
pub mod service;
pub mod toc;

// Front ends and configuration
pub mod check;
pub mod config;
pub mod server;

// Test utilities (only available in test builds)
#[cfg(test)]
pub mod test_utils;
