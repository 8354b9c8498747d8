//! Path arithmetic for link targets.
//!
//! Links name files relative to the linking document (`"a":../b`) or to the
//! workspace root (`"a":/docs/b`). Resolution is purely lexical; nothing here
//! touches the filesystem.

use std::path::{Component, Path, PathBuf};

use tower_lsp::lsp_types::Url;

/// Removes `.` and `..` components without consulting the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Resolves a raw link path against the linking document.
///
/// A leading `/` anchors the path at `root`; anything else is relative to the
/// directory that holds `document`.
pub fn resolve_path(raw: &str, document: &Path, root: &Path) -> PathBuf {
    let joined = match raw.strip_prefix('/') {
        Some(rooted) => root.join(rooted),
        None => document
            .parent()
            .map(|dir| dir.join(raw))
            .unwrap_or_else(|| PathBuf::from(raw)),
    };
    normalize(&joined)
}

/// Percent-decodes link text, keeping the raw text when it is not valid UTF-8.
pub fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Percent-encodes each segment of a `/`-separated path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment {
            "." | ".." => segment.to_string(),
            _ => urlencoding::encode(segment).into_owned(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn has_extension(path: &Path) -> bool {
    path.extension().is_some()
}

/// `path` with `.extension` appended when it has no extension of its own.
pub fn with_default_extension(path: &Path, extension: &str) -> Option<PathBuf> {
    if has_extension(path) {
        return None;
    }
    let mut name = path.file_name()?.to_os_string();
    name.push(".");
    name.push(extension);
    Some(path.with_file_name(name))
}

/// `to` expressed relative to the directory `from_dir`, always with `/` separators.
pub fn relative_path(from_dir: &Path, to: &Path) -> String {
    pathdiff::diff_paths(to, from_dir)
        .unwrap_or_else(|| to.to_path_buf())
        .to_string_lossy()
        .replace('\\', "/")
}

pub fn file_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

/// Filesystem path of a URI, normalized so URIs spelled differently compare equal.
pub fn uri_path(uri: &Url) -> Option<PathBuf> {
    uri.to_file_path().ok().map(|path| normalize(&path))
}

pub fn same_file(a: &Url, b: &Url) -> bool {
    a == b
        || match (uri_path(a), uri_path(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
}

/// Whether a link naming `link` should be considered a link to `target`.
///
/// True when the paths match, or when the link omits the extension and
/// matches once `extension` is appended.
pub fn looks_like_link_to(link: &Url, target: &Url, extension: &str) -> bool {
    if same_file(link, target) {
        return true;
    }
    let (Some(link_path), Some(target_path)) = (uri_path(link), uri_path(target)) else {
        return false;
    };
    with_default_extension(&link_path, extension).is_some_and(|candidate| candidate == target_path)
}
