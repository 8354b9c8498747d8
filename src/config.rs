use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, Environment, File};
use serde::Deserialize;
use tower_lsp::lsp_types::DiagnosticSeverity;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    /// Extension of workspace documents, also appended to extension-less links
    pub file_extension: String,
    pub diagnostics: DiagnosticSettings,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DiagnosticSettings {
    pub enabled: bool,
    /// Quiet period after the last edit before documents are revalidated
    pub debounce_ms: u64,
    /// Links to files that do not exist
    pub file_links: LinkSeverity,
    /// `#fragment` links to headers missing from the same document
    pub fragment_links: LinkSeverity,
    /// `file#fragment` links to headers missing from another document.
    /// Falls back to `fragment_links` when unset.
    #[serde(default)]
    pub file_link_fragments: Option<LinkSeverity>,
    /// Reference links without a matching definition
    pub reference_links: LinkSeverity,
    /// Glob patterns; matching link paths are never reported
    pub ignore_links: Vec<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkSeverity {
    Ignore,
    Warning,
    Error,
}

impl LinkSeverity {
    pub fn to_lsp(self) -> Option<DiagnosticSeverity> {
        match self {
            LinkSeverity::Ignore => None,
            LinkSeverity::Warning => Some(DiagnosticSeverity::WARNING),
            LinkSeverity::Error => Some(DiagnosticSeverity::ERROR),
        }
    }
}

impl DiagnosticSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn file_link_fragments(&self) -> LinkSeverity {
        self.file_link_fragments.unwrap_or(self.fragment_links)
    }
}

impl Settings {
    /// Layers, lowest precedence first: built-in defaults, the user settings
    /// file, `<root>/.loom`, then `LOOM_*` environment variables
    /// (`LOOM_DIAGNOSTICS__FILE_LINKS=error`).
    pub fn new(root_dir: &Path) -> anyhow::Result<Settings> {
        let expanded = shellexpand::tilde("~/.config/loom/settings");
        let settings = Config::builder()
            .add_source(File::with_name(&expanded).required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.loom",
                    root_dir
                        .to_str()
                        .ok_or(anyhow!("Can't convert root_dir to str"))?
                ))
                .required(false),
            )
            .add_source(
                Environment::with_prefix("LOOM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("file_extension", "textile")?
            .set_default("diagnostics.enabled", true)?
            .set_default("diagnostics.debounce_ms", 300)?
            .set_default("diagnostics.file_links", "warning")?
            .set_default("diagnostics.fragment_links", "warning")?
            .set_default("diagnostics.reference_links", "warning")?
            .set_default("diagnostics.ignore_links", Vec::<String>::new())?
            .build()
            .map_err(|err| anyhow!("Build err: {err}"))?;

        let settings = settings.try_deserialize::<Settings>()?;

        anyhow::Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            file_extension: "textile".to_string(),
            diagnostics: DiagnosticSettings::default(),
        }
    }
}

impl Default for DiagnosticSettings {
    fn default() -> Self {
        DiagnosticSettings {
            enabled: true,
            debounce_ms: 300,
            file_links: LinkSeverity::Warning,
            fragment_links: LinkSeverity::Warning,
            file_link_fragments: None,
            reference_links: LinkSeverity::Warning,
            ignore_links: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_utils::create_test_workspace_dir;

    /// Test: without any settings file the defaults apply
    #[test]
    fn test_defaults() {
        let (_temp_dir, root) = create_test_workspace_dir();
        let settings = Settings::new(&root).unwrap();

        assert_eq!(settings.file_extension, "textile");
        assert!(settings.diagnostics.enabled);
        assert_eq!(settings.diagnostics.debounce(), Duration::from_millis(300));
        assert_eq!(settings.diagnostics.file_links, LinkSeverity::Warning);
        assert_eq!(settings.diagnostics.file_link_fragments, None);
        assert!(settings.diagnostics.ignore_links.is_empty());
    }

    /// Test: the workspace settings file overrides defaults
    #[test]
    fn test_workspace_file() {
        let (_temp_dir, root) = create_test_workspace_dir();
        fs::write(
            root.join(".loom.toml"),
            "[diagnostics]\nfile_links = \"error\"\nfile_link_fragments = \"ignore\"\nignore_links = [\"drafts/**\"]\n",
        )
        .unwrap();

        let settings = Settings::new(&root).unwrap();
        assert_eq!(settings.diagnostics.file_links, LinkSeverity::Error);
        assert_eq!(settings.diagnostics.file_link_fragments(), LinkSeverity::Ignore);
        assert_eq!(settings.diagnostics.fragment_links, LinkSeverity::Warning);
        assert_eq!(settings.diagnostics.ignore_links, vec!["drafts/**".to_string()]);
    }

    #[test]
    fn test_fragment_fallback() {
        let settings = DiagnosticSettings {
            fragment_links: LinkSeverity::Error,
            ..Default::default()
        };
        assert_eq!(settings.file_link_fragments(), LinkSeverity::Error);
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(LinkSeverity::Ignore.to_lsp(), None);
        assert_eq!(LinkSeverity::Warning.to_lsp(), Some(DiagnosticSeverity::WARNING));
        assert_eq!(LinkSeverity::Error.to_lsp(), Some(DiagnosticSeverity::ERROR));
    }
}
