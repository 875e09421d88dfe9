use crate::cli::spec::CommandSpec;
use crate::config::defaults::{DefaultsRegistry, DefaultsTier};
use crate::config::plugins::{PluginRegistry, PluginTableSpec};
use crate::domain::{FrameworkError, FrameworkErrorKind, FrameworkResult};
use crate::util::load_json_file;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Site assumed when nothing selects one; its directory is allowed to be
/// missing so an uninstalled tree still parses.
pub const DEFAULT_SITE: &str = "local";

pub const SUBCOMMANDS_FILE: &str = "cli_subcommands.jsonc";
pub const PLUGINS_FILE: &str = "cli_plugins.jsonc";
pub const DEFAULTS_FILE: &str = "defaults.jsonc";

/// Subcommand registry document: subparser help kwargs plus the list of
/// subcommand descriptors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubcommandsDoc {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subcommands: Vec<CommandSpec>,
}

/// Process-wide configuration state, built once during parser assembly and
/// read-only afterwards. Passed to entry points as part of the invocation
/// context; there is no global instance.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    code_root: PathBuf,
    site: String,
    pub defaults: DefaultsRegistry,
    pub subcommands: SubcommandsDoc,
    pub plugins: PluginRegistry,
}

impl ConfigRegistry {
    pub fn new(code_root: impl Into<PathBuf>) -> Self {
        Self {
            code_root: code_root.into(),
            site: DEFAULT_SITE.to_string(),
            defaults: DefaultsRegistry::default(),
            subcommands: SubcommandsDoc::default(),
            plugins: PluginRegistry::default(),
        }
    }

    pub fn code_root(&self) -> &Path {
        &self.code_root
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn framework_dir(&self) -> PathBuf {
        self.code_root.join("framework")
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.code_root.join("sites")
    }

    pub fn site_dir(&self, site: &str) -> PathBuf {
        self.sites_dir().join(site)
    }

    /// Real subdirectories of the sites root, sorted. A missing sites root
    /// yields an empty list.
    pub fn available_sites(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.sites_dir()) else {
            tracing::debug!(
                path = %self.sites_dir().display(),
                "sites directory is not readable; no sites available"
            );
            return Vec::new();
        };
        let mut sites: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        sites.sort();
        sites
    }

    /// Loads `sites/defaults.jsonc` into the GLOBAL tier. The file is
    /// optional.
    pub fn load_global_defaults(&mut self) -> FrameworkResult<()> {
        let path = self.sites_dir().join(DEFAULTS_FILE);
        self.load_optional_defaults(DefaultsTier::Global, &path)
    }

    /// Applies the site precedence (explicit request, then the GLOBAL
    /// tier's `site` key, then [`DEFAULT_SITE`]), validates that the site
    /// directory exists unless it is the uninstalled default, and loads the
    /// SITE defaults tier.
    pub fn select_site(&mut self, requested: Option<&str>) -> FrameworkResult<()> {
        let site = requested
            .map(str::to_string)
            .or_else(|| {
                self.defaults
                    .tier(DefaultsTier::Global)
                    .get("site")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_SITE.to_string());

        if !self.site_dir(&site).is_dir() && site != DEFAULT_SITE {
            let available = self.available_sites();
            let listing = if available.is_empty() {
                "none are installed".to_string()
            } else {
                format!("available: {}", available.join(", "))
            };
            return Err(FrameworkError::unknown_site(
                "SITE.UNKNOWN",
                format!("site '{site}' was not found under '{}'; {listing}", self.sites_dir().display()),
            ));
        }

        tracing::debug!(site = %site, "selected site");
        let path = self.site_dir(&site).join(DEFAULTS_FILE);
        self.site = site;
        self.load_optional_defaults(DefaultsTier::Site, &path)
    }

    /// Loads a user input document (already parsed) into the USER tier.
    pub fn load_user_document(&mut self, document: &Value) -> FrameworkResult<()> {
        self.defaults.load_tier(DefaultsTier::User, document)
    }

    /// Reads the subcommand registry: the framework document is required,
    /// the site document overlays it (scalar overwrite, list append with
    /// same-named site entries replacing framework ones).
    pub fn load_subcommands(&mut self) -> FrameworkResult<()> {
        let framework_path = self.framework_dir().join(SUBCOMMANDS_FILE);
        let mut doc = subcommands_from_file(&framework_path)?;

        let site_path = self.site_dir(&self.site).join(SUBCOMMANDS_FILE);
        if site_path.is_file() {
            let overlay = subcommands_from_file(&site_path)?;
            if !overlay.title.is_empty() {
                doc.title = overlay.title;
            }
            if !overlay.description.is_empty() {
                doc.description = overlay.description;
            }
            for command in overlay.subcommands {
                if let Some(position) =
                    doc.subcommands.iter().position(|existing| existing.name == command.name)
                {
                    doc.subcommands[position] = command;
                } else {
                    doc.subcommands.push(command);
                }
            }
        }

        self.subcommands = doc;
        Ok(())
    }

    /// Reads the plugin registry with the same required-framework,
    /// optional-site-overlay rule, then enforces the default-within-choices
    /// invariant.
    pub fn load_plugins(&mut self) -> FrameworkResult<()> {
        let framework_path = self.framework_dir().join(PLUGINS_FILE);
        let mut registry = PluginRegistry::default();
        registry.merge_document(plugins_from_file(&framework_path)?);

        let site_path = self.site_dir(&self.site).join(PLUGINS_FILE);
        if site_path.is_file() {
            registry.merge_document(plugins_from_file(&site_path)?);
        }

        registry.finalize();
        self.plugins = registry;
        Ok(())
    }

    pub fn find_subcommand(&self, name: &str) -> Option<&CommandSpec> {
        self.subcommands
            .subcommands
            .iter()
            .find(|command| command.name == name)
    }

    fn load_optional_defaults(
        &mut self,
        tier: DefaultsTier,
        path: &Path,
    ) -> FrameworkResult<()> {
        match load_json_file(path) {
            Ok(document) => self.defaults.load_tier(tier, &document),
            Err(error) if error.kind() == FrameworkErrorKind::ConfigFileMissing => {
                tracing::debug!(
                    path = %path.display(),
                    tier = tier.as_str(),
                    "optional defaults file is absent"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

fn subcommands_from_file(path: &Path) -> FrameworkResult<SubcommandsDoc> {
    let document = load_json_file(path)?;
    serde_json::from_value(document).map_err(|source| {
        FrameworkError::config_syntax(
            "CONFIG.SUBCOMMANDS",
            format!("{}: {}", path.display(), source),
        )
    })
}

fn plugins_from_file(path: &Path) -> FrameworkResult<Vec<PluginTableSpec>> {
    let document = load_json_file(path)?;
    serde_json::from_value(document).map_err(|source| {
        FrameworkError::config_syntax(
            "CONFIG.PLUGINS",
            format!("{}: {}", path.display(), source),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{ConfigRegistry, DEFAULT_SITE};
    use crate::config::defaults::DefaultsTier;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_file(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        fs::write(path, content).expect("write file");
    }

    fn staged_root() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        write_file(
            dir.path(),
            "sites/defaults.jsonc",
            "// global defaults\n{\"site\": \"hpc\", \"output_dir\": \"/a\"}\n",
        );
        write_file(dir.path(), "sites/hpc/defaults.jsonc", "{\"output_dir\": \"/b\"}\n");
        write_file(dir.path(), "sites/local/.keep", "");
        write_file(
            dir.path(),
            "framework/cli_subcommands.jsonc",
            r#"{
                "title": "commands",
                "subcommands": [
                    {"name": "run", "module": "m.run", "entry_point": "go"},
                    {"name": "info", "module": "m.info", "entry_point": "show"}
                ]
            }"#,
        );
        write_file(
            dir.path(),
            "framework/cli_plugins.jsonc",
            r#"[{
                "dest": "data_manager",
                "default": "local",
                "choices": [
                    {"name": "local", "module": "p.local", "entry_point": "configure"}
                ]
            }]"#,
        );
        dir
    }

    #[test]
    fn site_precedence_is_request_then_global_then_default() {
        let dir = staged_root();

        let mut registry = ConfigRegistry::new(dir.path());
        registry.load_global_defaults().expect("global defaults");
        registry.select_site(None).expect("global site exists");
        assert_eq!(registry.site(), "hpc");
        assert_eq!(
            registry.defaults.tier(DefaultsTier::Site).get("output_dir"),
            Some(&serde_json::json!("/b"))
        );

        let mut explicit = ConfigRegistry::new(dir.path());
        explicit.load_global_defaults().expect("global defaults");
        explicit.select_site(Some("local")).expect("local is installed");
        assert_eq!(explicit.site(), "local");
    }

    #[test]
    fn default_site_tolerates_a_missing_directory() {
        let dir = TempDir::new().expect("temp dir");
        let mut registry = ConfigRegistry::new(dir.path());
        registry.load_global_defaults().expect("missing file is optional");
        registry.select_site(None).expect("uninstalled default site");
        assert_eq!(registry.site(), DEFAULT_SITE);
    }

    #[test]
    fn unknown_site_lists_available_sites() {
        let dir = staged_root();
        let mut registry = ConfigRegistry::new(dir.path());
        registry.load_global_defaults().expect("global defaults");
        let error = registry.select_site(Some("cloud")).expect_err("no such site");
        assert_eq!(error.code(), "SITE.UNKNOWN");
        assert!(error.message().contains("hpc"), "{}", error.message());
        assert!(error.message().contains("local"), "{}", error.message());
    }

    #[test]
    fn site_overlay_replaces_and_extends_subcommands() {
        let dir = staged_root();
        write_file(
            dir.path(),
            "sites/hpc/cli_subcommands.jsonc",
            r#"{
                "subcommands": [
                    {"name": "run", "module": "site.run", "entry_point": "go"},
                    {"name": "archive", "module": "site.archive", "entry_point": "store"}
                ]
            }"#,
        );

        let mut registry = ConfigRegistry::new(dir.path());
        registry.load_global_defaults().expect("global defaults");
        registry.select_site(Some("hpc")).expect("hpc site");
        registry.load_subcommands().expect("registries load");

        let names: Vec<&str> = registry
            .subcommands
            .subcommands
            .iter()
            .map(|command| command.name.as_str())
            .collect();
        assert_eq!(names, vec!["run", "info", "archive"]);
        assert_eq!(
            registry.find_subcommand("run").expect("replaced").module,
            "site.run"
        );
        assert_eq!(registry.subcommands.title, "commands");
    }

    #[test]
    fn missing_framework_registry_is_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let mut registry = ConfigRegistry::new(dir.path());
        let error = registry.load_subcommands().expect_err("required file");
        assert_eq!(error.code(), "CONFIG.FILE_MISSING");
    }
}
