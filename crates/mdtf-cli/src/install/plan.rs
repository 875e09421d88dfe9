use anyhow::{Context, Result, bail};
use mdtf_core::util::load_json_file;
use serde::Deserialize;
use std::path::Path;

/// The declarative installer plan, `framework/install_plan.jsonc`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InstallPlan {
    #[serde(default)]
    pub(crate) downloads: Vec<DownloadItem>,
    #[serde(default)]
    pub(crate) environments: Vec<EnvironmentItem>,
    /// Argument names in the CLI template whose defaults are replaced with
    /// installer-resolved values.
    #[serde(default)]
    pub(crate) propagate_keys: Vec<String>,
    #[serde(default = "default_ftp_timeout")]
    pub(crate) ftp_timeout_seconds: u64,
    #[serde(default = "default_keepalive")]
    pub(crate) keepalive_seconds: u64,
    #[serde(default = "default_block_size")]
    pub(crate) block_size: usize,
    /// Link-checker argv run against the self-test output directory; empty
    /// disables the link scan.
    #[serde(default)]
    pub(crate) link_checker: Vec<String>,
}

fn default_ftp_timeout() -> u64 {
    30
}

fn default_keepalive() -> u64 {
    60
}

fn default_block_size() -> usize {
    8192
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DownloadItem {
    pub(crate) host: String,
    pub(crate) remote_dir: String,
    pub(crate) file: String,
    /// Configuration key naming the directory the archive lands in.
    pub(crate) target_key: String,
    /// Archive-internal directory whose children move one level up after
    /// extraction.
    #[serde(default)]
    pub(crate) flatten_subdir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EnvironmentItem {
    pub(crate) name: String,
    /// Yaml path, with `{name}` substituted per expanded environment.
    pub(crate) yaml: String,
    #[serde(default)]
    pub(crate) include: Vec<String>,
    #[serde(default)]
    pub(crate) exclude: Vec<String>,
}

impl EnvironmentItem {
    /// Environment names this item creates: the `include` list minus
    /// `exclude`, or the item's own name when no list is given.
    pub(crate) fn expanded_names(&self) -> Vec<String> {
        if self.include.is_empty() {
            return vec![self.name.clone()];
        }
        self.include
            .iter()
            .filter(|name| !self.exclude.contains(name))
            .cloned()
            .collect()
    }

    pub(crate) fn yaml_for(&self, name: &str) -> String {
        self.yaml.replace("{name}", name)
    }
}

pub(crate) fn load_install_plan(path: &Path) -> Result<InstallPlan> {
    let document = load_json_file(path)
        .with_context(|| format!("failed to load install plan '{}'", path.display()))?;
    let plan: InstallPlan = serde_json::from_value(document)
        .with_context(|| format!("failed to parse install plan '{}'", path.display()))?;
    if plan.block_size == 0 {
        bail!("install plan '{}' declares a zero block size", path.display());
    }
    Ok(plan)
}
