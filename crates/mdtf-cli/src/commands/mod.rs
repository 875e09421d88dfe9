mod info;
mod run;

use mdtf_core::cli::{EntryFn, EntryPoints};
use mdtf_core::util::load_json_file;
use mdtf_core::{FrameworkError, FrameworkResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub(crate) const SETTINGS_FILE: &str = "settings.jsonc";

/// Every dotted entry-point coordinate the shipped configuration may name.
const ENTRY_TABLE: &[(&str, EntryFn)] = &[
    ("mdtf_cli.commands.run::run_framework", run::run_framework as EntryFn),
    ("mdtf_cli.commands.info::print_info", info::print_info as EntryFn),
    ("mdtf_cli.install::run_install", crate::install::run_install as EntryFn),
];

pub(crate) fn entry_points() -> EntryPoints {
    EntryPoints::from_table(ENTRY_TABLE)
}

/// The framework-facing half of a POD's settings document. Everything a
/// diagnostic keeps private is ignored.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PodSettings {
    #[serde(default)]
    pub(crate) long_name: String,
    pub(crate) driver: String,
    #[serde(default = "default_runtime")]
    pub(crate) runtime: String,
    #[serde(default)]
    pub(crate) realm: String,
}

fn default_runtime() -> String {
    "sh".to_string()
}

#[derive(Debug, Clone)]
pub(crate) struct Pod {
    pub(crate) name: String,
    pub(crate) dir: PathBuf,
    pub(crate) settings: PodSettings,
}

impl Pod {
    pub(crate) fn driver_path(&self) -> PathBuf {
        self.dir.join(&self.settings.driver)
    }
}

/// All diagnostics shipped under `<code_root>/diagnostics/`, in name
/// order. A malformed settings document is fatal; a directory without one
/// is not a diagnostic and is skipped.
pub(crate) fn discover_pods(code_root: &Path) -> FrameworkResult<Vec<Pod>> {
    let root = code_root.join("diagnostics");
    let mut pods = Vec::new();
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "no diagnostics directory");
        return Ok(pods);
    }
    for entry in WalkDir::new(&root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_name().to_str() != Some(SETTINGS_FILE) {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        let Some(name) = dir.file_name().map(|name| name.to_string_lossy().into_owned()) else {
            continue;
        };
        let document = load_json_file(entry.path())?;
        let settings: PodSettings = serde_json::from_value(document).map_err(|source| {
            FrameworkError::config_syntax(
                "CONFIG.POD_SETTINGS",
                format!("{}: {}", entry.path().display(), source),
            )
        })?;
        pods.push(Pod {
            name,
            dir: dir.to_path_buf(),
            settings,
        });
    }
    Ok(pods)
}

pub(crate) fn find_pod<'a>(pods: &'a [Pod], name: &str) -> Option<&'a Pod> {
    pods.iter().find(|pod| pod.name == name)
}
