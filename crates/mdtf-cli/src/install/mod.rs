//! The `install` subcommand: first-run setup. Downloads supporting data
//! over FTP, builds the conda environments, propagates resolved paths into
//! the shipped CLI defaults, emits the launch wrapper, and finishes with a
//! self test.

mod archive;
mod ftp;
mod plan;

use mdtf_core::cli::{Invocation, canonical_dest};
use mdtf_core::config::ResolvedConfig;
use mdtf_core::domain::{FrameworkError, FrameworkResult};
use mdtf_core::util::{load_json_file, resolve_path, write_json_file};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const PLAN_FILE: &str = "framework/install_plan.jsonc";
const TEMPLATE_FILE: &str = "framework/cli_template.jsonc";
const DEFAULTS_FILE: &str = "framework/cli.jsonc";
const SAMPLE_INPUT: &str = "framework/sample_input.jsonc";
const WRAPPER_NAME: &str = "mdtf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallPhase {
    Init,
    Download,
    Extract,
    EnvSetup,
    RewriteDefaults,
    EmitWrapper,
    SelfTest,
    Done,
    Aborted,
}

impl InstallPhase {
    fn as_str(self) -> &'static str {
        match self {
            InstallPhase::Init => "init",
            InstallPhase::Download => "download",
            InstallPhase::Extract => "extract",
            InstallPhase::EnvSetup => "env-setup",
            InstallPhase::RewriteDefaults => "rewrite-defaults",
            InstallPhase::EmitWrapper => "emit-wrapper",
            InstallPhase::SelfTest => "self-test",
            InstallPhase::Done => "done",
            InstallPhase::Aborted => "aborted",
        }
    }
}

pub(crate) fn run_install(invocation: &Invocation) -> FrameworkResult<i32> {
    let mut installer = Installer::new(invocation)?;
    match installer.run() {
        Ok(()) => Ok(0),
        Err(error) => {
            installer.enter(InstallPhase::Aborted);
            Err(error)
        }
    }
}

struct Installer<'a> {
    invocation: &'a Invocation,
    code_root: PathBuf,
    plan: plan::InstallPlan,
    dry_run: bool,
    phase: InstallPhase,
}

impl<'a> Installer<'a> {
    fn new(invocation: &'a Invocation) -> FrameworkResult<Self> {
        let code_root = invocation.registry.code_root().to_path_buf();
        let plan_path = code_root.join(PLAN_FILE);
        let plan = plan::load_install_plan(&plan_path)
            .map_err(|error| FrameworkError::env_setup("INSTALL.PLAN", format!("{error:#}")))?;
        Ok(Installer {
            invocation,
            code_root,
            plan,
            dry_run: invocation.config.get_bool("dry_run"),
            phase: InstallPhase::Init,
        })
    }

    fn config(&self) -> &ResolvedConfig {
        &self.invocation.config
    }

    fn enter(&mut self, phase: InstallPhase) {
        self.phase = phase;
        tracing::info!(phase = self.phase.as_str(), "install phase");
    }

    fn run(&mut self) -> FrameworkResult<()> {
        self.enter(InstallPhase::Init);
        let no_downloads = self.config().get_bool("no_downloads");
        let no_conda = self.config().get_bool("no_conda");
        let no_self_test = self.config().get_bool("no_self_test");

        if no_downloads {
            println!("skipping supporting data downloads");
        } else {
            self.enter(InstallPhase::Download);
            let fetched = self.download_all()?;
            self.enter(InstallPhase::Extract);
            self.extract_all(&fetched)?;
        }

        if no_conda {
            println!("skipping conda environment setup");
        } else {
            self.enter(InstallPhase::EnvSetup);
            self.environment_setup()?;
        }

        self.enter(InstallPhase::RewriteDefaults);
        self.rewrite_defaults()?;
        self.enter(InstallPhase::EmitWrapper);
        self.emit_wrapper()?;

        if no_self_test {
            println!("skipping the self test");
        } else {
            self.enter(InstallPhase::SelfTest);
            self.self_test()?;
        }

        self.enter(InstallPhase::Done);
        println!("installation finished; run './{WRAPPER_NAME} --help' to get started");
        Ok(())
    }

    fn download_all(&self) -> FrameworkResult<Vec<(plan::DownloadItem, PathBuf)>> {
        let settings = ftp::TransferSettings {
            timeout: Duration::from_secs(self.plan.ftp_timeout_seconds),
            keepalive: Duration::from_secs(self.plan.keepalive_seconds),
            block_size: self.plan.block_size,
        };
        let mut fetched = Vec::new();
        for item in &self.plan.downloads {
            let target_dir = self.download_target(item)?;
            let archive_path = target_dir.join(&item.file);
            if self.dry_run {
                println!(
                    "would download ftp://{}/{}/{} to {}",
                    item.host,
                    item.remote_dir,
                    item.file,
                    target_dir.display()
                );
                fetched.push((item.clone(), archive_path));
                continue;
            }
            fs::create_dir_all(&target_dir).map_err(|error| {
                FrameworkError::io_system(
                    "IO.WORK_DIR",
                    format!("failed to create '{}': {error}", target_dir.display()),
                )
            })?;
            println!("downloading {} from {}...", item.file, item.host);
            let bytes = ftp::download_file(
                &item.host,
                &item.remote_dir,
                &item.file,
                &archive_path,
                &settings,
            )?;
            println!("  received {bytes} bytes");
            fetched.push((item.clone(), archive_path));
        }
        Ok(fetched)
    }

    /// Resolves the landing directory a download item points at through its
    /// configuration key.
    fn download_target(&self, item: &plan::DownloadItem) -> FrameworkResult<PathBuf> {
        let Some(raw) = self.config().get_str(&item.target_key) else {
            return Err(FrameworkError::env_setup(
                "INSTALL.PLAN",
                format!(
                    "download '{}' names the configuration key '{}', which has no value",
                    item.file, item.target_key
                ),
            ));
        };
        Ok(resolve_path(raw, &self.code_root))
    }

    fn extract_all(&self, fetched: &[(plan::DownloadItem, PathBuf)]) -> FrameworkResult<()> {
        for (item, archive_path) in fetched {
            let Some(target_dir) = archive_path.parent() else {
                continue;
            };
            if self.dry_run {
                println!("would extract {}", archive_path.display());
                continue;
            }
            archive::extract(archive_path, target_dir)?;
            if let Some(subdir) = &item.flatten_subdir {
                archive::flatten(&target_dir.join(subdir))?;
            }
            fs::remove_file(archive_path).map_err(|error| {
                FrameworkError::io_system(
                    "IO.REMOVE",
                    format!("failed to remove '{}': {error}", archive_path.display()),
                )
            })?;
        }
        Ok(())
    }

    fn environment_setup(&self) -> FrameworkResult<()> {
        let conda_exe = self.config().get_str("conda_exe").unwrap_or("conda").to_string();
        let env_root = self
            .config()
            .get_str("env_root")
            .map(|raw| resolve_path(raw, &self.code_root));
        self.run_tool(&conda_exe, &["clean".into(), "--index-cache".into(), "--yes".into()])?;
        for item in &self.plan.environments {
            for name in item.expanded_names() {
                let yaml = resolve_path(&item.yaml_for(&name), &self.code_root);
                let mut args: Vec<String> = vec![
                    "env".into(),
                    "create".into(),
                    "--file".into(),
                    yaml.to_string_lossy().into_owned(),
                    "--force".into(),
                ];
                match &env_root {
                    Some(root) => {
                        args.push("--prefix".into());
                        args.push(root.join(&name).to_string_lossy().into_owned());
                    }
                    None => {
                        args.push("--name".into());
                        args.push(name.clone());
                    }
                }
                println!("building conda environment '{name}'...");
                self.run_tool(&conda_exe, &args)?;
            }
        }
        self.run_tool(&conda_exe, &["clean".into(), "--all".into(), "--yes".into()])?;
        Ok(())
    }

    fn run_tool(&self, program: &str, args: &[String]) -> FrameworkResult<()> {
        if self.dry_run {
            println!("would run {program} {}", args.join(" "));
            return Ok(());
        }
        let status = Command::new(program).args(args).status().map_err(|error| {
            FrameworkError::env_setup(
                "INSTALL.ENV_SETUP",
                format!("failed to run '{program}': {error}"),
            )
        })?;
        if !status.success() {
            return Err(FrameworkError::env_setup(
                "INSTALL.ENV_SETUP",
                format!("'{program} {}' exited with {status}", args.join(" ")),
            ));
        }
        Ok(())
    }

    fn rewrite_defaults(&self) -> FrameworkResult<()> {
        let template_path = self.code_root.join(TEMPLATE_FILE);
        let mut document = load_json_file(&template_path)?;
        let rewritten = propagate_defaults(&mut document, &self.plan.propagate_keys, self.config());
        let defaults_path = self.code_root.join(DEFAULTS_FILE);
        if self.dry_run {
            println!(
                "would write {} with {rewritten} rewritten defaults",
                defaults_path.display()
            );
            return Ok(());
        }
        write_json_file(&defaults_path, &document)?;
        println!("wrote {} ({rewritten} defaults rewritten)", defaults_path.display());
        Ok(())
    }

    fn emit_wrapper(&self) -> FrameworkResult<()> {
        let exe = std::env::current_exe().map_err(|error| {
            FrameworkError::io_system(
                "IO.EXE_PATH",
                format!("failed to locate the running executable: {error}"),
            )
        })?;
        let launch_prefix = self.wrapper_launch_prefix();
        let script = wrapper_script(&self.code_root, launch_prefix.as_deref(), &exe);
        let wrapper_path = self.code_root.join(WRAPPER_NAME);
        if self.dry_run {
            println!("would write the launch wrapper {}", wrapper_path.display());
            return Ok(());
        }
        fs::write(&wrapper_path, script).map_err(|error| {
            FrameworkError::io_system(
                "IO.WRITE",
                format!("failed to write '{}': {error}", wrapper_path.display()),
            )
        })?;
        set_executable(&wrapper_path)?;
        println!("wrote the launch wrapper {}", wrapper_path.display());
        Ok(())
    }

    /// `conda run` prefix for the wrapper, pointing at the first environment
    /// the plan builds. `None` leaves a bare exec.
    fn wrapper_launch_prefix(&self) -> Option<String> {
        if self.config().get_bool("no_conda") {
            return None;
        }
        let item = self.plan.environments.first()?;
        let name = item.expanded_names().into_iter().next()?;
        let conda_exe = self.config().get_str("conda_exe").unwrap_or("conda");
        match self.config().get_str("env_root") {
            Some(raw) => {
                let prefix = resolve_path(raw, &self.code_root).join(&name);
                Some(format!("\"{conda_exe}\" run --prefix \"{}\" ", prefix.display()))
            }
            None => Some(format!("\"{conda_exe}\" run --name \"{name}\" ")),
        }
    }

    fn self_test(&self) -> FrameworkResult<()> {
        let wrapper_path = self.code_root.join(WRAPPER_NAME);
        let sample_input = self.code_root.join(SAMPLE_INPUT);
        if self.dry_run {
            println!(
                "would run {} -f {} run",
                wrapper_path.display(),
                sample_input.display()
            );
            return Ok(());
        }
        println!("running the self test...");
        let status = Command::new(&wrapper_path)
            .arg("-f")
            .arg(&sample_input)
            .arg("run")
            .status()
            .map_err(|error| {
                FrameworkError::self_test(
                    "INSTALL.SELF_TEST",
                    format!("failed to run '{}': {error}", wrapper_path.display()),
                )
            })?;
        if !status.success() {
            return Err(FrameworkError::self_test(
                "INSTALL.SELF_TEST",
                format!("the self test exited with {status}"),
            ));
        }

        let output_dir = match self.config().get_str("output_dir") {
            Some(raw) => resolve_path(raw, &self.code_root),
            None => self.code_root.join("wkdir"),
        };
        let Some(newest) = newest_subdirectory(&output_dir) else {
            return Err(FrameworkError::self_test(
                "INSTALL.SELF_TEST",
                format!("the self test left no output under '{}'", output_dir.display()),
            ));
        };
        if let Some((program, args)) = self.plan.link_checker.split_first() {
            let status = Command::new(program)
                .args(args)
                .arg(&newest)
                .status()
                .map_err(|error| {
                    FrameworkError::self_test(
                        "INSTALL.SELF_TEST",
                        format!("failed to run the link checker '{program}': {error}"),
                    )
                })?;
            if !status.success() {
                return Err(FrameworkError::self_test(
                    "INSTALL.SELF_TEST",
                    format!("the link checker flagged '{}'", newest.display()),
                ));
            }
        } else {
            tracing::info!("no link checker configured; skipping the output scan");
        }
        println!("self test passed; output in {}", newest.display());
        Ok(())
    }
}

/// Replaces the `default` of every template argument whose destination is
/// listed in `keys` with the installer-resolved value. Returns how many
/// arguments changed.
fn propagate_defaults(document: &mut Value, keys: &[String], config: &ResolvedConfig) -> usize {
    let mut rewritten = 0;
    if let Some(arguments) = document.get_mut("arguments").and_then(Value::as_array_mut) {
        for argument in arguments {
            rewritten += propagate_argument(argument, keys, config);
        }
    }
    if let Some(groups) = document.get_mut("argument_groups").and_then(Value::as_array_mut) {
        for group in groups {
            if let Some(arguments) = group.get_mut("arguments").and_then(Value::as_array_mut) {
                for argument in arguments {
                    rewritten += propagate_argument(argument, keys, config);
                }
            }
        }
    }
    rewritten
}

fn propagate_argument(argument: &mut Value, keys: &[String], config: &ResolvedConfig) -> usize {
    let dest = match argument.get("dest").and_then(Value::as_str) {
        Some(dest) => dest.to_string(),
        None => match argument.get("name").and_then(Value::as_str) {
            Some(name) => canonical_dest(name),
            None => return 0,
        },
    };
    if !keys.contains(&dest) {
        return 0;
    }
    let Some(value) = config.get(&dest).cloned() else {
        return 0;
    };
    let Some(object) = argument.as_object_mut() else {
        return 0;
    };
    object.insert("default".to_string(), value);
    1
}

fn wrapper_script(code_root: &Path, launch_prefix: Option<&str>, exe: &Path) -> String {
    let prefix = launch_prefix.unwrap_or("");
    format!(
        "#!/bin/sh\n\
         # Generated by 'mdtf install'; rerun the installer to regenerate.\n\
         MDTF_CODE_ROOT=\"{}\"\n\
         export MDTF_CODE_ROOT\n\
         exec {prefix}\"{}\" \"$@\"\n",
        code_root.display(),
        exe.display()
    )
}

#[cfg(unix)]
fn set_executable(path: &Path) -> FrameworkResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|error| {
        FrameworkError::io_system(
            "IO.WRITE",
            format!("failed to mark '{}' executable: {error}", path.display()),
        )
    })
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> FrameworkResult<()> {
    Ok(())
}

/// Most recently modified direct subdirectory of `root`, if any.
fn newest_subdirectory(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let newer = match &newest {
            Some((best, _)) => modified > *best,
            None => true,
        };
        if newer {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::{newest_subdirectory, propagate_defaults, wrapper_script};
    use mdtf_core::config::ResolvedConfig;
    use serde_json::{Value, json};
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn resolved(values: &[(&str, Value)]) -> ResolvedConfig {
        let mut config = ResolvedConfig::default();
        for (dest, value) in values {
            config.insert(*dest, value.clone(), false);
        }
        config
    }

    #[test]
    fn propagation_rewrites_flat_and_grouped_defaults() {
        let mut template = json!({
            "arguments": [
                {"name": "--model-data-root", "type": "path", "default": "inputdata"},
                {"name": "--jobs", "type": "int", "default": 1}
            ],
            "argument_groups": [
                {
                    "title": "paths",
                    "arguments": [
                        {"name": "--output-dir", "type": "path", "default": "wkdir"}
                    ]
                }
            ]
        });
        let keys = vec!["model_data_root".to_string(), "output_dir".to_string()];
        let config = resolved(&[
            ("model_data_root", json!("/srv/mdtf/inputdata")),
            ("output_dir", json!("/srv/mdtf/wkdir")),
            ("jobs", json!(8)),
        ]);

        let rewritten = propagate_defaults(&mut template, &keys, &config);

        assert_eq!(rewritten, 2);
        assert_eq!(
            template["arguments"][0]["default"],
            json!("/srv/mdtf/inputdata")
        );
        assert_eq!(template["arguments"][1]["default"], json!(1), "jobs is not propagated");
        assert_eq!(
            template["argument_groups"][0]["arguments"][0]["default"],
            json!("/srv/mdtf/wkdir")
        );
    }

    #[test]
    fn propagation_honors_an_explicit_dest() {
        let mut template = json!({
            "arguments": [
                {"name": "--data", "dest": "model_data_root", "default": ""}
            ]
        });
        let keys = vec!["model_data_root".to_string()];
        let config = resolved(&[("model_data_root", json!("/data"))]);

        assert_eq!(propagate_defaults(&mut template, &keys, &config), 1);
        assert_eq!(template["arguments"][0]["default"], json!("/data"));
    }

    #[test]
    fn newest_subdirectory_goes_by_modification_time() {
        let temp = TempDir::new().expect("tempdir");
        let older = temp.path().join("MDTF_output_1");
        let newer = temp.path().join("MDTF_output_2");
        fs::create_dir(&older).expect("dir");
        fs::create_dir(&newer).expect("dir");
        fs::write(temp.path().join("stray.log"), b"ignored").expect("file");
        set_mtime(&older, 1_000);
        set_mtime(&newer, 2_000);

        assert_eq!(newest_subdirectory(temp.path()), Some(newer));
        assert_eq!(newest_subdirectory(&temp.path().join("missing")), None);
    }

    fn set_mtime(path: &Path, seconds: u64) {
        File::open(path)
            .expect("open directory")
            .set_modified(UNIX_EPOCH + Duration::from_secs(seconds))
            .expect("set mtime");
    }

    #[test]
    fn wrapper_script_exports_the_code_root_and_execs() {
        let script = wrapper_script(
            Path::new("/srv/mdtf"),
            Some("\"conda\" run --name \"base\" "),
            Path::new("/srv/mdtf/bin/mdtf"),
        );
        assert!(script.starts_with("#!/bin/sh\n"), "script: {script}");
        assert!(script.contains("MDTF_CODE_ROOT=\"/srv/mdtf\"\n"));
        assert!(script.contains("export MDTF_CODE_ROOT\n"));
        assert!(
            script.ends_with("exec \"conda\" run --name \"base\" \"/srv/mdtf/bin/mdtf\" \"$@\"\n"),
            "script: {script}"
        );

        let bare = wrapper_script(Path::new("/srv/mdtf"), None, Path::new("/usr/bin/mdtf"));
        assert!(bare.contains("exec \"/usr/bin/mdtf\" \"$@\"\n"), "script: {bare}");
    }
}
