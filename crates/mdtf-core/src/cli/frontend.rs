//! Parser assembly and dispatch.
//!
//! The command line cannot be parsed in one pass: the input file may add
//! tokens, the site decides which configuration documents are read, and
//! plugin selections decide which arguments exist. Assembly therefore runs
//! lenient scans first and only then builds the real parser.

use crate::cli::build::build_root_command;
use crate::cli::capture::{CaptureContext, capture_matches};
use crate::cli::preparse::{preparse_input_file, preparse_selections, preparse_site};
use crate::cli::spec::{ArgSpec, CommandSpec, ParserSpec};
use crate::config::defaults::DefaultsTier;
use crate::config::registry::ConfigRegistry;
use crate::config::resolved::ResolvedConfig;
use crate::domain::{FrameworkError, FrameworkResult};
use crate::util::{load_json_file, resolve_path, split_token_file};
use clap::parser::ValueSource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything an entry point gets to see: the resolved namespace, the
/// configuration state it was resolved against, and the chosen subcommand
/// descriptor.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config: ResolvedConfig,
    pub registry: ConfigRegistry,
    pub subcommand: CommandSpec,
}

/// Outcome of frontend resolution: a subcommand invocation, or an
/// immediate exit for help and version requests.
#[derive(Debug)]
pub enum FrontendOutcome {
    Invoke(Invocation),
    Exit(i32),
}

pub type EntryFn = fn(&Invocation) -> FrameworkResult<i32>;

/// Registered subcommand handlers, keyed by `module::entry_point`.
#[derive(Default)]
pub struct EntryPoints {
    table: BTreeMap<String, EntryFn>,
}

impl EntryPoints {
    pub fn from_table(entries: &[(&str, EntryFn)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(key, entry)| (key.to_string(), *entry))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<EntryFn> {
        self.table.get(key).copied()
    }
}

/// Resolves argv (without the program name) into an outcome. This is the
/// whole frontend: input file, site, registries, plugin selection, the
/// real parse, and capture.
pub fn resolve_invocation(code_root: &Path, argv: &[String]) -> FrameworkResult<FrontendOutcome> {
    // Pass 1: the input file, which contributes either parser tokens or a
    // USER defaults document.
    let input_file = preparse_input_file(argv);
    let mut file_tokens: Vec<String> = Vec::new();
    let mut user_document: Option<Value> = None;
    let mut input_path: Option<PathBuf> = None;
    if let Some(raw) = &input_file {
        let path = resolve_path(raw, code_root);
        if is_json_document(&path) {
            user_document = Some(load_json_file(&path)?);
        } else {
            file_tokens = read_token_file(&path)?;
            tracing::debug!(
                path = %path.display(),
                count = file_tokens.len(),
                "spliced tokens from the input file"
            );
        }
        input_path = Some(path);
    }

    // Pass 2: the site, honored before any site-dependent document is read.
    let preparse_stream: Vec<String> = file_tokens.iter().chain(argv).cloned().collect();
    let mut registry = ConfigRegistry::new(code_root);
    registry.load_global_defaults()?;
    let site_request = preparse_site(&preparse_stream).or_else(|| {
        user_document
            .as_ref()
            .and_then(|document| document.get("site"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    registry.select_site(site_request.as_deref())?;
    if let Some(document) = &user_document {
        registry.load_user_document(document)?;
    }
    registry.load_subcommands()?;
    registry.load_plugins()?;

    // Pass 3: plugin selections, which splice plugin arguments into each
    // subcommand's parser before the real parse.
    let mut prepared: Vec<(CommandSpec, ParserSpec)> = Vec::new();
    let mut selections: BTreeMap<String, String> = BTreeMap::new();
    for command in &registry.subcommands.subcommands {
        let parser =
            prepare_parser(&registry, command, code_root, &preparse_stream, &mut selections)?;
        prepared.push((command.clone(), parser));
    }

    // The real parse, over argv with the file tokens spliced in.
    let root = build_root_command(
        &registry.subcommands.title,
        &registry.subcommands.description,
        prepared.iter().map(|(spec, parser)| (spec, parser)),
    )
    .no_binary_name(true);
    let names: Vec<String> = prepared.iter().map(|(spec, _)| spec.name.clone()).collect();
    let spliced = splice_after_subcommand(argv, &file_tokens, &names);
    let matches = match root.try_get_matches_from(&spliced) {
        Ok(matches) => matches,
        Err(error) => match error.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(FrontendOutcome::Exit(0));
            }
            _ => return Err(FrameworkError::usage("CLI.USAGE", error.to_string())),
        },
    };

    let Some((name, sub_matches)) = matches.subcommand() else {
        return Err(FrameworkError::usage(
            "CLI.USAGE",
            "a subcommand is required".to_string(),
        ));
    };
    let Some((spec, parser)) = prepared.iter().find(|(spec, _)| spec.name == name) else {
        return Err(FrameworkError::usage(
            "CLI.USAGE",
            format!("unknown subcommand '{name}'"),
        ));
    };

    let context = CaptureContext {
        code_root,
        defaults: &registry.defaults,
        plugins: &registry.plugins,
        selections: &selections,
    };
    let mut config = capture_matches(&context, parser, sub_matches)?;
    for dest in registry.defaults.tier(DefaultsTier::User).keys() {
        if !config.contains(dest) {
            tracing::debug!(
                dest = %dest,
                "input file key does not match an argument of this subcommand"
            );
        }
    }

    // Frontend-owned destinations.
    let site_explicit = sub_matches.value_source("site") == Some(ValueSource::CommandLine);
    config.insert(
        "site",
        Value::String(registry.site().to_string()),
        !site_explicit,
    );
    match &input_path {
        Some(path) => config.insert(
            "input_file",
            Value::String(path.to_string_lossy().into_owned()),
            false,
        ),
        None => config.insert("input_file", Value::Null, true),
    }
    let verbose = sub_matches.get_count("verbose");
    config.insert("verbose", Value::from(u64::from(verbose)), verbose == 0);

    let subcommand = spec.clone();
    Ok(FrontendOutcome::Invoke(Invocation {
        config,
        registry,
        subcommand,
    }))
}

/// Resolves and dispatches in one call: the normal path for a binary.
pub fn run_frontend(
    code_root: &Path,
    argv: &[String],
    entry_points: &EntryPoints,
) -> FrameworkResult<i32> {
    match resolve_invocation(code_root, argv)? {
        FrontendOutcome::Exit(code) => Ok(code),
        FrontendOutcome::Invoke(invocation) => {
            let key = invocation.subcommand.entry_key();
            let Some(entry) = entry_points.get(&key) else {
                return Err(FrameworkError::entry_point(
                    "CLI.ENTRY_POINT",
                    format!("no handler is registered for '{key}'"),
                ));
            };
            tracing::debug!(
                subcommand = %invocation.subcommand.name,
                entry = %key,
                "dispatching"
            );
            entry(&invocation)
        }
    }
}

/// Resolves one subcommand's parser and splices in the arguments of the
/// chosen plugin for every selector it declares. The choice follows the
/// selector precedence: an explicit token, then the configuration tiers,
/// then the table's declared default, then the first choice.
fn prepare_parser(
    registry: &ConfigRegistry,
    command: &CommandSpec,
    code_root: &Path,
    stream: &[String],
    selections: &mut BTreeMap<String, String>,
) -> FrameworkResult<ParserSpec> {
    let mut parser = command.resolved_parser(code_root)?;
    let selectors: Vec<ArgSpec> = parser
        .flattened()
        .into_iter()
        .filter(|arg| arg.action.selects_plugin())
        .cloned()
        .collect();
    if selectors.is_empty() {
        parser.validate()?;
        return Ok(parser);
    }

    let selector_refs: Vec<&ArgSpec> = selectors.iter().collect();
    let requested_on_cli = preparse_selections(&selector_refs, stream);

    for selector in &selectors {
        let dest = selector.dest();
        let Some(table) = registry.plugins.table(&dest) else {
            tracing::warn!(
                command = %command.name,
                dest = %dest,
                "selector has no plugin table; leaving it unchanged"
            );
            continue;
        };
        let Some(first_choice) = table.first() else {
            continue;
        };

        let (requested, from_cli) = match requested_on_cli.get(&dest) {
            Some(name) => (Some(name.clone()), true),
            None => {
                let configured = registry
                    .defaults
                    .lookup(&dest)
                    .and_then(|(value, _)| value.as_str().map(str::to_string));
                (configured.or_else(|| table.default.clone()), false)
            }
        };
        let chosen = match requested {
            Some(name) if table.find(&name).is_some() => name,
            Some(name) => {
                // An unknown name straight from the command line is left to
                // the real parse, which rejects it against the final choice
                // set; only a configured name falls back silently enough to
                // deserve a warning.
                if !from_cli {
                    tracing::warn!(
                        dest = %dest,
                        requested = %name,
                        fallback = %first_choice.name,
                        "configured plugin is not available; using the first choice"
                    );
                }
                first_choice.name.clone()
            }
            None => first_choice.name.clone(),
        };

        if let Some(choice) = table.find(&chosen) {
            let fragment = choice.resolved_parser(code_root)?;
            let extra: Vec<ArgSpec> = fragment.flattened().into_iter().cloned().collect();
            parser.splice_after_selector(&dest, &extra);
        }
        parser.annotate_selector(&dest, &table.choice_names());
        selections.insert(dest, chosen);
    }

    parser.validate()?;
    Ok(parser)
}

/// Splices file-supplied tokens immediately after the subcommand token so
/// explicit command-line values, which come later, win on conflict. Values
/// of the pre-subcommand global flags are skipped during the scan. With no
/// subcommand in argv the tokens are appended, which also lets a token
/// file supply the subcommand itself.
fn splice_after_subcommand(
    argv: &[String],
    file_tokens: &[String],
    names: &[String],
) -> Vec<String> {
    if file_tokens.is_empty() {
        return argv.to_vec();
    }
    let mut position = None;
    let mut skip_value = false;
    for (index, token) in argv.iter().enumerate() {
        if skip_value {
            skip_value = false;
            continue;
        }
        if matches!(
            token.as_str(),
            "--site" | "-s" | "--input-file" | "--input_file" | "-f"
        ) {
            skip_value = true;
            continue;
        }
        if names.iter().any(|name| name == token) {
            position = Some(index);
            break;
        }
    }

    let mut spliced = Vec::with_capacity(argv.len() + file_tokens.len());
    match position {
        Some(index) => {
            spliced.extend_from_slice(&argv[..=index]);
            spliced.extend_from_slice(file_tokens);
            spliced.extend_from_slice(&argv[index + 1..]);
        }
        None => {
            spliced.extend_from_slice(argv);
            spliced.extend_from_slice(file_tokens);
        }
    }
    spliced
}

fn is_json_document(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("jsonc"))
        .unwrap_or(false)
}

fn read_token_file(path: &Path) -> FrameworkResult<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            FrameworkError::config_missing(
                "CONFIG.FILE_MISSING",
                format!("configuration file '{}' does not exist", path.display()),
            )
        } else {
            FrameworkError::io_system(
                "IO.READ",
                format!("failed to read '{}': {}", path.display(), source),
            )
        }
    })?;
    split_token_file(&text)
}

#[cfg(test)]
mod tests {
    use super::{
        EntryFn, EntryPoints, FrontendOutcome, Invocation, resolve_invocation, run_frontend,
        splice_after_subcommand,
    };
    use crate::domain::FrameworkResult;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|token| token.to_string()).collect()
    }

    fn write_file(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        fs::write(path, content).expect("write file");
    }

    fn staged_root() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        write_file(
            dir.path(),
            "framework/cli_subcommands.jsonc",
            r#"{
                "title": "commands",
                "subcommands": [{
                    "name": "run",
                    "module": "commands.run",
                    "entry_point": "go",
                    "cli": {"arguments": [{"name": "--jobs", "type": "int", "default": 1}]}
                }]
            }"#,
        );
        write_file(dir.path(), "framework/cli_plugins.jsonc", "[]");
        dir
    }

    #[test]
    fn file_tokens_land_after_the_subcommand() {
        let argv = tokens(&["-f", "flags.txt", "run", "--jobs", "8"]);
        let file = tokens(&["--jobs", "4"]);
        let names = tokens(&["info", "run"]);
        assert_eq!(
            splice_after_subcommand(&argv, &file, &names),
            tokens(&["-f", "flags.txt", "run", "--jobs", "4", "--jobs", "8"])
        );
    }

    #[test]
    fn global_flag_values_are_not_mistaken_for_subcommands() {
        // In `-s run run` the first `run` is a site name.
        let argv = tokens(&["-s", "run", "run"]);
        let file = tokens(&["--jobs", "4"]);
        let names = tokens(&["run"]);
        assert_eq!(
            splice_after_subcommand(&argv, &file, &names),
            tokens(&["-s", "run", "run", "--jobs", "4"])
        );
    }

    #[test]
    fn tokens_are_appended_when_argv_names_no_subcommand() {
        let argv = tokens(&["-f", "flags.txt"]);
        let file = tokens(&["run", "--jobs", "4"]);
        let names = tokens(&["run"]);
        assert_eq!(
            splice_after_subcommand(&argv, &file, &names),
            tokens(&["-f", "flags.txt", "run", "--jobs", "4"])
        );
    }

    #[test]
    fn version_request_exits_cleanly() {
        let dir = staged_root();
        let outcome =
            resolve_invocation(dir.path(), &tokens(&["--version"])).expect("version handled");
        assert!(matches!(outcome, FrontendOutcome::Exit(0)));
    }

    #[test]
    fn dispatch_reaches_the_registered_entry_point() {
        fn go(invocation: &Invocation) -> FrameworkResult<i32> {
            assert_eq!(invocation.config.get_i64("jobs"), Some(1));
            Ok(7)
        }

        let dir = staged_root();
        let entries = EntryPoints::from_table(&[("commands.run::go", go as EntryFn)]);
        let code = run_frontend(dir.path(), &tokens(&["run"]), &entries).expect("dispatch");
        assert_eq!(code, 7);
    }

    #[test]
    fn unregistered_entry_point_is_reported() {
        let dir = staged_root();
        let entries = EntryPoints::default();
        let error = run_frontend(dir.path(), &tokens(&["run"]), &entries).expect_err("no handler");
        assert_eq!(error.code(), "CLI.ENTRY_POINT");
    }
}
