mod commands;
mod install;

use mdtf_core::cli::run_frontend;
use mdtf_core::{FrameworkError, FrameworkResult};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const SUBCOMMANDS_MARKER: &str = "framework/cli_subcommands.jsonc";

fn main() {
    std::process::exit(run_from_env());
}

fn run_from_env() -> i32 {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    init_tracing(&argv);

    match run(&argv) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{}", error.diagnostic_line());
            eprintln!("{}", error.fatal_exit_line());
            error.exit_code()
        }
    }
}

fn run(argv: &[String]) -> FrameworkResult<i32> {
    let code_root = discover_code_root()?;
    tracing::debug!(code_root = %code_root.display(), "resolved code root");
    run_frontend(&code_root, argv, &commands::entry_points())
}

/// `RUST_LOG` wins when set; otherwise the level follows the number of
/// `-v` flags found by a plain argv scan, since the real parser does not
/// exist yet when the subscriber goes up.
fn init_tracing(argv: &[String]) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose_count(argv) {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn verbose_count(argv: &[String]) -> usize {
    let mut count = 0;
    for token in argv {
        if token == "--verbose" {
            count += 1;
        } else if token.len() > 1
            && token.starts_with('-')
            && !token.starts_with("--")
            && token[1..].chars().all(|ch| ch == 'v')
        {
            count += token.len() - 1;
        }
    }
    count
}

/// The code root anchors every relative path in the configuration. Search
/// order: `MDTF_CODE_ROOT`, then ancestors of the working directory, then
/// ancestors of the executable (an installed tree keeps the binary next to
/// `framework/`).
fn discover_code_root() -> FrameworkResult<PathBuf> {
    if let Ok(root) = std::env::var("MDTF_CODE_ROOT") {
        return Ok(PathBuf::from(root));
    }
    let working_dir = std::env::current_dir().map_err(|source| {
        FrameworkError::io_system(
            "IO.WORKING_DIR",
            format!("failed to read the working directory: {source}"),
        )
    })?;
    if let Some(root) = find_marker_root(&working_dir) {
        return Ok(root);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(root) = find_marker_root(&exe) {
            return Ok(root);
        }
    }
    Err(FrameworkError::config_missing(
        "CONFIG.CODE_ROOT",
        format!(
            "cannot locate the framework installation from '{}'; expected to find '{}' (set MDTF_CODE_ROOT to override)",
            working_dir.display(),
            SUBCOMMANDS_MARKER
        ),
    ))
}

fn find_marker_root(start: &Path) -> Option<PathBuf> {
    for candidate in start.ancestors() {
        if candidate.join(SUBCOMMANDS_MARKER).is_file() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{find_marker_root, verbose_count};
    use std::fs;
    use tempfile::TempDir;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|token| token.to_string()).collect()
    }

    #[test]
    fn verbosity_scan_counts_all_spellings() {
        assert_eq!(verbose_count(&tokens(&["run"])), 0);
        assert_eq!(verbose_count(&tokens(&["run", "-v"])), 1);
        assert_eq!(verbose_count(&tokens(&["-vv", "run"])), 2);
        assert_eq!(verbose_count(&tokens(&["--verbose", "run", "-v"])), 2);
        assert_eq!(verbose_count(&tokens(&["--version"])), 0);
        assert_eq!(verbose_count(&tokens(&["-value"])), 0);
    }

    #[test]
    fn marker_search_walks_ancestors() {
        let temp = TempDir::new().expect("tempdir");
        let framework = temp.path().join("framework");
        fs::create_dir_all(&framework).expect("framework dir");
        fs::write(framework.join("cli_subcommands.jsonc"), "{}").expect("marker file");
        let nested = temp.path().join("diagnostics/example_tas");
        fs::create_dir_all(&nested).expect("nested dir");

        let found = find_marker_root(&nested).expect("marker should be found");
        assert_eq!(found, temp.path());
        assert!(find_marker_root(std::path::Path::new("/nonexistent")).is_none());
    }
}
