//! Lenient first-pass parsers, run before the real parser can exist.
//!
//! Parser assembly needs three values that influence how the parser itself
//! is built: the input file (whose contents may add tokens), the site (which
//! changes which documents are read), and any plugin selections (which
//! change which arguments exist). These scans tolerate unknown arguments
//! and report nothing on a hard parse failure; the real parse later owns
//! all error reporting.

use crate::cli::build::RESERVED_DESTS;
use crate::cli::spec::ArgSpec;
use clap::{Arg, ArgAction, Command};
use std::collections::{BTreeMap, BTreeSet};

fn lenient_command() -> Command {
    Command::new("preparse")
        .no_binary_name(true)
        .ignore_errors(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new("site").long("site").short('s').action(ArgAction::Set))
        .arg(
            Arg::new("input_file")
                .long("input-file")
                .short('f')
                .alias("input_file")
                .action(ArgAction::Set),
        )
        .arg(Arg::new("verbose").long("verbose").short('v').action(ArgAction::Count))
}

/// Scans raw argv for `--input-file`/`-f`.
pub fn preparse_input_file(tokens: &[String]) -> Option<String> {
    lookup(lenient_command(), tokens, "input_file")
}

/// Scans argv plus any file-supplied tokens for `--site`/`-s`.
pub fn preparse_site(tokens: &[String]) -> Option<String> {
    lookup(lenient_command(), tokens, "site")
}

/// Scans for plugin selector values. Selectors are declared as plain string
/// options so a value outside the current choice set is still captured; the
/// real parse validates against the final choice sets.
pub fn preparse_selections(selectors: &[&ArgSpec], tokens: &[String]) -> BTreeMap<String, String> {
    let mut command = lenient_command();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for selector in selectors {
        let dest = selector.dest();
        if RESERVED_DESTS.contains(&dest.as_str()) || !seen.insert(dest.clone()) {
            continue;
        }
        let mut arg = Arg::new(dest).long(selector.long_flag()).action(ArgAction::Set);
        if let Some(alias) = selector.flag_alias() {
            arg = arg.alias(alias);
        }
        if let Some(short) = selector.short_name {
            arg = arg.short(short);
        }
        command = command.arg(arg);
    }

    let Ok(matches) = command.try_get_matches_from(tokens) else {
        return BTreeMap::new();
    };
    selectors
        .iter()
        .filter_map(|selector| {
            let dest = selector.dest();
            let value = matches.try_get_one::<String>(&dest).ok().flatten().cloned()?;
            Some((dest, value))
        })
        .collect()
}

fn lookup(command: Command, tokens: &[String], dest: &str) -> Option<String> {
    let matches = command.try_get_matches_from(tokens).ok()?;
    matches.get_one::<String>(dest).cloned()
}

#[cfg(test)]
mod tests {
    use super::{preparse_input_file, preparse_selections, preparse_site};
    use crate::cli::spec::{ArgAction, ArgSpec};

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|token| token.to_string()).collect()
    }

    #[test]
    fn site_is_found_among_unknown_arguments() {
        let stream = tokens(&["run", "--strip-comments", "--site", "hpc", "extra"]);
        assert_eq!(preparse_site(&stream).as_deref(), Some("hpc"));
        assert_eq!(preparse_site(&tokens(&["run"])), None);
    }

    #[test]
    fn input_file_accepts_the_short_flag() {
        let stream = tokens(&["-f", "inputs.jsonc", "run"]);
        assert_eq!(preparse_input_file(&stream).as_deref(), Some("inputs.jsonc"));
    }

    #[test]
    fn selections_are_collected_by_destination() {
        let mut selector = ArgSpec::named("--data-manager");
        selector.action = ArgAction::PluginSelector;
        let stream = tokens(&["run", "--data_manager", "gcp", "--jobs", "3"]);
        let selections = preparse_selections(&[&selector], &stream);
        assert_eq!(selections.get("data_manager").map(String::as_str), Some("gcp"));
    }

    #[test]
    fn absent_selectors_are_not_reported() {
        let mut selector = ArgSpec::named("--data-manager");
        selector.action = ArgAction::PluginSelector;
        let selections = preparse_selections(&[&selector], &tokens(&["run"]));
        assert!(selections.is_empty());
    }
}
