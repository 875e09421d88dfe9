//! Translation from parser documents to clap commands.
//!
//! Options are never marked required here: a value can still arrive from a
//! configuration tier after parsing, so the required check runs against the
//! merged namespace in [`crate::cli::capture`]. Positionals keep their
//! required-ness because only command-line tokens can satisfy them.

use crate::cli::spec::{ArgAction, ArgCount, ArgSpec, CommandSpec, ParserSpec, ValueType};
use clap::builder::{PossibleValuesParser, ValueParser};
use clap::{Arg, ArgAction as ClapArgAction, Command};
use serde_json::Value;

/// Destination names owned by the top-level parser and by clap itself.
pub(crate) const RESERVED_DESTS: [&str; 5] = ["site", "input_file", "verbose", "help", "version"];

/// Builds one clap command from a parser document. Arguments whose
/// destination collides with a reserved name are dropped with a warning so
/// a site-supplied document cannot break assembly.
pub fn build_command(name: impl Into<clap::builder::Str>, spec: &ParserSpec) -> Command {
    let mut command = Command::new(name);
    if !spec.usage.is_empty() {
        command = command.override_usage(spec.usage.clone());
    }
    if !spec.description.is_empty() {
        command = command.long_about(spec.description.clone());
    }
    if !spec.epilog.is_empty() {
        command = command.after_help(spec.epilog.clone());
    }
    for arg in &spec.arguments {
        command = push_arg(command, arg, None);
    }
    for group in &spec.argument_groups {
        for arg in &group.arguments {
            command = push_arg(command, arg, Some(group.title.as_str()));
        }
    }
    command
}

/// Assembles the top-level parser: version reporting, the global flags that
/// are honored before any configuration is read, and one subcommand per
/// prepared descriptor.
pub fn build_root_command<'a>(
    title: &str,
    description: &str,
    commands: impl IntoIterator<Item = (&'a CommandSpec, &'a ParserSpec)>,
) -> Command {
    let mut root = Command::new("mdtf")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(
            Arg::new("site")
                .long("site")
                .short('s')
                .global(true)
                .value_name("SITE")
                .action(ClapArgAction::Set)
                .help("name of the site-specific configuration directory"),
        )
        .arg(
            Arg::new("input_file")
                .long("input-file")
                .short('f')
                .alias("input_file")
                .global(true)
                .value_name("FILE")
                .action(ClapArgAction::Set)
                .help("configuration file supplying default values for the subcommand"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ClapArgAction::Count)
                .help("increase logging verbosity; repeat for more detail"),
        );
    if !title.is_empty() {
        root = root.subcommand_help_heading(title.to_string());
    }
    if !description.is_empty() {
        root = root.about(description.to_string());
    }
    for (spec, parser) in commands {
        let mut subcommand = build_command(spec.name.clone(), parser);
        if !spec.help.is_empty() {
            subcommand = subcommand.about(spec.help.clone());
        }
        root = root.subcommand(subcommand);
    }
    root
}

fn push_arg(command: Command, spec: &ArgSpec, heading: Option<&str>) -> Command {
    let dest = spec.dest();
    if RESERVED_DESTS.contains(&dest.as_str()) {
        tracing::warn!(
            dest = %dest,
            "argument collides with a built-in flag and was dropped"
        );
        return command;
    }
    command.arg(arg_from_spec(spec, heading))
}

fn arg_from_spec(spec: &ArgSpec, heading: Option<&str>) -> Arg {
    let dest = spec.dest();
    let mut arg = Arg::new(dest.clone());

    if spec.positional {
        arg = arg.action(ClapArgAction::Set).value_parser(value_parser_for(spec));
        arg = match spec.effective_nargs() {
            ArgCount::Exact(count) => arg.num_args(count).required(true),
            ArgCount::Optional => arg.num_args(0..=1),
            ArgCount::ZeroOrMore => arg.num_args(0..),
            ArgCount::OneOrMore => arg.num_args(1..).required(true),
        };
    } else {
        arg = arg.long(spec.long_flag());
        if let Some(alias) = spec.flag_alias() {
            arg = arg.alias(alias);
        }
        if let Some(short) = spec.short_name {
            arg = arg.short(short);
        }
        if spec.is_flag() {
            arg = arg.action(flag_action(spec));
        } else {
            let action = if spec.action == ArgAction::Append {
                ClapArgAction::Append
            } else {
                ClapArgAction::Set
            };
            arg = arg
                .action(action)
                .value_parser(value_parser_for(spec))
                .value_name(dest.to_uppercase());
            match spec.effective_nargs() {
                ArgCount::Exact(1) => {}
                ArgCount::Exact(count) => arg = arg.num_args(count),
                ArgCount::Optional => {
                    arg = arg.num_args(0..=1);
                    if let Some(fallback) = &spec.const_value {
                        arg = arg.default_missing_value(cli_token(fallback));
                    }
                }
                ArgCount::ZeroOrMore => arg = arg.num_args(0..),
                ArgCount::OneOrMore => arg = arg.num_args(1..),
            }
        }
    }

    if !spec.help.is_empty() {
        arg = arg.help(spec.help.clone());
    }
    if spec.hidden {
        arg = arg.hide(true);
    }
    if let Some(title) = heading {
        arg = arg.help_heading(title.to_string());
    }
    arg
}

/// Presence action for value-less arguments. A bool-typed `store` negates
/// its declared default, so a true default parses as set-to-false.
fn flag_action(spec: &ArgSpec) -> ClapArgAction {
    match spec.action {
        ArgAction::StoreFalse => ClapArgAction::SetFalse,
        ArgAction::Count | ArgAction::AppendConst => ClapArgAction::Count,
        ArgAction::Store | ArgAction::RecordDefaults if spec.declared_default_bool() => {
            ClapArgAction::SetFalse
        }
        _ => ClapArgAction::SetTrue,
    }
}

fn value_parser_for(spec: &ArgSpec) -> ValueParser {
    if let Some(choices) = &spec.choices {
        return PossibleValuesParser::new(choices.clone()).into();
    }
    match spec.value_type {
        ValueType::Int => clap::value_parser!(i64).into(),
        ValueType::Float => clap::value_parser!(f64).into(),
        ValueType::Bool => clap::value_parser!(bool).into(),
        ValueType::Str | ValueType::Path => clap::value_parser!(String).into(),
    }
}

/// Command-line rendering of a JSON constant, used for implied values.
pub(crate) fn cli_token(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
