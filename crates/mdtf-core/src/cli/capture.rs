//! Post-parse value capture: folds clap matches and the configuration
//! tiers into one resolved namespace.
//!
//! Precedence per destination: an explicit command-line value, then the
//! highest configuration tier that names it, then the parser-declared
//! default, then the action's implied rest value. Provenance is recorded
//! alongside every value; only an explicit command-line value counts as
//! non-default.

use crate::cli::build::RESERVED_DESTS;
use crate::cli::spec::{ArgAction, ArgSpec, ParserSpec, ValueType};
use crate::config::defaults::DefaultsRegistry;
use crate::config::plugins::PluginRegistry;
use crate::config::resolved::{PluginBinding, ResolvedConfig};
use crate::domain::{FrameworkError, FrameworkResult};
use crate::util::resolve_path;
use clap::ArgMatches;
use clap::parser::ValueSource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Read-only state needed to resolve one subcommand's matches.
pub struct CaptureContext<'a> {
    pub code_root: &'a Path,
    pub defaults: &'a DefaultsRegistry,
    pub plugins: &'a PluginRegistry,
    /// Final plugin choice per selector destination, as computed during
    /// parser assembly. Used when the selector was not given explicitly.
    pub selections: &'a BTreeMap<String, String>,
}

/// Resolves every argument of `parser` against `matches` and the
/// configuration tiers. Fails only on a missing required argument.
pub fn capture_matches(
    context: &CaptureContext<'_>,
    parser: &ParserSpec,
    matches: &ArgMatches,
) -> FrameworkResult<ResolvedConfig> {
    let mut config = ResolvedConfig::default();

    for arg in parser.flattened() {
        let dest = arg.dest();
        if RESERVED_DESTS.contains(&dest.as_str()) {
            continue;
        }
        let explicit = matches.value_source(&dest) == Some(ValueSource::CommandLine);

        if arg.action.selects_plugin() {
            capture_selector(context, arg, matches, explicit, &mut config);
            continue;
        }

        let (value, from_default) = if explicit {
            (explicit_value(arg, matches, &dest, context.code_root), false)
        } else if let Some((tier_value, tier)) = context.defaults.lookup(&dest) {
            tracing::debug!(dest = %dest, tier = tier.as_str(), "using configured default");
            (adapt_value(tier_value.clone(), arg, context.code_root), true)
        } else if let Some(declared) = &arg.default {
            (adapt_value(declared.clone(), arg, context.code_root), true)
        } else {
            (rest_value(arg), true)
        };
        config.insert(dest, value, from_default);
    }

    check_required(parser, &config)?;
    Ok(config)
}

fn capture_selector(
    context: &CaptureContext<'_>,
    arg: &ArgSpec,
    matches: &ArgMatches,
    explicit: bool,
    config: &mut ResolvedConfig,
) {
    let dest = arg.dest();
    let chosen = if explicit {
        matches.get_one::<String>(&dest).cloned()
    } else {
        context.selections.get(&dest).cloned()
    };
    let Some(name) = chosen else {
        config.insert(dest, Value::Null, true);
        return;
    };
    if let Some(choice) = context.plugins.get_plugin_choice(&dest, &name) {
        config.bind_plugin(
            &dest,
            PluginBinding {
                plugin: name.clone(),
                module: choice.module.clone(),
                entry_point: choice.entry_point.clone(),
            },
        );
    }
    config.insert(dest, Value::String(name), !explicit);
}

/// Extracts the command-line value(s) for one argument and shapes them per
/// its action and count.
fn explicit_value(arg: &ArgSpec, matches: &ArgMatches, dest: &str, code_root: &Path) -> Value {
    let value = if arg.is_flag() {
        match arg.action {
            ArgAction::Count => Value::from(u64::from(matches.get_count(dest))),
            ArgAction::AppendConst => {
                let constant = arg.const_value.clone().unwrap_or(Value::Null);
                Value::Array(vec![constant; usize::from(matches.get_count(dest))])
            }
            ArgAction::StoreConst => arg.const_value.clone().unwrap_or(Value::Null),
            _ => Value::Bool(matches.get_flag(dest)),
        }
    } else {
        let mut values = typed_values(arg, matches, dest);
        if arg.action == ArgAction::Append {
            Value::Array(values)
        } else if arg.effective_nargs().stores_scalar() {
            if values.is_empty() {
                // `--flag` with an optional count and no declared constant.
                arg.const_value.clone().unwrap_or(Value::Null)
            } else {
                values.remove(0)
            }
        } else {
            Value::Array(values)
        }
    };
    if arg.resolves_paths() {
        resolve_strings(value, code_root)
    } else {
        value
    }
}

fn typed_values(arg: &ArgSpec, matches: &ArgMatches, dest: &str) -> Vec<Value> {
    match arg.value_type {
        ValueType::Int => matches
            .get_many::<i64>(dest)
            .map(|values| values.map(|value| Value::from(*value)).collect())
            .unwrap_or_default(),
        ValueType::Float => matches
            .get_many::<f64>(dest)
            .map(|values| {
                values
                    .map(|value| {
                        serde_json::Number::from_f64(*value)
                            .map(Value::Number)
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            })
            .unwrap_or_default(),
        ValueType::Bool => matches
            .get_many::<bool>(dest)
            .map(|values| values.map(|value| Value::Bool(*value)).collect())
            .unwrap_or_default(),
        ValueType::Str | ValueType::Path => matches
            .get_many::<String>(dest)
            .map(|values| values.map(|value| Value::String(value.clone())).collect())
            .unwrap_or_default(),
    }
}

/// Adapts a file-supplied or declared default to the argument: scalars are
/// coerced toward the declared type where the text allows it, and path
/// arguments are resolved against the code root.
fn adapt_value(value: Value, arg: &ArgSpec, code_root: &Path) -> Value {
    let coerced = match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| coerce_scalar(item, arg.value_type))
                .collect(),
        ),
        other => coerce_scalar(other, arg.value_type),
    };
    if arg.resolves_paths() {
        resolve_strings(coerced, code_root)
    } else {
        coerced
    }
}

fn coerce_scalar(value: Value, value_type: ValueType) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    let coerced = match value_type {
        ValueType::Int => text.trim().parse::<i64>().ok().map(Value::from),
        ValueType::Float => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        ValueType::Bool => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        ValueType::Str | ValueType::Path => None,
    };
    coerced.unwrap_or(value)
}

fn resolve_strings(value: Value, code_root: &Path) -> Value {
    match value {
        Value::String(text) => {
            Value::String(resolve_path(&text, code_root).to_string_lossy().into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| resolve_strings(item, code_root))
                .collect(),
        ),
        other => other,
    }
}

/// Value an argument takes when nothing supplies one.
fn rest_value(arg: &ArgSpec) -> Value {
    match arg.action {
        ArgAction::StoreTrue => Value::Bool(false),
        ArgAction::StoreFalse => Value::Bool(true),
        ArgAction::Count => Value::from(0u64),
        ArgAction::Append | ArgAction::AppendConst => Value::Array(Vec::new()),
        _ if arg.is_flag() => Value::Bool(false),
        _ => Value::Null,
    }
}

fn check_required(parser: &ParserSpec, config: &ResolvedConfig) -> FrameworkResult<()> {
    let missing: Vec<String> = parser
        .flattened()
        .into_iter()
        .filter(|arg| arg.required && !RESERVED_DESTS.contains(&arg.dest().as_str()))
        .filter(|arg| config.get(&arg.dest()).map(Value::is_null).unwrap_or(true))
        .map(|arg| {
            if arg.positional {
                arg.dest()
            } else {
                format!("--{}", arg.long_flag())
            }
        })
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(FrameworkError::usage(
        "CLI.MISSING_REQUIRED",
        format!("the following arguments are required: {}", missing.join(", ")),
    ))
}
