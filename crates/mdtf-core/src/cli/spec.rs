use crate::domain::{FrameworkError, FrameworkResult};
use crate::util::{load_json_file, resolve_path};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Canonical destination spelling: leading dashes dropped, hyphens replaced
/// with underscores.
pub fn canonical_dest(name: &str) -> String {
    name.trim_start_matches('-').replace('-', "_")
}

/// Display spelling of a long flag: underscores become hyphens.
pub fn flag_spelling(name: &str) -> String {
    name.trim_start_matches('-').replace('_', "-")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgAction {
    #[default]
    Store,
    StoreTrue,
    StoreFalse,
    StoreConst,
    Append,
    AppendConst,
    Count,
    /// Accepted for compatibility with older parser documents; provenance
    /// is tracked for every argument, so this is plain `store`.
    RecordDefaults,
    Path,
    PluginSelector,
}

impl ArgAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::StoreTrue => "store_true",
            Self::StoreFalse => "store_false",
            Self::StoreConst => "store_const",
            Self::Append => "append",
            Self::AppendConst => "append_const",
            Self::Count => "count",
            Self::RecordDefaults => "record_defaults",
            Self::Path => "path",
            Self::PluginSelector => "plugin_selector",
        }
    }

    /// Flag actions consume no value tokens.
    pub const fn is_flag_action(self) -> bool {
        matches!(
            self,
            Self::StoreTrue | Self::StoreFalse | Self::StoreConst | Self::AppendConst | Self::Count
        )
    }

    pub const fn resolves_paths(self) -> bool {
        matches!(self, Self::Path)
    }

    pub const fn selects_plugin(self) -> bool {
        matches!(self, Self::PluginSelector)
    }
}

impl Display for ArgAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Number of values an argument accepts: an exact count or one of the
/// `?`/`*`/`+` forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "NargsRepr", into = "NargsRepr")]
pub enum ArgCount {
    Exact(usize),
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum NargsRepr {
    Count(u64),
    Symbol(String),
}

impl TryFrom<NargsRepr> for ArgCount {
    type Error = String;

    fn try_from(repr: NargsRepr) -> Result<Self, Self::Error> {
        match repr {
            NargsRepr::Count(n) => Ok(Self::Exact(n as usize)),
            NargsRepr::Symbol(symbol) => match symbol.as_str() {
                "?" => Ok(Self::Optional),
                "*" => Ok(Self::ZeroOrMore),
                "+" => Ok(Self::OneOrMore),
                other => Err(format!(
                    "invalid nargs '{other}': expected an integer, '?', '*', or '+'"
                )),
            },
        }
    }
}

impl From<ArgCount> for NargsRepr {
    fn from(count: ArgCount) -> Self {
        match count {
            ArgCount::Exact(n) => Self::Count(n as u64),
            ArgCount::Optional => Self::Symbol("?".to_string()),
            ArgCount::ZeroOrMore => Self::Symbol("*".to_string()),
            ArgCount::OneOrMore => Self::Symbol("+".to_string()),
        }
    }
}

impl ArgCount {
    /// True when a successful capture holds at most one value, which is
    /// then stored unwrapped rather than as a one-element list.
    pub const fn stores_scalar(self) -> bool {
        matches!(self, Self::Exact(1) | Self::Optional)
    }
}

/// Scalar type used to coerce captured strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Str,
    Int,
    Float,
    Bool,
    Path,
}

impl ValueType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Path => "path",
        }
    }
}

/// One argument of a parser document. Immutable after loading except for
/// the plugin-driven `choices`/`help` rewrite performed during assembly.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(default)]
    pub short_name: Option<char>,
    #[serde(default)]
    pub action: ArgAction,
    #[serde(default)]
    pub nargs: Option<ArgCount>,
    #[serde(rename = "const", default)]
    pub const_value: Option<Value>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub dest: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub positional: bool,
}

impl ArgSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            action: ArgAction::default(),
            nargs: None,
            const_value: None,
            default: None,
            value_type: ValueType::default(),
            choices: None,
            required: false,
            help: String::new(),
            dest: None,
            hidden: false,
            positional: false,
        }
    }

    /// Destination key in the resolved namespace. Positionals always use
    /// their own name.
    pub fn dest(&self) -> String {
        if self.positional {
            return canonical_dest(&self.name);
        }
        self.dest
            .as_deref()
            .map(canonical_dest)
            .unwrap_or_else(|| canonical_dest(&self.name))
    }

    pub fn long_flag(&self) -> String {
        flag_spelling(&self.name)
    }

    /// Alternate long spelling, present when the hyphen and underscore
    /// forms differ (`--foo-bar` vs `--foo_bar`).
    pub fn flag_alias(&self) -> Option<String> {
        let underscore = canonical_dest(&self.name);
        (underscore != self.long_flag()).then_some(underscore)
    }

    /// A flag consumes no value tokens: either a flag action or a
    /// bool-typed `store`, whose presence stores the negation of the
    /// declared default.
    pub fn is_flag(&self) -> bool {
        if self.positional {
            return false;
        }
        self.action.is_flag_action()
            || (matches!(self.action, ArgAction::Store | ArgAction::RecordDefaults)
                && self.value_type == ValueType::Bool)
    }

    pub fn effective_nargs(&self) -> ArgCount {
        if self.is_flag() {
            ArgCount::Exact(0)
        } else {
            self.nargs.unwrap_or(ArgCount::Exact(1))
        }
    }

    pub fn resolves_paths(&self) -> bool {
        self.action.resolves_paths() || self.value_type == ValueType::Path
    }

    pub fn declared_default_bool(&self) -> bool {
        matches!(self.default, Some(Value::Bool(true)))
    }

    pub fn validate(&self) -> FrameworkResult<()> {
        let fail = |detail: String| {
            Err(FrameworkError::config_syntax(
                "CLI.ARGUMENT_SPEC",
                format!("argument '{}': {}", self.name, detail),
            ))
        };

        if self.positional {
            if self.dest.is_some() {
                return fail("positional arguments must not override 'dest'".to_string());
            }
            if self.action.is_flag_action() || self.action.selects_plugin() {
                return fail(format!(
                    "positional arguments cannot use action '{}'",
                    self.action
                ));
            }
        }
        if matches!(self.action, ArgAction::StoreConst | ArgAction::AppendConst)
            && self.const_value.is_none()
        {
            return fail(format!("action '{}' requires 'const'", self.action));
        }
        if self.is_flag() {
            if !matches!(self.nargs, None | Some(ArgCount::Exact(0))) {
                return fail("flag arguments accept no values".to_string());
            }
            if self.choices.is_some() {
                return fail("flag arguments cannot declare 'choices'".to_string());
            }
        } else if matches!(self.nargs, Some(ArgCount::Exact(0))) {
            return fail("nargs 0 is only valid for flag actions".to_string());
        }
        if self.choices.is_some() && self.value_type != ValueType::Str {
            return fail(format!(
                "'choices' requires string values, not '{}'",
                self.value_type.as_str()
            ));
        }
        if self.action.selects_plugin() && self.value_type != ValueType::Str {
            return fail("plugin selectors must take string values".to_string());
        }
        Ok(())
    }
}

/// A titled collection of arguments, used only for help rendering.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ArgGroupSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<ArgSpec>,
}

/// A parser document: the top-level argument list plus help-rendering
/// groups.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ParserSpec {
    #[serde(default)]
    pub prog: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub epilog: String,
    #[serde(default)]
    pub arguments: Vec<ArgSpec>,
    #[serde(default)]
    pub argument_groups: Vec<ArgGroupSpec>,
}

impl ParserSpec {
    /// Every argument descriptor: the flat list first, then each group in
    /// declaration order.
    pub fn flattened(&self) -> Vec<&ArgSpec> {
        self.arguments
            .iter()
            .chain(self.argument_groups.iter().flat_map(|group| group.arguments.iter()))
            .collect()
    }

    pub fn selector_dests(&self) -> Vec<String> {
        self.flattened()
            .into_iter()
            .filter(|arg| arg.action.selects_plugin())
            .map(|arg| arg.dest())
            .collect()
    }

    /// Inserts `extra` immediately after the selector with destination
    /// `dest`, in the flat list and in every group that contains it.
    pub fn splice_after_selector(&mut self, dest: &str, extra: &[ArgSpec]) {
        splice_into(&mut self.arguments, dest, extra);
        for group in &mut self.argument_groups {
            splice_into(&mut group.arguments, dest, extra);
        }
    }

    /// Rewrites the selector's choice set to the known plugin names and
    /// annotates its help text.
    pub fn annotate_selector(&mut self, dest: &str, choices: &[String]) {
        let annotate = |arg: &mut ArgSpec| {
            if arg.dest() != dest {
                return;
            }
            arg.choices = Some(choices.to_vec());
            let note = "the remaining options in this section depend on this choice";
            if arg.help.is_empty() {
                arg.help = note.to_string();
            } else if !arg.help.contains(note) {
                arg.help = format!("{} ({note})", arg.help.trim_end());
            }
        };
        self.arguments.iter_mut().for_each(annotate);
        for group in &mut self.argument_groups {
            group.arguments.iter_mut().for_each(annotate);
        }
    }

    /// Per-argument validation plus the duplicate-destination invariant
    /// over the union of the flat list and all groups.
    pub fn validate(&self) -> FrameworkResult<()> {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for arg in self.flattened() {
            arg.validate()?;
            *seen.entry(arg.dest()).or_insert(0) += 1;
        }
        for (dest, count) in seen {
            if count > 1 {
                return Err(FrameworkError::config_syntax(
                    "CLI.DUPLICATE_DEST",
                    format!("destination '{dest}' is declared {count} times"),
                ));
            }
        }
        Ok(())
    }
}

fn splice_into(arguments: &mut Vec<ArgSpec>, dest: &str, extra: &[ArgSpec]) {
    if let Some(position) = arguments.iter().position(|arg| arg.dest() == dest) {
        arguments.splice(position + 1..position + 1, extra.iter().cloned());
    }
}

/// A subcommand or plugin descriptor: the name under which it is selected,
/// the dotted coordinates of its entry-point callable, and its own parser
/// fragment (inline or in a separate file).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub entry_point: String,
    #[serde(default)]
    pub cli: Option<ParserSpec>,
    #[serde(default)]
    pub cli_file: Option<String>,
}

impl CommandSpec {
    /// Lookup key into the entry-point table.
    pub fn entry_key(&self) -> String {
        format!("{}::{}", self.module, self.entry_point)
    }

    /// The command's parser fragment. An inline `cli` wins over `cli_file`;
    /// declaring both logs a warning. Declaring neither yields an empty
    /// parser.
    pub fn resolved_parser(&self, code_root: &Path) -> FrameworkResult<ParserSpec> {
        if let Some(inline) = &self.cli {
            if self.cli_file.is_some() {
                tracing::warn!(
                    command = %self.name,
                    "both 'cli' and 'cli_file' are declared; using the inline parser"
                );
            }
            return Ok(inline.clone());
        }
        let Some(file) = &self.cli_file else {
            return Ok(ParserSpec::default());
        };
        let path = resolve_path(file, code_root);
        let document = load_json_file(&path)?;
        serde_json::from_value(document).map_err(|source| {
            FrameworkError::config_syntax(
                "CONFIG.PARSER_SPEC",
                format!("{}: {}", path.display(), source),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ArgAction, ArgCount, ArgSpec, CommandSpec, ParserSpec, ValueType, canonical_dest,
    };
    use serde_json::json;

    fn arg_from_json(document: serde_json::Value) -> ArgSpec {
        serde_json::from_value(document).expect("argument document should deserialize")
    }

    #[test]
    fn destination_normalizes_hyphens_and_leading_dashes() {
        assert_eq!(canonical_dest("--output-dir"), "output_dir");
        assert_eq!(canonical_dest("output-dir"), "output_dir");
        assert_eq!(canonical_dest("output_dir"), "output_dir");

        let arg = arg_from_json(json!({"name": "output-dir"}));
        assert_eq!(arg.dest(), "output_dir");
        assert_eq!(arg.long_flag(), "output-dir");
        assert_eq!(arg.flag_alias().as_deref(), Some("output_dir"));

        let plain = arg_from_json(json!({"name": "site"}));
        assert_eq!(plain.flag_alias(), None);
    }

    #[test]
    fn action_and_nargs_spellings_deserialize() {
        let arg = arg_from_json(json!({
            "name": "data-manager",
            "action": "plugin_selector",
            "default": "local"
        }));
        assert_eq!(arg.action, ArgAction::PluginSelector);

        let listy = arg_from_json(json!({"name": "pods", "nargs": "*"}));
        assert_eq!(listy.nargs, Some(ArgCount::ZeroOrMore));

        let exact = arg_from_json(json!({"name": "pair", "nargs": 2}));
        assert_eq!(exact.nargs, Some(ArgCount::Exact(2)));

        let bad: Result<ArgSpec, _> = serde_json::from_value(json!({"name": "x", "nargs": "%"}));
        assert!(bad.is_err());

        let legacy = arg_from_json(json!({"name": "y", "action": "record_defaults"}));
        assert_eq!(legacy.action, ArgAction::RecordDefaults);
        assert!(!legacy.is_flag());
    }

    #[test]
    fn bool_typed_store_is_a_flag() {
        let flag = arg_from_json(json!({"name": "test-mode", "type": "bool", "default": false}));
        assert!(flag.is_flag());
        assert_eq!(flag.effective_nargs(), ArgCount::Exact(0));

        let valued = arg_from_json(json!({"name": "site", "type": "str"}));
        assert!(!valued.is_flag());
        assert_eq!(valued.effective_nargs(), ArgCount::Exact(1));
    }

    #[test]
    fn validation_rejects_malformed_arguments() {
        let positional_dest = arg_from_json(json!({
            "name": "pods", "positional": true, "dest": "other"
        }));
        assert!(positional_dest.validate().is_err());

        let const_missing = arg_from_json(json!({"name": "x", "action": "store_const"}));
        assert!(const_missing.validate().is_err());

        let flag_with_values = arg_from_json(json!({
            "name": "x", "action": "store_true", "nargs": 1
        }));
        assert!(flag_with_values.validate().is_err());

        let typed_choices = arg_from_json(json!({
            "name": "x", "type": "int", "choices": ["1", "2"]
        }));
        assert!(typed_choices.validate().is_err());
    }

    #[test]
    fn duplicate_destinations_across_groups_are_rejected() {
        let spec: ParserSpec = serde_json::from_value(json!({
            "arguments": [{"name": "output-dir"}],
            "argument_groups": [{
                "title": "paths",
                "arguments": [{"name": "output_dir"}]
            }]
        }))
        .expect("parser document should deserialize");

        let error = spec.validate().expect_err("duplicate dest");
        assert_eq!(error.code(), "CLI.DUPLICATE_DEST");
        assert!(error.message().contains("output_dir"));
    }

    #[test]
    fn plugin_arguments_splice_directly_after_the_selector() {
        let mut spec: ParserSpec = serde_json::from_value(json!({
            "arguments": [
                {"name": "before"},
                {"name": "data-manager", "action": "plugin_selector"},
                {"name": "after"}
            ],
            "argument_groups": [{
                "title": "data",
                "arguments": [{"name": "data-manager", "action": "plugin_selector"}]
            }]
        }))
        .expect("parser document should deserialize");

        let extra = vec![ArgSpec::named("bucket")];
        spec.splice_after_selector("data_manager", &extra);

        let flat: Vec<String> = spec.arguments.iter().map(|arg| arg.dest()).collect();
        assert_eq!(flat, vec!["before", "data_manager", "bucket", "after"]);
        let grouped: Vec<String> = spec.argument_groups[0]
            .arguments
            .iter()
            .map(|arg| arg.dest())
            .collect();
        assert_eq!(grouped, vec!["data_manager", "bucket"]);
    }

    #[test]
    fn selector_annotation_rewrites_choices_and_help() {
        let mut spec: ParserSpec = serde_json::from_value(json!({
            "arguments": [{
                "name": "data-manager",
                "action": "plugin_selector",
                "help": "Data source backend"
            }]
        }))
        .expect("parser document should deserialize");

        spec.annotate_selector("data_manager", &["local".to_string(), "gcp".to_string()]);
        let selector = &spec.arguments[0];
        assert_eq!(
            selector.choices.as_deref(),
            Some(&["local".to_string(), "gcp".to_string()][..])
        );
        assert!(selector.help.starts_with("Data source backend ("));
    }

    #[test]
    fn inline_cli_wins_over_cli_file() {
        let spec = CommandSpec {
            name: "info".to_string(),
            cli: Some(ParserSpec {
                arguments: vec![ArgSpec::named("pods")],
                ..ParserSpec::default()
            }),
            cli_file: Some("framework/never_read.jsonc".to_string()),
            ..CommandSpec::default()
        };

        let parser = spec
            .resolved_parser(std::path::Path::new("/nonexistent"))
            .expect("inline parser needs no files");
        assert_eq!(parser.arguments.len(), 1);
        assert_eq!(parser.arguments[0].dest(), "pods");
    }

    #[test]
    fn value_types_deserialize_from_document_spellings() {
        for (spelling, expected) in [
            ("str", ValueType::Str),
            ("int", ValueType::Int),
            ("float", ValueType::Float),
            ("bool", ValueType::Bool),
            ("path", ValueType::Path),
        ] {
            let arg = arg_from_json(json!({"name": "x", "type": spelling}));
            assert_eq!(arg.value_type, expected, "spelling '{spelling}'");
        }
    }
}
