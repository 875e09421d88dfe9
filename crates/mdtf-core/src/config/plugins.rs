use crate::cli::spec::{CommandSpec, canonical_dest};
use serde::Deserialize;
use std::collections::BTreeMap;

/// One selector's entry in a plugin registry document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginTableSpec {
    pub dest: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub choices: Vec<CommandSpec>,
}

/// The merged choice table for one plugin selector. Choices keep their
/// declaration order so "the first available choice" is well defined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginTable {
    pub default: Option<String>,
    pub choices: Vec<CommandSpec>,
}

static EMPTY_TABLE: PluginTable = PluginTable {
    default: None,
    choices: Vec::new(),
};

impl PluginTable {
    pub fn find(&self, name: &str) -> Option<&CommandSpec> {
        self.choices.iter().find(|choice| choice.name == name)
    }

    pub fn first(&self) -> Option<&CommandSpec> {
        self.choices.first()
    }

    pub fn choice_names(&self) -> Vec<String> {
        self.choices.iter().map(|choice| choice.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

/// Mapping from plugin-selector destination to its choice table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginRegistry {
    selectors: BTreeMap<String, PluginTable>,
}

impl PluginRegistry {
    /// Folds a registry document in. Within one selector, `default` is
    /// overwritten when the document provides one and choices are
    /// list-appended, with a same-named later choice replacing the earlier
    /// one. Calling this first for the framework document and then for the
    /// site document gives the site both override and extend power.
    pub fn merge_document(&mut self, entries: Vec<PluginTableSpec>) {
        for entry in entries {
            let table = self.selectors.entry(canonical_dest(&entry.dest)).or_default();
            if entry.default.is_some() {
                table.default = entry.default;
            }
            for choice in entry.choices {
                if let Some(position) =
                    table.choices.iter().position(|existing| existing.name == choice.name)
                {
                    table.choices[position] = choice;
                } else {
                    table.choices.push(choice);
                }
            }
        }
    }

    /// Enforces the default-within-choices invariant: a default naming an
    /// unknown choice is rewritten to the first available choice with a
    /// warning.
    pub fn finalize(&mut self) {
        for (dest, table) in &mut self.selectors {
            let Some(default) = table.default.clone() else {
                continue;
            };
            if table.find(&default).is_some() {
                continue;
            }
            match table.first() {
                Some(first) => {
                    tracing::warn!(
                        selector = %dest,
                        requested = %default,
                        substituted = %first.name,
                        "plugin default is not among the available choices; substituting"
                    );
                    table.default = Some(first.name.clone());
                }
                None => {
                    tracing::warn!(
                        selector = %dest,
                        requested = %default,
                        "plugin default declared for a selector with no choices"
                    );
                    table.default = None;
                }
            }
        }
    }

    pub fn selector_dests(&self) -> Vec<String> {
        self.selectors.keys().cloned().collect()
    }

    /// Quiet lookup used by the assembly pipeline.
    pub fn table(&self, dest: &str) -> Option<&PluginTable> {
        self.selectors.get(dest)
    }

    /// The whole choice table for a selector. An unknown selector logs an
    /// error and yields an empty table; it never fails.
    pub fn get_plugin(&self, dest: &str) -> &PluginTable {
        match self.selectors.get(dest) {
            Some(table) => table,
            None => {
                tracing::error!(selector = %dest, "unknown plugin selector");
                &EMPTY_TABLE
            }
        }
    }

    /// A single plugin descriptor. Unknown selectors and unknown choices
    /// log an error and yield nothing; it never fails.
    pub fn get_plugin_choice(&self, dest: &str, choice: &str) -> Option<&CommandSpec> {
        let table = self.get_plugin(dest);
        let found = table.find(choice);
        if found.is_none() && !table.is_empty() {
            tracing::error!(
                selector = %dest,
                choice = %choice,
                "unknown plugin choice"
            );
        }
        found
    }
}
