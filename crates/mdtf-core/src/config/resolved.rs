use serde_json::Value;
use std::collections::BTreeMap;

/// A plugin selector's resolved target: the chosen plugin plus the
/// entry-point coordinates from its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginBinding {
    pub plugin: String,
    pub module: String,
    pub entry_point: String,
}

impl PluginBinding {
    pub fn entry_key(&self) -> String {
        format!("{}::{}", self.module, self.entry_point)
    }
}

/// The output of a successful parse: one value per declared argument, the
/// parallel came-from-a-default map, and the bindings resolved for plugin
/// selectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConfig {
    values: BTreeMap<String, Value>,
    from_default: BTreeMap<String, bool>,
    plugin_bindings: BTreeMap<String, PluginBinding>,
}

impl ResolvedConfig {
    pub fn insert(&mut self, dest: impl Into<String>, value: Value, is_default: bool) {
        let dest = dest.into();
        self.from_default.insert(dest.clone(), is_default);
        self.values.insert(dest, value);
    }

    pub fn bind_plugin(&mut self, dest: impl Into<String>, binding: PluginBinding) {
        self.plugin_bindings.insert(dest.into(), binding);
    }

    pub fn get(&self, dest: &str) -> Option<&Value> {
        self.values.get(dest)
    }

    pub fn get_str(&self, dest: &str) -> Option<&str> {
        self.values.get(dest).and_then(Value::as_str)
    }

    pub fn get_bool(&self, dest: &str) -> bool {
        self.values.get(dest).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_i64(&self, dest: &str) -> Option<i64> {
        self.values.get(dest).and_then(Value::as_i64)
    }

    /// String list view of a value: a string array as-is, a lone string as
    /// a one-element list, anything else empty.
    pub fn get_str_list(&self, dest: &str) -> Vec<String> {
        match self.values.get(dest) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }

    /// Whether the value came from a defaults tier or the parser-declared
    /// default rather than an explicit command-line token.
    pub fn is_default(&self, dest: &str) -> Option<bool> {
        self.from_default.get(dest).copied()
    }

    pub fn plugin_binding(&self, dest: &str) -> Option<&PluginBinding> {
        self.plugin_bindings.get(dest)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn contains(&self, dest: &str) -> bool {
        self.values.contains_key(dest)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{PluginBinding, ResolvedConfig};
    use serde_json::json;

    #[test]
    fn values_and_provenance_stay_parallel() {
        let mut config = ResolvedConfig::default();
        config.insert("output_dir", json!("/d"), false);
        config.insert("verbose", json!(0), true);

        assert_eq!(config.get_str("output_dir"), Some("/d"));
        assert_eq!(config.is_default("output_dir"), Some(false));
        assert_eq!(config.is_default("verbose"), Some(true));
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn list_view_unwraps_strings_and_arrays() {
        let mut config = ResolvedConfig::default();
        config.insert("pods", json!(["example_tas", "example_precip"]), true);
        config.insert("single", json!("one"), true);
        config.insert("other", json!(7), true);

        assert_eq!(config.get_str_list("pods").len(), 2);
        assert_eq!(config.get_str_list("single"), vec!["one".to_string()]);
        assert!(config.get_str_list("other").is_empty());
        assert!(config.get_str_list("absent").is_empty());
    }

    #[test]
    fn plugin_bindings_expose_entry_keys() {
        let mut config = ResolvedConfig::default();
        config.bind_plugin(
            "data_manager",
            PluginBinding {
                plugin: "local".to_string(),
                module: "mdtf_cli.plugins.local".to_string(),
                entry_point: "configure".to_string(),
            },
        );

        let binding = config.plugin_binding("data_manager").expect("bound selector");
        assert_eq!(binding.entry_key(), "mdtf_cli.plugins.local::configure");
        assert!(config.plugin_binding("environment_manager").is_none());
    }
}
