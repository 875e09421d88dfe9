use crate::cli::spec::canonical_dest;
use crate::domain::{FrameworkError, FrameworkResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// The three defaults tiers, highest precedence first. All of them are
/// beaten by explicit command-line values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultsTier {
    User,
    Site,
    Global,
}

impl DefaultsTier {
    pub const PRECEDENCE: [Self; 3] = [Self::User, Self::Site, Self::Global];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Site => "SITE",
            Self::Global => "GLOBAL",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultsRegistry {
    user: BTreeMap<String, Value>,
    site: BTreeMap<String, Value>,
    global: BTreeMap<String, Value>,
}

impl DefaultsRegistry {
    /// Replaces a tier with the key/value pairs of `document`. Keys are
    /// canonicalized and keys mapped to the empty string are dropped
    /// before they can participate in the merge.
    pub fn load_tier(&mut self, tier: DefaultsTier, document: &Value) -> FrameworkResult<()> {
        let object = document.as_object().ok_or_else(|| {
            FrameworkError::config_syntax(
                "CONFIG.DEFAULTS",
                format!(
                    "{} defaults document must be a JSON object",
                    tier.as_str()
                ),
            )
        })?;

        let mut loaded = BTreeMap::new();
        for (key, value) in object {
            if value.as_str() == Some("") {
                tracing::debug!(key = %key, tier = tier.as_str(), "dropping empty-string default");
                continue;
            }
            loaded.insert(canonical_dest(key), value.clone());
        }
        *self.slot_mut(tier) = loaded;
        Ok(())
    }

    pub fn tier(&self, tier: DefaultsTier) -> &BTreeMap<String, Value> {
        match tier {
            DefaultsTier::User => &self.user,
            DefaultsTier::Site => &self.site,
            DefaultsTier::Global => &self.global,
        }
    }

    /// Highest-precedence tier value for `dest`: USER beats SITE beats
    /// GLOBAL.
    pub fn lookup(&self, dest: &str) -> Option<(&Value, DefaultsTier)> {
        DefaultsTier::PRECEDENCE
            .into_iter()
            .find_map(|tier| self.tier(tier).get(dest).map(|value| (value, tier)))
    }

    fn slot_mut(&mut self, tier: DefaultsTier) -> &mut BTreeMap<String, Value> {
        match tier {
            DefaultsTier::User => &mut self.user,
            DefaultsTier::Site => &mut self.site,
            DefaultsTier::Global => &mut self.global,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DefaultsRegistry, DefaultsTier};
    use serde_json::json;

    #[test]
    fn lookup_follows_user_site_global_precedence() {
        let mut defaults = DefaultsRegistry::default();
        defaults
            .load_tier(DefaultsTier::Global, &json!({"output_dir": "/a", "site": "local"}))
            .expect("global tier");
        defaults
            .load_tier(DefaultsTier::Site, &json!({"output_dir": "/b"}))
            .expect("site tier");
        defaults
            .load_tier(DefaultsTier::User, &json!({"output_dir": "/c"}))
            .expect("user tier");

        let (value, tier) = defaults.lookup("output_dir").expect("present value");
        assert_eq!(value, &json!("/c"));
        assert_eq!(tier, DefaultsTier::User);

        let (site_value, site_tier) = defaults.lookup("site").expect("global fallback");
        assert_eq!(site_value, &json!("local"));
        assert_eq!(site_tier, DefaultsTier::Global);
    }

    #[test]
    fn empty_string_values_are_dropped_and_keys_canonicalized() {
        let mut defaults = DefaultsRegistry::default();
        defaults
            .load_tier(
                DefaultsTier::User,
                &json!({"output-dir": "/from/file", "verbose": ""}),
            )
            .expect("user tier");

        assert_eq!(
            defaults.tier(DefaultsTier::User).get("output_dir"),
            Some(&json!("/from/file"))
        );
        assert!(defaults.lookup("verbose").is_none());
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let mut defaults = DefaultsRegistry::default();
        let error = defaults
            .load_tier(DefaultsTier::Global, &json!(["not", "an", "object"]))
            .expect_err("arrays are not defaults documents");
        assert_eq!(error.code(), "CONFIG.DEFAULTS");
    }
}
