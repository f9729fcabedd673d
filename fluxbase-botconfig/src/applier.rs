//! `ConfigApplier` — diffs a freshly parsed [`ChatbotConfig`] against a
//! previously stored one, for the sync path a bot's lifecycle implies: a
//! module is re-parsed on every deploy, and only the fields that actually
//! changed should trigger downstream invalidation (cached settings,
//! derived scopes, the retrieval plan).

use crate::types::ChatbotConfig;
use serde_json::Value;

/// Field-level diff between two configs, keyed by the `ChatbotConfig`
/// field name as it serializes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDiff {
    /// Fields present in the new config but absent from the old one. Only
    /// possible when diffing against a config produced by an older schema.
    pub added: Vec<String>,
    /// Fields present in both whose values differ.
    pub changed: Vec<String>,
    /// Fields present in the old config but absent from the new one.
    pub removed: Vec<String>,
}

impl ConfigDiff {
    /// Whether anything changed at all.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Computes [`ConfigDiff`]s between chatbot config versions.
pub struct ConfigApplier;

impl ConfigApplier {
    /// Diff `next` against `previous`. `previous: None` treats every field
    /// of `next` as added.
    pub fn diff(previous: Option<&ChatbotConfig>, next: &ChatbotConfig) -> ConfigDiff {
        let next_obj = as_object(next);
        let prev_obj = previous.map(as_object).unwrap_or_default();

        let mut added = Vec::new();
        let mut changed = Vec::new();
        for (key, next_val) in &next_obj {
            match prev_obj.get(key) {
                None => added.push(key.clone()),
                Some(prev_val) if prev_val != next_val => changed.push(key.clone()),
                Some(_) => {}
            }
        }

        let mut removed: Vec<String> = prev_obj
            .keys()
            .filter(|key| !next_obj.contains_key(*key))
            .cloned()
            .collect();

        added.sort();
        changed.sort();
        removed.sort();
        ConfigDiff { added, changed, removed }
    }
}

fn as_object(config: &ChatbotConfig) -> serde_json::Map<String, Value> {
    serde_json::to_value(config)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ChatbotConfig {
        ChatbotConfig {
            name: "support".to_string(),
            system_prompt: "hi".to_string(),
            max_tokens: Some(1024),
            ..ChatbotConfig::default()
        }
    }

    #[test]
    fn no_previous_means_every_field_is_added() {
        let next = base();
        let diff = ConfigApplier::diff(None, &next);
        assert!(diff.added.contains(&"name".to_string()));
        assert!(diff.changed.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn identical_configs_produce_an_empty_diff() {
        let config = base();
        let diff = ConfigApplier::diff(Some(&config), &config);
        assert!(diff.is_empty());
    }

    #[test]
    fn changed_field_is_reported() {
        let old = base();
        let mut new = old.clone();
        new.max_tokens = Some(2048);
        let diff = ConfigApplier::diff(Some(&old), &new);
        assert_eq!(diff.changed, vec!["max_tokens".to_string()]);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn unrelated_fields_do_not_appear_in_diff() {
        let old = base();
        let mut new = old.clone();
        new.temperature = old.temperature;
        let diff = ConfigApplier::diff(Some(&old), &new);
        assert!(diff.is_empty());
    }
}
