//! Local mirror of the configuration.

use crate::registry::FieldRegistry;
use cfgsync_protocol::{ConfigSnapshot, FieldUpdate, FieldValue};
use std::collections::BTreeMap;
use tracing::debug;

/// Field values as currently displayed and persisted.
///
/// Only the engine mutates the store, and only after an update has been
/// applied locally or confirmed remotely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldStore {
    values: BTreeMap<String, FieldValue>,
}

impl FieldStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Returns true if `name` holds `Bool(true)`.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(FieldValue::is_enabled)
    }

    /// Returns the text of `name`, or the empty string.
    pub fn text(&self, name: &str) -> &str {
        self.get(name).and_then(FieldValue::as_text).unwrap_or("")
    }

    /// Overwrites `name` and returns the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.values.insert(name.into(), value)
    }

    /// Applies an update. Returns true if the stored value changed.
    pub fn apply(&mut self, update: &FieldUpdate) -> bool {
        if self.values.get(&update.name) == Some(&update.value) {
            return false;
        }
        self.values.insert(update.name.clone(), update.value.clone());
        true
    }

    /// Loads every known, well-typed field of `snapshot`.
    ///
    /// Returns the updates that were applied, in snapshot order.
    pub fn seed(&mut self, snapshot: &ConfigSnapshot, registry: &FieldRegistry) -> Vec<FieldUpdate> {
        let mut applied = Vec::new();
        for (name, value) in snapshot.fields() {
            let update = FieldUpdate::new(name, value);
            if let Err(err) = registry.check(&update) {
                debug!(field = name, error = %err, "skipping snapshot field");
                continue;
            }
            self.set(update.name.clone(), update.value.clone());
            applied.push(update);
        }
        applied
    }

    /// Returns the contents as a snapshot.
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of stored fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn set_returns_previous() {
        let mut store = FieldStore::new();
        assert_eq!(store.set("diff", FieldValue::Bool(true)), None);
        assert_eq!(
            store.set("diff", FieldValue::Bool(false)),
            Some(FieldValue::Bool(true))
        );
        assert!(!store.is_enabled("diff"));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut store = FieldStore::new();
        let update = FieldUpdate::new("editor", "dword");

        assert!(store.apply(&update));
        let after_first = store.clone();
        assert!(!store.apply(&update));
        assert_eq!(store, after_first);
    }

    #[test]
    fn seed_skips_unknown_and_mistyped() {
        let registry = FieldRegistry::builder().bool("diff").number("port").build();
        let snapshot = ConfigSnapshot::decode(
            br#"{"diff":true,"port":"eighty","colour":"red","extra":[1]}"#,
        )
        .unwrap();

        let mut store = FieldStore::new();
        let applied = store.seed(&snapshot, &registry);

        assert_eq!(applied, vec![FieldUpdate::new("diff", true)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("port"), None);
        assert_eq!(store.get("colour"), None);
    }

    #[test]
    fn snapshot_reflects_store() {
        let mut store = FieldStore::new();
        store.apply(&FieldUpdate::new("username", "root"));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.get("username"), Some(FieldValue::from("root")));
        assert_eq!(store.text("username"), "root");
        assert_eq!(store.text("password"), "");
    }

    fn value_strategy() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<bool>().prop_map(FieldValue::Bool),
            (-1.0e6..1.0e6f64).prop_map(FieldValue::Number),
            "[a-z]{0,8}".prop_map(FieldValue::Text),
        ]
    }

    proptest! {
        #[test]
        fn applying_twice_equals_applying_once(
            seed in proptest::collection::vec(("[a-d]", value_strategy()), 0..8),
            name in "[a-d]",
            value in value_strategy(),
        ) {
            let mut store = FieldStore::new();
            for (n, v) in seed {
                store.set(n, v);
            }
            let update = FieldUpdate::new(name, value);

            store.apply(&update);
            let once = store.clone();
            let changed = store.apply(&update);

            prop_assert!(!changed);
            prop_assert_eq!(store, once);
        }
    }
}
