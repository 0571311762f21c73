//! Multi-field update batches and full configuration snapshots.

use crate::error::{CodecError, CodecResult};
use crate::value::{FieldUpdate, FieldValue};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An ordered list of field updates.
///
/// On the wire a batch is a JSON object `{name: value, ...}`. Unlike a
/// plain map, the batch keeps the order in which the fields were written,
/// so a receiver applies them in the order the sender produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    updates: Vec<FieldUpdate>,
}

impl UpdateBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a batch holding one update.
    pub fn single(update: FieldUpdate) -> Self {
        Self {
            updates: vec![update],
        }
    }

    /// Appends an update.
    pub fn push(&mut self, update: FieldUpdate) {
        self.updates.push(update);
    }

    /// Returns the number of updates.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Returns true if the batch holds no updates.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Returns the last value written to `name` in this batch.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.updates
            .iter()
            .rev()
            .find(|u| u.name == name)
            .map(|u| &u.value)
    }

    /// Iterates the updates in write order.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldUpdate> {
        self.updates.iter()
    }

    /// Returns the updates as a slice.
    pub fn as_slice(&self) -> &[FieldUpdate] {
        &self.updates
    }

    /// Encodes to a JSON string.
    pub fn encode(&self) -> CodecResult<String> {
        serde_json::to_string(self).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

impl From<FieldUpdate> for UpdateBatch {
    fn from(update: FieldUpdate) -> Self {
        Self::single(update)
    }
}

impl FromIterator<FieldUpdate> for UpdateBatch {
    fn from_iter<I: IntoIterator<Item = FieldUpdate>>(iter: I) -> Self {
        Self {
            updates: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for UpdateBatch {
    type Item = FieldUpdate;
    type IntoIter = std::vec::IntoIter<FieldUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}

impl<'a> IntoIterator for &'a UpdateBatch {
    type Item = &'a FieldUpdate;
    type IntoIter = std::slice::Iter<'a, FieldUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.iter()
    }
}

impl Serialize for UpdateBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.updates.len()))?;
        for update in &self.updates {
            map.serialize_entry(&update.name, &update.value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for UpdateBatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BatchVisitor;

        impl<'de> Visitor<'de> for BatchVisitor {
            type Value = UpdateBatch;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut updates = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, FieldValue>()? {
                    updates.push(FieldUpdate { name, value });
                }
                Ok(UpdateBatch { updates })
            }
        }

        deserializer.deserialize_map(BatchVisitor)
    }
}

/// The full current configuration as returned by a read.
///
/// Entries that are not representable as a [`FieldValue`] (null, arrays,
/// nested objects) are kept so the snapshot round-trips, but are skipped
/// by [`ConfigSnapshot::fields`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSnapshot {
    entries: serde_json::Map<String, serde_json::Value>,
}

impl ConfigSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `name` if present and representable.
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.entries.get(name).and_then(FieldValue::from_json)
    }

    /// Returns the raw JSON entry for `name`.
    pub fn get_raw(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(name)
    }

    /// Returns true if the snapshot has an entry for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Sets the value of `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.entries.insert(name.into(), value.to_json());
    }

    /// Writes every update of the batch into the snapshot.
    pub fn apply_batch(&mut self, batch: &UpdateBatch) {
        for update in batch {
            self.insert(update.name.clone(), update.value.clone());
        }
    }

    /// Iterates the representable entries.
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldValue)> + '_ {
        self.entries
            .iter()
            .filter_map(|(name, raw)| FieldValue::from_json(raw).map(|v| (name.as_str(), v)))
    }

    /// Returns the number of entries, representable or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    /// Decodes from JSON bytes. The top level must be an object.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        match value {
            serde_json::Value::Object(entries) => Ok(Self { entries }),
            other => Err(CodecError::invalid_structure(format!(
                "expected object, got {other}"
            ))),
        }
    }
}

impl FromIterator<(String, FieldValue)> for ConfigSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (name, value) in iter {
            snapshot.insert(name, value);
        }
        snapshot
    }
}
