//! Field schema.
//!
//! The set of known configuration keys and their value kinds is declared
//! once at startup. Every update entering the engine, local or remote,
//! is checked against it.

use crate::error::{ConfigError, SyncError, SyncResult};
use cfgsync_protocol::{FieldUpdate, FieldValue};
use std::collections::BTreeMap;
use std::fmt;

/// Declared kind of a configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A toggle.
    Bool,
    /// A numeric input.
    Number,
    /// Free text.
    Text,
    /// Text restricted to a fixed list of options.
    Select(Vec<String>),
}

impl FieldKind {
    /// Returns true if `value` is acceptable for this kind.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (FieldKind::Bool, FieldValue::Bool(_)) => true,
            (FieldKind::Number, FieldValue::Number(_)) => true,
            (FieldKind::Text, FieldValue::Text(_)) => true,
            (FieldKind::Select(options), FieldValue::Text(s)) => options.iter().any(|o| o == s),
            _ => false,
        }
    }

    /// Short name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Number => "number",
            FieldKind::Text => "text",
            FieldKind::Select(_) => "select",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a form control reports when the user changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValue {
    /// Checkbox state.
    Checked(bool),
    /// Text of an input or the selected option.
    Text(String),
}

/// A raw change event from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInput {
    /// Field name.
    pub name: String,
    /// Reported value.
    pub value: InputValue,
}

impl RawInput {
    /// A checkbox change.
    pub fn checkbox(name: impl Into<String>, checked: bool) -> Self {
        Self {
            name: name.into(),
            value: InputValue::Checked(checked),
        }
    }

    /// A text input or select change.
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: InputValue::Text(text.into()),
        }
    }
}

/// The set of known fields and their kinds.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: BTreeMap<String, FieldKind>,
}

impl FieldRegistry {
    /// Starts declaring a registry.
    pub fn builder() -> FieldRegistryBuilder {
        FieldRegistryBuilder::default()
    }

    /// Returns the kind of `name`.
    pub fn kind(&self, name: &str) -> Option<&FieldKind> {
        self.fields.get(name)
    }

    /// Returns true if `name` is a known field.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates the field names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds a checked update for `name`.
    pub fn resolve(
        &self,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<FieldUpdate, ConfigError> {
        let update = FieldUpdate::new(name, value);
        self.check(&update)?;
        Ok(update)
    }

    /// Checks that `update` names a known field with a value of its kind.
    pub fn check(&self, update: &FieldUpdate) -> Result<(), ConfigError> {
        let kind = self
            .kind(&update.name)
            .ok_or_else(|| ConfigError::UnknownField(update.name.clone()))?;

        if kind.accepts(&update.value) {
            return Ok(());
        }

        match (kind, &update.value) {
            (FieldKind::Select(_), FieldValue::Text(s)) => Err(ConfigError::InvalidOption {
                name: update.name.clone(),
                value: s.clone(),
            }),
            _ => Err(ConfigError::TypeMismatch {
                name: update.name.clone(),
                expected: kind.name().to_string(),
                found: update.value.type_name().to_string(),
            }),
        }
    }

    /// Converts a raw control change into a checked update.
    pub fn normalize(&self, raw: &RawInput) -> SyncResult<FieldUpdate> {
        let kind = self
            .kind(&raw.name)
            .ok_or_else(|| SyncError::invalid_input(&raw.name, "unknown field"))?;

        let value = match (kind, &raw.value) {
            (FieldKind::Bool, InputValue::Checked(b)) => FieldValue::Bool(*b),
            (FieldKind::Bool, InputValue::Text(text)) => match text.trim() {
                "true" => FieldValue::Bool(true),
                "false" => FieldValue::Bool(false),
                other => {
                    return Err(SyncError::invalid_input(
                        &raw.name,
                        format!("{other:?} is not a boolean"),
                    ))
                }
            },
            (FieldKind::Number, InputValue::Text(text)) => {
                let n = text.trim().parse::<f64>().map_err(|_| {
                    SyncError::invalid_input(&raw.name, format!("{text:?} is not a number"))
                })?;
                if !n.is_finite() {
                    return Err(SyncError::invalid_input(&raw.name, "number is not finite"));
                }
                FieldValue::Number(n)
            }
            (FieldKind::Select(options), InputValue::Text(text)) => {
                if !options.iter().any(|o| o == text) {
                    return Err(SyncError::invalid_input(
                        &raw.name,
                        format!("{text:?} is not an option"),
                    ));
                }
                FieldValue::Text(text.clone())
            }
            (FieldKind::Text, InputValue::Text(text)) => FieldValue::Text(text.clone()),
            (kind, InputValue::Checked(_)) => {
                return Err(SyncError::invalid_input(
                    &raw.name,
                    format!("{kind} field is not a checkbox"),
                ))
            }
        };

        Ok(FieldUpdate {
            name: raw.name.clone(),
            value,
        })
    }
}

/// Builder for [`FieldRegistry`].
///
/// Declaring a name twice keeps the last kind.
#[derive(Debug, Default)]
pub struct FieldRegistryBuilder {
    fields: BTreeMap<String, FieldKind>,
}

impl FieldRegistryBuilder {
    /// Declares a toggle.
    pub fn bool(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Bool)
    }

    /// Declares a numeric field.
    pub fn number(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Number)
    }

    /// Declares a free text field.
    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Text)
    }

    /// Declares a select field with its options.
    pub fn select<I, S>(self, name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = options.into_iter().map(Into::into).collect();
        self.field(name, FieldKind::Select(options))
    }

    /// Declares a field of any kind.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    /// Finishes the registry.
    pub fn build(self) -> FieldRegistry {
        FieldRegistry {
            fields: self.fields,
        }
    }
}
