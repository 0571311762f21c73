//! Cross-field dependency rules.
//!
//! Rules are declared at startup, validated against the [`FieldRegistry`],
//! and then evaluated for every local batch before it is applied. Each
//! rule sees a projected view: the store as it was before the batch,
//! overlaid with the batch's values.
//!
//! Forced corrections are applied directly. They are never fed back into
//! the rules, so forcing is one level deep.

use crate::error::ConfigError;
use crate::registry::{FieldKind, FieldRegistry};
use crate::store::FieldStore;
use cfgsync_protocol::{FieldUpdate, FieldValue, UpdateBatch};
use tracing::debug;

/// Predicate on the trigger value of a conditional rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The trigger is `Bool(true)`.
    IsTrue,
    /// The trigger is anything but `Bool(true)`.
    IsFalse,
    /// The trigger equals the given value.
    Is(FieldValue),
}

impl Condition {
    fn matches(&self, value: Option<&FieldValue>) -> bool {
        match self {
            Condition::IsTrue => value.is_some_and(FieldValue::is_enabled),
            Condition::IsFalse => !value.is_some_and(FieldValue::is_enabled),
            Condition::Is(expected) => value == Some(expected),
        }
    }
}

/// What a conditional rule does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    /// Only warn.
    Warn,
    /// Warn and force every affected field to the value.
    Force(FieldValue),
}

/// A UI state change that is not a value change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEffect {
    /// Enable or disable the control of a field.
    SetEnabled {
        /// Field name.
        name: String,
        /// Whether the control accepts input.
        enabled: bool,
    },
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// Nothing to report.
    Accept,
    /// A warning, with corrections to apply.
    Warn {
        /// Message for the user.
        message: String,
        /// Synthesized corrections.
        forced: Vec<FieldUpdate>,
    },
}

/// A cross-field rule.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyRule {
    /// Dependents only work while the base toggle is on.
    ///
    /// Turning the base off, or turning a dependent on without it, warns
    /// and turns every enabled dependent off.
    Group {
        /// Base toggle.
        base: String,
        /// Dependent toggles.
        dependents: Vec<String>,
    },
    /// Enabling `field` requires `requires`; the latter is forced on.
    Requires {
        /// Dependent toggle.
        field: String,
        /// Toggle it depends on.
        requires: String,
    },
    /// The gate toggle enables or disables the dependents' controls.
    Gate {
        /// Gate toggle.
        gate: String,
        /// Gated fields.
        dependents: Vec<String>,
    },
    /// Generic trigger, condition and action.
    Conditional {
        /// Field whose change is watched.
        trigger: String,
        /// When the rule fires.
        condition: Condition,
        /// Fields acted upon.
        affected: Vec<String>,
        /// What to do.
        action: RuleAction,
        /// Warning text.
        message: String,
    },
}

impl DependencyRule {
    /// A group rule.
    pub fn group<I, S>(base: impl Into<String>, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Group {
            base: base.into(),
            dependents: dependents.into_iter().map(Into::into).collect(),
        }
    }

    /// A single dependency rule.
    pub fn requires(field: impl Into<String>, requires: impl Into<String>) -> Self {
        Self::Requires {
            field: field.into(),
            requires: requires.into(),
        }
    }

    /// A gated-field rule.
    pub fn gate<I, S>(gate: impl Into<String>, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Gate {
            gate: gate.into(),
            dependents: dependents.into_iter().map(Into::into).collect(),
        }
    }

    /// A conditional rule.
    pub fn conditional<I, S>(
        trigger: impl Into<String>,
        condition: Condition,
        affected: I,
        action: RuleAction,
        message: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Conditional {
            trigger: trigger.into(),
            condition,
            affected: affected.into_iter().map(Into::into).collect(),
            action,
            message: message.into(),
        }
    }

    /// Name of the field that triggers this rule.
    pub fn trigger(&self) -> &str {
        match self {
            DependencyRule::Group { base, .. } => base,
            DependencyRule::Requires { field, .. } => field,
            DependencyRule::Gate { gate, .. } => gate,
            DependencyRule::Conditional { trigger, .. } => trigger,
        }
    }

    fn validate(&self, registry: &FieldRegistry) -> Result<(), ConfigError> {
        let rule = self.trigger();
        match self {
            DependencyRule::Group { base, dependents } => {
                require_toggle(registry, rule, base)?;
                for name in dependents {
                    require_toggle(registry, rule, name)?;
                }
            }
            DependencyRule::Requires { field, requires } => {
                require_toggle(registry, rule, field)?;
                require_toggle(registry, rule, requires)?;
            }
            DependencyRule::Gate { gate, dependents } => {
                require_toggle(registry, rule, gate)?;
                for name in dependents {
                    require_known(registry, name)?;
                }
            }
            DependencyRule::Conditional {
                trigger,
                condition,
                affected,
                action,
                ..
            } => {
                match condition {
                    Condition::IsTrue | Condition::IsFalse => {
                        require_toggle(registry, rule, trigger)?;
                    }
                    Condition::Is(value) => {
                        registry.check(&FieldUpdate::new(trigger.clone(), value.clone()))?;
                    }
                }
                for name in affected {
                    match action {
                        RuleAction::Warn => {
                            require_known(registry, name)?;
                        }
                        RuleAction::Force(value) => {
                            registry.check(&FieldUpdate::new(name.clone(), value.clone()))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluates the rule against a projected view.
    pub fn evaluate(&self, store: &FieldStore, batch: &UpdateBatch) -> RuleOutcome {
        let view = Projection { store, batch };
        match self {
            DependencyRule::Group { base, dependents } => {
                let touched = view.touches(base) || dependents.iter().any(|d| view.touches(d));
                if !touched || view.is_enabled(base) {
                    return RuleOutcome::Accept;
                }
                let enabled: Vec<&str> = dependents
                    .iter()
                    .filter(|d| view.is_enabled(d))
                    .map(String::as_str)
                    .collect();
                if enabled.is_empty() {
                    return RuleOutcome::Accept;
                }
                let verb = if enabled.len() == 1 { "does" } else { "do" };
                RuleOutcome::Warn {
                    message: format!("{} {verb} not work without {base}", join_names(&enabled)),
                    forced: enabled
                        .iter()
                        .map(|name| FieldUpdate::new(*name, false))
                        .collect(),
                }
            }
            DependencyRule::Requires { field, requires } => {
                if !view.touches(field) || !view.is_enabled(field) || view.is_enabled(requires) {
                    return RuleOutcome::Accept;
                }
                RuleOutcome::Warn {
                    message: format!("{field} depends on {requires}"),
                    forced: vec![FieldUpdate::new(requires.clone(), true)],
                }
            }
            DependencyRule::Gate { .. } => RuleOutcome::Accept,
            DependencyRule::Conditional {
                trigger,
                condition,
                affected,
                action,
                message,
            } => {
                if !view.touches(trigger) || !condition.matches(view.get(trigger)) {
                    return RuleOutcome::Accept;
                }
                let forced = match action {
                    RuleAction::Warn => Vec::new(),
                    RuleAction::Force(value) => affected
                        .iter()
                        .filter(|name| view.get(name) != Some(value))
                        .map(|name| FieldUpdate::new(name.clone(), value.clone()))
                        .collect(),
                };
                RuleOutcome::Warn {
                    message: message.clone(),
                    forced,
                }
            }
        }
    }

    fn effects(&self, store: &FieldStore, batch: &UpdateBatch) -> Vec<UiEffect> {
        let view = Projection { store, batch };
        match self {
            DependencyRule::Gate { gate, dependents } if view.touches(gate) => {
                set_enabled(dependents, view.is_enabled(gate))
            }
            _ => Vec::new(),
        }
    }
}

/// Aggregate result of evaluating every rule against a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// The updates of the batch, in input order.
    pub originals: Vec<FieldUpdate>,
    /// Corrections synthesized by rules, first value per field.
    pub forced: Vec<FieldUpdate>,
    /// Warnings, in rule order.
    pub warnings: Vec<String>,
    /// UI state changes.
    pub effects: Vec<UiEffect>,
}

impl Evaluation {
    /// Every update to apply: originals first, then forced ones.
    pub fn accepted(&self) -> impl Iterator<Item = &FieldUpdate> {
        self.originals.iter().chain(self.forced.iter())
    }

    /// Returns true if any rule warned.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// The validated, immutable rule set.
#[derive(Debug, Clone, Default)]
pub struct DependencyRules {
    rules: Vec<DependencyRule>,
}

impl DependencyRules {
    /// Validates `rules` against `registry`.
    pub fn new(
        registry: &FieldRegistry,
        rules: impl IntoIterator<Item = DependencyRule>,
    ) -> Result<Self, ConfigError> {
        let rules: Vec<_> = rules.into_iter().collect();
        for rule in &rules {
            rule.validate(registry)?;
        }
        Ok(Self { rules })
    }

    /// The rules in declaration order.
    pub fn rules(&self) -> &[DependencyRule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates every rule against `batch` applied on top of `store`.
    pub fn evaluate(&self, store: &FieldStore, batch: &UpdateBatch) -> Evaluation {
        let mut evaluation = Evaluation {
            originals: batch.iter().cloned().collect(),
            ..Evaluation::default()
        };

        for rule in &self.rules {
            evaluation.effects.extend(rule.effects(store, batch));

            if let RuleOutcome::Warn { message, forced } = rule.evaluate(store, batch) {
                debug!(rule = rule.trigger(), %message, forced = forced.len(), "rule fired");
                evaluation.warnings.push(message);
                for update in forced {
                    if !evaluation.forced.iter().any(|f| f.name == update.name) {
                        evaluation.forced.push(update);
                    }
                }
            }
        }

        evaluation
    }

    /// Control states implied by the gates, for a freshly seeded store.
    pub fn gate_effects(&self, store: &FieldStore) -> Vec<UiEffect> {
        self.rules
            .iter()
            .filter_map(|rule| match rule {
                DependencyRule::Gate { gate, dependents } => {
                    Some(set_enabled(dependents, store.is_enabled(gate)))
                }
                _ => None,
            })
            .flatten()
            .collect()
    }
}

struct Projection<'a> {
    store: &'a FieldStore,
    batch: &'a UpdateBatch,
}

impl Projection<'_> {
    fn get(&self, name: &str) -> Option<&FieldValue> {
        self.batch.get(name).or_else(|| self.store.get(name))
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(FieldValue::is_enabled)
    }

    fn touches(&self, name: &str) -> bool {
        self.batch.get(name).is_some()
    }
}

fn set_enabled(names: &[String], enabled: bool) -> Vec<UiEffect> {
    names
        .iter()
        .map(|name| UiEffect::SetEnabled {
            name: name.clone(),
            enabled,
        })
        .collect()
}

fn require_known<'r>(registry: &'r FieldRegistry, name: &str) -> Result<&'r FieldKind, ConfigError> {
    registry
        .kind(name)
        .ok_or_else(|| ConfigError::UnknownField(name.to_string()))
}

fn require_toggle(registry: &FieldRegistry, rule: &str, name: &str) -> Result<(), ConfigError> {
    match require_known(registry, name)? {
        FieldKind::Bool => Ok(()),
        kind => Err(ConfigError::NotAToggle {
            rule: rule.to_string(),
            name: name.to_string(),
            kind: kind.name().to_string(),
        }),
    }
}

/// "a", "a and b", "a, b and c".
fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}
