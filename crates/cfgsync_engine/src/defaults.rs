//! The file manager configuration preset.

use crate::error::ConfigError;
use crate::registry::FieldRegistry;
use crate::rules::{DependencyRule, DependencyRules};

/// Editors offered by the file manager.
pub const EDITORS: [&str; 3] = ["edward", "dword", "deepword"];

/// Archive formats offered by the file manager.
pub const PACKERS: [&str; 2] = ["tar", "zip"];

/// Fields of the file manager's configuration dialog.
pub fn standard_registry() -> FieldRegistry {
    FieldRegistry::builder()
        .bool("auth")
        .text("username")
        .text("password")
        .bool("localStorage")
        .bool("diff")
        .bool("buffer")
        .bool("dirStorage")
        .bool("notifications")
        .bool("online")
        .bool("showKeysPanel")
        .select("editor", EDITORS)
        .select("packer", PACKERS)
        .number("port")
        .text("root")
        .build()
}

/// Rules of the file manager's configuration dialog, validated against `registry`.
///
/// Diff, buffer and directory storage are kept in client-side storage, so
/// they are grouped under `localStorage`. The credential inputs are only
/// editable while `auth` is on.
pub fn standard_rules(registry: &FieldRegistry) -> Result<DependencyRules, ConfigError> {
    DependencyRules::new(
        registry,
        [
            DependencyRule::group("localStorage", ["diff", "buffer", "dirStorage"]),
            DependencyRule::gate("auth", ["username", "password"]),
        ],
    )
}
