//! Structural validation of plugin instances.
//!
//! Runs after instantiation and before any lifecycle hook. Only identity
//! fields are checked; commands are checked when they are attached to the
//! namespace.

use crate::types::Plugin;

/// Error type for plugin validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required identity field is absent or blank.
    #[error("plugin is missing required field '{field}': {hint}")]
    MissingField {
        /// The name of the missing field.
        field: &'static str,
        /// Hint for how to fix the issue.
        hint: &'static str,
    },
}

impl ValidationError {
    pub fn missing_field(field: &'static str, hint: &'static str) -> Self {
        Self::MissingField { field, hint }
    }

    /// Get the field name associated with this error.
    pub fn field_name(&self) -> &str {
        match self {
            Self::MissingField { field, .. } => field,
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Check that a plugin carries a name, version, and description.
///
/// Fields are checked in that order and the first failure is reported.
pub fn validate(plugin: &dyn Plugin) -> ValidationResult<()> {
    if plugin.name().trim().is_empty() {
        return Err(ValidationError::missing_field(
            "name",
            "give the plugin a unique name (e.g. \"git-helpers\")",
        ));
    }

    if plugin.version().trim().is_empty() {
        return Err(ValidationError::missing_field(
            "version",
            "set a version string (e.g. \"0.1.0\")",
        ));
    }

    if plugin.description().trim().is_empty() {
        return Err(ValidationError::missing_field(
            "description",
            "add a one-line description of what the plugin does",
        ));
    }

    Ok(())
}
