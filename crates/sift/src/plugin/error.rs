//! Plugin error types.

use thiserror::Error;

use crate::db::DatabaseError;

/// Errors from resolving, running, or updating a plugin.
#[derive(Error, Debug)]
pub enum PluginError {
    /// No implementation registered under this symbolic path.
    #[error("No plugin registered at path '{0}'")]
    UnknownPath(String),

    /// The configuration row does not exist (possibly deleted concurrently).
    #[error("Plugin config '{0}' not found")]
    ConfigNotFound(String),

    #[error("Plugin config '{0}' is disabled")]
    Disabled(String),

    /// The plugin type has no dataset update routine.
    #[error("Plugin '{0}' does not support dataset updates")]
    UpdateUnsupported(String),

    #[error("Invalid plugin name '{name}': only [A-Za-z0-9_] allowed, max 50 characters")]
    InvalidName { name: String },

    /// The plugin body reported a failure.
    #[error("Plugin execution failed: {0}")]
    Execution(String),

    #[error("Plugin '{name}' exceeded its soft time limit of {seconds}s")]
    TimeLimitExceeded { name: String, seconds: u64 },

    #[error("Plugin '{0}' panicked")]
    Panicked(String),

    #[error("Dataset update failed: {0}")]
    Update(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PluginError {
    /// Errors caused by configuration rather than by the run itself.
    /// These are logged and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PluginError::UnknownPath(_)
                | PluginError::ConfigNotFound(_)
                | PluginError::Disabled(_)
                | PluginError::UpdateUnsupported(_)
                | PluginError::InvalidName { .. }
        )
    }
}
