use std::path::{Path, PathBuf};

use crate::config::schema::{Settings, MAX_RETENTION_DAYS, MAX_STUCK_MINUTES};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/settings-v1.json");

pub const ENV_REPO_DOWNLOADER_ENABLED: &str = "SIFT_REPO_DOWNLOADER_ENABLED";
pub const ENV_NFS: &str = "SIFT_NFS";
pub const ENV_RETENTION_DAYS: &str = "OLD_JOBS_RETENTION_DAYS";
pub const ENV_DATABASE_PATH: &str = "SIFT_DATABASE_PATH";

/// Loads settings from a JSON file, then applies environment overrides.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut settings = load_settings_from_str(&content)?;
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Parses and validates settings without looking at the environment.
pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let settings: Settings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

/// Built-in defaults plus environment overrides, for running without a file.
pub fn settings_from_env() -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported settings version: {}", settings.version),
        });
    }

    if !settings.queues.contains(&settings.default_queue) {
        return Err(ConfigError::Validation {
            message: format!(
                "default_queue '{}' is not one of the configured queues",
                settings.default_queue
            ),
        });
    }

    if settings.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if !(1..=MAX_STUCK_MINUTES).contains(&settings.maintenance.stuck_minutes_ago) {
        return Err(ConfigError::Validation {
            message: format!(
                "maintenance.stuck_minutes_ago must be between 1 and {}",
                MAX_STUCK_MINUTES
            ),
        });
    }

    if !(1..=MAX_RETENTION_DAYS).contains(&settings.old_jobs_retention_days) {
        return Err(ConfigError::Validation {
            message: format!(
                "old_jobs_retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            ),
        });
    }

    Ok(())
}

/// Environment variables win over file values.
pub fn apply_env_overrides(settings: &mut Settings) -> Result<(), ConfigError> {
    if let Some(value) = env_var(ENV_REPO_DOWNLOADER_ENABLED) {
        settings.repo_downloader_enabled = parse_bool(ENV_REPO_DOWNLOADER_ENABLED, &value)?;
    }
    if let Some(value) = env_var(ENV_NFS) {
        settings.nfs = parse_bool(ENV_NFS, &value)?;
    }
    if let Some(value) = env_var(ENV_RETENTION_DAYS) {
        settings.old_jobs_retention_days = value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|days| (1..=MAX_RETENTION_DAYS).contains(days))
            .ok_or(ConfigError::InvalidEnv {
                name: ENV_RETENTION_DAYS,
                value,
            })?;
    }
    if let Some(value) = env_var(ENV_DATABASE_PATH) {
        settings.database_path = Some(PathBuf::from(value));
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        }),
    }
}
