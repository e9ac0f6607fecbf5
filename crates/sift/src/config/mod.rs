pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_settings, load_settings_from_str, settings_from_env};
pub use schema::{MaintenanceSettings, Settings};
