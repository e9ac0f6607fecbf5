use std::sync::Arc;

use super::{Plugin, PluginClass, PluginContext, PluginError, PluginRegistry, RuntimeConfiguration};
use crate::db::{plugin_repo, Database};
use crate::job::JobId;
use crate::plugin::PluginConfig;

/// Binds plugin paths and config rows into runnable instances.
#[derive(Clone)]
pub struct PluginResolver {
    db: Database,
    registry: Arc<PluginRegistry>,
}

impl PluginResolver {
    pub fn new(db: Database, registry: Arc<PluginRegistry>) -> Self {
        Self { db, registry }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Loads the config row named `config_pk`.
    pub fn config(&self, config_pk: &str) -> Result<PluginConfig, PluginError> {
        plugin_repo::find_by_name(&self.db, config_pk)?
            .ok_or_else(|| PluginError::ConfigNotFound(config_pk.to_string()))
    }

    /// Resolves the type registered at `plugin_path`.
    pub fn class(&self, plugin_path: &str) -> Result<Arc<dyn PluginClass>, PluginError> {
        self.registry.resolve(plugin_path)
    }

    /// Builds a plugin instance bound to config `config_pk`.
    ///
    /// Fails without side effects when the path is unregistered or the
    /// config row does not exist.
    pub fn resolve(
        &self,
        plugin_path: &str,
        config_pk: &str,
        job_id: Option<JobId>,
        runtime_configuration: RuntimeConfiguration,
        task_id: &str,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        let class = self.class(plugin_path)?;
        let config = self.config(config_pk)?;

        log::debug!(
            "Resolved {} for config '{}' (task {})",
            plugin_path,
            config.name,
            task_id
        );

        Ok(class.instantiate(PluginContext {
            config,
            job_id,
            runtime_configuration,
            task_id: task_id.to_string(),
        }))
    }
}

impl std::fmt::Debug for PluginResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginResolver")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
