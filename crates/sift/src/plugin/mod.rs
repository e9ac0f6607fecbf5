//! Plugin capability interfaces.
//!
//! Plugins are looked up by a stable symbolic path in a [`PluginRegistry`]
//! instead of by reflection. A registered [`PluginClass`] builds runnable
//! [`Plugin`] instances bound to one configuration and may expose a
//! [`DatasetUpdater`] for refreshing locally cached data.

pub mod builtin;
pub mod config;
pub mod error;
pub mod registry;
pub mod report;
pub mod resolver;

use serde_json::{Map, Value};

use crate::job::JobId;

pub use config::{validate_plugin_name, PluginConfig, PluginKind};
pub use error::PluginError;
pub use registry::PluginRegistry;
pub use report::{cap_report, PluginReport, ReportStatus};
pub use resolver::PluginResolver;

/// Per-run option overrides, keyed by parameter name.
pub type RuntimeConfiguration = Map<String, Value>;

/// Everything a plugin instance is bound to.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub config: PluginConfig,
    /// `None` for ingestors, which run outside any job.
    pub job_id: Option<JobId>,
    pub runtime_configuration: RuntimeConfiguration,
    /// Identifier of the task running this instance, for tracing and idempotency.
    pub task_id: String,
}

impl PluginContext {
    /// Parameter value with runtime overrides taking precedence over config params.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.runtime_configuration
            .get(key)
            .or_else(|| self.config.params.get(key))
    }
}

/// A runnable plugin instance.
pub trait Plugin: Send {
    /// Runs the analysis and returns the report payload.
    fn start(&mut self) -> Result<Value, PluginError>;
}

/// Refreshes a plugin's locally cached dataset.
///
/// May run concurrently on every worker of a queue, so implementations must
/// be idempotent and only touch worker-local state.
pub trait DatasetUpdater: Send + Sync {
    fn update(&self) -> Result<(), PluginError>;
}

/// A registered plugin type.
pub trait PluginClass: Send + Sync {
    fn instantiate(&self, ctx: PluginContext) -> Box<dyn Plugin>;

    /// The dataset update routine, if this type has one.
    fn updater(&self) -> Option<&dyn DatasetUpdater> {
        None
    }
}
