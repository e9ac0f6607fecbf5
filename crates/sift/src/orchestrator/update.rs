//! Dataset updates, worker boot sync and ingestor runs.

use serde_json::Value;

use super::{run_with_time_limit, Orchestrator};
use crate::broker::ControlCommand;
use crate::db::trigger_repo;
use crate::error::TaskError;
use crate::maintenance::TriggerTask;
use crate::plugin::{PluginError, RuntimeConfiguration};

impl Orchestrator {
    /// Asks every worker of the config's queue to refresh the plugin dataset.
    ///
    /// Returns `false` when the config is disabled or its type has no
    /// updater. With a shared filesystem one local run serves all workers.
    pub fn update(&self, config_pk: &str) -> Result<bool, TaskError> {
        let config = self.resolver.config(config_pk)?;
        if config.disabled {
            log::info!("Plugin config '{}' is disabled, skipping update", config_pk);
            return Ok(false);
        }

        let class = self.resolver.class(&config.plugin_path)?;
        if class.updater().is_none() {
            log::error!(
                "{}",
                PluginError::UpdateUnsupported(config.plugin_path.clone())
            );
            return Ok(false);
        }

        if self.settings.nfs {
            log::info!("Updating '{}' locally on shared storage", config.plugin_path);
            return Ok(self.update_plugin(&config.plugin_path));
        }

        let queue = self.router.queue_for(&config);
        let delivered = self.broker.broadcast(
            &queue,
            ControlCommand::UpdatePlugin {
                plugin_path: config.plugin_path.clone(),
            },
        )?;
        log::info!(
            "Broadcast update of '{}' to {} worker(s) on '{}'",
            config.plugin_path,
            delivered,
            queue
        );
        Ok(true)
    }

    /// Runs the dataset updater for `plugin_path` in this process.
    pub fn update_plugin(&self, plugin_path: &str) -> bool {
        let result = self.resolver.class(plugin_path).and_then(|class| {
            class
                .updater()
                .ok_or_else(|| PluginError::UpdateUnsupported(plugin_path.to_string()))?
                .update()
        });

        match result {
            Ok(()) => {
                log::info!("Updated dataset of '{}'", plugin_path);
                true
            }
            Err(e) => {
                log::error!("Dataset update of '{}' failed: {}", plugin_path, e);
                false
            }
        }
    }

    /// Seeds datasets on a freshly started worker.
    ///
    /// Only workers serving the default queue sync, and only when the
    /// repository downloader is enabled. Returns the configs updated.
    pub fn on_worker_ready(&self, hostname: &str) -> Vec<String> {
        let Some((_, queue)) = hostname.split_once('_') else {
            log::warn!("Worker hostname '{}' carries no queue, skipping boot sync", hostname);
            return Vec::new();
        };

        if !self.settings.repo_downloader_enabled {
            log::info!("Repository downloader disabled, {} skips boot sync", hostname);
            return Vec::new();
        }
        if queue != self.router.default_queue_name() {
            log::debug!("{} serves '{}', not the default queue", hostname, queue);
            return Vec::new();
        }

        let triggers = match trigger_repo::list_enabled(
            &self.db,
            TriggerTask::Update,
            Some(self.router.default_queue()),
        ) {
            Ok(triggers) => triggers,
            Err(e) => {
                log::error!("Boot sync of {} could not list triggers: {}", hostname, e);
                return Vec::new();
            }
        };

        let mut updated = Vec::new();
        for trigger in triggers {
            match self.update(&trigger.config_pk) {
                Ok(true) => updated.push(trigger.config_pk),
                Ok(false) => {}
                Err(e) => log::error!(
                    "Boot sync of {}: update of '{}' failed: {}",
                    hostname,
                    trigger.config_pk,
                    e
                ),
            }
        }
        log::info!("{} boot sync updated {} dataset(s)", hostname, updated.len());
        updated
    }

    /// Runs an ingestor outside of any job. `None` when the config is disabled.
    pub fn execute_ingestor(&self, config_pk: &str, task_id: &str) -> Result<Option<Value>, TaskError> {
        let config = self.resolver.config(config_pk)?;
        if config.disabled {
            log::info!("Ingestor '{}' is disabled, not running it", config_pk);
            return Ok(None);
        }

        let plugin = self.resolver.resolve(
            &config.plugin_path,
            config_pk,
            None,
            RuntimeConfiguration::new(),
            task_id,
        )?;
        let report = run_with_time_limit(plugin, config_pk, config.soft_time_limit())?;
        log::info!("Ingestor '{}' finished", config_pk);
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, LocalBroker};
    use crate::config::Settings;
    use crate::db::{plugin_repo, Database};
    use crate::maintenance::PeriodicUpdateTrigger;
    use crate::plugin::builtin::{ECHO_PATH, FRESHNESS_PATH};
    use crate::plugin::{PluginConfig, PluginKind, PluginRegistry};
    use crate::storage::BlobStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn orchestrator(settings: Settings) -> (Orchestrator, Arc<LocalBroker>, Database) {
        let db = Database::open_in_memory().unwrap();
        let broker = Arc::new(LocalBroker::new());
        let orchestrator = Orchestrator::new(
            db.clone(),
            Arc::new(settings),
            Arc::new(PluginRegistry::with_builtins()),
            Arc::clone(&broker) as Arc<dyn Broker>,
            BlobStore::new(std::env::temp_dir().join("sift-update-tests")),
        );
        (orchestrator, broker, db)
    }

    fn add_freshness(db: &Database, name: &str) {
        plugin_repo::insert(db, &PluginConfig::new(name, PluginKind::Analyzer, FRESHNESS_PATH)).unwrap();
        trigger_repo::insert(
            db,
            &PeriodicUpdateTrigger::new(
                &format!("{}_update", name),
                TriggerTask::Update,
                name,
                "default",
                Duration::from_secs(3600),
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_update_broadcasts_to_queue() {
        let (orchestrator, broker, db) = orchestrator(Settings::default());
        add_freshness(&db, "Fresh");
        let mut rx = broker.subscribe("default").unwrap();

        assert!(orchestrator.update("Fresh").unwrap());
        assert_eq!(
            rx.try_recv().unwrap(),
            ControlCommand::UpdatePlugin {
                plugin_path: FRESHNESS_PATH.to_string()
            }
        );
    }

    #[test]
    fn test_update_without_updater_or_disabled() {
        let (orchestrator, _broker, db) = orchestrator(Settings::default());
        plugin_repo::insert(&db, &PluginConfig::new("Echo", PluginKind::Analyzer, ECHO_PATH)).unwrap();
        assert!(!orchestrator.update("Echo").unwrap());

        add_freshness(&db, "Fresh");
        plugin_repo::set_disabled(&db, "Fresh", true).unwrap();
        assert!(!orchestrator.update("Fresh").unwrap());

        assert!(matches!(
            orchestrator.update("Missing"),
            Err(TaskError::Plugin(PluginError::ConfigNotFound(_)))
        ));
    }

    #[test]
    fn test_update_on_shared_storage_runs_locally() {
        let settings = Settings {
            nfs: true,
            ..Settings::default()
        };
        let (orchestrator, broker, db) = orchestrator(settings);
        add_freshness(&db, "Fresh");
        let mut rx = broker.subscribe("default").unwrap();

        assert!(orchestrator.update("Fresh").unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_update_plugin_unknown_path() {
        let (orchestrator, _broker, _db) = orchestrator(Settings::default());
        assert!(!orchestrator.update_plugin("nowhere.Plugin"));
        assert!(!orchestrator.update_plugin(ECHO_PATH));
        assert!(orchestrator.update_plugin(FRESHNESS_PATH));
    }

    #[test]
    fn test_boot_sync_only_on_default_queue() {
        let (orchestrator, _broker, db) = orchestrator(Settings {
            queues: vec!["default".to_string(), "long".to_string()],
            ..Settings::default()
        });
        add_freshness(&db, "Fresh");

        assert_eq!(orchestrator.on_worker_ready("worker_default"), vec!["Fresh"]);
        assert!(orchestrator.on_worker_ready("worker_long").is_empty());
        assert!(orchestrator.on_worker_ready("nounderscore").is_empty());
    }

    #[test]
    fn test_boot_sync_respects_downloader_flag() {
        let (orchestrator, _broker, db) = orchestrator(Settings {
            repo_downloader_enabled: false,
            ..Settings::default()
        });
        add_freshness(&db, "Fresh");
        assert!(orchestrator.on_worker_ready("worker_default").is_empty());
    }

    #[test]
    fn test_execute_ingestor() {
        let (orchestrator, _broker, db) = orchestrator(Settings::default());
        plugin_repo::insert(&db, &PluginConfig::new("Feed", PluginKind::Ingestor, ECHO_PATH)).unwrap();

        let report = orchestrator.execute_ingestor("Feed", "t-9").unwrap().unwrap();
        assert_eq!(report["job_id"], Value::Null);

        plugin_repo::set_disabled(&db, "Feed", true).unwrap();
        assert!(orchestrator.execute_ingestor("Feed", "t-10").unwrap().is_none());
    }
}
