//! Plugins shipped with the crate.
//!
//! `Echo` reflects its parameters back as the report, which is enough to
//! smoke-test a deployment end to end. `Freshness` keeps a worker-local
//! dataset timestamp and exercises the update protocol.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{DatasetUpdater, Plugin, PluginClass, PluginContext, PluginError, PluginRegistry};

pub const ECHO_PATH: &str = "sift.plugins.builtin.Echo";
pub const FRESHNESS_PATH: &str = "sift.plugins.builtin.Freshness";

pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(ECHO_PATH, Arc::new(EchoClass));
    registry.register(FRESHNESS_PATH, Arc::new(FreshnessClass::default()));
}

pub struct EchoClass;

impl PluginClass for EchoClass {
    fn instantiate(&self, ctx: PluginContext) -> Box<dyn Plugin> {
        Box::new(Echo { ctx })
    }
}

struct Echo {
    ctx: PluginContext,
}

impl Plugin for Echo {
    fn start(&mut self) -> Result<Value, PluginError> {
        if let Some(message) = self.ctx.param("fail_with").and_then(Value::as_str) {
            return Err(PluginError::Execution(message.to_string()));
        }

        let mut params = self.ctx.config.params.clone();
        for (key, value) in &self.ctx.runtime_configuration {
            params.insert(key.clone(), value.clone());
        }

        Ok(json!({
            "plugin": self.ctx.config.name,
            "job_id": self.ctx.job_id,
            "params": params,
        }))
    }
}

/// Tracks when this worker last refreshed its dataset.
#[derive(Default)]
pub struct FreshnessClass {
    dataset: Arc<FreshnessDataset>,
}

#[derive(Default)]
pub struct FreshnessDataset {
    refreshed_at: RwLock<Option<DateTime<Utc>>>,
}

impl FreshnessDataset {
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at.read().ok().and_then(|guard| *guard)
    }
}

impl DatasetUpdater for FreshnessDataset {
    fn update(&self) -> Result<(), PluginError> {
        let mut guard = self
            .refreshed_at
            .write()
            .map_err(|_| PluginError::Update("dataset lock poisoned".to_string()))?;
        *guard = Some(Utc::now());
        Ok(())
    }
}

impl PluginClass for FreshnessClass {
    fn instantiate(&self, _ctx: PluginContext) -> Box<dyn Plugin> {
        Box::new(Freshness {
            dataset: Arc::clone(&self.dataset),
        })
    }

    fn updater(&self) -> Option<&dyn DatasetUpdater> {
        Some(self.dataset.as_ref())
    }
}

struct Freshness {
    dataset: Arc<FreshnessDataset>,
}

impl Plugin for Freshness {
    fn start(&mut self) -> Result<Value, PluginError> {
        match self.dataset.refreshed_at() {
            Some(at) => Ok(json!({ "dataset_refreshed_at": at.to_rfc3339() })),
            None => Err(PluginError::Execution(
                "dataset has not been downloaded on this worker".to_string(),
            )),
        }
    }
}
