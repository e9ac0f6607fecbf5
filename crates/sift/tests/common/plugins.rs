//! Plugin types for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use sift::plugin::{DatasetUpdater, Plugin, PluginClass, PluginContext, PluginError};

pub const SCRIPTED_PATH: &str = "tests.Scripted";
pub const COUNTING_PATH: &str = "tests.Counting";

/// Behaviour comes from params: `sleep_ms`, `fail` (message) and `panic`.
pub struct ScriptedClass;

impl PluginClass for ScriptedClass {
    fn instantiate(&self, ctx: PluginContext) -> Box<dyn Plugin> {
        Box::new(Scripted { ctx })
    }
}

struct Scripted {
    ctx: PluginContext,
}

impl Plugin for Scripted {
    fn start(&mut self) -> Result<Value, PluginError> {
        if let Some(ms) = self.ctx.param("sleep_ms").and_then(Value::as_u64) {
            std::thread::sleep(Duration::from_millis(ms));
        }
        if self.ctx.param("panic").and_then(Value::as_bool) == Some(true) {
            panic!("scripted panic in {}", self.ctx.config.name);
        }
        if let Some(message) = self.ctx.param("fail").and_then(Value::as_str) {
            return Err(PluginError::Execution(message.to_string()));
        }
        Ok(json!({ "plugin": self.ctx.config.name, "job_id": self.ctx.job_id }))
    }
}

/// Counts dataset updates run in this process.
#[derive(Default)]
pub struct CountingUpdaterClass {
    updater: Arc<CountingUpdater>,
}

impl CountingUpdaterClass {
    pub fn updates(&self) -> usize {
        self.updater.count.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct CountingUpdater {
    count: AtomicUsize,
}

impl DatasetUpdater for CountingUpdater {
    fn update(&self) -> Result<(), PluginError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PluginClass for CountingUpdaterClass {
    fn instantiate(&self, _ctx: PluginContext) -> Box<dyn Plugin> {
        Box::new(Counted)
    }

    fn updater(&self) -> Option<&dyn DatasetUpdater> {
        Some(self.updater.as_ref())
    }
}

struct Counted;

impl Plugin for Counted {
    fn start(&mut self) -> Result<Value, PluginError> {
        Ok(json!({}))
    }
}
