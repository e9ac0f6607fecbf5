use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a periodic trigger schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTask {
    /// Broadcast a dataset update for the trigger's plugin config.
    Update,
    /// Run the trigger's ingestor config.
    ExecuteIngestor,
}

impl TriggerTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerTask::Update => "update",
            TriggerTask::ExecuteIngestor => "execute_ingestor",
        }
    }
}

impl fmt::Display for TriggerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(TriggerTask::Update),
            "execute_ingestor" => Ok(TriggerTask::ExecuteIngestor),
            other => Err(format!("unknown trigger task '{}'", other)),
        }
    }
}

/// A scheduled dataset refresh or ingestion for one plugin config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicUpdateTrigger {
    pub name: String,
    pub task: TriggerTask,
    /// Plugin config the task runs against.
    pub config_pk: String,
    pub queue: String,
    pub interval_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl PeriodicUpdateTrigger {
    pub fn new(name: &str, task: TriggerTask, config_pk: &str, queue: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            task,
            config_pk: config_pk.to_string(),
            queue: queue.to_string(),
            interval_seconds: interval.as_secs(),
            enabled: true,
            last_run_at: None,
        }
    }

    /// Whether the trigger should fire at `now`. Never-run triggers are due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_run_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.interval_seconds as i64,
        }
    }
}
