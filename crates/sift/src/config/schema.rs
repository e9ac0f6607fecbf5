use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::DEFAULT_QUEUE;
use crate::job::FinalStatusPolicy;

/// Upper bound for `old_jobs_retention_days` (a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Upper bound for `maintenance.stuck_minutes_ago` (a year).
pub const MAX_STUCK_MINUTES: i64 = 525_600;

/// Runtime settings shared by every component of a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,
    /// SQLite file. Defaults to `~/.sift/data/sift.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Blob store root. Defaults to `~/.sift/media`.
    #[serde(default)]
    pub media_root: Option<PathBuf>,
    /// Whether plugin datasets are downloaded at all (boot sync and
    /// periodic `update` triggers).
    #[serde(default = "default_true")]
    pub repo_downloader_enabled: bool,
    /// Single-node mode: dataset updates run locally instead of being
    /// broadcast, since every worker shares one filesystem.
    #[serde(default)]
    pub nfs: bool,
    #[serde(default = "default_retention_days")]
    pub old_jobs_retention_days: u32,
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    #[serde(default = "default_queue")]
    pub default_queue: String,
    #[serde(default)]
    pub queue_prefix: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub final_status: FinalStatusPolicy,
    #[serde(default)]
    pub maintenance: MaintenanceSettings,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    14
}

fn default_queues() -> Vec<String> {
    vec![DEFAULT_QUEUE.to_string()]
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            media_root: None,
            repo_downloader_enabled: true,
            nfs: false,
            old_jobs_retention_days: default_retention_days(),
            queues: default_queues(),
            default_queue: default_queue(),
            queue_prefix: None,
            worker_count: default_worker_count(),
            final_status: FinalStatusPolicy::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

impl Settings {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }

    pub fn media_root(&self) -> Option<PathBuf> {
        self.media_root
            .clone()
            .or_else(crate::storage::default_media_root)
    }
}

/// Cadence of the background sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceSettings {
    /// Scheduler wake-up period; every other interval is checked on a tick.
    #[serde(default = "default_tick")]
    pub tick_seconds: u64,
    #[serde(default = "default_stuck_check_interval")]
    pub stuck_check_interval_seconds: u64,
    #[serde(default = "default_stuck_minutes")]
    pub stuck_minutes_ago: i64,
    #[serde(default)]
    pub check_pending: bool,
    #[serde(default = "default_retention_interval")]
    pub retention_interval_seconds: u64,
}

fn default_tick() -> u64 {
    30
}

fn default_stuck_check_interval() -> u64 {
    5 * 60
}

fn default_stuck_minutes() -> i64 {
    25
}

fn default_retention_interval() -> u64 {
    24 * 60 * 60
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick(),
            stuck_check_interval_seconds: default_stuck_check_interval(),
            stuck_minutes_ago: default_stuck_minutes(),
            check_pending: false,
            retention_interval_seconds: default_retention_interval(),
        }
    }
}

impl MaintenanceSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn stuck_check_interval(&self) -> Duration {
        Duration::from_secs(self.stuck_check_interval_seconds)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_seconds)
    }
}
