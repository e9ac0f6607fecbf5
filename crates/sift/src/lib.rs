pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod maintenance;
pub mod orchestrator;
pub mod plugin;
pub mod storage;
pub mod worker;

pub use broker::{Broker, ControlCommand, LocalBroker, QueueRouter, QueuedTask, Task};
pub use config::{load_settings, settings_from_env, Settings};
pub use db::Database;
pub use error::{ConfigError, Result, SiftError, StorageError, TaskError, WorkerError};
pub use job::{Job, JobId, JobStateMachine, JobStatus, JobSubmitter, NewJob, Submission};
pub use maintenance::{MaintenanceScheduler, PeriodicUpdateTrigger, TriggerTask};
pub use orchestrator::Orchestrator;
pub use plugin::{Plugin, PluginConfig, PluginKind, PluginRegistry, PluginReport, ReportStatus};
pub use storage::BlobStore;
pub use worker::WorkerPool;
