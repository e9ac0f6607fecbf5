//! Job and plugin orchestration.
//!
//! The [`Orchestrator`] executes every [`Task`] a worker pulls off a queue and
//! every [`ControlCommand`] delivered on a control topic. It holds no
//! per-task state apart from the in-process [`FanInTracker`]; everything else
//! lives in the database.

pub mod execution;
pub mod pipeline;
pub mod tracker;
pub mod update;

use std::sync::Arc;

use chrono::Utc;

use crate::broker::{Broker, ControlCommand, QueueRouter, QueuedTask, Task};
use crate::config::Settings;
use crate::db::Database;
use crate::error::TaskError;
use crate::job::{JobId, JobStateMachine};
use crate::maintenance;
use crate::plugin::{PluginRegistry, PluginResolver};
use crate::storage::BlobStore;

pub use execution::run_with_time_limit;
pub use tracker::{Completion, FanInTracker, PlannedPlugin, Registration, Stage};

pub struct Orchestrator {
    db: Database,
    settings: Arc<Settings>,
    resolver: PluginResolver,
    state: JobStateMachine,
    broker: Arc<dyn Broker>,
    router: QueueRouter,
    tracker: FanInTracker,
    blobs: BlobStore,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        settings: Arc<Settings>,
        registry: Arc<PluginRegistry>,
        broker: Arc<dyn Broker>,
        blobs: BlobStore,
    ) -> Self {
        Self {
            resolver: PluginResolver::new(db.clone(), registry),
            state: JobStateMachine::new(db.clone(), settings.final_status),
            router: QueueRouter::from_settings(&settings),
            tracker: FanInTracker::new(),
            db,
            settings,
            broker,
            blobs,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    pub fn state_machine(&self) -> &JobStateMachine {
        &self.state
    }

    pub fn tracker(&self) -> &FanInTracker {
        &self.tracker
    }

    /// Enqueues a task on the default queue.
    pub fn schedule(&self, task: Task) -> Result<String, TaskError> {
        self.broker.enqueue(&self.router.default_queue_name(), task)
    }

    /// Runs one task pulled from a queue.
    pub fn execute(&self, queued: QueuedTask) -> Result<(), TaskError> {
        let QueuedTask { task_id, task } = queued;
        let span = tracing::info_span!("task", task = task.name(), task_id = %task_id);
        let _guard = span.enter();

        match task {
            Task::JobPipeline {
                job_id,
                runtime_configuration,
            } => self.job_pipeline(job_id, runtime_configuration),
            Task::RunPlugin {
                job_id,
                plugin_path,
                config_pk,
                kind,
                runtime_configuration,
            } => self.run_plugin(
                job_id,
                &plugin_path,
                &config_pk,
                kind,
                runtime_configuration,
                &task_id,
            ),
            Task::JobSetPipelineStatus { job_id, status } => {
                self.state.set_pipeline_status(job_id, status).map(|_| ())
            }
            Task::JobSetFinalStatus { job_id } => self.state.set_final_status(job_id).map(|_| ()),
            Task::Update { config_pk } => self.update(&config_pk).map(|_| ()),
            Task::CheckStuckAnalysis {
                minutes_ago,
                check_pending,
            } => {
                let failed = maintenance::check_stuck_analysis(
                    &self.db,
                    &self.state,
                    Utc::now(),
                    minutes_ago,
                    check_pending,
                )?;
                for job_id in failed {
                    self.tracker.forget(job_id);
                }
                Ok(())
            }
            Task::RemoveOldJobs { retention_days } => {
                let days = retention_days.unwrap_or(self.settings.old_jobs_retention_days);
                maintenance::remove_old_jobs(&self.db, &self.blobs, Utc::now(), days).map(|_| ())
            }
            Task::ExecuteIngestor { config_pk } => {
                self.execute_ingestor(&config_pk, &task_id).map(|_| ())
            }
        }
    }

    /// Deletes a job, its reports and its sample, and stops tracking it.
    pub fn delete_job(&self, job_id: JobId) -> Result<bool, TaskError> {
        self.tracker.forget(job_id);
        maintenance::delete_job(&self.db, &self.blobs, job_id)
    }

    /// Handles one command received on a control topic. Failures stay local.
    pub fn handle_control(&self, command: ControlCommand) {
        match command {
            ControlCommand::UpdatePlugin { plugin_path } => {
                self.update_plugin(&plugin_path);
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("router", &self.router)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
