//! Staged fan-out and fan-in of a job's plugins.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Value};

use super::{run_with_time_limit, Completion, Orchestrator, PlannedPlugin, Registration, Stage};
use crate::broker::Task;
use crate::db::{job_repo, plugin_repo, report_repo};
use crate::error::TaskError;
use crate::job::{JobId, JobStatus};
use crate::plugin::{cap_report, PluginError, PluginKind, ReportStatus, RuntimeConfiguration};

impl Orchestrator {
    /// Fans a job out into its first stage of plugin tasks.
    ///
    /// Only a `pending` job is started, and only once: a redelivered or
    /// duplicate pipeline task finds the job tracked or already claimed and
    /// does nothing. Disabled and deleted configs are dropped from the plan.
    /// A job with nothing left to run is finalized on the spot.
    pub fn job_pipeline(
        &self,
        job_id: JobId,
        mut runtime_configuration: HashMap<String, RuntimeConfiguration>,
    ) -> Result<(), TaskError> {
        let job = job_repo::get(&self.db, job_id)?;
        if job.status != JobStatus::Pending {
            log::info!("Job {} is already {}, not starting it", job_id, job.status);
            return Ok(());
        }

        let mut stages: Vec<Stage> = Vec::new();
        for name in job_repo::plan(&self.db, job_id)? {
            let Some(config) = plugin_repo::find_by_name(&self.db, &name)? else {
                log::warn!("Job {}: plugin config '{}' no longer exists, skipping", job_id, name);
                continue;
            };
            if config.disabled {
                log::info!("Job {}: plugin config '{}' is disabled, skipping", job_id, name);
                continue;
            }
            if config.kind.stage_order().is_none() {
                log::warn!(
                    "Job {}: '{}' is an {} and cannot run in a job",
                    job_id,
                    name,
                    config.kind
                );
                continue;
            }

            let planned = PlannedPlugin {
                runtime_configuration: runtime_configuration.remove(&name).unwrap_or_default(),
                config,
            };
            match stages.iter_mut().find(|s| s.kind == planned.config.kind) {
                Some(stage) => stage.plugins.push(planned),
                None => stages.push(Stage {
                    kind: planned.config.kind,
                    plugins: vec![planned],
                }),
            }
        }
        stages.sort_by_key(|s| s.kind.stage_order());

        let first = match self.tracker.register(job_id, stages) {
            Registration::Started(first) => first,
            Registration::AlreadyTracked => {
                log::warn!("Pipeline for job {} is already running", job_id);
                return Ok(());
            }
            Registration::Empty => {
                log::info!("Job {} has no runnable plugins", job_id);
                if self.state.start(job_id, JobStatus::Running)? {
                    self.state.set_final_status(job_id)?;
                }
                return Ok(());
            }
        };

        if !self.state.start(job_id, JobStatus::running_for(first.kind))? {
            log::warn!("Job {} was started by another pipeline run", job_id);
            self.tracker.forget(job_id);
            return Ok(());
        }

        log::info!(
            "Job {}: dispatching {} {}(s)",
            job_id,
            first.plugins.len(),
            first.kind
        );
        self.dispatch_stage(job_id, first)
    }

    fn dispatch_stage(&self, job_id: JobId, stage: Stage) -> Result<(), TaskError> {
        for planned in stage.plugins {
            let queue = self.router.queue_for(&planned.config);
            let task = Task::RunPlugin {
                job_id,
                plugin_path: planned.config.plugin_path.clone(),
                config_pk: planned.config.name.clone(),
                kind: planned.config.kind,
                runtime_configuration: planned.runtime_configuration,
            };

            if let Err(e) = self.broker.enqueue(&queue, task) {
                log::error!(
                    "Job {}: could not enqueue '{}' on '{}': {}",
                    job_id,
                    planned.config.name,
                    queue,
                    e
                );
                let now = Utc::now();
                if !report_repo::start(&self.db, job_id, &planned.config.name, planned.config.kind, "", now)? {
                    continue;
                }
                report_repo::finish(
                    &self.db,
                    job_id,
                    &planned.config.name,
                    ReportStatus::Failed,
                    &json!({}),
                    &[e.to_string()],
                    now,
                )?;
                self.on_plugin_finished(job_id, &planned.config.name)?;
            }
        }
        Ok(())
    }

    /// Runs one plugin against one job and records its report.
    ///
    /// Plugin failures, overruns and panics become a `failed` report; the
    /// task itself only fails on storage errors. A task for a finished job,
    /// or whose report is already finished or claimed by another task, does
    /// nothing, so a duplicate delivery never rewrites a report.
    pub fn run_plugin(
        &self,
        job_id: JobId,
        plugin_path: &str,
        config_pk: &str,
        kind: PluginKind,
        runtime_configuration: RuntimeConfiguration,
        task_id: &str,
    ) -> Result<(), TaskError> {
        let span = tracing::info_span!("run_plugin", job_id, config = config_pk);
        let _guard = span.enter();

        match job_repo::find_by_id(&self.db, job_id)? {
            Some(job) if !job.status.is_final() => {}
            Some(job) => {
                log::info!("Job {} is already {}, not running '{}'", job_id, job.status, config_pk);
                return Ok(());
            }
            None => {
                log::warn!("Job {} no longer exists, not running '{}'", job_id, config_pk);
                return Ok(());
            }
        }
        if !report_repo::start(&self.db, job_id, config_pk, kind, task_id, Utc::now())? {
            log::warn!(
                "Job {}: report for '{}' is finished or owned by another task, skipping",
                job_id,
                config_pk
            );
            return Ok(());
        }

        let outcome = self.resolver.config(config_pk).and_then(|config| {
            if config.disabled {
                return Err(PluginError::Disabled(config.name));
            }
            let plugin = self.resolver.resolve(
                plugin_path,
                config_pk,
                Some(job_id),
                runtime_configuration,
                task_id,
            )?;
            let report = run_with_time_limit(plugin, config_pk, config.soft_time_limit())?;
            Ok(cap_report(report, config.max_size_report))
        });

        let (status, report, errors) = match outcome {
            Ok(report) => (ReportStatus::Success, report, Vec::new()),
            Err(PluginError::Database(e)) => return Err(e.into()),
            Err(e) => {
                if e.is_configuration() {
                    log::error!("Job {}: cannot run '{}': {}", job_id, config_pk, e);
                } else {
                    log::warn!("Job {}: '{}' failed: {}", job_id, config_pk, e);
                }
                (ReportStatus::Failed, Value::Object(Default::default()), vec![e.to_string()])
            }
        };

        let written = report_repo::finish(
            &self.db,
            job_id,
            config_pk,
            status,
            &report,
            &errors,
            Utc::now(),
        )?;
        if !written {
            log::warn!("Job {}: report for '{}' was already final", job_id, config_pk);
            return Ok(());
        }
        log::debug!("Job {}: '{}' reported {}", job_id, config_pk, status);

        self.on_plugin_finished(job_id, config_pk)
    }

    /// Fan-in: advances or finalizes the job once its current stage is in.
    pub(crate) fn on_plugin_finished(&self, job_id: JobId, config_name: &str) -> Result<(), TaskError> {
        match self.tracker.complete(job_id, config_name) {
            Completion::Pending => Ok(()),
            Completion::StageDone { completed, next } => {
                if let Some(done) = JobStatus::completed_for(completed) {
                    if !self.state.set_pipeline_status(job_id, done)? {
                        self.tracker.forget(job_id);
                        return Ok(());
                    }
                }
                if !self
                    .state
                    .set_pipeline_status(job_id, JobStatus::running_for(next.kind))?
                {
                    self.tracker.forget(job_id);
                    return Ok(());
                }
                log::info!(
                    "Job {}: {} stage done, dispatching {} {}(s)",
                    job_id,
                    completed,
                    next.plugins.len(),
                    next.kind
                );
                self.dispatch_stage(job_id, next)
            }
            Completion::JobDone { completed } => {
                if let Some(done) = JobStatus::completed_for(completed) {
                    self.state.set_pipeline_status(job_id, done)?;
                }
                self.state.set_final_status(job_id)?;
                Ok(())
            }
            Completion::Untracked => self.finish_untracked(job_id),
        }
    }

    /// A report for a job this process is not tracking, e.g. after a restart.
    /// Finalizes the job once every planned config has a finished report.
    fn finish_untracked(&self, job_id: JobId) -> Result<(), TaskError> {
        let Some(job) = job_repo::find_by_id(&self.db, job_id)? else {
            log::warn!("Job {} disappeared while its plugins were running", job_id);
            return Ok(());
        };
        if job.status.is_final() {
            return Ok(());
        }

        let plan = job_repo::plan(&self.db, job_id)?;
        let reports = report_repo::list_for_job(&self.db, job_id)?;
        let all_in = plan.iter().all(|name| {
            reports
                .iter()
                .any(|r| &r.config_name == name && r.status.is_finished())
        });

        if all_in {
            log::info!("Job {}: all reports in without a tracker, finalizing", job_id);
            self.state.set_final_status(job_id)?;
        } else {
            log::debug!(
                "Job {} is not tracked here; leaving it to the stuck-job reaper",
                job_id
            );
        }
        Ok(())
    }
}
