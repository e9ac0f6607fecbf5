use chrono::{DateTime, Utc};

use super::{FinalStatusPolicy, Job, JobId, JobStatus};
use crate::db::{job_repo, report_repo, Database};
use crate::error::TaskError;

/// Sole writer of the job `status` field.
///
/// Every write is conditional on the job not being terminal, so concurrent
/// callers race safely: at most one terminal transition ever lands.
#[derive(Debug, Clone)]
pub struct JobStateMachine {
    db: Database,
    policy: FinalStatusPolicy,
}

impl JobStateMachine {
    pub fn new(db: Database, policy: FinalStatusPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> FinalStatusPolicy {
        self.policy
    }

    /// Takes a `pending` job into its first running status.
    ///
    /// Returns `Ok(false)` when the job already left `pending`, meaning some
    /// other pipeline run started it.
    pub fn start(&self, job_id: JobId, status: JobStatus) -> Result<bool, TaskError> {
        if !status.is_pipeline_step() {
            return Err(TaskError::IllegalTransition { job_id, status });
        }

        let started = job_repo::start_if_pending(&self.db, job_id, status)?;
        if started {
            log::debug!("Job {} started as {}", job_id, status);
        }
        Ok(started)
    }

    /// Moves a job to a running or partial status.
    ///
    /// Any other target is rejected with `IllegalTransition` without touching
    /// the row; the caller reports it. Returns `Ok(false)` when the job is
    /// already terminal.
    pub fn set_pipeline_status(&self, job_id: JobId, status: JobStatus) -> Result<bool, TaskError> {
        if !status.is_pipeline_step() {
            return Err(TaskError::IllegalTransition { job_id, status });
        }

        let updated = job_repo::update_status_if_in_flight(&self.db, job_id, status)?;
        if updated {
            log::debug!("Job {} is now {}", job_id, status);
        } else {
            log::info!(
                "Job {} is terminal or gone, not moving it to {}",
                job_id,
                status
            );
        }
        Ok(updated)
    }

    /// Folds the job's reports into its terminal status.
    ///
    /// Returns the status written, or `None` if the job was already terminal
    /// (including when a concurrent caller finalized it first).
    pub fn set_final_status(&self, job_id: JobId) -> Result<Option<JobStatus>, TaskError> {
        self.set_final_status_at(job_id, Utc::now())
    }

    pub fn set_final_status_at(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, TaskError> {
        let job = job_repo::get(&self.db, job_id)?;
        if job.status.is_final() {
            log::debug!("Job {} already final ({})", job_id, job.status);
            return Ok(None);
        }

        let statuses = report_repo::statuses_for_job(&self.db, job_id)?;
        let status = self.policy.fold(statuses);

        let written = self.finish(&job, status, now)?;
        if written {
            log::info!(
                "Job {} finished as {} after {:.2}s",
                job_id,
                status,
                job.calculate_process_time(now)
            );
            Ok(Some(status))
        } else {
            Ok(None)
        }
    }

    /// Fails an in-flight job, as the stuck-job reaper does.
    pub fn fail(&self, job: &Job, now: DateTime<Utc>) -> Result<bool, TaskError> {
        self.finish(job, JobStatus::Failed, now)
    }

    fn finish(&self, job: &Job, status: JobStatus, now: DateTime<Utc>) -> Result<bool, TaskError> {
        let written = job_repo::finish(
            &self.db,
            job.id,
            status,
            now,
            job.calculate_process_time(now),
            &JobStatus::in_flight_statuses(),
        )?;
        Ok(written)
    }
}
