use chrono::{DateTime, Duration, Utc};

use crate::db::{job_repo, Database};
use crate::error::TaskError;
use crate::job::{JobId, JobStateMachine, JobStatus};

/// Fails every in-flight job received more than `minutes_ago` minutes
/// before `now`. Pending jobs are only included with `check_pending`.
///
/// Returns the ids actually moved to `failed`; a job that finished between
/// the scan and the write is left alone.
pub fn check_stuck_analysis(
    db: &Database,
    state: &JobStateMachine,
    now: DateTime<Utc>,
    minutes_ago: i64,
    check_pending: bool,
) -> Result<Vec<JobId>, TaskError> {
    let statuses: Vec<JobStatus> = JobStatus::in_flight_statuses()
        .into_iter()
        .filter(|s| check_pending || *s != JobStatus::Pending)
        .collect();
    let cutoff = Some(minutes_ago)
        .filter(|minutes| *minutes >= 0)
        .and_then(Duration::try_minutes)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or(TaskError::OutOfRange {
            field: "minutes_ago",
            value: minutes_ago,
        })?;

    let stuck = job_repo::find_received_before(db, &statuses, cutoff)?;
    if stuck.is_empty() {
        log::debug!("No jobs stuck for more than {} minutes", minutes_ago);
        return Ok(Vec::new());
    }

    let mut failed = Vec::with_capacity(stuck.len());
    for job in stuck {
        log::warn!(
            "Job {} has been {} since {}, marking it failed",
            job.id,
            job.status,
            job.received_request_time
        );
        if state.fail(&job, now)? {
            failed.push(job.id);
        }
    }

    log::info!("Reaped {} stuck job(s)", failed.len());
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Artifact, FinalStatusPolicy, Job, ScanMode};

    fn add_job(db: &Database, status: JobStatus, received: DateTime<Utc>) -> JobId {
        let job = Job {
            id: 0,
            status,
            md5: None,
            artifact: Artifact::Observable {
                name: "198.51.100.7".to_string(),
                classification: "ip".to_string(),
            },
            scan_mode: ScanMode::ForceNewAnalysis,
            scan_check_time: None,
            received_request_time: received,
            finished_analysis_time: None,
            process_time: None,
        };
        job_repo::insert(db, &job, &[]).unwrap()
    }

    #[test]
    fn test_reaps_old_running_jobs_only() {
        let db = Database::open_in_memory().unwrap();
        let state = JobStateMachine::new(db.clone(), FinalStatusPolicy::default());
        let now = Utc::now();

        let old_running = add_job(&db, JobStatus::AnalyzersRunning, now - Duration::minutes(30));
        let old_partial = add_job(&db, JobStatus::ConnectorsCompleted, now - Duration::minutes(30));
        let old_pending = add_job(&db, JobStatus::Pending, now - Duration::minutes(30));
        let fresh = add_job(&db, JobStatus::Running, now - Duration::minutes(5));
        let done = add_job(&db, JobStatus::ReportedWithoutFails, now - Duration::hours(2));

        let failed = check_stuck_analysis(&db, &state, now, 25, false).unwrap();
        assert_eq!(failed, vec![old_running, old_partial]);

        let job = job_repo::get(&db, old_running).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.process_time.unwrap() >= 1800.0);
        assert_eq!(job_repo::get(&db, old_pending).unwrap().status, JobStatus::Pending);
        assert_eq!(job_repo::get(&db, fresh).unwrap().status, JobStatus::Running);
        assert_eq!(
            job_repo::get(&db, done).unwrap().status,
            JobStatus::ReportedWithoutFails
        );
    }

    #[test]
    fn test_check_pending_includes_pending() {
        let db = Database::open_in_memory().unwrap();
        let state = JobStateMachine::new(db.clone(), FinalStatusPolicy::default());
        let now = Utc::now();
        let pending = add_job(&db, JobStatus::Pending, now - Duration::minutes(60));

        assert_eq!(check_stuck_analysis(&db, &state, now, 25, true).unwrap(), vec![pending]);
        assert!(check_stuck_analysis(&db, &state, now, 25, true).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_window_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let state = JobStateMachine::new(db.clone(), FinalStatusPolicy::default());
        let now = Utc::now();
        let stuck = add_job(&db, JobStatus::Running, now - Duration::minutes(60));

        for minutes_ago in [i64::MAX, i64::MIN, -1] {
            assert!(matches!(
                check_stuck_analysis(&db, &state, now, minutes_ago, false),
                Err(TaskError::OutOfRange { field: "minutes_ago", .. })
            ));
        }
        assert_eq!(job_repo::get(&db, stuck).unwrap().status, JobStatus::Running);
        assert_eq!(check_stuck_analysis(&db, &state, now, 0, false).unwrap(), vec![stuck]);
    }
}
