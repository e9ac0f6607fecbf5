use chrono::{DateTime, Duration, Utc};

use crate::db::job_repo::{self, DeletedJob};
use crate::db::Database;
use crate::error::TaskError;
use crate::job::JobId;
use crate::storage::BlobStore;

/// Deletes jobs that finished more than `retention_days` days before `now`,
/// along with their reports and sample blobs. Returns how many jobs went.
///
/// A blob that cannot be removed is logged and left behind; the rows are
/// already gone at that point.
pub fn remove_old_jobs(
    db: &Database,
    blobs: &BlobStore,
    now: DateTime<Utc>,
    retention_days: u32,
) -> Result<u64, TaskError> {
    let cutoff = Duration::try_days(i64::from(retention_days))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or(TaskError::OutOfRange {
            field: "retention_days",
            value: i64::from(retention_days),
        })?;
    let deleted = job_repo::delete_finished_before(db, cutoff)?;

    for job in &deleted {
        remove_blob(blobs, job);
    }

    if !deleted.is_empty() {
        log::info!(
            "Removed {} job(s) finished before {}",
            deleted.len(),
            cutoff.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(deleted.len() as u64)
}

/// Deletes one job with its reports and owned blob. Returns whether it existed.
pub fn delete_job(db: &Database, blobs: &BlobStore, job_id: JobId) -> Result<bool, TaskError> {
    let Some(deleted) = job_repo::delete(db, job_id)? else {
        return Ok(false);
    };
    remove_blob(blobs, &deleted);
    log::info!("Deleted job {}", job_id);
    Ok(true)
}

fn remove_blob(blobs: &BlobStore, job: &DeletedJob) {
    let Some(path) = &job.file_path else {
        return;
    };
    match blobs.remove(path) {
        Ok(true) => {}
        Ok(false) => log::debug!("Blob of job {} was already gone", job.id),
        Err(e) => log::error!("Failed to remove blob of job {}: {}", job.id, e),
    }
}
