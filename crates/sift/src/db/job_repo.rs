//! Job repository — the `jobs` and `job_plugins` tables.
//!
//! Status writes are conditional: every update that moves a job carries a
//! `status IN (...)` guard so a terminal job is never touched again, and the
//! affected-row count tells the caller whether it won.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::{Artifact, Job, JobId, JobStatus, ScanMode};

fn job_from_row(row: &Row<'_>) -> Result<Job, DatabaseError> {
    let status: String = row.get("status")?;
    let is_sample: bool = row.get("is_sample")?;
    let scan_mode: i64 = row.get("scan_mode")?;
    let scan_check_time: Option<i64> = row.get("scan_check_time")?;
    let received: String = row.get("received_request_time")?;
    let finished: Option<String> = row.get("finished_analysis_time")?;

    let artifact = if is_sample {
        let path: Option<String> = row.get("file_path")?;
        Artifact::File {
            name: row.get::<_, Option<String>>("file_name")?.unwrap_or_default(),
            mimetype: row.get("file_mimetype")?,
            path: PathBuf::from(path.unwrap_or_default()),
        }
    } else {
        Artifact::Observable {
            name: row
                .get::<_, Option<String>>("observable_name")?
                .unwrap_or_default(),
            classification: row
                .get::<_, Option<String>>("observable_classification")?
                .unwrap_or_default(),
        }
    };

    Ok(Job {
        id: row.get("id")?,
        status: status
            .parse::<JobStatus>()
            .map_err(|reason| DatabaseError::InvalidValue {
                column: "status",
                value: status.clone(),
                reason,
            })?,
        md5: row.get("md5")?,
        artifact,
        scan_mode: ScanMode::from_i64(scan_mode).ok_or_else(|| DatabaseError::InvalidValue {
            column: "scan_mode",
            value: scan_mode.to_string(),
            reason: "expected 1 or 2".to_string(),
        })?,
        scan_check_time: scan_check_time.map(Duration::seconds),
        received_request_time: parse_timestamp(&received)?,
        finished_analysis_time: finished.as_deref().map(parse_timestamp).transpose()?,
        process_time: row.get("process_time")?,
    })
}

/// `?start, ?start+1, ...` for an `IN (...)` list of `count` values.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    param_values: &[Box<dyn ToSql>],
) -> Result<Vec<Job>, DatabaseError> {
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), |row| Ok(job_from_row(row)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().collect()
}

/// Inserts a job together with its plugin plan. Returns the assigned id.
///
/// `job.id` is ignored.
pub fn insert(db: &Database, job: &Job, plan: &[String]) -> Result<JobId, DatabaseError> {
    let (file_name, file_mimetype, file_path, observable_name, observable_classification) =
        match &job.artifact {
            Artifact::File {
                name,
                mimetype,
                path,
            } => (
                Some(name.as_str()),
                mimetype.as_deref(),
                Some(path.to_string_lossy().into_owned()),
                None,
                None,
            ),
            Artifact::Observable {
                name,
                classification,
            } => (None, None, None, Some(name.as_str()), Some(classification.as_str())),
        };

    db.with_transaction(|tx| {
        tx.execute(
            "INSERT INTO jobs (status, md5, is_sample, file_name, file_mimetype, file_path,
             observable_name, observable_classification, received_request_time,
             finished_analysis_time, process_time, scan_mode, scan_check_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.status.as_str(),
                job.md5,
                job.is_sample(),
                file_name,
                file_mimetype,
                file_path,
                observable_name,
                observable_classification,
                format_timestamp(&job.received_request_time),
                job.finished_analysis_time.as_ref().map(format_timestamp),
                job.process_time,
                job.scan_mode.as_i64(),
                job.scan_check_time.map(|d| d.num_seconds()),
            ],
        )?;
        let id = tx.last_insert_rowid();

        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO job_plugins (job_id, config_name) VALUES (?1, ?2)")?;
        for name in plan {
            stmt.execute(params![id, name])?;
        }

        Ok(id)
    })
}

/// Finds a job by its id.
pub fn find_by_id(db: &Database, id: JobId) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let row = stmt
            .query_row(params![id], |row| Ok(job_from_row(row)))
            .optional()?;
        row.transpose()
    })
}

/// Like [`find_by_id`] but a missing row is an error.
pub fn get(db: &Database, id: JobId) -> Result<Job, DatabaseError> {
    find_by_id(db, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "job",
        key: id.to_string(),
    })
}

/// Names of the plugin configs selected for a job, sorted.
pub fn plan(db: &Database, id: JobId) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT config_name FROM job_plugins WHERE job_id = ?1 ORDER BY config_name",
        )?;
        let names = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    })
}

/// Writes `status` unless the job is already terminal.
///
/// Returns whether the row was updated.
pub fn update_status_if_in_flight(
    db: &Database,
    id: JobId,
    status: JobStatus,
) -> Result<bool, DatabaseError> {
    let finals = JobStatus::final_statuses();
    let sql = format!(
        "UPDATE jobs SET status = ?2 WHERE id = ?1 AND status NOT IN ({})",
        placeholders(3, finals.len())
    );

    let mut param_values: Vec<Box<dyn ToSql>> = vec![Box::new(id), Box::new(status.as_str())];
    param_values.extend(finals.iter().map(|s| Box::new(s.as_str()) as Box<dyn ToSql>));

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let changed = conn.execute(&sql, params_ref.as_slice())?;
        Ok(changed > 0)
    })
}

/// Moves a `pending` job to `status`. Returns `false` when the job has
/// already left `pending`, so only one pipeline can start it.
pub fn start_if_pending(db: &Database, id: JobId, status: JobStatus) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2 WHERE id = ?1 AND status = ?3",
            params![id, status.as_str(), JobStatus::Pending.as_str()],
        )?;
        Ok(changed > 0)
    })
}

/// Moves a job to a terminal status, writing exactly `status`,
/// `finished_analysis_time` and `process_time`.
///
/// Only applies when the job's current status is one of `from`. Returns
/// whether the row was updated; `false` means another writer got there first.
pub fn finish(
    db: &Database,
    id: JobId,
    status: JobStatus,
    finished: DateTime<Utc>,
    process_time: f64,
    from: &[JobStatus],
) -> Result<bool, DatabaseError> {
    if from.is_empty() {
        return Ok(false);
    }

    let sql = format!(
        "UPDATE jobs SET status = ?2, finished_analysis_time = ?3, process_time = ?4
         WHERE id = ?1 AND status IN ({})",
        placeholders(5, from.len())
    );

    let mut param_values: Vec<Box<dyn ToSql>> = vec![
        Box::new(id),
        Box::new(status.as_str()),
        Box::new(format_timestamp(&finished)),
        Box::new(process_time),
    ];
    param_values.extend(from.iter().map(|s| Box::new(s.as_str()) as Box<dyn ToSql>));

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let changed = conn.execute(&sql, params_ref.as_slice())?;
        Ok(changed > 0)
    })
}

/// Jobs in any of `statuses` received strictly before `received_before`.
pub fn find_received_before(
    db: &Database,
    statuses: &[JobStatus],
    received_before: DateTime<Utc>,
) -> Result<Vec<Job>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM jobs WHERE received_request_time < ?1 AND status IN ({}) ORDER BY id",
        placeholders(2, statuses.len())
    );
    let mut param_values: Vec<Box<dyn ToSql>> = vec![Box::new(format_timestamp(&received_before))];
    param_values.extend(statuses.iter().map(|s| Box::new(s.as_str()) as Box<dyn ToSql>));

    db.with_conn(|conn| query_jobs(conn, &sql, &param_values))
}

/// Jobs with this md5 received at or after `received_after` that did not
/// end in `failed` or `killed`, most recent first.
pub fn find_reuse_candidates(
    db: &Database,
    md5: &str,
    received_after: DateTime<Utc>,
) -> Result<Vec<Job>, DatabaseError> {
    let param_values: Vec<Box<dyn ToSql>> = vec![
        Box::new(md5.to_string()),
        Box::new(format_timestamp(&received_after)),
        Box::new(JobStatus::Failed.as_str()),
        Box::new(JobStatus::Killed.as_str()),
    ];

    db.with_conn(|conn| {
        query_jobs(
            conn,
            "SELECT * FROM jobs WHERE md5 = ?1 AND received_request_time >= ?2
             AND status NOT IN (?3, ?4)
             ORDER BY received_request_time DESC, id DESC",
            &param_values,
        )
    })
}

/// A row removed by [`delete_finished_before`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedJob {
    pub id: JobId,
    /// Owned blob, for sample jobs.
    pub file_path: Option<PathBuf>,
}

/// Deletes every job finished strictly before `cutoff`, with its plan and
/// reports. Returns the removed rows so their blobs can be cleaned up.
pub fn delete_finished_before(
    db: &Database,
    cutoff: DateTime<Utc>,
) -> Result<Vec<DeletedJob>, DatabaseError> {
    let cutoff = format_timestamp(&cutoff);
    db.with_transaction(|tx| {
        let deleted = {
            let mut stmt = tx.prepare(
                "SELECT id, file_path FROM jobs
                 WHERE finished_analysis_time IS NOT NULL AND finished_analysis_time < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                let path: Option<String> = row.get(1)?;
                Ok(DeletedJob {
                    id: row.get(0)?,
                    file_path: path.filter(|p| !p.is_empty()).map(PathBuf::from),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        tx.execute(
            "DELETE FROM jobs
             WHERE finished_analysis_time IS NOT NULL AND finished_analysis_time < ?1",
            params![cutoff],
        )?;

        Ok(deleted)
    })
}

/// Deletes one job. Returns the removed row, if it existed.
pub fn delete(db: &Database, id: JobId) -> Result<Option<DeletedJob>, DatabaseError> {
    db.with_transaction(|tx| {
        let path: Option<Option<String>> = tx
            .query_row(
                "SELECT file_path FROM jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(path) = path else {
            return Ok(None);
        };

        tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(Some(DeletedJob {
            id,
            file_path: path.filter(|p| !p.is_empty()).map(PathBuf::from),
        }))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
