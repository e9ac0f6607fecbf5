//! Plugin report repository — the `plugin_reports` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::JobId;
use crate::plugin::{PluginKind, PluginReport, ReportStatus};

fn report_from_row(row: &Row<'_>) -> Result<PluginReport, DatabaseError> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let report: String = row.get("report")?;
    let errors: String = row.get("errors")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;

    Ok(PluginReport {
        job_id: row.get("job_id")?,
        config_name: row.get("config_name")?,
        kind: kind.parse::<PluginKind>().map_err(|reason| DatabaseError::InvalidValue {
            column: "kind",
            value: kind.clone(),
            reason,
        })?,
        status: status
            .parse::<ReportStatus>()
            .map_err(|reason| DatabaseError::InvalidValue {
                column: "status",
                value: status.clone(),
                reason,
            })?,
        report: serde_json::from_str(&report)?,
        errors: serde_json::from_str(&errors)?,
        task_id: row.get("task_id")?,
        start_time: parse_timestamp(&start_time)?,
        end_time: end_time.as_deref().map(parse_timestamp).transpose()?,
    })
}

/// Claims the report for `task_id` and marks it `running`.
///
/// A new or `pending` report is claimed, and so is one already `running`
/// under the same `task_id` (the task was redelivered). A finished report,
/// or one running under another task, is left untouched. Returns whether
/// the claim happened.
pub fn start(
    db: &Database,
    job_id: JobId,
    config_name: &str,
    kind: PluginKind,
    task_id: &str,
    start_time: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO plugin_reports (job_id, config_name, kind, status, task_id, start_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(job_id, config_name) DO UPDATE SET
                status = excluded.status,
                task_id = excluded.task_id,
                start_time = excluded.start_time,
                report = '{}',
                errors = '[]',
                end_time = NULL
             WHERE plugin_reports.status = ?7
                OR (plugin_reports.status = ?4 AND plugin_reports.task_id = excluded.task_id)",
            params![
                job_id,
                config_name,
                kind.as_str(),
                ReportStatus::Running.as_str(),
                task_id,
                format_timestamp(&start_time),
                ReportStatus::Pending.as_str(),
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Records the outcome of a run. Only a `pending` or `running` report is
/// updated; returns whether the write happened.
pub fn finish(
    db: &Database,
    job_id: JobId,
    config_name: &str,
    status: ReportStatus,
    report: &Value,
    errors: &[String],
    end_time: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let report = serde_json::to_string(report)?;
    let errors = serde_json::to_string(errors)?;
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE plugin_reports SET status = ?3, report = ?4, errors = ?5, end_time = ?6
             WHERE job_id = ?1 AND config_name = ?2 AND status IN (?7, ?8)",
            params![
                job_id,
                config_name,
                status.as_str(),
                report,
                errors,
                format_timestamp(&end_time),
                ReportStatus::Pending.as_str(),
                ReportStatus::Running.as_str(),
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn find(
    db: &Database,
    job_id: JobId,
    config_name: &str,
) -> Result<Option<PluginReport>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM plugin_reports WHERE job_id = ?1 AND config_name = ?2")?;
        let row = stmt
            .query_row(params![job_id, config_name], |row| Ok(report_from_row(row)))
            .optional()?;
        row.transpose()
    })
}

/// Every report of a job, ordered by config name.
pub fn list_for_job(db: &Database, job_id: JobId) -> Result<Vec<PluginReport>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM plugin_reports WHERE job_id = ?1 ORDER BY config_name")?;
        let rows = stmt
            .query_map(params![job_id], |row| Ok(report_from_row(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    })
}

/// Just the statuses of a job's reports, for the final-status fold.
pub fn statuses_for_job(db: &Database, job_id: JobId) -> Result<Vec<ReportStatus>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status FROM plugin_reports WHERE job_id = ?1")?;
        let raw = stmt
            .query_map(params![job_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|s| {
                s.parse::<ReportStatus>()
                    .map_err(|reason| DatabaseError::InvalidValue {
                        column: "status",
                        value: s.clone(),
                        reason,
                    })
            })
            .collect()
    })
}
