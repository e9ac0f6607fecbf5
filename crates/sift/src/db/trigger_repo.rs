//! Periodic trigger repository — the `periodic_triggers` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::maintenance::{PeriodicUpdateTrigger, TriggerTask};

fn trigger_from_row(row: &Row<'_>) -> Result<PeriodicUpdateTrigger, DatabaseError> {
    let task: String = row.get("task")?;
    let interval_seconds: i64 = row.get("interval_seconds")?;
    let last_run_at: Option<String> = row.get("last_run_at")?;

    Ok(PeriodicUpdateTrigger {
        name: row.get("name")?,
        task: task.parse::<TriggerTask>().map_err(|reason| DatabaseError::InvalidValue {
            column: "task",
            value: task.clone(),
            reason,
        })?,
        config_pk: row.get("config_pk")?,
        queue: row.get("queue")?,
        interval_seconds: interval_seconds.max(0) as u64,
        enabled: row.get("enabled")?,
        last_run_at: last_run_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

pub fn insert(db: &Database, trigger: &PeriodicUpdateTrigger) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO periodic_triggers (name, task, config_pk, queue, interval_seconds,
             enabled, last_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                trigger.name,
                trigger.task.as_str(),
                trigger.config_pk,
                trigger.queue,
                trigger.interval_seconds as i64,
                trigger.enabled,
                trigger.last_run_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_name(
    db: &Database,
    name: &str,
) -> Result<Option<PeriodicUpdateTrigger>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM periodic_triggers WHERE name = ?1")?;
        let row = stmt
            .query_row(params![name], |row| Ok(trigger_from_row(row)))
            .optional()?;
        row.transpose()
    })
}

/// Enabled triggers of `task`, optionally restricted to one queue.
pub fn list_enabled(
    db: &Database,
    task: TriggerTask,
    queue: Option<&str>,
) -> Result<Vec<PeriodicUpdateTrigger>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM periodic_triggers
             WHERE enabled = 1 AND task = ?1 AND (?2 IS NULL OR queue = ?2)
             ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![task.as_str(), queue], |row| Ok(trigger_from_row(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    })
}

/// Enabled triggers whose interval has elapsed at `now`.
pub fn list_due(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<PeriodicUpdateTrigger>, DatabaseError> {
    let all = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM periodic_triggers WHERE enabled = 1 ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok(trigger_from_row(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect::<Result<Vec<_>, _>>()
    })?;
    Ok(all.into_iter().filter(|t| t.is_due(now)).collect())
}

/// Stamps `last_run_at`.
pub fn mark_run(db: &Database, name: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE periodic_triggers SET last_run_at = ?2 WHERE name = ?1",
            params![name, format_timestamp(&at)],
        )?;
        Ok(())
    })
}

pub fn set_enabled(db: &Database, name: &str, enabled: bool) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE periodic_triggers SET enabled = ?2 WHERE name = ?1",
            params![name, enabled],
        )?;
        Ok(changed > 0)
    })
}

/// Applies `enabled &= repo_downloader_enabled` to every `update` trigger.
///
/// Returns how many triggers were switched off.
pub fn align_with_downloader(
    db: &Database,
    repo_downloader_enabled: bool,
) -> Result<usize, DatabaseError> {
    if repo_downloader_enabled {
        return Ok(0);
    }
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE periodic_triggers SET enabled = 0 WHERE task = ?1 AND enabled = 1",
            params![TriggerTask::Update.as_str()],
        )?;
        Ok(changed)
    })
}
