//! Plugin config repository — the `plugin_configs` table.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::{Map, Value};

use super::{Database, DatabaseError};
use crate::plugin::{PluginConfig, PluginKind};

fn config_from_row(row: &Row<'_>) -> Result<PluginConfig, DatabaseError> {
    let kind: String = row.get("kind")?;
    let params: String = row.get("params")?;
    let soft_time_limit: i64 = row.get("soft_time_limit")?;
    let max_size_report: Option<i64> = row.get("max_size_report")?;

    Ok(PluginConfig {
        name: row.get("name")?,
        kind: kind.parse::<PluginKind>().map_err(|reason| DatabaseError::InvalidValue {
            column: "kind",
            value: kind.clone(),
            reason,
        })?,
        plugin_path: row.get("plugin_path")?,
        queue: row.get("queue")?,
        disabled: row.get("disabled")?,
        params: serde_json::from_str::<Map<String, Value>>(&params)?,
        soft_time_limit: soft_time_limit.max(0) as u64,
        max_size_report: max_size_report.map(|size| size.max(0) as usize),
    })
}

/// Inserts a new plugin config. Fails if the name is taken.
pub fn insert(db: &Database, config: &PluginConfig) -> Result<(), DatabaseError> {
    let params = serde_json::to_string(&config.params)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO plugin_configs (name, kind, plugin_path, queue, disabled, params,
             soft_time_limit, max_size_report)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                config.name,
                config.kind.as_str(),
                config.plugin_path,
                config.queue,
                config.disabled,
                params,
                config.soft_time_limit as i64,
                config.max_size_report.map(|size| size as i64),
            ],
        )?;
        Ok(())
    })
}

/// Finds a plugin config by name.
pub fn find_by_name(db: &Database, name: &str) -> Result<Option<PluginConfig>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM plugin_configs WHERE name = ?1")?;
        let row = stmt
            .query_row(params![name], |row| Ok(config_from_row(row)))
            .optional()?;
        row.transpose()
    })
}

/// Like [`find_by_name`] but a missing row is an error.
pub fn get(db: &Database, name: &str) -> Result<PluginConfig, DatabaseError> {
    find_by_name(db, name)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "plugin config",
        key: name.to_string(),
    })
}

/// Toggles `disabled`. Returns whether a row was updated.
pub fn set_disabled(db: &Database, name: &str, disabled: bool) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE plugin_configs SET disabled = ?2 WHERE name = ?1",
            params![name, disabled],
        )?;
        Ok(changed > 0)
    })
}

/// Lists every plugin config, ordered by name.
pub fn list(db: &Database) -> Result<Vec<PluginConfig>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM plugin_configs ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok(config_from_row(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    })
}

/// Deletes a plugin config. Returns whether it existed.
pub fn delete(db: &Database, name: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM plugin_configs WHERE name = ?1", params![name])?;
        Ok(changed > 0)
    })
}
