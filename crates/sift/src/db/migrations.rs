//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. Column additions are handled conditionally
//! so that a database touched by an older build can be upgraded in place.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN — skip if column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_plugin_configs_table",
        sql: include_str!("sql/002_create_plugin_configs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_plugin_reports_table",
        sql: include_str!("sql/003_create_plugin_reports.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_periodic_triggers_table",
        sql: include_str!("sql/004_create_periodic_triggers.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "add_scan_mode_to_jobs",
        sql: include_str!("sql/005_add_scan_mode.sql"),
        kind: MigrationKind::AddColumn {
            table: "jobs",
            column: "scan_mode",
        },
    },
    Migration {
        version: 6,
        description: "add_scan_check_time_to_jobs",
        sql: include_str!("sql/006_add_scan_check_time.sql"),
        kind: MigrationKind::AddColumn {
            table: "jobs",
            column: "scan_check_time",
        },
    },
    Migration {
        version: 7,
        description: "add_max_size_report_to_plugin_configs",
        sql: include_str!("sql/007_add_max_size_report.sql"),
        kind: MigrationKind::AddColumn {
            table: "plugin_configs",
            column: "max_size_report",
        },
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
        };

        if should_run {
            conn.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::info!(
                "Skipping migration v{} (column already present)",
                migration.version
            );
        }

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

/// Checks whether a column exists on a table using `PRAGMA table_info`.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    // Identifier goes into the PRAGMA verbatim.
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = migrated();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = migrated();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_column_exists_check() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE test_tbl (id TEXT, name TEXT);")
            .unwrap();

        assert!(column_exists(&conn, "test_tbl", "id").unwrap());
        assert!(!column_exists(&conn, "test_tbl", "missing").unwrap());
        assert!(column_exists(&conn, "bad;name", "id").is_err());
    }

    #[test]
    fn test_jobs_table_has_scan_columns() {
        let conn = migrated();
        assert!(column_exists(&conn, "jobs", "scan_mode").unwrap());
        assert!(column_exists(&conn, "jobs", "scan_check_time").unwrap());
        assert!(column_exists(&conn, "plugin_configs", "max_size_report").unwrap());
    }

    #[test]
    fn test_add_column_skipped_when_present() {
        // Simulate a database whose jobs table was created with scan_mode already.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'pending',
                md5 TEXT,
                is_sample INTEGER NOT NULL DEFAULT 0,
                file_name TEXT,
                file_mimetype TEXT,
                file_path TEXT,
                observable_name TEXT,
                observable_classification TEXT,
                received_request_time TEXT NOT NULL,
                finished_analysis_time TEXT,
                process_time REAL,
                scan_mode INTEGER NOT NULL DEFAULT 2
            );",
        )
        .unwrap();

        run_all(&conn).unwrap();
        assert!(column_exists(&conn, "jobs", "scan_check_time").unwrap());
    }

    #[test]
    fn test_reports_cascade_with_jobs() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO jobs (status, received_request_time) VALUES ('pending', '2026-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO plugin_reports (job_id, config_name, kind, start_time) VALUES (1, 'a', 'analyzer', '2026-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM jobs WHERE id = 1", []).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM plugin_reports", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
