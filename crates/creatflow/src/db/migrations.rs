//! Versioned schema migrations, recorded in `_migrations`.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_catalog_tables",
        sql: include_str!("sql/001_create_catalog.sql"),
    },
    Migration {
        version: 2,
        description: "create_jobs_and_generated_assets",
        sql: include_str!("sql/002_create_jobs.sql"),
    },
    Migration {
        version: 3,
        description: "create_task_queue_tables",
        sql: include_str!("sql/003_create_tasks.sql"),
    },
];

/// Applies every migration newer than the recorded schema version. Each
/// one commits together with its `_migrations` row.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = schema_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    for migration in pending {
        log::info!(
            "Applying schema v{} ({})",
            migration.version,
            migration.description
        );
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Highest applied migration, 0 on a fresh store.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh();
        run_all(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_job_progress_is_bounded() {
        let conn = fresh();
        run_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO projects (id, user_id, created_at, updated_at) VALUES ('p1', 'u1', 'x', 'x')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO jobs (id, project_id, user_id, progress, created_at, updated_at)
             VALUES ('j1', 'p1', 'u1', 101, 'x', 'x')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_generated_asset_requires_job() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO generated_assets (id, job_id, original_asset_id, storage_path, file_type,
             width, height, created_at, updated_at)
             VALUES ('g1', 'missing', 'a1', 'x.png', 'image/png', 1, 1, 'x', 'x')",
            [],
        );
        assert!(result.is_err());
    }
}
