//! Job rows. Status changes are guarded on the expected current status so
//! the state machine cannot be bypassed by concurrent writers.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub kind: String,
    pub status: String,
    pub progress: u8,
    pub error: Option<String>,
    pub task_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            user_id: row.get("user_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            error: row.get("error")?,
            task_id: row.get("task_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, project_id, user_id, kind, status, progress, error, task_id,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            job.id,
            job.project_id,
            job.user_id,
            job.kind,
            job.status,
            job.progress,
            job.error,
            job.task_id,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?)
}

/// Moves a job to `status` if it is currently in one of `expected`.
///
/// `progress` is written as given. A `None` error keeps the stored one.
/// Returns the number of rows changed (0 or 1).
pub fn set_status(
    conn: &Connection,
    id: &str,
    expected: &[&str],
    status: &str,
    progress: u8,
    error: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    if expected.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<String> = (0..expected.len()).map(|i| format!("?{}", i + 6)).collect();
    let sql = format!(
        "UPDATE jobs SET status = ?2, progress = ?3, error = COALESCE(?4, error), updated_at = ?5
         WHERE id = ?1 AND status IN ({})",
        placeholders.join(", ")
    );

    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(id.to_string()),
        Box::new(status.to_string()),
        Box::new(progress),
        Box::new(error.map(str::to_string)),
        Box::new(now.to_string()),
    ];
    values.extend(
        expected
            .iter()
            .map(|s| Box::new(s.to_string()) as Box<dyn rusqlite::types::ToSql>),
    );

    Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}

/// Raises progress of a processing job; never lowers it.
pub fn raise_progress(
    conn: &Connection,
    id: &str,
    progress: u8,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE jobs SET progress = MAX(progress, ?2), updated_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, progress.min(100), now],
    )?)
}

/// Records the last failure of a processing job that will be retried.
pub fn record_error(
    conn: &Connection,
    id: &str,
    error: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE jobs SET error = ?2, updated_at = ?3 WHERE id = ?1 AND status = 'processing'",
        params![id, error, now],
    )?)
}

pub fn set_task_id(
    conn: &Connection,
    id: &str,
    task_id: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE jobs SET task_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, task_id, now],
    )?)
}

pub fn find_by_task_id(conn: &Connection, task_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM jobs WHERE task_id = ?1",
            params![task_id],
            JobRow::from_row,
        )
        .optional()?)
}

/// Failed jobs last touched at or before `cutoff`.
pub fn failed_before(conn: &Connection, cutoff: &str) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs WHERE status = 'failed' AND updated_at <= ?1 ORDER BY updated_at",
    )?;
    let rows = stmt
        .query_map(params![cutoff], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes a job; its generated asset rows go with it.
pub fn delete(conn: &Connection, id: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?)
}

pub fn count_by_status(conn: &Connection) -> Result<Vec<(String, u64)>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    const T0: &str = "2026-01-01T00:00:00.000Z";
    const T1: &str = "2026-01-02T00:00:00.000Z";

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, user_id, created_at, updated_at) VALUES ('p1', 'u1', ?1, ?1)",
                params![T0],
            )?;
            insert(
                conn,
                &JobRow {
                    id: "j1".into(),
                    project_id: "p1".into(),
                    user_id: "u1".into(),
                    kind: "generation".into(),
                    status: "pending".into(),
                    progress: 0,
                    error: None,
                    task_id: None,
                    created_at: T0.into(),
                    updated_at: T0.into(),
                },
            )
        })
        .unwrap();
        db
    }

    #[test]
    fn test_guarded_transition() {
        let db = seeded();
        db.with_conn(|conn| {
            assert_eq!(set_status(conn, "j1", &["processing"], "completed", 100, None, T1)?, 0);
            assert_eq!(set_status(conn, "j1", &["pending"], "processing", 10, None, T1)?, 1);

            let job = find_by_id(conn, "j1")?.unwrap();
            assert_eq!((job.status.as_str(), job.progress), ("processing", 10));
            assert_eq!(set_status(conn, "j1", &[], "failed", 0, None, T1)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_progress_never_decreases() {
        let db = seeded();
        db.with_conn(|conn| {
            // not processing yet
            assert_eq!(raise_progress(conn, "j1", 50, T1)?, 0);
            set_status(conn, "j1", &["pending"], "processing", 10, None, T1)?;
            raise_progress(conn, "j1", 50, T1)?;
            raise_progress(conn, "j1", 30, T1)?;
            assert_eq!(find_by_id(conn, "j1")?.unwrap().progress, 50);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_error_kept_unless_replaced() {
        let db = seeded();
        db.with_conn(|conn| {
            set_status(conn, "j1", &["pending"], "processing", 10, None, T0)?;
            record_error(conn, "j1", "ai timeout", T0)?;
            set_status(conn, "j1", &["processing"], "processing", 10, None, T0)?;
            assert_eq!(find_by_id(conn, "j1")?.unwrap().error.as_deref(), Some("ai timeout"));
            set_status(conn, "j1", &["processing"], "failed", 0, Some("gave up"), T0)?;
            assert_eq!(find_by_id(conn, "j1")?.unwrap().error.as_deref(), Some("gave up"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_failed_before_and_delete() {
        let db = seeded();
        db.with_conn(|conn| {
            set_status(conn, "j1", &["pending"], "failed", 0, Some("cancelled"), T0)?;
            assert_eq!(failed_before(conn, T1)?.len(), 1);
            assert!(failed_before(conn, "2025-12-31T00:00:00.000Z")?.is_empty());
            assert_eq!(delete(conn, "j1")?, 1);
            assert!(find_by_id(conn, "j1")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_task_link() {
        let db = seeded();
        db.with_conn(|conn| {
            set_task_id(conn, "j1", "t1", T0)?;
            assert_eq!(find_by_task_id(conn, "t1")?.unwrap().id, "j1");
            assert!(find_by_task_id(conn, "t2")?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
