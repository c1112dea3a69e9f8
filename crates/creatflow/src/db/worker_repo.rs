//! Worker registry for the monitoring surface.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRow {
    pub id: String,
    pub hostname: String,
    pub pid: u32,
    pub slot: u32,
    /// Comma separated queue names.
    pub queues: String,
    pub started_at: String,
    pub last_heartbeat: String,
    pub processed: u64,
    pub failed: u64,
    pub current_task: Option<String>,
    pub stopped_at: Option<String>,
}

impl WorkerRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            hostname: row.get("hostname")?,
            pid: row.get("pid")?,
            slot: row.get("slot")?,
            queues: row.get("queues")?,
            started_at: row.get("started_at")?,
            last_heartbeat: row.get("last_heartbeat")?,
            processed: row.get("processed")?,
            failed: row.get("failed")?,
            current_task: row.get("current_task")?,
            stopped_at: row.get("stopped_at")?,
        })
    }
}

pub fn register(db: &Database, worker: &WorkerRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO workers (id, hostname, pid, slot, queues, started_at, last_heartbeat,
             processed, failed, current_task, stopped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                worker.id,
                worker.hostname,
                worker.pid,
                worker.slot,
                worker.queues,
                worker.started_at,
                worker.last_heartbeat,
                worker.processed,
                worker.failed,
                worker.current_task,
                worker.stopped_at,
            ],
        )?;
        Ok(())
    })
}

/// Refreshes the heartbeat and the task currently held.
pub fn heartbeat(
    db: &Database,
    id: &str,
    current_task: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE workers SET last_heartbeat = ?2, current_task = ?3 WHERE id = ?1",
            params![id, now, current_task],
        )?;
        Ok(())
    })
}

/// Counts one finished task and clears the current task.
pub fn record_outcome(
    db: &Database,
    id: &str,
    succeeded: bool,
    now: &str,
) -> Result<(), DatabaseError> {
    let column = if succeeded { "processed" } else { "failed" };
    db.with_conn(|conn| {
        conn.execute(
            &format!(
                "UPDATE workers SET {col} = {col} + 1, current_task = NULL, last_heartbeat = ?2
                 WHERE id = ?1",
                col = column
            ),
            params![id, now],
        )?;
        Ok(())
    })
}

pub fn mark_stopped(db: &Database, id: &str, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE workers SET stopped_at = ?2, current_task = NULL WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    })
}

pub fn list(db: &Database) -> Result<Vec<WorkerRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM workers ORDER BY started_at, slot")?;
        let rows = stmt
            .query_map([], WorkerRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
