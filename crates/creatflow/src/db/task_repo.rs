//! Task repository: rows of the durable queue.
//!
//! Functions take a `&Connection` so the broker can compose them inside a
//! single transaction. Every state-changing update is guarded on the
//! expected current state and returns the number of rows it touched.

use rusqlite::{params, params_from_iter, Connection, Row};

use super::DatabaseError;

/// States in which a task is waiting to be claimed.
const READY_STATES: &str = "'pending', 'retry'";
/// States in which a task is leased by a worker.
const LEASED_STATES: &str = "'started', 'progress'";

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub origin_queue: String,
    pub payload: String,
    pub state: String,
    pub retries: u32,
    pub deliveries: u32,
    pub available_at: String,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<String>,
    pub started_at: Option<String>,
    pub progress: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_trace: Option<String>,
    pub revoked: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            queue: row.get("queue")?,
            origin_queue: row.get("origin_queue")?,
            payload: row.get("payload")?,
            state: row.get("state")?,
            retries: row.get("retries")?,
            deliveries: row.get("deliveries")?,
            available_at: row.get("available_at")?,
            lease_owner: row.get("lease_owner")?,
            lease_expires_at: row.get("lease_expires_at")?,
            started_at: row.get("started_at")?,
            progress: row.get("progress")?,
            result: row.get("result")?,
            error: row.get("error")?,
            error_trace: row.get("error_trace")?,
            revoked: row.get("revoked")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(conn: &Connection, task: &TaskRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tasks (id, kind, queue, origin_queue, payload, state, retries, deliveries,
         available_at, lease_owner, lease_expires_at, started_at, progress, result, error,
         error_trace, revoked, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            task.id,
            task.kind,
            task.queue,
            task.origin_queue,
            task.payload,
            task.state,
            task.retries,
            task.deliveries,
            task.available_at,
            task.lease_owner,
            task.lease_expires_at,
            task.started_at,
            task.progress,
            task.result,
            task.error,
            task.error_trace,
            task.revoked,
            task.created_at,
            task.updated_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], TaskRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Claimable tasks on the given queues, oldest due first.
pub fn ready(
    conn: &Connection,
    queues: &[&str],
    now: &str,
    limit: u32,
) -> Result<Vec<TaskRow>, DatabaseError> {
    if queues.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (0..queues.len()).map(|i| format!("?{}", i + 3)).collect();
    let sql = format!(
        "SELECT * FROM tasks
         WHERE state IN ({}) AND revoked = 0 AND available_at <= ?1 AND queue IN ({})
         ORDER BY available_at, created_at, rowid LIMIT ?2",
        READY_STATES,
        placeholders.join(", ")
    );

    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(now.to_string()), Box::new(limit)];
    values.extend(queues.iter().map(|q| Box::new(q.to_string()) as Box<dyn rusqlite::types::ToSql>));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), TaskRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of starts of `kind` strictly after `since`.
pub fn starts_since(conn: &Connection, kind: &str, since: &str) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM task_starts WHERE kind = ?1 AND started_at > ?2",
        params![kind, since],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn record_start(conn: &Connection, kind: &str, at: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO task_starts (kind, started_at) VALUES (?1, ?2)",
        params![kind, at],
    )?;
    Ok(())
}

pub fn prune_starts(conn: &Connection, before: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM task_starts WHERE started_at <= ?1",
        params![before],
    )?)
}

/// Leases a ready task to `owner`.
pub fn lease(
    conn: &Connection,
    id: &str,
    owner: &str,
    lease_expires_at: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        &format!(
            "UPDATE tasks SET state = 'started', lease_owner = ?2, lease_expires_at = ?3,
             started_at = ?4, deliveries = deliveries + 1, updated_at = ?4
             WHERE id = ?1 AND revoked = 0 AND state IN ({})",
            READY_STATES
        ),
        params![id, owner, lease_expires_at, now],
    )?)
}

/// Acknowledges a leased task held by `owner`.
pub fn complete(
    conn: &Connection,
    id: &str,
    owner: &str,
    result: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        &format!(
            "UPDATE tasks SET state = 'success', result = ?3, lease_owner = NULL,
             lease_expires_at = NULL, updated_at = ?4
             WHERE id = ?1 AND lease_owner = ?2 AND state IN ({})",
            LEASED_STATES
        ),
        params![id, owner, result, now],
    )?)
}

pub fn set_progress(
    conn: &Connection,
    id: &str,
    owner: &str,
    progress: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        &format!(
            "UPDATE tasks SET state = 'progress', progress = ?3, updated_at = ?4
             WHERE id = ?1 AND lease_owner = ?2 AND state IN ({})",
            LEASED_STATES
        ),
        params![id, owner, progress, now],
    )?)
}

/// Re-schedules a leased task for another attempt. Deliveries restart at
/// zero because the redelivery allowance is per attempt.
pub fn schedule_retry(
    conn: &Connection,
    id: &str,
    owner: &str,
    error: &str,
    available_at: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        &format!(
            "UPDATE tasks SET state = 'retry', retries = retries + 1, deliveries = 0,
             available_at = ?4, error = ?3, lease_owner = NULL, lease_expires_at = NULL,
             updated_at = ?5
             WHERE id = ?1 AND lease_owner = ?2 AND state IN ({})",
            LEASED_STATES
        ),
        params![id, owner, error, available_at, now],
    )?)
}

/// Terminal failure of a leased task, moving it to `queue`.
///
/// With `owner = None` the lease holder is not checked (the reaper acts on
/// leases whose holder is gone).
pub fn fail(
    conn: &Connection,
    id: &str,
    owner: Option<&str>,
    queue: &str,
    error: &str,
    error_trace: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    let base = format!(
        "UPDATE tasks SET state = 'failure', queue = ?2, error = ?3, error_trace = ?4,
         lease_owner = NULL, lease_expires_at = NULL, updated_at = ?5
         WHERE id = ?1 AND state IN ({})",
        LEASED_STATES
    );
    let changed = match owner {
        Some(owner) => conn.execute(
            &format!("{} AND lease_owner = ?6", base),
            params![id, queue, error, error_trace, now, owner],
        )?,
        None => conn.execute(&base, params![id, queue, error, error_trace, now])?,
    };
    Ok(changed)
}

/// Returns a lost delivery to the ready set.
pub fn requeue(conn: &Connection, id: &str, now: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        &format!(
            "UPDATE tasks SET state = 'pending', lease_owner = NULL, lease_expires_at = NULL,
             available_at = ?2, updated_at = ?2
             WHERE id = ?1 AND state IN ({})",
            LEASED_STATES
        ),
        params![id, now],
    )?)
}

/// Leased tasks whose lease ran out before `now`.
pub fn expired_leases(conn: &Connection, now: &str) -> Result<Vec<TaskRow>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM tasks WHERE state IN ({}) AND lease_expires_at < ?1
         ORDER BY lease_expires_at",
        LEASED_STATES
    ))?;
    let rows = stmt
        .query_map(params![now], TaskRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Revokes a task. Ready tasks become `revoked`; leased tasks are only
/// flagged. Returns false for unknown or already finished tasks.
pub fn revoke(conn: &Connection, id: &str, now: &str) -> Result<bool, DatabaseError> {
    let pending = conn.execute(
        &format!(
            "UPDATE tasks SET state = 'revoked', revoked = 1, updated_at = ?2
             WHERE id = ?1 AND state IN ({})",
            READY_STATES
        ),
        params![id, now],
    )?;
    if pending > 0 {
        return Ok(true);
    }
    let started = conn.execute(
        &format!(
            "UPDATE tasks SET revoked = 1, updated_at = ?2 WHERE id = ?1 AND state IN ({})",
            LEASED_STATES
        ),
        params![id, now],
    )?;
    Ok(started > 0)
}

pub fn leased(conn: &Connection) -> Result<Vec<TaskRow>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM tasks WHERE state IN ({}) ORDER BY started_at",
        LEASED_STATES
    ))?;
    let rows = stmt
        .query_map([], TaskRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn in_queue(conn: &Connection, queue: &str) -> Result<Vec<TaskRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE queue = ?1 ORDER BY updated_at DESC")?;
    let rows = stmt
        .query_map(params![queue], TaskRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ready-task count per queue, plus everything parked in `dead_letter`.
pub fn depths(conn: &Connection) -> Result<Vec<(String, u64)>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT queue, COUNT(*) FROM tasks
         WHERE state IN ({}) OR queue = 'dead_letter'
         GROUP BY queue",
        READY_STATES
    ))?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
