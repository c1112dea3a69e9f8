//! The broker: enqueue, claim, ack, fail and reap, all against the durable
//! store. Every transition is a single guarded transaction, so any number
//! of worker threads or processes can share one database file.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::clock::Clock;
use super::handler::TaskError;
use super::task::{ActiveTask, ClaimedTask, DeadLetter, FailureOutcome, ReapReport, TaskStatus};
use super::topology::{QueueName, QueueTopology, TaskKind};
use super::QueueError;
use crate::db::task_repo::{self, TaskRow};
use crate::db::{format_ts, Database};

/// Rolling window for per-type rate limits.
const RATE_WINDOW_SECS: i64 = 60;
/// Ready rows inspected per claim; rate-limited kinds are skipped over.
const CLAIM_SCAN_LIMIT: u32 = 32;
/// Upper bound on any scheduling delay so timestamps stay four-digit years.
const MAX_DELAY: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

pub struct Broker {
    db: Database,
    topology: Arc<QueueTopology>,
    clock: Arc<dyn Clock>,
    lease_grace: Duration,
}

impl Broker {
    pub fn new(
        db: Database,
        topology: Arc<QueueTopology>,
        clock: Arc<dyn Clock>,
        lease_grace: Duration,
    ) -> Self {
        Self {
            db,
            topology,
            clock,
            lease_grace,
        }
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn enqueue<P: Serialize>(&self, kind: TaskKind, payload: &P) -> Result<String, QueueError> {
        self.enqueue_in(kind, payload, None)
    }

    /// Enqueues a task that becomes claimable after `countdown`.
    pub fn enqueue_in<P: Serialize>(
        &self,
        kind: TaskKind,
        payload: &P,
        countdown: Option<Duration>,
    ) -> Result<String, QueueError> {
        self.db
            .with_tx(|tx| self.enqueue_on(tx, kind, payload, countdown))
    }

    /// Enqueue on a caller's connection, so the insert commits together
    /// with the caller's own writes.
    pub fn enqueue_on<P: Serialize>(
        &self,
        conn: &Connection,
        kind: TaskKind,
        payload: &P,
        countdown: Option<Duration>,
    ) -> Result<String, QueueError> {
        let now = self.clock.now();
        let queue = self.topology.queue_for(kind).as_str();
        let available_at = after(now, countdown.unwrap_or(Duration::ZERO));
        let id = Uuid::new_v4().to_string();

        task_repo::insert(
            conn,
            &TaskRow {
                id: id.clone(),
                kind: kind.as_str().to_string(),
                queue: queue.to_string(),
                origin_queue: queue.to_string(),
                payload: serde_json::to_string(payload)?,
                state: "pending".to_string(),
                retries: 0,
                deliveries: 0,
                available_at: format_ts(available_at),
                lease_owner: None,
                lease_expires_at: None,
                started_at: None,
                progress: None,
                result: None,
                error: None,
                error_trace: None,
                revoked: false,
                created_at: format_ts(now),
                updated_at: format_ts(now),
            },
        )?;

        debug!("Enqueued {} task {} on {}", kind, id, queue);
        Ok(id)
    }

    /// Atomically leases the oldest due task on `queues` to `worker_id`.
    ///
    /// Kinds at their rate limit are passed over, leaving their tasks for a
    /// later poll. `dead_letter` is never consumed.
    pub fn claim(
        &self,
        queues: &[QueueName],
        worker_id: &str,
    ) -> Result<Option<ClaimedTask>, QueueError> {
        let names: Vec<&str> = queues
            .iter()
            .filter(|q| **q != QueueName::DeadLetter)
            .map(|q| q.as_str())
            .collect();
        if names.is_empty() {
            return Ok(None);
        }

        self.db.with_tx(|tx| {
            let now = self.clock.now();
            let now_s = format_ts(now);
            let window_start = format_ts(now - chrono::Duration::seconds(RATE_WINDOW_SECS));
            task_repo::prune_starts(tx, &window_start)?;

            let mut throttled: HashSet<TaskKind> = HashSet::new();
            for row in task_repo::ready(tx, &names, &now_s, CLAIM_SCAN_LIMIT)? {
                let Some(kind) = TaskKind::parse(&row.kind) else {
                    warn!("Skipping task {} with unknown type '{}'", row.id, row.kind);
                    continue;
                };
                if throttled.contains(&kind) {
                    continue;
                }

                let policy = self.topology.policy(kind);
                if let Some(limit) = policy.rate_limit_per_min {
                    if task_repo::starts_since(tx, kind.as_str(), &window_start)? >= limit {
                        debug!("Rate limit reached for {}", kind);
                        throttled.insert(kind);
                        continue;
                    }
                }

                let expires = after(now, policy.hard_time_limit + self.lease_grace);
                if task_repo::lease(tx, &row.id, worker_id, &format_ts(expires), &now_s)? == 0 {
                    continue;
                }
                task_repo::record_start(tx, kind.as_str(), &now_s)?;

                let leased = task_repo::find_by_id(tx, &row.id)?
                    .ok_or_else(|| QueueError::NotFound(row.id.clone()))?;
                return ClaimedTask::try_from(leased).map(Some);
            }
            Ok(None)
        })
    }

    /// Late acknowledgement. Fails with `LeaseLost` when the delivery was
    /// already reaped or acked, so no task is acknowledged twice.
    pub fn ack(&self, task_id: &str, worker_id: &str, result: &Value) -> Result<(), QueueError> {
        let result = serde_json::to_string(result)?;
        let now = format_ts(self.clock.now());
        let changed = self
            .db
            .with_conn(|conn| task_repo::complete(conn, task_id, worker_id, &result, &now))?;
        if changed == 0 {
            return Err(QueueError::LeaseLost {
                task_id: task_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn update_progress(
        &self,
        task_id: &str,
        worker_id: &str,
        meta: &Value,
    ) -> Result<(), QueueError> {
        let meta = serde_json::to_string(meta)?;
        let now = format_ts(self.clock.now());
        let changed = self
            .db
            .with_conn(|conn| task_repo::set_progress(conn, task_id, worker_id, &meta, &now))?;
        if changed == 0 {
            return Err(QueueError::LeaseLost {
                task_id: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Records a handler failure: schedules a retry while the type's
    /// allowance remains, else fails the task for good.
    pub fn fail(
        &self,
        task: &ClaimedTask,
        worker_id: &str,
        error: &TaskError,
    ) -> Result<FailureOutcome, QueueError> {
        let policy = self.topology.policy(task.kind);
        let now = self.clock.now();

        if let TaskError::Retry(message) = error {
            if let Some(delay) = policy.retry_policy().delay_for(task.retries) {
                let delay = delay.min(MAX_DELAY);
                let changed = self.db.with_conn(|conn| {
                    task_repo::schedule_retry(
                        conn,
                        &task.id,
                        worker_id,
                        message,
                        &format_ts(after(now, delay)),
                        &format_ts(now),
                    )
                })?;
                if changed == 0 {
                    return Err(QueueError::LeaseLost {
                        task_id: task.id.clone(),
                    });
                }
                let attempt = task.retries + 1;
                info!(
                    "Task {} ({}) retry {}/{} in {}s: {}",
                    task.id,
                    task.kind,
                    attempt,
                    policy.max_retries,
                    delay.as_secs(),
                    message
                );
                return Ok(FailureOutcome::Retried { delay, attempt });
            }
        }

        let trace = match error {
            TaskError::Retry(_) => format!(
                "{} exhausted {} retries; last error: {}",
                task.kind,
                task.retries,
                error.message()
            ),
            TaskError::Permanent(_) => format!(
                "{} failed permanently on attempt {}: {}",
                task.kind,
                task.retries + 1,
                error.message()
            ),
        };
        self.finish(task, Some(worker_id), error.message(), &trace)
    }

    /// Fails a delivery without a retry (hard time limit, handler panic).
    pub fn reject(
        &self,
        task: &ClaimedTask,
        worker_id: &str,
        reason: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let trace = format!("{} rejected on attempt {}: {}", task.kind, task.retries + 1, reason);
        self.finish(task, Some(worker_id), reason, &trace)
    }

    fn finish(
        &self,
        task: &ClaimedTask,
        owner: Option<&str>,
        error: &str,
        trace: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let now = format_ts(self.clock.now());
        let (queue, outcome) = self.final_destination(task.queue);
        let changed = self.db.with_conn(|conn| {
            task_repo::fail(conn, &task.id, owner, queue.as_str(), error, Some(trace), &now)
        })?;
        if changed == 0 {
            return Err(QueueError::LeaseLost {
                task_id: task.id.clone(),
            });
        }
        warn!("Task {} ({}) moved to {}: {}", task.id, task.kind, queue, error);
        Ok(outcome)
    }

    fn final_destination(&self, origin: QueueName) -> (QueueName, FailureOutcome) {
        if self.topology.is_dead_letter_bound(origin) {
            (QueueName::DeadLetter, FailureOutcome::DeadLettered)
        } else {
            (origin, FailureOutcome::Failed)
        }
    }

    /// Revokes a task. Pending tasks are never delivered; started tasks
    /// are only flagged.
    pub fn revoke(&self, task_id: &str) -> Result<bool, QueueError> {
        let now = format_ts(self.clock.now());
        let revoked = self
            .db
            .with_conn(|conn| task_repo::revoke(conn, task_id, &now))?;
        if revoked {
            info!("Revoked task {}", task_id);
        }
        Ok(revoked)
    }

    /// Handles deliveries whose lease ran out: the worker holding them is
    /// presumed lost. Each is redelivered while its allowance remains, then
    /// rejected.
    pub fn reap_expired_leases(&self) -> Result<ReapReport, QueueError> {
        self.db.with_tx(|tx| {
            let now = self.clock.now();
            let now_s = format_ts(now);
            let mut report = ReapReport::default();

            for row in task_repo::expired_leases(tx, &now_s)? {
                let redelivery_limit = TaskKind::parse(&row.kind)
                    .map(|k| self.topology.policy(k).redelivery_limit)
                    .unwrap_or(0);

                if !row.revoked && row.deliveries <= redelivery_limit {
                    task_repo::requeue(tx, &row.id, &now_s)?;
                    warn!(
                        "Lease expired for task {} held by {:?}; redelivering",
                        row.id, row.lease_owner
                    );
                    report.redelivered.push(row.id);
                    continue;
                }

                let reason = if row.revoked {
                    "Task revoked and its worker was lost".to_string()
                } else {
                    format!(
                        "Worker lost: lease expired after {} deliveries",
                        row.deliveries
                    )
                };
                let queue = match QueueName::parse(&row.origin_queue) {
                    Some(origin) => self.final_destination(origin).0,
                    None => QueueName::DeadLetter,
                };
                task_repo::fail(tx, &row.id, None, queue.as_str(), &reason, Some(&reason), &now_s)?;
                warn!("Task {} rejected to {}: {}", row.id, queue, reason);

                match ClaimedTask::try_from(row) {
                    Ok(task) => report.rejected.push(task),
                    Err(e) => warn!("Rejected task has an unreadable row: {}", e),
                }
            }
            Ok(report)
        })
    }

    pub fn status(&self, task_id: &str) -> Result<Option<TaskStatus>, QueueError> {
        let row = self
            .db
            .with_conn(|conn| task_repo::find_by_id(conn, task_id))?;
        row.map(TaskStatus::try_from).transpose()
    }

    /// Started tasks grouped by the worker holding them.
    pub fn active_tasks(&self) -> Result<BTreeMap<String, Vec<ActiveTask>>, QueueError> {
        let rows = self.db.with_conn(task_repo::leased)?;
        let mut by_worker: BTreeMap<String, Vec<ActiveTask>> = BTreeMap::new();
        for row in rows {
            let progress = row.progress.as_deref().map(serde_json::from_str).transpose()?;
            by_worker
                .entry(row.lease_owner.unwrap_or_default())
                .or_default()
                .push(ActiveTask {
                    id: row.id,
                    kind: row.kind,
                    queue: row.queue,
                    started_at: row.started_at,
                    lease_expires_at: row.lease_expires_at,
                    progress,
                    revoked: row.revoked,
                });
        }
        Ok(by_worker)
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = self
            .db
            .with_conn(|conn| task_repo::in_queue(conn, QueueName::DeadLetter.as_str()))?;
        rows.into_iter()
            .map(|row| {
                Ok(DeadLetter {
                    payload: serde_json::from_str(&row.payload)?,
                    id: row.id,
                    kind: row.kind,
                    origin_queue: row.origin_queue,
                    error: row.error,
                    retries: row.retries,
                    dead_lettered_at: row.updated_at,
                })
            })
            .collect()
    }

    /// Ready tasks per queue; for `dead_letter`, everything parked there.
    pub fn queue_depths(&self) -> Result<BTreeMap<String, u64>, QueueError> {
        let mut depths: BTreeMap<String, u64> = QueueName::ALL
            .iter()
            .map(|q| (q.as_str().to_string(), 0))
            .collect();
        for (queue, count) in self.db.with_conn(task_repo::depths)? {
            depths.insert(queue, count);
        }
        Ok(depths)
    }
}

/// `now + delay`, saturating instead of overflowing.
fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay.min(MAX_DELAY))
        .unwrap_or_else(|_| chrono::Duration::days(3650));
    now.checked_add_signed(delay).unwrap_or(now)
}
