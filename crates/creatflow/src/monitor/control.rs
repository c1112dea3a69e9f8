//! Inspection and control of the running queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use log::info;
use serde::Serialize;
use serde_json::json;

use super::MonitorError;
use crate::db::{job_repo, parse_ts, worker_repo};
use crate::orchestrator::{JobService, OrchestratorError};
use crate::queue::{ActiveTask, Broker, DeadLetter, TaskKind, TaskStatus};

/// Countdowns of the maintenance tasks, in seconds.
pub const HEALTH_CHECK_DELAY_SECS: u64 = 10;
pub const FAILED_JOB_CLEANUP_DELAY_SECS: u64 = 60;
pub const ORPHAN_CLEANUP_DELAY_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStats {
    pub hostname: String,
    pub pid: u32,
    pub queues: Vec<String>,
    pub slot: u32,
    pub started_at: String,
    pub last_heartbeat: String,
    pub processed: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub alive: bool,
}

/// Task ids of the maintenance run just scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceSchedule {
    pub health_check: String,
    pub cleanup_failed_jobs: String,
    pub cleanup_orphaned_files: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub jobs_by_status: BTreeMap<String, u64>,
    pub queue_depths: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkersHealth {
    pub total: usize,
    pub alive: usize,
    pub active_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub database: DatabaseHealth,
    pub workers: WorkersHealth,
}

pub struct ControlSurface {
    broker: Arc<Broker>,
    jobs: Arc<JobService>,
    heartbeat_timeout: Duration,
}

impl ControlSurface {
    pub fn new(broker: Arc<Broker>, jobs: Arc<JobService>, heartbeat_timeout: Duration) -> Self {
        Self {
            broker,
            jobs,
            heartbeat_timeout,
        }
    }

    /// Every worker that ever registered, keyed by id. A worker is alive
    /// while it has not stopped and either its heartbeat is recent or it
    /// still holds an unexpired lease.
    pub fn worker_stats(&self) -> Result<BTreeMap<String, WorkerStats>, MonitorError> {
        let now = self.broker.now();
        let rows = worker_repo::list(self.broker.database())?;
        let active = self.broker.active_tasks()?;
        let holds_lease = |worker_id: &str| {
            active.get(worker_id).is_some_and(|tasks| {
                tasks.iter().any(|t| {
                    t.lease_expires_at
                        .as_deref()
                        .and_then(parse_ts)
                        .is_some_and(|expires| expires > now)
                })
            })
        };
        Ok(rows
            .into_iter()
            .map(|row| {
                let alive = row.stopped_at.is_none()
                    && (parse_ts(&row.last_heartbeat)
                        .is_some_and(|beat| now - beat <= self.heartbeat_timeout)
                        || holds_lease(&row.id));
                let stats = WorkerStats {
                    hostname: row.hostname,
                    pid: row.pid,
                    queues: row
                        .queues
                        .split(',')
                        .filter(|q| !q.is_empty())
                        .map(String::from)
                        .collect(),
                    slot: row.slot,
                    started_at: row.started_at,
                    last_heartbeat: row.last_heartbeat,
                    processed: row.processed,
                    failed: row.failed,
                    current_task: row.current_task,
                    alive,
                };
                (row.id, stats)
            })
            .collect())
    }

    pub fn active_tasks(&self) -> Result<BTreeMap<String, Vec<ActiveTask>>, MonitorError> {
        Ok(self.broker.active_tasks()?)
    }

    pub fn task_status(&self, task_id: &str) -> Result<Option<TaskStatus>, MonitorError> {
        Ok(self.broker.status(task_id)?)
    }

    /// Revokes a task. A job driven by it is failed as cancelled.
    pub fn cancel_task(&self, task_id: &str) -> Result<bool, MonitorError> {
        if !self.broker.revoke(task_id)? {
            return Ok(false);
        }
        if let Some(job) = self.jobs.job_for_task(task_id)? {
            match self.jobs.fail_job(&job.id, "Cancelled") {
                Ok(()) | Err(OrchestratorError::IllegalTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    pub fn schedule_maintenance(&self) -> Result<MaintenanceSchedule, MonitorError> {
        let after = |secs| Some(std::time::Duration::from_secs(secs));
        let empty = json!({});
        let schedule = MaintenanceSchedule {
            health_check: self.broker.enqueue_in(
                TaskKind::HealthCheck,
                &empty,
                after(HEALTH_CHECK_DELAY_SECS),
            )?,
            cleanup_failed_jobs: self.broker.enqueue_in(
                TaskKind::CleanupFailedJobs,
                &empty,
                after(FAILED_JOB_CLEANUP_DELAY_SECS),
            )?,
            cleanup_orphaned_files: self.broker.enqueue_in(
                TaskKind::CleanupOrphanedFiles,
                &empty,
                after(ORPHAN_CLEANUP_DELAY_SECS),
            )?,
        };
        info!("Scheduled maintenance tasks");
        Ok(schedule)
    }

    pub fn health_report(&self) -> Result<HealthReport, MonitorError> {
        let db = self.broker.database();
        let database = match db.with_conn(job_repo::count_by_status) {
            Ok(counts) => DatabaseHealth {
                healthy: true,
                error: None,
                jobs_by_status: counts.into_iter().collect(),
                queue_depths: self.broker.queue_depths()?,
            },
            Err(e) => DatabaseHealth {
                healthy: false,
                error: Some(e.to_string()),
                jobs_by_status: BTreeMap::new(),
                queue_depths: BTreeMap::new(),
            },
        };

        let workers = self.worker_stats()?;
        let active_tasks = self.broker.active_tasks()?.values().map(Vec::len).sum();
        Ok(HealthReport {
            database,
            workers: WorkersHealth {
                total: workers.len(),
                alive: workers.values().filter(|w| w.alive).count(),
                active_tasks,
            },
        })
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, MonitorError> {
        Ok(self.broker.dead_letters()?)
    }

    pub fn queue_depths(&self) -> Result<BTreeMap<String, u64>, MonitorError> {
        Ok(self.broker.queue_depths()?)
    }
}
