//! One worker slot: claims a single task (prefetch = 1), runs its handler
//! under the type's time limits, then acks or fails the delivery.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};

use super::broker::Broker;
use super::context::TaskContext;
use super::handler::{HandlerRegistry, TaskError, TaskHandler};
use super::task::{ClaimedTask, FailureOutcome};
use super::topology::{QueueName, TaskPolicy};
use super::QueueError;
use crate::db::{format_ts, worker_repo};

/// How often a busy worker refreshes its heartbeat while a handler runs.
const BUSY_HEARTBEAT: Duration = Duration::from_secs(15);

type HandlerResult = Result<Value, TaskError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Acked {
        task_id: String,
    },
    Failed {
        task_id: String,
        outcome: FailureOutcome,
        error: String,
    },
    /// Hard time limit hit; the handler thread was abandoned.
    TimedOut {
        task_id: String,
        outcome: FailureOutcome,
    },
    /// The delivery was reaped or revoked away while the handler ran.
    LeaseLost {
        task_id: String,
    },
}

impl ExecutionOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            ExecutionOutcome::Acked { task_id }
            | ExecutionOutcome::Failed { task_id, .. }
            | ExecutionOutcome::TimedOut { task_id, .. }
            | ExecutionOutcome::LeaseLost { task_id } => task_id,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, ExecutionOutcome::Acked { .. })
    }
}

pub struct Worker {
    id: String,
    broker: Arc<Broker>,
    registry: Arc<HandlerRegistry>,
    queues: Vec<QueueName>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        broker: Arc<Broker>,
        registry: Arc<HandlerRegistry>,
        queues: Vec<QueueName>,
    ) -> Self {
        Self {
            id: id.into(),
            broker,
            registry,
            queues,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claims and executes at most one task. `None` when nothing is due.
    pub fn run_next(&self) -> Result<Option<ExecutionOutcome>, QueueError> {
        let Some(task) = self.broker.claim(&self.queues, &self.id)? else {
            return Ok(None);
        };

        let span = info_span!(
            "task",
            task_id = %task.id,
            kind = %task.kind,
            queue = %task.queue,
            worker = %self.id,
        );
        let _enter = span.enter();

        self.note_heartbeat(Some(&task.id));
        let outcome = self.execute(task)?;
        self.note_outcome(outcome.succeeded());
        Ok(Some(outcome))
    }

    fn execute(&self, task: ClaimedTask) -> Result<ExecutionOutcome, QueueError> {
        let Some(handler) = self.registry.get(task.kind) else {
            let error = TaskError::Permanent(QueueError::NoHandler(task.kind).to_string());
            return self.record_failure(&task, error);
        };

        let policy = self.broker.topology().policy(task.kind).clone();
        let soft_limit = Arc::new(AtomicBool::new(false));
        let ctx = TaskContext::new(
            task.clone(),
            policy.clone(),
            Arc::clone(&self.broker),
            self.id.clone(),
            Arc::clone(&soft_limit),
        );

        debug!("Running {} (retry {})", task.kind, task.retries);

        let (tx, rx) = bounded::<HandlerResult>(1);
        let run_handler = Arc::clone(&handler);
        let span = tracing::Span::current();
        thread::Builder::new()
            .name(format!("task-{}", short_id(&task.id)))
            .spawn(move || {
                let _enter = span.enter();
                let result = panic::catch_unwind(AssertUnwindSafe(|| run_handler.handle(&ctx)))
                    .unwrap_or_else(|payload| {
                        Err(TaskError::Permanent(format!(
                            "Handler panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });
                // The receiver is gone if the hard limit already passed.
                let _ = tx.send(result);
            })
            .map_err(QueueError::Spawn)?;

        let result = match self.wait_for_result(&rx, &task.id, policy.soft_time_limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Soft time limit ({}s) exceeded; signalling handler",
                    policy.soft_time_limit.as_secs()
                );
                soft_limit.store(true, Ordering::Relaxed);
                let remaining = policy
                    .hard_time_limit
                    .saturating_sub(policy.soft_time_limit);
                match self.wait_for_result(&rx, &task.id, remaining) {
                    Ok(result) => result,
                    Err(RecvTimeoutError::Timeout) => return self.abandon(&task, &handler, &policy),
                    Err(RecvTimeoutError::Disconnected) => Err(handler_vanished()),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(handler_vanished()),
        };

        match result {
            Ok(value) => match self.broker.ack(&task.id, &self.id, &value) {
                Ok(()) => {
                    info!("Task acknowledged");
                    Ok(ExecutionOutcome::Acked { task_id: task.id })
                }
                Err(QueueError::LeaseLost { task_id }) => {
                    warn!("Finished after the lease was lost; result discarded");
                    Ok(ExecutionOutcome::LeaseLost { task_id })
                }
                Err(e) => Err(e),
            },
            Err(error) => {
                let outcome = self.record_failure(&task, error.clone())?;
                if let ExecutionOutcome::Failed { outcome: o, .. } = &outcome {
                    if o.is_final() {
                        handler.on_dead_letter(&task, error.message());
                    }
                }
                Ok(outcome)
            }
        }
    }

    /// `recv_timeout` over `limit`, heartbeating between slices.
    fn wait_for_result(
        &self,
        rx: &Receiver<HandlerResult>,
        task_id: &str,
        limit: Duration,
    ) -> Result<HandlerResult, RecvTimeoutError> {
        let deadline = Instant::now() + limit;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left.min(BUSY_HEARTBEAT)) {
                Err(RecvTimeoutError::Timeout) if left > BUSY_HEARTBEAT => {
                    self.note_heartbeat(Some(task_id));
                }
                other => return other,
            }
        }
    }

    fn record_failure(
        &self,
        task: &ClaimedTask,
        error: TaskError,
    ) -> Result<ExecutionOutcome, QueueError> {
        match self.broker.fail(task, &self.id, &error) {
            Ok(outcome) => Ok(ExecutionOutcome::Failed {
                task_id: task.id.clone(),
                outcome,
                error: error.message().to_string(),
            }),
            Err(QueueError::LeaseLost { task_id }) => {
                warn!("Failure not recorded; lease already lost");
                Ok(ExecutionOutcome::LeaseLost { task_id })
            }
            Err(e) => Err(e),
        }
    }

    fn abandon(
        &self,
        task: &ClaimedTask,
        handler: &Arc<dyn TaskHandler>,
        policy: &TaskPolicy,
    ) -> Result<ExecutionOutcome, QueueError> {
        let reason = format!(
            "Hard time limit ({}s) exceeded",
            policy.hard_time_limit.as_secs()
        );
        error!("{}; abandoning handler", reason);
        // The abandoned thread may still finish; settle the owner first so a
        // late commit cannot outlive the rejection.
        handler.on_dead_letter(task, &reason);
        match self.broker.reject(task, &self.id, &reason) {
            Ok(outcome) => {
                Ok(ExecutionOutcome::TimedOut {
                    task_id: task.id.clone(),
                    outcome,
                })
            }
            Err(QueueError::LeaseLost { task_id }) => Ok(ExecutionOutcome::LeaseLost { task_id }),
            Err(e) => Err(e),
        }
    }

    fn note_heartbeat(&self, current_task: Option<&str>) {
        let now = format_ts(self.broker.now());
        if let Err(e) = worker_repo::heartbeat(self.broker.database(), &self.id, current_task, &now)
        {
            warn!("Heartbeat failed: {}", e);
        }
    }

    fn note_outcome(&self, succeeded: bool) {
        let now = format_ts(self.broker.now());
        if let Err(e) =
            worker_repo::record_outcome(self.broker.database(), &self.id, succeeded, &now)
        {
            warn!("Failed to record worker stats: {}", e);
        }
    }

    /// Idle heartbeat, called by the pool between polls.
    pub fn heartbeat(&self) {
        self.note_heartbeat(None);
    }

    pub fn mark_stopped(&self) {
        let now = format_ts(self.broker.now());
        if let Err(e) = worker_repo::mark_stopped(self.broker.database(), &self.id, &now) {
            warn!("Failed to mark worker {} stopped: {}", self.id, e);
        }
    }
}

fn handler_vanished() -> TaskError {
    TaskError::Permanent("Handler thread exited without a result".to_string())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
