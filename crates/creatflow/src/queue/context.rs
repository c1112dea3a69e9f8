use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::broker::Broker;
use super::handler::TaskError;
use super::task::ClaimedTask;
use super::topology::{TaskKind, TaskPolicy};

/// Everything a handler sees about the delivery it is running.
pub struct TaskContext {
    task: ClaimedTask,
    policy: TaskPolicy,
    broker: Arc<Broker>,
    worker_id: String,
    soft_limit: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(
        task: ClaimedTask,
        policy: TaskPolicy,
        broker: Arc<Broker>,
        worker_id: impl Into<String>,
        soft_limit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            task,
            policy,
            broker,
            worker_id: worker_id.into(),
            soft_limit,
        }
    }

    pub fn task(&self) -> &ClaimedTask {
        &self.task
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind
    }

    /// Retries consumed before this attempt.
    pub fn retries(&self) -> u32 {
        self.task.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.policy.max_retries
    }

    /// True when a failure now will not be retried.
    pub fn is_final_attempt(&self) -> bool {
        self.task.retries >= self.policy.max_retries
    }

    /// Decodes the payload. A payload that does not match is a permanent
    /// failure; retrying would not change it.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_value(self.task.payload.clone())
            .map_err(|e| TaskError::Permanent(format!("Invalid payload: {}", e)))
    }

    /// Set by the worker once the soft time limit passed. Handlers check it
    /// between units of work and wind down.
    pub fn soft_time_limit_exceeded(&self) -> bool {
        self.soft_limit.load(Ordering::Relaxed)
    }

    /// Stores progress meta on the task. Failures are logged, not raised;
    /// progress is advisory.
    pub fn report_progress(&self, meta: &Value) {
        if let Err(e) = self
            .broker
            .update_progress(&self.task.id, &self.worker_id, meta)
        {
            log::warn!("Failed to record progress for task {}: {}", self.task.id, e);
        }
    }
}
