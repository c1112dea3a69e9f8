//! Durable multi-queue task broker and the worker runtime that consumes it.
//!
//! Delivery is at-least-once with late acknowledgement: a task is acked only
//! after its handler returned `Ok`. Each delivery holds a lease; a lease that
//! runs out means the worker was lost and the reaper takes over.

pub mod broker;
pub mod clock;
pub mod context;
pub mod handler;
pub mod pool;
pub mod retry;
pub mod task;
pub mod topology;
pub mod worker;

pub use broker::Broker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::TaskContext;
pub use handler::{HandlerRegistry, TaskError, TaskHandler};
pub use pool::{WorkerConfig, WorkerPool};
pub use retry::RetryPolicy;
pub use task::{
    ActiveTask, ClaimedTask, DeadLetter, FailureOutcome, ReapReport, TaskState, TaskStatus,
};
pub use topology::{QueueName, QueueTopology, TaskKind, TaskPolicy};
pub use worker::{ExecutionOutcome, Worker};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to serialize task payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown task type: {0}")]
    UnknownTask(String),

    #[error("No handler registered for task type {0}")]
    NoHandler(TaskKind),

    #[error("Task {task_id} is no longer leased by this worker")]
    LeaseLost { task_id: String },

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid task row {task_id}: {reason}")]
    InvalidRow { task_id: String, reason: String },

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}
