//! Operator-facing view of the queue: worker stats, task inspection and
//! cancellation, health, and the periodic maintenance tasks.

pub mod control;
pub mod maintenance;

pub use control::{ControlSurface, HealthReport, MaintenanceSchedule, WorkerStats};
pub use maintenance::{CleanupReport, HealthStatus, Maintenance, OrphanReport};

use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::StorageError;
use crate::orchestrator::OrchestratorError;
use crate::queue::QueueError;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Orchestration error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
