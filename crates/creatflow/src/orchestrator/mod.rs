//! Job orchestration: the job state machine, generation fan-out over
//! (asset x target size) pairs, prompt edits, project analysis and manual
//! edits.
//!
//! `JobService` holds the synchronous operations; the task handlers in
//! `generation`, `prompt_edit` and `analysis` run inside queue workers.

pub mod analysis;
pub mod generation;
pub mod job;
pub mod manual_edit;
pub mod payload;
pub mod progress;
pub mod prompt_edit;
pub mod service;
#[cfg(test)]
pub(crate) mod testing;

pub use analysis::AnalysisHandler;
pub use generation::GenerationHandler;
pub use job::{GeneratedAssetSummary, Job, JobKind, JobStatus, JobStatusView};
pub use payload::{AnalysisPayload, CustomSize, GenerationPayload, GenerationRequest, PromptEditPayload};
pub use progress::ProgressTracker;
pub use prompt_edit::PromptEditHandler;
pub use service::JobService;

use thiserror::Error;

use crate::adapt::AdaptError;
use crate::ai::AiError;
use crate::db::DatabaseError;
use crate::error::StorageError;
use crate::queue::{QueueError, TaskError};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Job {job_id} is {status}, results are not ready")]
    NotReady { job_id: String, status: JobStatus },

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    Conflict { id: String, expected: u32, actual: u32 },

    #[error("Illegal job transition for {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job {job_id} produced no outputs ({failed} of {attempted} operations failed)")]
    NoOutputs {
        job_id: String,
        attempted: usize,
        failed: usize,
    },

    #[error("Soft time limit exceeded after {completed} of {total} operations")]
    SoftTimeLimit { completed: usize, total: usize },

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Adaptation failed: {0}")]
    Adapt(#[from] AdaptError),

    #[error("AI provider error: {0}")]
    Ai(#[from] AiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Whether running the same task again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::NotFound { .. }
            | OrchestratorError::NotReady { .. }
            | OrchestratorError::Conflict { .. }
            | OrchestratorError::IllegalTransition { .. }
            | OrchestratorError::InvalidRequest(_)
            | OrchestratorError::InvalidRecord(_) => false,
            OrchestratorError::Adapt(e) => !matches!(
                e,
                AdaptError::Unsupported { .. }
                    | AdaptError::InvalidTarget { .. }
                    | AdaptError::InvalidEdit(_)
            ),
            OrchestratorError::Ai(AiError::NotSupported { .. }) => false,
            OrchestratorError::Json(_) => false,
            _ => true,
        }
    }
}

impl From<OrchestratorError> for TaskError {
    fn from(err: OrchestratorError) -> Self {
        if err.is_retryable() {
            TaskError::Retry(err.to_string())
        } else {
            TaskError::Permanent(err.to_string())
        }
    }
}
