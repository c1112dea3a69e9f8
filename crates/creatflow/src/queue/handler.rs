use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::context::TaskContext;
use super::task::ClaimedTask;
use super::topology::TaskKind;

/// Handler failure. Messages are plain strings so they can be stored on the
/// task row as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient; the broker retries while the type's allowance remains.
    #[error("{0}")]
    Retry(String),

    /// Never retried.
    #[error("{0}")]
    Permanent(String),
}

impl TaskError {
    pub fn message(&self) -> &str {
        match self {
            TaskError::Retry(m) | TaskError::Permanent(m) => m,
        }
    }
}

pub trait TaskHandler: Send + Sync {
    fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError>;

    /// Called once the task will never run again: retries exhausted,
    /// permanent error, hard time limit or lost worker. The handler may
    /// already have recorded the failure itself, so this must be idempotent.
    fn on_dead_letter(&self, _task: &ClaimedTask, _reason: &str) {}
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
