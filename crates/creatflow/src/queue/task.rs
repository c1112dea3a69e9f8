use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::topology::{QueueName, TaskKind};
use super::QueueError;
use crate::db::task_repo::TaskRow;
use crate::db::parse_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Started,
    Progress,
    Retry,
    Success,
    Failure,
    Revoked,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Started => "started",
            TaskState::Progress => "progress",
            TaskState::Retry => "retry",
            TaskState::Success => "success",
            TaskState::Failure => "failure",
            TaskState::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "started" => Some(TaskState::Started),
            "progress" => Some(TaskState::Progress),
            "retry" => Some(TaskState::Retry),
            "success" => Some(TaskState::Success),
            "failure" => Some(TaskState::Failure),
            "revoked" => Some(TaskState::Revoked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked
        )
    }
}

/// A delivery handed to one worker slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub id: String,
    pub kind: TaskKind,
    pub queue: QueueName,
    pub payload: Value,
    /// Retries already consumed before this delivery.
    pub retries: u32,
    pub deliveries: u32,
    pub lease_expires_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for ClaimedTask {
    type Error = QueueError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| QueueError::InvalidRow {
            task_id: row.id.clone(),
            reason,
        };
        let kind = TaskKind::parse(&row.kind)
            .ok_or_else(|| invalid(format!("unknown kind '{}'", row.kind)))?;
        let queue = QueueName::parse(&row.origin_queue)
            .ok_or_else(|| invalid(format!("unknown queue '{}'", row.origin_queue)))?;
        let payload = serde_json::from_str(&row.payload)?;
        let lease_expires_at = row
            .lease_expires_at
            .as_deref()
            .and_then(parse_ts)
            .ok_or_else(|| invalid("missing lease expiry".to_string()))?;

        Ok(Self {
            id: row.id,
            kind,
            queue,
            payload,
            retries: row.retries,
            deliveries: row.deliveries,
            lease_expires_at,
        })
    }
}

/// Public view of a task for status polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
    pub retries: u32,
    pub revoked: bool,
}

impl TryFrom<TaskRow> for TaskStatus {
    type Error = QueueError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let state = TaskState::parse(&row.state).ok_or_else(|| QueueError::InvalidRow {
            task_id: row.id.clone(),
            reason: format!("unknown state '{}'", row.state),
        })?;
        let progress = row.progress.as_deref().map(serde_json::from_str).transpose()?;
        let result = row.result.as_deref().map(serde_json::from_str).transpose()?;

        Ok(Self {
            id: row.id,
            kind: row.kind,
            queue: row.queue,
            state,
            progress,
            result,
            error: row.error,
            error_trace: row.error_trace,
            retries: row.retries,
            revoked: row.revoked,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTask {
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub started_at: Option<String>,
    pub lease_expires_at: Option<String>,
    pub progress: Option<Value>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub id: String,
    pub kind: String,
    pub origin_queue: String,
    pub error: Option<String>,
    pub retries: u32,
    pub payload: Value,
    pub dead_lettered_at: String,
}

/// What the broker did with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retried { delay: Duration, attempt: u32 },
    DeadLettered,
    Failed,
}

impl FailureOutcome {
    /// True once the task will not run again.
    pub fn is_final(&self) -> bool {
        !matches!(self, FailureOutcome::Retried { .. })
    }
}

/// Result of one reaper pass over expired leases.
#[derive(Debug, Default)]
pub struct ReapReport {
    pub redelivered: Vec<String>,
    /// Tasks rejected for good; their handlers get a dead-letter callback.
    pub rejected: Vec<ClaimedTask>,
}
