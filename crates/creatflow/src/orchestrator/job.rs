//! Job records and their state machine.

use std::fmt;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::OrchestratorError;
use crate::db::job_repo::{self, JobRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generation,
    PromptEdit,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Generation => "generation",
            JobKind::PromptEdit => "prompt_edit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generation" => Some(JobKind::Generation),
            "prompt_edit" => Some(JobKind::PromptEdit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal edges of the job lifecycle. Processing to Processing is a
    /// retry attempt; Pending to Failed is cancellation before a claim.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub task_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<JobRow> for Job {
    type Error = OrchestratorError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind = JobKind::parse(&row.kind).ok_or_else(|| {
            OrchestratorError::InvalidRecord(format!("job {} has kind '{}'", row.id, row.kind))
        })?;
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            OrchestratorError::InvalidRecord(format!("job {} has status '{}'", row.id, row.status))
        })?;
        Ok(Self {
            id: row.id,
            project_id: row.project_id,
            user_id: row.user_id,
            kind,
            status,
            progress: row.progress,
            error: row.error,
            task_id: row.task_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Polling view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One output listed by `get_job_results`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedAssetSummary {
    pub id: String,
    pub original_asset_id: String,
    pub asset_format_id: Option<String>,
    pub format_name: Option<String>,
    pub storage_path: String,
    pub file_type: String,
    pub width: u32,
    pub height: u32,
    pub is_nsfw: bool,
    pub version: u32,
}

pub(crate) fn load(conn: &Connection, job_id: &str) -> Result<Job, OrchestratorError> {
    job_repo::find_by_id(conn, job_id)?
        .ok_or_else(|| OrchestratorError::NotFound {
            entity: "job",
            id: job_id.to_string(),
        })
        .and_then(Job::try_from)
}

/// Applies one state-machine edge inside the caller's transaction.
///
/// Illegal edges are rejected before any write; the update itself is
/// guarded on the status that was read, so a concurrent writer cannot slip
/// in between. Returns the status the job left.
pub(crate) fn transition(
    conn: &Connection,
    job_id: &str,
    to: JobStatus,
    progress: u8,
    error: Option<&str>,
    now: &str,
) -> Result<JobStatus, OrchestratorError> {
    let job = load(conn, job_id)?;
    let from = job.status;
    if !from.can_transition_to(to) {
        return Err(OrchestratorError::IllegalTransition {
            job_id: job_id.to_string(),
            from,
            to,
        });
    }
    let changed =
        job_repo::set_status(conn, job_id, &[from.as_str()], to.as_str(), progress, error, now)?;
    if changed == 0 {
        return Err(OrchestratorError::IllegalTransition {
            job_id: job_id.to_string(),
            from,
            to,
        });
    }
    Ok(from)
}
