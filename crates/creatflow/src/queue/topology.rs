//! Static routing of task types to queues, and per-type limits.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use crate::config::TaskOverride;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    AssetProcessing,
    Generation,
    Maintenance,
    DeadLetter,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::AssetProcessing,
        QueueName::Generation,
        QueueName::Maintenance,
        QueueName::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::AssetProcessing => "asset_processing",
            QueueName::Generation => "generation",
            QueueName::Maintenance => "maintenance",
            QueueName::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.as_str() == s)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ProcessUploadedAssets,
    ProcessGenerationJob,
    ProcessPromptEditJob,
    CleanupFailedJobs,
    CleanupOrphanedFiles,
    HealthCheck,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::ProcessUploadedAssets,
        TaskKind::ProcessGenerationJob,
        TaskKind::ProcessPromptEditJob,
        TaskKind::CleanupFailedJobs,
        TaskKind::CleanupOrphanedFiles,
        TaskKind::HealthCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ProcessUploadedAssets => "process_uploaded_assets",
            TaskKind::ProcessGenerationJob => "process_generation_job",
            TaskKind::ProcessPromptEditJob => "process_prompt_edit_job",
            TaskKind::CleanupFailedJobs => "cleanup_failed_jobs",
            TaskKind::CleanupOrphanedFiles => "cleanup_orphaned_files",
            TaskKind::HealthCheck => "health_check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits and routing for one task type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPolicy {
    pub queue: QueueName,
    /// Maximum task starts per rolling minute, across all workers.
    pub rate_limit_per_min: Option<u32>,
    pub hard_time_limit: Duration,
    pub soft_time_limit: Duration,
    pub max_retries: u32,
    pub backoff_base: u32,
    /// Times a delivery whose worker vanished is handed out again before
    /// the task is rejected.
    pub redelivery_limit: u32,
}

impl TaskPolicy {
    fn new(queue: QueueName, rate: Option<u32>, hard: u64, soft: u64, max_retries: u32) -> Self {
        Self {
            queue,
            rate_limit_per_min: rate,
            hard_time_limit: Duration::from_secs(hard),
            soft_time_limit: Duration::from_secs(soft),
            max_retries,
            backoff_base: 2,
            redelivery_limit: 1,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_base)
    }

    fn apply(&mut self, over: &TaskOverride) {
        if let Some(rate) = over.rate_limit_per_min {
            self.rate_limit_per_min = Some(rate);
        }
        if let Some(hard) = over.time_limit_secs {
            self.hard_time_limit = Duration::from_secs(hard);
        }
        if let Some(soft) = over.soft_time_limit_secs {
            self.soft_time_limit = Duration::from_secs(soft);
        }
        if let Some(retries) = over.max_retries {
            self.max_retries = retries;
        }
        if let Some(base) = over.backoff_base {
            self.backoff_base = base;
        }
        if let Some(limit) = over.redelivery_limit {
            self.redelivery_limit = limit;
        }
    }
}

/// Immutable routing table, built once at startup and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct QueueTopology {
    policies: HashMap<TaskKind, TaskPolicy>,
    dead_letter_bound: HashSet<QueueName>,
}

impl QueueTopology {
    /// The production deployment's defaults.
    pub fn standard() -> Self {
        use QueueName::*;
        use TaskKind::*;

        let policies = HashMap::from([
            (
                ProcessUploadedAssets,
                TaskPolicy::new(AssetProcessing, Some(10), 300, 240, 5),
            ),
            (
                ProcessGenerationJob,
                TaskPolicy::new(Generation, Some(5), 600, 540, 5),
            ),
            (
                ProcessPromptEditJob,
                TaskPolicy::new(Generation, None, 600, 540, 3),
            ),
            (
                CleanupFailedJobs,
                TaskPolicy::new(Maintenance, None, 300, 240, 0),
            ),
            (
                CleanupOrphanedFiles,
                TaskPolicy::new(Maintenance, None, 300, 240, 0),
            ),
            (HealthCheck, TaskPolicy::new(Maintenance, None, 60, 50, 0)),
        ]);

        Self {
            policies,
            dead_letter_bound: HashSet::from([AssetProcessing, Generation]),
        }
    }

    /// Standard topology with per-type overrides applied.
    pub fn from_config(
        overrides: &HashMap<String, TaskOverride>,
    ) -> Result<Self, ConfigError> {
        let mut topology = Self::standard();
        for (name, over) in overrides {
            let kind = TaskKind::parse(name).ok_or_else(|| ConfigError::InvalidTaskOverride {
                task: name.clone(),
                reason: "Unknown task type".to_string(),
            })?;
            if let Some(policy) = topology.policies.get_mut(&kind) {
                policy.apply(over);
                if policy.soft_time_limit >= policy.hard_time_limit {
                    return Err(ConfigError::InvalidTaskOverride {
                        task: name.clone(),
                        reason: "soft time limit must be below the hard limit".to_string(),
                    });
                }
            }
        }
        Ok(topology)
    }

    /// Policy of a task type. Every `TaskKind` has one.
    pub fn policy(&self, kind: TaskKind) -> &TaskPolicy {
        &self.policies[&kind]
    }

    pub fn queue_for(&self, kind: TaskKind) -> QueueName {
        self.policy(kind).queue
    }

    /// Whether failures on `queue` are routed to `dead_letter`.
    pub fn is_dead_letter_bound(&self, queue: QueueName) -> bool {
        self.dead_letter_bound.contains(&queue)
    }
}
