//! Synchronous job operations and the shared helpers the task handlers use
//! to move a job through its lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::warn;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use super::job::{self, GeneratedAssetSummary, Job, JobKind, JobStatus, JobStatusView};
use super::payload::{AnalysisPayload, GenerationPayload, GenerationRequest, PromptEditPayload};
use super::progress::CLAIMED_PERCENT;
use super::OrchestratorError;
use crate::adapt::AdaptationEngine;
use crate::ai::AiProvider;
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::catalog::{Catalog, Project, CUSTOM_GROUP};
use crate::db::generated_asset_repo::{self, GeneratedAssetRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::{format_ts, Database};
use crate::queue::{Broker, TaskContext, TaskError, TaskKind};
use crate::storage::FileStorage;

type Result<T> = std::result::Result<T, OrchestratorError>;

pub struct JobService {
    db: Database,
    catalog: Arc<dyn Catalog>,
    broker: Arc<Broker>,
    storage: FileStorage,
    ai: Arc<dyn AiProvider>,
    engine: AdaptationEngine,
    events: JobProgressBroadcaster,
}

impl JobService {
    pub fn new(
        db: Database,
        catalog: Arc<dyn Catalog>,
        broker: Arc<Broker>,
        storage: FileStorage,
        ai: Arc<dyn AiProvider>,
        ai_edit_enabled: bool,
        events: JobProgressBroadcaster,
    ) -> Self {
        let engine = AdaptationEngine::new(Arc::clone(&ai), storage.clone(), ai_edit_enabled);
        Self {
            db,
            catalog,
            broker,
            storage,
            ai,
            engine,
            events,
        }
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub fn engine(&self) -> &AdaptationEngine {
        &self.engine
    }

    pub fn ai(&self) -> &dyn AiProvider {
        self.ai.as_ref()
    }

    pub fn events(&self) -> &JobProgressBroadcaster {
        &self.events
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) fn now(&self) -> String {
        format_ts(self.broker.now())
    }

    /// Creates a Pending generation job for a project the user owns.
    pub fn create_job(&self, project_id: &str, user_id: &str) -> Result<Job> {
        let project = self.owned_project(project_id, user_id)?;
        let job = self
            .db
            .with_tx(|tx| self.insert_job(tx, &project, JobKind::Generation))?;
        info!("Created job {} for project {}", job.id, project.id);
        Ok(job)
    }

    /// Enqueues the generation task of a Pending job. Returns the task id.
    pub fn enqueue_generation(
        &self,
        job_id: &str,
        user_id: &str,
        request: GenerationRequest,
    ) -> Result<String> {
        if request.format_ids.is_empty() && request.custom_sizes.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "At least one format or custom size is required".to_string(),
            ));
        }
        if let Some(size) = request
            .custom_sizes
            .iter()
            .find(|s| s.width == 0 || s.height == 0)
        {
            return Err(OrchestratorError::InvalidRequest(format!(
                "Custom size {}x{} must be positive",
                size.width, size.height
            )));
        }

        let job = self.owned_job(job_id, user_id)?;
        if job.status != JobStatus::Pending || job.task_id.is_some() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "Job {} was already dispatched",
                job_id
            )));
        }

        let payload = GenerationPayload {
            job_id: job.id.clone(),
            request,
        };
        let task_id = self.db.with_tx(|tx| {
            let task_id =
                self.broker
                    .enqueue_on(tx, TaskKind::ProcessGenerationJob, &payload, None)?;
            job_repo::set_task_id(tx, &job.id, &task_id, &self.now())?;
            Ok::<_, OrchestratorError>(task_id)
        })?;

        self.events.send(JobProgressEvent::new(
            &job.id,
            JobStatus::Pending,
            0,
            "Queued for generation",
        ));
        Ok(task_id)
    }

    /// Creates a prompt-edit job for a source asset and enqueues it.
    pub fn dispatch_prompt_edit(
        &self,
        source_asset_id: &str,
        prompt: &str,
        user_id: &str,
    ) -> Result<Job> {
        let not_found = || OrchestratorError::NotFound {
            entity: "asset",
            id: source_asset_id.to_string(),
        };
        let asset = self.catalog.asset(source_asset_id)?.ok_or_else(not_found)?;
        let project = self
            .owned_project(&asset.project_id, user_id)
            .map_err(|_| not_found())?;
        if prompt.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "Prompt must not be empty".to_string(),
            ));
        }

        let job = self.db.with_tx(|tx| {
            let job = self.insert_job(tx, &project, JobKind::PromptEdit)?;
            let payload = PromptEditPayload {
                job_id: job.id.clone(),
                source_asset_id: asset.id.clone(),
                prompt: prompt.to_string(),
            };
            let task_id =
                self.broker
                    .enqueue_on(tx, TaskKind::ProcessPromptEditJob, &payload, None)?;
            job_repo::set_task_id(tx, &job.id, &task_id, &self.now())?;
            Ok::<_, OrchestratorError>(Job {
                task_id: Some(task_id),
                ..job
            })
        })?;

        info!("Dispatched prompt edit job {} for asset {}", job.id, asset.id);
        Ok(job)
    }

    /// Enqueues AI analysis of every asset in a project.
    pub fn analyze_project(&self, project_id: &str, user_id: &str) -> Result<String> {
        let project = self.owned_project(project_id, user_id)?;
        let task_id = self.broker.enqueue(
            TaskKind::ProcessUploadedAssets,
            &AnalysisPayload {
                project_id: project.id,
            },
        )?;
        Ok(task_id)
    }

    pub fn get_job_status(&self, job_id: &str, user_id: &str) -> Result<JobStatusView> {
        let job = self.owned_job(job_id, user_id)?;
        Ok(JobStatusView {
            status: job.status,
            progress: job.progress,
            error: job.error,
        })
    }

    /// Outputs of a Completed job grouped by platform, then category, then
    /// "Custom".
    pub fn get_job_results(
        &self,
        job_id: &str,
        user_id: &str,
    ) -> Result<BTreeMap<String, Vec<GeneratedAssetSummary>>> {
        let job = self.owned_job(job_id, user_id)?;
        if job.status != JobStatus::Completed {
            return Err(OrchestratorError::NotReady {
                job_id: job.id,
                status: job.status,
            });
        }

        let rows = self
            .db
            .with_conn(|conn| generated_asset_repo::list_by_job(conn, &job.id))?;
        let mut format_ids: Vec<String> =
            rows.iter().filter_map(|r| r.asset_format_id.clone()).collect();
        format_ids.sort();
        format_ids.dedup();
        let formats: HashMap<String, _> = self
            .catalog
            .asset_formats(&format_ids)?
            .into_iter()
            .map(|f| (f.id.clone(), f))
            .collect();

        let mut groups: BTreeMap<String, Vec<GeneratedAssetSummary>> = BTreeMap::new();
        for row in rows {
            let format = row.asset_format_id.as_ref().and_then(|id| formats.get(id));
            let group = format
                .map(|f| f.group_name())
                .unwrap_or_else(|| CUSTOM_GROUP.to_string());
            groups
                .entry(group)
                .or_default()
                .push(summarize(row, format.map(|f| f.name.clone())));
        }
        Ok(groups)
    }

    /// Fails a job through the state machine. Terminal jobs are rejected
    /// with `IllegalTransition`.
    pub fn fail_job(&self, job_id: &str, reason: &str) -> Result<()> {
        let now = self.now();
        self.db
            .with_tx(|tx| job::transition(tx, job_id, JobStatus::Failed, 0, Some(reason), &now))?;
        warn!("Job {} failed: {}", job_id, reason);
        self.events.send(JobProgressEvent::failed(job_id, reason));
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.db.with_conn(|conn| Ok(job::load(conn, job_id)))?
    }

    /// The job driven by a task, if any.
    pub fn job_for_task(&self, task_id: &str) -> Result<Option<Job>> {
        self.db
            .with_conn(|conn| job_repo::find_by_task_id(conn, task_id))?
            .map(Job::try_from)
            .transpose()
    }

    fn owned_project(&self, project_id: &str, user_id: &str) -> Result<Project> {
        match self.catalog.project(project_id)? {
            Some(project) if project.user_id == user_id => Ok(project),
            _ => Err(OrchestratorError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            }),
        }
    }

    fn owned_job(&self, job_id: &str, user_id: &str) -> Result<Job> {
        let not_found = || OrchestratorError::NotFound {
            entity: "job",
            id: job_id.to_string(),
        };
        match self.get_job(job_id) {
            Ok(job) if job.user_id == user_id => Ok(job),
            Ok(_) => Err(not_found()),
            Err(e) => Err(e),
        }
    }

    fn insert_job(&self, conn: &Connection, project: &Project, kind: JobKind) -> Result<Job> {
        let now = self.now();
        let row = JobRow {
            id: Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            user_id: project.user_id.clone(),
            kind: kind.as_str().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            progress: 0,
            error: None,
            task_id: None,
            created_at: now.clone(),
            updated_at: now,
        };
        job_repo::insert(conn, &row)?;
        Job::try_from(row)
    }

    /// Starts an attempt: Pending or Processing to Processing at 10%.
    /// `None` when the job is already terminal (cancelled, or finished by
    /// an earlier delivery) and the task should be acknowledged as a no-op.
    pub(crate) fn begin_attempt(&self, job_id: &str) -> Result<Option<Job>> {
        let now = self.now();
        let job = self.db.with_tx(|tx| {
            let current = job::load(tx, job_id)?;
            if current.status.is_terminal() {
                return Ok::<_, OrchestratorError>(None);
            }
            job::transition(tx, job_id, JobStatus::Processing, CLAIMED_PERCENT, None, &now)?;
            job::load(tx, job_id).map(Some)
        })?;

        if job.is_some() {
            self.events.send(JobProgressEvent::new(
                job_id,
                JobStatus::Processing,
                CLAIMED_PERCENT,
                "Processing started",
            ));
        }
        Ok(job)
    }

    /// Raises the stored progress and notifies subscribers. Advisory: a
    /// failed write is logged, never raised.
    pub(crate) fn report_progress(&self, job_id: &str, percent: u8, message: &str) {
        let now = self.now();
        if let Err(e) = self
            .db
            .with_conn(|conn| job_repo::raise_progress(conn, job_id, percent, &now))
        {
            warn!("Failed to record progress for job {}: {}", job_id, e);
        }
        self.events.send(JobProgressEvent::new(
            job_id,
            JobStatus::Processing,
            percent,
            message,
        ));
    }

    /// Inserts every output and completes the job in one transaction.
    pub(crate) fn complete_with(&self, job_id: &str, outputs: &[GeneratedAssetRow]) -> Result<()> {
        let now = self.now();
        self.db.with_tx(|tx| {
            for row in outputs {
                generated_asset_repo::insert(tx, row)?;
            }
            job::transition(tx, job_id, JobStatus::Completed, 100, None, &now)?;
            Ok::<_, OrchestratorError>(())
        })?;
        info!("Job {} completed with {} outputs", job_id, outputs.len());
        self.events.send(JobProgressEvent::new(
            job_id,
            JobStatus::Completed,
            100,
            "Completed",
        ));
        Ok(())
    }

    /// Fails a job unless it already reached a terminal state. Used on
    /// paths that may run more than once for the same failure.
    pub(crate) fn mark_failed(&self, job_id: &str, reason: &str) {
        match self.fail_job(job_id, reason) {
            Ok(()) | Err(OrchestratorError::IllegalTransition { .. }) => {}
            Err(e) => warn!("Could not mark job {} failed: {}", job_id, e),
        }
    }

    /// Decides what a handler failure means for the job.
    ///
    /// Retryable errors with retries left keep the job Processing and ask
    /// the queue for another attempt; everything else fails the job
    /// (progress 0) and hands the queue a plain message to dead-letter.
    pub(crate) fn settle_failure(
        &self,
        ctx: &TaskContext,
        job_id: &str,
        error: OrchestratorError,
    ) -> TaskError {
        let message = error.to_string();
        if error.is_retryable() && !ctx.is_final_attempt() {
            let now = self.now();
            if let Err(e) = self
                .db
                .with_conn(|conn| job_repo::record_error(conn, job_id, &message, &now))
            {
                warn!("Failed to record error on job {}: {}", job_id, e);
            }
            warn!(
                "Job {} attempt {} failed, will retry: {}",
                job_id,
                ctx.retries() + 1,
                message
            );
            return TaskError::Retry(message);
        }

        self.mark_failed(job_id, &message);
        TaskError::Permanent(message)
    }
}

pub(crate) fn summarize(row: GeneratedAssetRow, format_name: Option<String>) -> GeneratedAssetSummary {
    GeneratedAssetSummary {
        id: row.id,
        original_asset_id: row.original_asset_id,
        asset_format_id: row.asset_format_id,
        format_name,
        storage_path: row.storage_path,
        file_type: row.file_type,
        width: row.width,
        height: row.height,
        is_nsfw: row.is_nsfw,
        version: row.version,
    }
}
