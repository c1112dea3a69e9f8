//! Wiring of the store, queue, orchestrator and monitor into one handle.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::ai::{build_provider, AiProvider};
use crate::broadcast::JobProgressBroadcaster;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::db::catalog_repo::SqliteCatalog;
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::monitor::{ControlSurface, Maintenance};
use crate::orchestrator::{AnalysisHandler, GenerationHandler, JobService, PromptEditHandler};
use crate::queue::{
    Broker, Clock, HandlerRegistry, QueueTopology, SystemClock, TaskKind, WorkerConfig,
    WorkerPool,
};
use crate::storage::FileStorage;

pub struct CreatflowApp {
    config: Config,
    broker: Arc<Broker>,
    jobs: Arc<JobService>,
    control: ControlSurface,
    registry: Arc<HandlerRegistry>,
    events: JobProgressBroadcaster,
}

impl CreatflowApp {
    /// Opens the configured database and AI provider.
    pub fn build(config: Config) -> Result<Self> {
        let path = config
            .database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "Could not determine the database path".to_string(),
            })?;
        let db = Database::open(&path)?;
        let ai = build_provider(&config.ai)?;
        Self::build_with(config, db, ai, Arc::new(SystemClock))
    }

    /// Builds on an existing store, provider and clock.
    pub fn build_with(
        config: Config,
        db: Database,
        ai: Arc<dyn AiProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let topology = Arc::new(QueueTopology::from_config(&config.task_overrides)?);
        let broker = Arc::new(Broker::new(
            db.clone(),
            topology,
            Arc::clone(&clock),
            Duration::from_secs(config.worker.lease_grace_secs),
        ));

        let storage = FileStorage::new(&config.upload_dir);
        let events = JobProgressBroadcaster::default();
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(db.clone()));
        info!(
            "Using {} AI provider (image editor {})",
            ai.name(),
            if config.ai.use_image_editor { "on" } else { "off" }
        );
        let jobs = Arc::new(JobService::new(
            db.clone(),
            catalog,
            Arc::clone(&broker),
            storage.clone(),
            ai,
            config.ai.use_image_editor,
            events.clone(),
        ));
        let maintenance = Arc::new(Maintenance::new(db, storage, clock));

        let mut registry = HandlerRegistry::new();
        registry
            .register(
                TaskKind::ProcessUploadedAssets,
                Arc::new(AnalysisHandler::new(Arc::clone(&jobs))),
            )
            .register(
                TaskKind::ProcessGenerationJob,
                Arc::new(GenerationHandler::new(Arc::clone(&jobs))),
            )
            .register(
                TaskKind::ProcessPromptEditJob,
                Arc::new(PromptEditHandler::new(Arc::clone(&jobs))),
            )
            .register(TaskKind::CleanupFailedJobs, maintenance.clone())
            .register(TaskKind::CleanupOrphanedFiles, maintenance.clone())
            .register(TaskKind::HealthCheck, maintenance);

        let control = ControlSurface::new(
            Arc::clone(&broker),
            Arc::clone(&jobs),
            chrono::Duration::seconds(config.worker.heartbeat_timeout_secs as i64),
        );

        Ok(Self {
            config,
            broker,
            jobs,
            control,
            registry: Arc::new(registry),
            events,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &JobProgressBroadcaster {
        &self.events
    }

    /// Starts the configured worker pool.
    pub fn start_workers(&self) -> Result<WorkerPool> {
        let pool = WorkerPool::start(
            Arc::clone(&self.broker),
            Arc::clone(&self.registry),
            WorkerConfig::from(&self.config.worker),
        )?;
        Ok(pool)
    }
}
