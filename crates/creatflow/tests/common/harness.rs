//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct wires a complete `CreatflowApp` over:
//! - a temporary upload root
//! - an in-memory store with one seeded project
//! - a manual clock, so countdowns and retention windows run instantly
//!
//! Tasks are driven one at a time through a `Worker`, which keeps every
//! test deterministic.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use creatflow::adapt::engine::encode;
use creatflow::adapt::SourceFormat;
use creatflow::ai::{AiProvider, OfflineProvider};
use creatflow::catalog::{AssetFormat, Project, ProjectStatus, SourceAsset};
use creatflow::db::catalog_repo;
use creatflow::db::generated_asset_repo::{self, GeneratedAssetRow};
use creatflow::orchestrator::JobService;
use creatflow::queue::{ExecutionOutcome, ManualClock, QueueName, Worker};
use creatflow::{CreatflowApp, Database};

use super::builders::ConfigBuilder;

pub const USER: &str = "designer-1";
pub const PROJECT: &str = "project-spring";

/// Isolated application instance for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    pub upload_dir: PathBuf,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub app: CreatflowApp,
    pub project_id: String,
}

impl TestHarness {
    /// Default config with the offline AI provider.
    pub fn new() -> Self {
        Self::build(|b| b, Arc::new(OfflineProvider))
    }

    pub fn with_ai(ai: Arc<dyn AiProvider>) -> Self {
        Self::build(|b| b, ai)
    }

    pub fn build(
        configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
        ai: Arc<dyn AiProvider>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let upload_dir = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&upload_dir).expect("Failed to create upload dir");

        let config = configure(ConfigBuilder::new(&upload_dir)).build();
        let db = Database::open_in_memory().expect("Failed to open database");
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let app = CreatflowApp::build_with(config, db.clone(), ai, clock.clone())
            .expect("Failed to build app");

        catalog_repo::insert_project(
            &db,
            &Project {
                id: PROJECT.to_string(),
                user_id: USER.to_string(),
                organization_id: None,
                name: "Spring campaign".to_string(),
                status: ProjectStatus::Processing,
            },
        )
        .expect("Failed to seed project");

        Self {
            temp_dir,
            upload_dir,
            db,
            clock,
            app,
            project_id: PROJECT.to_string(),
        }
    }

    pub fn jobs(&self) -> &JobService {
        self.app.jobs()
    }

    /// Writes a solid-color PNG and registers it as an asset.
    pub fn add_png(&self, name: &str, width: u32, height: u32) -> SourceAsset {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([220, 180, 40])));
        let bytes = encode(&image, SourceFormat::Png).expect("Failed to encode PNG");
        self.add_file(name, &bytes)
    }

    /// Writes raw bytes and registers them as an asset.
    pub fn add_file(&self, name: &str, content: &[u8]) -> SourceAsset {
        let relative = format!("{}/{}", PROJECT, name);
        let path = self.upload_dir.join(&relative);
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create asset dir");
        std::fs::write(&path, content).expect("Failed to write asset");

        let asset = SourceAsset {
            id: format!("asset-{}", name),
            project_id: self.project_id.clone(),
            original_filename: name.to_string(),
            storage_path: relative,
            file_type: mime_guess::from_path(name)
                .first_or_octet_stream()
                .to_string(),
            ai_metadata: None,
        };
        catalog_repo::insert_asset(&self.db, &asset).expect("Failed to seed asset");
        asset
    }

    pub fn add_format(&self, format: AssetFormat) -> AssetFormat {
        catalog_repo::insert_format(&self.db, &format).expect("Failed to seed format");
        format
    }

    /// Absolute path of a stored relative path.
    pub fn stored(&self, relative: &str) -> PathBuf {
        self.upload_dir.join(relative)
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A worker consuming every work queue.
    pub fn worker(&self) -> Worker {
        Worker::new(
            "test-worker",
            Arc::clone(self.app.broker()),
            Arc::clone(self.app.registry()),
            vec![
                QueueName::AssetProcessing,
                QueueName::Generation,
                QueueName::Maintenance,
            ],
        )
    }

    /// Runs one due task, if any.
    pub fn run_next(&self) -> Option<ExecutionOutcome> {
        self.worker().run_next().expect("Worker failed to run task")
    }

    /// Runs due tasks until none is left.
    pub fn run_until_idle(&self) -> Vec<ExecutionOutcome> {
        let worker = self.worker();
        let mut outcomes = Vec::new();
        while let Some(outcome) = worker.run_next().expect("Worker failed to run task") {
            outcomes.push(outcome);
            assert!(outcomes.len() < 100, "queue never drained");
        }
        outcomes
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    pub fn generated(&self, job_id: &str) -> Vec<GeneratedAssetRow> {
        self.db
            .with_conn(|conn| generated_asset_repo::list_by_job(conn, job_id))
            .expect("Failed to list generated assets")
    }
}
