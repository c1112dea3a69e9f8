//! Shared fixture for orchestrator unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use tempfile::TempDir;

use super::service::JobService;
use crate::adapt::engine::encode;
use crate::adapt::metadata::{DetectedObject, FaceBox};
use crate::adapt::SourceFormat;
use crate::ai::offline::OfflineProvider;
use crate::ai::{AiError, AiProvider, GeneratedImage};
use crate::broadcast::JobProgressBroadcaster;
use crate::catalog::{AssetFormat, FormatType, Project, ProjectStatus, SourceAsset};
use crate::db::catalog_repo::{self, SqliteCatalog};
use crate::db::Database;
use crate::queue::{Broker, ManualClock, QueueName, QueueTopology, TaskContext};
use crate::storage::FileStorage;

pub(crate) const USER: &str = "user-1";

pub(crate) struct Fixture {
    pub db: Database,
    pub broker: Arc<Broker>,
    pub clock: Arc<ManualClock>,
    pub service: Arc<JobService>,
    pub project_id: String,
    pub dir: TempDir,
    soft_limit: Arc<AtomicBool>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_ai(Arc::new(OfflineProvider))
    }

    pub fn with_ai(ai: Arc<dyn AiProvider>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let broker = Arc::new(Broker::new(
            db.clone(),
            Arc::new(QueueTopology::standard()),
            clock.clone(),
            Duration::from_secs(30),
        ));

        let project = Project {
            id: "project-1".into(),
            user_id: USER.into(),
            organization_id: None,
            name: "Spring launch".into(),
            status: ProjectStatus::Processing,
        };
        catalog_repo::insert_project(&db, &project).unwrap();

        let service = Arc::new(JobService::new(
            db.clone(),
            Arc::new(SqliteCatalog::new(db.clone())),
            broker.clone(),
            FileStorage::new(dir.path()),
            ai,
            false,
            JobProgressBroadcaster::default(),
        ));

        Self {
            db,
            broker,
            clock,
            service,
            project_id: project.id,
            dir,
            soft_limit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_png(&self, name: &str, width: u32, height: u32) -> SourceAsset {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40])));
        self.add_file(name, &encode(&image, SourceFormat::Png).unwrap())
    }

    pub fn add_file(&self, name: &str, bytes: &[u8]) -> SourceAsset {
        let relative = format!("uploads/{}", name);
        let path = self.dir.path().join(&relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let asset = SourceAsset {
            id: format!("asset-{}", name),
            project_id: self.project_id.clone(),
            original_filename: name.into(),
            storage_path: relative,
            file_type: mime_guess::from_path(name)
                .first_or_octet_stream()
                .to_string(),
            ai_metadata: None,
        };
        catalog_repo::insert_asset(&self.db, &asset).unwrap();
        asset
    }

    pub fn add_format(
        &self,
        id: &str,
        width: u32,
        height: u32,
        platform: Option<&str>,
        is_active: bool,
    ) -> AssetFormat {
        let format = AssetFormat {
            id: id.into(),
            name: format!("{} {}x{}", id, width, height),
            format_type: FormatType::Resizing,
            width,
            height,
            platform_name: platform.map(String::from),
            category: None,
            is_active,
        };
        catalog_repo::insert_format(&self.db, &format).unwrap();
        format
    }

    /// Claims the next task on `queue` as a test worker.
    pub fn claim(&self, queue: QueueName) -> TaskContext {
        let task = self
            .broker
            .claim(&[queue], "w-test")
            .unwrap()
            .expect("a ready task");
        let policy = self.broker.topology().policy(task.kind).clone();
        TaskContext::new(
            task,
            policy,
            self.broker.clone(),
            "w-test",
            self.soft_limit.clone(),
        )
    }

    pub fn trip_soft_limit(&self) {
        self.soft_limit.store(true, Ordering::Relaxed);
    }
}

/// Provider that answers generative calls with a flat image and counts
/// them. Detection results and failures are configurable.
#[derive(Default)]
pub(crate) struct ScriptedAi {
    pub faces: Vec<FaceBox>,
    pub objects: Vec<DetectedObject>,
    pub nsfw: bool,
    pub fail_detection: bool,
    pub fail_edits: bool,
    pub edit_calls: AtomicUsize,
}

impl ScriptedAi {
    fn flat(width: u32, height: u32) -> GeneratedImage {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([20, 120, 220])));
        GeneratedImage {
            bytes: encode(&image, SourceFormat::Png).unwrap(),
            mime_type: "image/png".into(),
        }
    }

    fn unavailable() -> AiError {
        AiError::Api {
            status: 503,
            body: "overloaded".into(),
        }
    }
}

impl AiProvider for ScriptedAi {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect_faces(&self, _image: &Path) -> Result<Vec<FaceBox>, AiError> {
        if self.fail_detection {
            return Err(Self::unavailable());
        }
        Ok(self.faces.clone())
    }

    fn detect_objects(&self, _image: &Path) -> Result<Vec<DetectedObject>, AiError> {
        if self.fail_detection {
            return Err(Self::unavailable());
        }
        Ok(self.objects.clone())
    }

    fn detect_nsfw(&self, _image: &Path) -> Result<bool, AiError> {
        if self.fail_detection {
            return Err(Self::unavailable());
        }
        Ok(self.nsfw)
    }

    fn resize_image(
        &self,
        _image: &Path,
        width: u32,
        height: u32,
        _prompt: Option<&str>,
    ) -> Result<GeneratedImage, AiError> {
        Ok(Self::flat(width, height))
    }

    fn edit_image(&self, image: &Path, _prompt: &str) -> Result<GeneratedImage, AiError> {
        self.edit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_edits {
            return Err(Self::unavailable());
        }
        let (width, height) = image::open(image).unwrap().dimensions();
        Ok(Self::flat(width, height))
    }
}
