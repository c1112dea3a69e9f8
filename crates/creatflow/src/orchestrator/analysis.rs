//! AI analysis of a project's uploaded assets.
//!
//! Each detector failure degrades to an empty result instead of failing the
//! asset; a partial analysis is still useful to the crop strategies.

use std::path::Path;
use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};
use tracing::{info, info_span};

use super::payload::AnalysisPayload;
use super::progress::analysis_percent;
use super::service::JobService;
use super::OrchestratorError;
use crate::adapt::{AdaptError, AiMetadata, SourceFormat};
use crate::catalog::{ProjectStatus, SourceAsset};
use crate::queue::{ClaimedTask, TaskContext, TaskError, TaskHandler};

const PSD_REASON: &str = "PSD files require conversion for AI analysis";

pub struct AnalysisHandler {
    service: Arc<JobService>,
}

impl AnalysisHandler {
    pub fn new(service: Arc<JobService>) -> Self {
        Self { service }
    }

    fn run(&self, ctx: &TaskContext, payload: &AnalysisPayload) -> Result<Value, OrchestratorError> {
        let catalog = self.service.catalog();
        let project = catalog
            .project(&payload.project_id)?
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "project",
                id: payload.project_id.clone(),
            })?;
        let assets = catalog.project_assets(&project.id)?;

        let total = assets.len();
        let mut analyzed = 0;
        let mut skipped = 0;
        for (index, asset) in assets.iter().enumerate() {
            if ctx.soft_time_limit_exceeded() {
                return Err(OrchestratorError::SoftTimeLimit {
                    completed: index,
                    total,
                });
            }

            let metadata = self.analyze(asset)?;
            if metadata.analysis_skipped {
                skipped += 1;
            } else {
                analyzed += 1;
            }
            catalog.save_asset_metadata(&asset.id, &metadata)?;

            ctx.report_progress(&json!({
                "current": index + 1,
                "total": total,
                "percent": analysis_percent(index + 1, total),
            }));
        }

        catalog.set_project_status(&project.id, ProjectStatus::ReadyForReview)?;
        ctx.report_progress(&json!({ "current": total, "total": total, "percent": 100 }));
        info!(
            "Project {} analyzed: {} assets, {} skipped",
            project.id, analyzed, skipped
        );
        Ok(json!({
            "project_id": project.id,
            "analyzed": analyzed,
            "skipped": skipped,
        }))
    }

    fn analyze(&self, asset: &SourceAsset) -> Result<AiMetadata, OrchestratorError> {
        let source = self.service.storage().resolve(&asset.storage_path)?;
        match SourceFormat::detect(&source) {
            Ok(_) => Ok(self.detect(&source)),
            Err(AdaptError::Unsupported { extension }) if extension == "psd" => {
                Ok(AiMetadata::skipped(PSD_REASON))
            }
            Err(AdaptError::Unsupported { extension }) => Ok(AiMetadata::skipped(&format!(
                "Unsupported file type '{}'",
                extension
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn detect(&self, source: &Path) -> AiMetadata {
        let ai = self.service.ai();
        let faces = ai.detect_faces(source).unwrap_or_else(|e| {
            warn!("Face detection failed: {}", e);
            Vec::new()
        });
        let objects = ai.detect_objects(source).unwrap_or_else(|e| {
            warn!("Object detection failed: {}", e);
            Vec::new()
        });
        let is_nsfw = ai.detect_nsfw(source).unwrap_or_else(|e| {
            warn!("NSFW detection failed: {}", e);
            false
        });
        AiMetadata::from_detections(faces, objects, is_nsfw)
    }

    fn mark_project_failed(&self, project_id: &str) {
        if let Err(e) = self
            .service
            .catalog()
            .set_project_status(project_id, ProjectStatus::Failed)
        {
            warn!("Could not mark project {} failed: {}", project_id, e);
        }
    }
}

impl TaskHandler for AnalysisHandler {
    fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let payload: AnalysisPayload = ctx.payload()?;
        let _span = info_span!("analysis", project_id = %payload.project_id).entered();
        self.run(ctx, &payload).map_err(|e| {
            if e.is_retryable() && !ctx.is_final_attempt() {
                return TaskError::Retry(e.to_string());
            }
            self.mark_project_failed(&payload.project_id);
            TaskError::Permanent(e.to_string())
        })
    }

    fn on_dead_letter(&self, task: &ClaimedTask, _reason: &str) {
        if let Ok(payload) = serde_json::from_value::<AnalysisPayload>(task.payload.clone()) {
            self.mark_project_failed(&payload.project_id);
        }
    }
}
