//! Generation fan-out: every source asset of a project times every target
//! size.

use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};
use tracing::{info, info_span};
use uuid::Uuid;

use super::job::Job;
use super::payload::{job_id_of, GenerationPayload};
use super::progress::ProgressTracker;
use super::service::JobService;
use super::OrchestratorError;
use crate::adapt::format::mime_type_for;
use crate::adapt::{AdaptError, ResizeRequest, SourceFormat};
use crate::catalog::SourceAsset;
use crate::db::generated_asset_repo::GeneratedAssetRow;
use crate::queue::{ClaimedTask, TaskContext, TaskError, TaskHandler};

/// One output size. `format_id` is `None` for custom sizes.
#[derive(Debug, Clone, PartialEq)]
struct Target {
    format_id: Option<String>,
    width: u32,
    height: u32,
}

/// Tallies of one attempt.
#[derive(Debug, Default)]
struct FanOut {
    outputs: Vec<GeneratedAssetRow>,
    attempted: usize,
    failed: usize,
    skipped: usize,
}

pub struct GenerationHandler {
    service: Arc<JobService>,
}

impl GenerationHandler {
    pub fn new(service: Arc<JobService>) -> Self {
        Self { service }
    }

    fn run(&self, ctx: &TaskContext, payload: &GenerationPayload) -> Result<Value, OrchestratorError> {
        let Some(job) = self.service.begin_attempt(&payload.job_id)? else {
            info!("Job {} already finished, skipping delivery", payload.job_id);
            return Ok(json!({ "job_id": payload.job_id, "skipped": true }));
        };

        let catalog = self.service.catalog();
        let project = catalog
            .project(&job.project_id)?
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "project",
                id: job.project_id.clone(),
            })?;
        let assets = catalog.project_assets(&project.id)?;
        if assets.is_empty() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "Project {} has no assets",
                project.id
            )));
        }

        let targets = self.resolve_targets(payload)?;
        let settings = catalog.adaptation_settings(project.organization_id.as_deref())?;
        let mut tracker = ProgressTracker::new(assets.len() * targets.len());
        info!(
            "Job {}: {} assets x {} sizes = {} operations",
            job.id,
            assets.len(),
            targets.len(),
            tracker.total()
        );

        let mut fan_out = FanOut::default();
        for asset in &assets {
            let supported = self
                .service
                .storage()
                .resolve(&asset.storage_path)
                .map_err(AdaptError::from)
                .and_then(|path| SourceFormat::detect(&path).map(|_| path));

            let source = match supported {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping asset {}: {}", asset.id, e);
                    for _ in &targets {
                        fan_out.skipped += 1;
                        self.advance(ctx, &job, &mut tracker, &asset.original_filename);
                    }
                    continue;
                }
            };

            for target in &targets {
                if ctx.soft_time_limit_exceeded() {
                    return Err(OrchestratorError::SoftTimeLimit {
                        completed: tracker.completed(),
                        total: tracker.total(),
                    });
                }

                fan_out.attempted += 1;
                let request = ResizeRequest {
                    source: &source,
                    width: target.width,
                    height: target.height,
                    metadata: asset.ai_metadata.as_ref(),
                    prompt: payload.request.prompt.as_deref(),
                    settings,
                };
                match self.service.engine().resize(&request) {
                    Ok(adapted) => {
                        let row = self.output_row(&job, asset, target, &adapted)?;
                        fan_out.outputs.push(row);
                    }
                    Err(e) => {
                        fan_out.failed += 1;
                        warn!(
                            "Resize of asset {} to {}x{} failed: {}",
                            asset.id, target.width, target.height, e
                        );
                    }
                }
                self.advance(ctx, &job, &mut tracker, &asset.original_filename);
            }
        }

        if fan_out.attempted > 0 && fan_out.outputs.is_empty() {
            return Err(OrchestratorError::NoOutputs {
                job_id: job.id,
                attempted: fan_out.attempted,
                failed: fan_out.failed,
            });
        }

        self.service.complete_with(&job.id, &fan_out.outputs)?;
        Ok(json!({
            "job_id": job.id,
            "total_operations": tracker.total(),
            "generated": fan_out.outputs.len(),
            "failed": fan_out.failed,
            "skipped": fan_out.skipped,
        }))
    }

    /// Active formats first, in request order, then custom sizes. Unknown
    /// and inactive format ids are dropped.
    fn resolve_targets(&self, payload: &GenerationPayload) -> Result<Vec<Target>, OrchestratorError> {
        let request = &payload.request;
        let formats = self.service.catalog().asset_formats(&request.format_ids)?;

        let mut targets = Vec::with_capacity(request.format_ids.len() + request.custom_sizes.len());
        for id in &request.format_ids {
            match formats.iter().find(|f| &f.id == id) {
                Some(format) if format.is_active => targets.push(Target {
                    format_id: Some(format.id.clone()),
                    width: format.width,
                    height: format.height,
                }),
                Some(_) => warn!("Ignoring inactive format {}", id),
                None => warn!("Ignoring unknown format {}", id),
            }
        }
        targets.extend(
            request
                .custom_sizes
                .iter()
                .filter(|s| s.width > 0 && s.height > 0)
                .map(|s| Target {
                    format_id: None,
                    width: s.width,
                    height: s.height,
                }),
        );
        Ok(targets)
    }

    fn output_row(
        &self,
        job: &Job,
        asset: &SourceAsset,
        target: &Target,
        adapted: &crate::adapt::AdaptedImage,
    ) -> Result<GeneratedAssetRow, OrchestratorError> {
        let now = self.service.now();
        Ok(GeneratedAssetRow {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            original_asset_id: asset.id.clone(),
            asset_format_id: target.format_id.clone(),
            storage_path: self.service.storage().relative(&adapted.path)?,
            file_type: mime_type_for(&adapted.path),
            width: adapted.width,
            height: adapted.height,
            is_nsfw: asset.ai_metadata.as_ref().is_some_and(|m| m.is_nsfw),
            manual_edits: None,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn advance(&self, ctx: &TaskContext, job: &Job, tracker: &mut ProgressTracker, file: &str) {
        let percent = tracker.advance();
        self.service.report_progress(
            &job.id,
            percent,
            &format!(
                "Processed {} ({}/{})",
                file,
                tracker.completed(),
                tracker.total()
            ),
        );
        ctx.report_progress(&json!({
            "current": tracker.completed(),
            "total": tracker.total(),
            "percent": percent,
        }));
    }
}

impl TaskHandler for GenerationHandler {
    fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let payload: GenerationPayload = ctx.payload()?;
        let _span = info_span!("generation", job_id = %payload.job_id).entered();
        self.run(ctx, &payload)
            .map_err(|e| self.service.settle_failure(ctx, &payload.job_id, e))
    }

    fn on_dead_letter(&self, task: &ClaimedTask, reason: &str) {
        if let Some(job_id) = job_id_of(&task.payload) {
            self.service.mark_failed(job_id, reason);
        }
    }
}
