//! Prompt-driven edit of a single source asset.

use std::sync::Arc;

use image::GenericImageView;
use serde_json::{json, Value};
use tracing::{info, info_span};
use uuid::Uuid;

use super::payload::{job_id_of, PromptEditPayload};
use super::service::JobService;
use super::OrchestratorError;
use crate::adapt::engine::prompt_edit_path;
use crate::adapt::format::mime_type_for;
use crate::adapt::{AdaptError, SourceFormat};
use crate::db::generated_asset_repo::GeneratedAssetRow;
use crate::queue::{ClaimedTask, TaskContext, TaskError, TaskHandler};

pub struct PromptEditHandler {
    service: Arc<JobService>,
}

impl PromptEditHandler {
    pub fn new(service: Arc<JobService>) -> Self {
        Self { service }
    }

    fn run(&self, payload: &PromptEditPayload) -> Result<Value, OrchestratorError> {
        let Some(job) = self.service.begin_attempt(&payload.job_id)? else {
            info!("Job {} already finished, skipping delivery", payload.job_id);
            return Ok(json!({ "job_id": payload.job_id, "skipped": true }));
        };

        let asset = self
            .service
            .catalog()
            .asset(&payload.source_asset_id)?
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "asset",
                id: payload.source_asset_id.clone(),
            })?;
        let source = self.service.storage().resolve(&asset.storage_path)?;
        let format = SourceFormat::detect(&source)?;

        self.service
            .report_progress(&job.id, 30, "Sending edit to AI provider");
        let generated = self.service.ai().edit_image(&source, &payload.prompt)?;
        let image = image::load_from_memory(&generated.bytes).map_err(|e| AdaptError::Decode {
            path: source.clone(),
            reason: e.to_string(),
        })?;

        let output = prompt_edit_path(&source);
        self.service.engine().save(&image, &output, format)?;
        self.service.report_progress(&job.id, 90, "Saving edited image");

        let (width, height) = image.dimensions();
        let now = self.service.now();
        let row = GeneratedAssetRow {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            original_asset_id: asset.id.clone(),
            asset_format_id: None,
            storage_path: self.service.storage().relative(&output)?,
            file_type: mime_type_for(&output),
            width,
            height,
            is_nsfw: asset.ai_metadata.as_ref().is_some_and(|m| m.is_nsfw),
            manual_edits: Some(json!({ "prompt": payload.prompt }).to_string()),
            version: 1,
            created_at: now.clone(),
            updated_at: now,
        };
        self.service.complete_with(&job.id, std::slice::from_ref(&row))?;

        Ok(json!({
            "job_id": job.id,
            "generated_asset_id": row.id,
            "width": width,
            "height": height,
        }))
    }
}

impl TaskHandler for PromptEditHandler {
    fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let payload: PromptEditPayload = ctx.payload()?;
        let _span = info_span!("prompt_edit", job_id = %payload.job_id).entered();
        self.run(&payload)
            .map_err(|e| self.service.settle_failure(ctx, &payload.job_id, e))
    }

    fn on_dead_letter(&self, task: &ClaimedTask, reason: &str) {
        if let Some(job_id) = job_id_of(&task.payload) {
            self.service.mark_failed(job_id, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::generated_asset_repo;
    use crate::orchestrator::testing::{Fixture, ScriptedAi, USER};
    use crate::orchestrator::JobStatus;
    use crate::queue::QueueName;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_prompt_edit_produces_one_output() {
        let ai = Arc::new(ScriptedAi::default());
        let fx = Fixture::with_ai(ai.clone());
        let asset = fx.add_png("hero.png", 120, 80);

        let job = fx
            .service
            .dispatch_prompt_edit(&asset.id, "make it autumn", USER)
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let ctx = fx.claim(QueueName::Generation);
        PromptEditHandler::new(fx.service.clone())
            .handle(&ctx)
            .unwrap();
        assert_eq!(ai.edit_calls.load(Ordering::SeqCst), 1);

        let rows = fx
            .db
            .with_conn(|c| generated_asset_repo::list_by_job(c, &job.id))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].width, rows[0].height), (120, 80));
        assert_eq!(rows[0].storage_path, "uploads/hero_prompt_edited.png");
        assert!(rows[0].manual_edits.as_deref().unwrap().contains("make it autumn"));

        let results = fx.service.get_job_results(&job.id, USER).unwrap();
        assert_eq!(results["Custom"].len(), 1);
    }

    #[test]
    fn test_provider_failure_is_retried() {
        let ai = Arc::new(ScriptedAi {
            fail_edits: true,
            ..Default::default()
        });
        let fx = Fixture::with_ai(ai);
        let asset = fx.add_png("hero.png", 40, 40);
        let job = fx
            .service
            .dispatch_prompt_edit(&asset.id, "add snow", USER)
            .unwrap();

        let ctx = fx.claim(QueueName::Generation);
        let err = PromptEditHandler::new(fx.service.clone())
            .handle(&ctx)
            .unwrap_err();
        assert!(matches!(err, TaskError::Retry(_)));
        assert_eq!(
            fx.service.get_job(&job.id).unwrap().status,
            JobStatus::Processing
        );
    }

    #[test]
    fn test_offline_provider_fails_job() {
        let fx = Fixture::new();
        let asset = fx.add_png("hero.png", 40, 40);
        let job = fx
            .service
            .dispatch_prompt_edit(&asset.id, "add snow", USER)
            .unwrap();

        let ctx = fx.claim(QueueName::Generation);
        let err = PromptEditHandler::new(fx.service.clone())
            .handle(&ctx)
            .unwrap_err();
        assert!(matches!(err, TaskError::Permanent(_)));
        assert_eq!(fx.service.get_job(&job.id).unwrap().status, JobStatus::Failed);
    }
}
