//! End-to-end tests for generation, prompt edits and manual edits, driven
//! through the broker and a worker.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{FormatBuilder, ScriptedAi, TestHarness, USER};
use creatflow::adapt::{CropFractions, ManualEdits};
use creatflow::orchestrator::{CustomSize, GenerationRequest};
use creatflow::{JobStatus, OrchestratorError};

fn request(format_ids: &[&str], custom: &[(u32, u32)]) -> GenerationRequest {
    GenerationRequest {
        format_ids: format_ids.iter().map(|s| s.to_string()).collect(),
        custom_sizes: custom
            .iter()
            .map(|&(width, height)| CustomSize { width, height })
            .collect(),
        prompt: None,
    }
}

#[test]
fn test_psd_is_skipped_and_png_is_resized() {
    let h = TestHarness::new();
    h.add_png("hero.png", 400, 200);
    h.add_file("layers.psd", b"8BPS\x00\x01");
    h.add_format(FormatBuilder::new("ig-square", 300, 300).platform("Instagram").build());

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    let task_id = h
        .jobs()
        .enqueue_generation(&job.id, USER, request(&["ig-square"], &[]))
        .unwrap();

    let outcomes = h.run_until_idle();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded());

    let status = h.jobs().get_job_status(&job.id, USER).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);

    let task = h.app.broker().status(&task_id).unwrap().unwrap();
    let result = task.result.unwrap();
    assert_eq!(result["total_operations"], 2);
    assert_eq!(result["generated"], 1);
    assert_eq!(result["skipped"], 1);

    let outputs = h.generated(&job.id);
    assert_eq!(outputs.len(), 1);
    assert_eq!((outputs[0].width, outputs[0].height), (300, 300));
    assert!(h.stored(&outputs[0].storage_path).exists());
}

#[test]
fn test_one_corrupt_asset_does_not_fail_the_job() {
    let h = TestHarness::new();
    h.add_png("good.png", 300, 300);
    h.add_file("corrupt.png", b"\x89PNG truncated garbage");

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    let task_id = h
        .jobs()
        .enqueue_generation(&job.id, USER, request(&[], &[(150, 100)]))
        .unwrap();

    let outcomes = h.run_until_idle();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded());

    let result = h.app.broker().status(&task_id).unwrap().unwrap().result.unwrap();
    assert_eq!(result["total_operations"], 2);
    assert_eq!(result["generated"], 1);
    assert_eq!(result["failed"], 1);
    assert_eq!(result["skipped"], 0);

    let status = h.jobs().get_job_status(&job.id, USER).unwrap();
    assert_eq!((status.status, status.progress), (JobStatus::Completed, 100));

    let outputs = h.generated(&job.id);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].storage_path.ends_with("good_150x100_center_crop.png"));
}

#[test]
fn test_fanout_groups_results_by_platform_then_custom() {
    let h = TestHarness::new();
    h.add_png("a.png", 640, 480);
    h.add_png("b.png", 480, 640);
    h.add_format(FormatBuilder::new("ig-story", 108, 192).platform("Instagram").build());
    h.add_format(FormatBuilder::new("banner", 300, 50).category("Display").build());
    h.add_format(FormatBuilder::new("retired", 100, 100).inactive().build());

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    h.jobs()
        .enqueue_generation(
            &job.id,
            USER,
            request(&["ig-story", "banner", "retired"], &[(64, 64)]),
        )
        .unwrap();
    h.run_until_idle();

    // 2 assets x (2 active formats + 1 custom size)
    assert_eq!(h.generated(&job.id).len(), 6);

    let results = h.jobs().get_job_results(&job.id, USER).unwrap();
    let groups: Vec<&str> = results.keys().map(String::as_str).collect();
    assert_eq!(groups, vec!["Custom", "Display", "Instagram"]);
    assert!(results.values().all(|g| g.len() == 2));

    let story = &results["Instagram"][0];
    assert_eq!((story.width, story.height), (108, 192));
    assert_eq!(story.format_name.as_deref(), Some("ig-story 108x192"));
    assert!(results["Custom"].iter().all(|s| s.asset_format_id.is_none()));
}

#[test]
fn test_progress_events_are_monotonic() {
    let h = TestHarness::new();
    h.add_png("a.png", 200, 200);
    h.add_png("b.png", 200, 100);
    let mut rx = h.app.events().subscribe();

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    h.jobs()
        .enqueue_generation(&job.id, USER, request(&[], &[(50, 50), (80, 40)]))
        .unwrap();
    h.run_until_idle();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id, job.id);
        seen.push((event.status, event.progress));
    }
    assert_eq!(seen.first(), Some(&(JobStatus::Pending, 0)));
    assert_eq!(seen.last(), Some(&(JobStatus::Completed, 100)));
    assert!(seen.len() >= 6);
    assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[test]
fn test_rerun_of_same_size_overwrites_same_path() {
    let h = TestHarness::new();
    h.add_png("hero.png", 500, 300);

    let mut paths = Vec::new();
    for _ in 0..2 {
        let job = h.jobs().create_job(&h.project_id, USER).unwrap();
        h.jobs()
            .enqueue_generation(&job.id, USER, request(&[], &[(120, 120)]))
            .unwrap();
        h.run_until_idle();
        let outputs = h.generated(&job.id);
        assert_eq!(outputs.len(), 1);
        assert_eq!((outputs[0].width, outputs[0].height), (120, 120));
        paths.push(outputs[0].storage_path.clone());
    }
    assert_eq!(paths[0], paths[1]);
    assert!(paths[0].ends_with("hero_120x120_center_crop.png"));
}

#[test]
fn test_ai_edit_strategy_used_when_enabled() {
    let ai = Arc::new(ScriptedAi::new());
    let h = TestHarness::build(|b| b.use_image_editor(true), ai.clone());
    h.add_png("hero.png", 400, 400);

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    h.jobs()
        .enqueue_generation(
            &job.id,
            USER,
            GenerationRequest {
                prompt: Some("keep the logo visible".to_string()),
                ..request(&[], &[(200, 100)])
            },
        )
        .unwrap();
    h.run_until_idle();

    let outputs = h.generated(&job.id);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].storage_path.ends_with("hero_200x100_ai_edit.png"));
    assert_eq!(ai.resize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        ai.prompts.lock().unwrap().as_slice(),
        ["keep the logo visible".to_string()]
    );
}

#[test]
fn test_ai_edit_failure_falls_back_to_local_crop() {
    let ai = Arc::new(ScriptedAi::failing(10));
    let h = TestHarness::build(|b| b.use_image_editor(true), ai.clone());
    h.add_png("hero.png", 400, 400);

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    h.jobs()
        .enqueue_generation(&job.id, USER, request(&[], &[(200, 100)]))
        .unwrap();
    h.run_until_idle();

    let outputs = h.generated(&job.id);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].storage_path.ends_with("hero_200x100_center_crop.png"));
    assert_eq!(
        h.jobs().get_job(&job.id).unwrap().status,
        JobStatus::Completed
    );
}

#[test]
fn test_prompt_edit_end_to_end() {
    let ai = Arc::new(ScriptedAi::new());
    let h = TestHarness::with_ai(ai.clone());
    let asset = h.add_png("hero.png", 320, 240);

    let job = h
        .jobs()
        .dispatch_prompt_edit(&asset.id, "make the sky purple", USER)
        .unwrap();
    assert!(job.task_id.is_some());
    h.run_until_idle();

    let results = h.jobs().get_job_results(&job.id, USER).unwrap();
    let custom = &results["Custom"];
    assert_eq!(custom.len(), 1);
    assert_eq!((custom[0].width, custom[0].height), (320, 240));
    assert!(custom[0].storage_path.ends_with("hero_prompt_edited.png"));
    assert_eq!(ai.edit_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_manual_edit_bumps_version_and_rejects_stale_writer() {
    let h = TestHarness::new();
    h.add_png("hero.png", 400, 400);
    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    h.jobs()
        .enqueue_generation(&job.id, USER, request(&[], &[(200, 200)]))
        .unwrap();
    h.run_until_idle();
    let output = h.generated(&job.id).remove(0);

    let edits = ManualEdits {
        crop: Some(CropFractions {
            x: 0.0,
            y: 0.0,
            width: 0.5,
            height: 1.0,
        }),
        ..ManualEdits::default()
    };
    let edited = h
        .jobs()
        .apply_manual_edits(&output.id, &edits, 1, USER)
        .unwrap();
    assert_eq!(edited.version, 2);
    assert_eq!((edited.width, edited.height), (100, 200));
    assert!(h.stored(&edited.storage_path).exists());

    let err = h
        .jobs()
        .apply_manual_edits(&output.id, &edits, 1, USER)
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Conflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));
}

#[test]
fn test_lookups_respect_ownership_and_readiness() {
    let h = TestHarness::new();
    h.add_png("hero.png", 100, 100);

    assert!(matches!(
        h.jobs().create_job(&h.project_id, "someone-else"),
        Err(OrchestratorError::NotFound { entity: "project", .. })
    ));

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    assert!(matches!(
        h.jobs().get_job_status(&job.id, "someone-else"),
        Err(OrchestratorError::NotFound { entity: "job", .. })
    ));
    assert!(matches!(
        h.jobs().get_job_results(&job.id, USER),
        Err(OrchestratorError::NotReady {
            status: JobStatus::Pending,
            ..
        })
    ));
    assert!(matches!(
        h.jobs().enqueue_generation(&job.id, USER, request(&[], &[])),
        Err(OrchestratorError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.jobs().dispatch_prompt_edit("asset-missing", "brighter", USER),
        Err(OrchestratorError::NotFound { entity: "asset", .. })
    ));

    h.jobs()
        .enqueue_generation(&job.id, USER, request(&[], &[(10, 10)]))
        .unwrap();
    assert!(matches!(
        h.jobs().enqueue_generation(&job.id, USER, request(&[], &[(10, 10)])),
        Err(OrchestratorError::InvalidRequest(_))
    ));
}
