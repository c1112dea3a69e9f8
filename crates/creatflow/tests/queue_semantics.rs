//! Delivery guarantees exercised through real handlers: retry backoff,
//! dead-lettering, rate limits, revocation and lost workers.

mod common;

use std::time::{Duration, Instant};

use common::{TestHarness, USER};
use creatflow::orchestrator::{CustomSize, GenerationRequest};
use creatflow::queue::{ExecutionOutcome, FailureOutcome, QueueName, TaskKind, TaskState};
use creatflow::JobStatus;

fn custom(width: u32, height: u32) -> GenerationRequest {
    GenerationRequest {
        custom_sizes: vec![CustomSize { width, height }],
        ..GenerationRequest::default()
    }
}

#[test]
fn test_failing_generation_backs_off_then_dead_letters() {
    let h = TestHarness::new();
    h.add_file("broken.png", b"definitely not a png");

    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    let task_id = h
        .jobs()
        .enqueue_generation(&job.id, USER, custom(100, 100))
        .unwrap();

    let mut delays = Vec::new();
    loop {
        let outcome = h.run_next().expect("a task should be due");
        match outcome {
            ExecutionOutcome::Failed {
                outcome: FailureOutcome::Retried { delay, .. },
                ..
            } => {
                let job = h.jobs().get_job(&job.id).unwrap();
                assert_eq!(job.status, JobStatus::Processing);
                assert!(job.error.unwrap().contains("no outputs"));

                // Not due before the backoff elapses.
                assert!(h.run_next().is_none());
                delays.push(delay.as_secs());
                // Past the delay and the rate window.
                h.advance_secs(delay.as_secs() as i64 + 60);
            }
            ExecutionOutcome::Failed {
                outcome: FailureOutcome::DeadLettered,
                ..
            } => break,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(delays, vec![1, 2, 4, 8, 16]);

    let status = h.jobs().get_job_status(&job.id, USER).unwrap();
    assert_eq!((status.status, status.progress), (JobStatus::Failed, 0));
    assert!(status.error.is_some());

    let dead = h.app.control().dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, task_id);
    assert_eq!(dead[0].kind, "process_generation_job");
    assert_eq!(dead[0].origin_queue, "generation");
    assert_eq!(dead[0].retries, 5);
    assert_eq!(dead[0].payload["job_id"], job.id.as_str());
    assert!(h.run_next().is_none());
}

#[test]
fn test_generation_rate_limit_defers_sixth_start() {
    let h = TestHarness::new();
    h.add_png("hero.png", 64, 64);

    let mut job_ids = Vec::new();
    for _ in 0..6 {
        let job = h.jobs().create_job(&h.project_id, USER).unwrap();
        h.jobs()
            .enqueue_generation(&job.id, USER, custom(32, 32))
            .unwrap();
        job_ids.push(job.id);
    }

    assert_eq!(h.run_until_idle().len(), 5);
    let depths = h.app.control().queue_depths().unwrap();
    assert_eq!(depths["generation"], 1);

    h.advance_secs(61);
    assert_eq!(h.run_until_idle().len(), 1);
    for id in &job_ids {
        assert_eq!(h.jobs().get_job(id).unwrap().status, JobStatus::Completed);
    }
}

#[test]
fn test_cancelled_pending_task_is_never_delivered() {
    let h = TestHarness::new();
    h.add_png("hero.png", 64, 64);
    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    let task_id = h
        .jobs()
        .enqueue_generation(&job.id, USER, custom(32, 32))
        .unwrap();

    assert!(h.app.control().cancel_task(&task_id).unwrap());
    assert!(h.run_until_idle().is_empty());

    let status = h.app.control().task_status(&task_id).unwrap().unwrap();
    assert_eq!(status.state, TaskState::Revoked);
    let job = h.jobs().get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Cancelled"));
}

#[test]
fn test_lost_worker_is_redelivered_once_then_rejected() {
    let h = TestHarness::new();
    h.add_png("hero.png", 64, 64);
    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    let task_id = h
        .jobs()
        .enqueue_generation(&job.id, USER, custom(32, 32))
        .unwrap();
    let broker = h.app.broker();
    let lease_secs = 600 + 30 + 1;

    let first = broker
        .claim(&[QueueName::Generation], "worker-gone-1")
        .unwrap()
        .unwrap();
    assert_eq!(first.id, task_id);
    h.advance_secs(lease_secs);
    let report = broker.reap_expired_leases().unwrap();
    assert_eq!(report.redelivered, vec![task_id.clone()]);
    assert!(report.rejected.is_empty());

    let second = broker
        .claim(&[QueueName::Generation], "worker-gone-2")
        .unwrap()
        .unwrap();
    assert_eq!(second.deliveries, 2);
    h.advance_secs(lease_secs);
    let report = broker.reap_expired_leases().unwrap();
    assert!(report.redelivered.is_empty());
    assert_eq!(report.rejected.len(), 1);

    let rejected = &report.rejected[0];
    let handler = h.app.registry().get(rejected.kind).unwrap();
    handler.on_dead_letter(rejected, "Worker lost");

    let job = h.jobs().get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let dead = broker.dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].error.as_deref().unwrap().contains("Worker lost"));
}

#[test]
fn test_late_ack_discards_result_after_reap() {
    let h = TestHarness::new();
    h.add_png("hero.png", 64, 64);
    let job = h.jobs().create_job(&h.project_id, USER).unwrap();
    h.jobs()
        .enqueue_generation(&job.id, USER, custom(32, 32))
        .unwrap();
    let broker = h.app.broker();

    let stale = broker
        .claim(&[QueueName::Generation], "slow-worker")
        .unwrap()
        .unwrap();
    h.advance_secs(700);
    broker.reap_expired_leases().unwrap();

    let result = serde_json::json!({ "job_id": job.id });
    assert!(broker.ack(&stale.id, "slow-worker", &result).is_err());

    // The redelivery runs normally.
    let outcomes = h.run_until_idle();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded());
    assert_eq!(h.jobs().get_job(&job.id).unwrap().status, JobStatus::Completed);
}

#[test]
fn test_pool_drains_scheduled_maintenance() {
    let h = TestHarness::new();
    let schedule = h.app.control().schedule_maintenance().unwrap();
    h.advance_secs(301);

    let pool = h.app.start_workers().unwrap();
    let ids = [
        schedule.health_check.clone(),
        schedule.cleanup_failed_jobs.clone(),
        schedule.cleanup_orphaned_files.clone(),
    ];
    let deadline = Instant::now() + Duration::from_secs(10);
    let all_done = || {
        ids.iter().all(|id| {
            h.app
                .broker()
                .status(id)
                .unwrap()
                .is_some_and(|s| s.state == TaskState::Success)
        })
    };
    while !all_done() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    pool.shutdown();
    pool.wait();

    assert!(all_done(), "maintenance tasks did not finish");
    let health = h.app.broker().status(&schedule.health_check).unwrap().unwrap();
    assert_eq!(health.kind, TaskKind::HealthCheck.as_str());
    assert_eq!(health.result.unwrap()["database"], true);
}
