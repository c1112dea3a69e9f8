use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use uuid::Uuid;

use super::broker::Broker;
use super::handler::HandlerRegistry;
use super::topology::QueueName;
use super::worker::Worker;
use super::QueueError;
use crate::config::WorkerSettings;
use crate::db::{format_ts, worker_repo};

/// Granularity at which sleeping threads notice shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub count: usize,
    pub queues: Vec<QueueName>,
    pub poll_interval: Duration,
    pub reap_interval: Duration,
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            count: settings.count,
            queues: settings.queues.clone(),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            reap_interval: Duration::from_millis(settings.reap_interval_ms),
        }
    }
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
    worker_ids: Vec<String>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Registers `config.count` worker slots and starts them, plus one
    /// reaper thread for expired leases.
    pub fn start(
        broker: Arc<Broker>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Result<Self, QueueError> {
        let count = config.count.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let queues_label = config
            .queues
            .iter()
            .map(|q| q.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut workers = Vec::with_capacity(count);
        let mut worker_ids = Vec::with_capacity(count);

        for slot in 0..count {
            let id = format!("{}-{}-{}", hostname, slot, &Uuid::new_v4().simple().to_string()[..8]);
            let now = format_ts(broker.now());
            worker_repo::register(
                broker.database(),
                &worker_repo::WorkerRow {
                    id: id.clone(),
                    hostname: hostname.clone(),
                    pid: std::process::id(),
                    slot: slot as u32,
                    queues: queues_label.clone(),
                    started_at: now.clone(),
                    last_heartbeat: now,
                    processed: 0,
                    failed: 0,
                    current_task: None,
                    stopped_at: None,
                },
            )?;

            let worker = Worker::new(
                id.clone(),
                Arc::clone(&broker),
                Arc::clone(&registry),
                config.queues.clone(),
            );
            let shutdown_flag = Arc::clone(&shutdown);
            let poll_interval = config.poll_interval;

            let handle = thread::Builder::new()
                .name(format!("worker-{}", slot))
                .spawn(move || run_worker(worker, shutdown_flag, poll_interval))
                .map_err(QueueError::Spawn)?;

            workers.push(handle);
            worker_ids.push(id);
        }

        let reaper = {
            let broker = Arc::clone(&broker);
            let registry = Arc::clone(&registry);
            let shutdown_flag = Arc::clone(&shutdown);
            let interval = config.reap_interval;
            thread::Builder::new()
                .name("lease-reaper".to_string())
                .spawn(move || run_reaper(broker, registry, shutdown_flag, interval))
                .map_err(QueueError::Spawn)?
        };

        info!("Started {} workers on queues [{}]", count, queues_label);

        Ok(Self {
            workers,
            reaper: Some(reaper),
            worker_ids,
            shutdown,
        })
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Asks every thread to stop after its current task.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// A clone of the shutdown flag, for signal handlers.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn wait(mut self) {
        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        if let Some(reaper) = self.reaper.take() {
            if reaper.join().is_err() {
                error!("Lease reaper panicked");
            }
        }
        info!("All workers have stopped");
    }
}

fn run_worker(worker: Worker, shutdown: Arc<AtomicBool>, poll_interval: Duration) {
    debug!("Worker {} started", worker.id());

    while !shutdown.load(Ordering::Relaxed) {
        match worker.run_next() {
            Ok(Some(outcome)) => {
                debug!("Worker {} finished task {}", worker.id(), outcome.task_id());
            }
            Ok(None) => {
                worker.heartbeat();
                sleep_unless_shutdown(&shutdown, poll_interval);
            }
            Err(e) => {
                error!("Worker {} failed to process a task: {}", worker.id(), e);
                sleep_unless_shutdown(&shutdown, poll_interval);
            }
        }
    }

    worker.mark_stopped();
    debug!("Worker {} stopped", worker.id());
}

fn run_reaper(
    broker: Arc<Broker>,
    registry: Arc<HandlerRegistry>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match broker.reap_expired_leases() {
            Ok(report) => {
                for task in report.rejected {
                    if let Some(handler) = registry.get(task.kind) {
                        handler.on_dead_letter(&task, "Worker lost before acknowledging the task");
                    }
                }
            }
            Err(e) => error!("Lease reaper pass failed: {}", e),
        }
        sleep_unless_shutdown(&shutdown, interval);
    }
}

fn sleep_unless_shutdown(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}
