pub mod adapt;
pub mod ai;
pub mod app;
pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod telemetry;

pub use adapt::{AdaptationEngine, AdaptedImage, ManualEdits, ResizeRequest};
pub use ai::{build_provider, AiProvider, AiProviderKind};
pub use app::CreatflowApp;
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use catalog::Catalog;
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{ConfigError, CreatflowError, Result, StorageError};
pub use monitor::{ControlSurface, Maintenance};
pub use orchestrator::{JobService, JobStatus, OrchestratorError};
pub use queue::{Broker, QueueTopology, TaskKind, WorkerPool};
pub use secrets::{resolve_secret, SecretError};
