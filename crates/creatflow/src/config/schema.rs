use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::ai::AiProviderKind;
use crate::queue::QueueName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root directory for uploaded sources and generated outputs.
    pub upload_dir: PathBuf,
    /// Defaults to `~/.creatflow/data/creatflow.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub ai: AiConfig,
    /// Per task type limits, keyed by task type name.
    #[serde(default)]
    pub task_overrides: HashMap<String, TaskOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Queues consumed by this process.
    #[serde(default = "default_queues")]
    pub queues: Vec<QueueName>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
    /// Added to a task type's hard limit to form its lease.
    #[serde(default = "default_lease_grace_secs")]
    pub lease_grace_secs: u64,
    /// Workers silent for longer than this are reported as not alive.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queues() -> Vec<QueueName> {
    vec![
        QueueName::AssetProcessing,
        QueueName::Generation,
        QueueName::Maintenance,
    ]
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_reap_interval_ms() -> u64 {
    5_000
}

fn default_lease_grace_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queues: default_queues(),
            poll_interval_ms: default_poll_interval_ms(),
            reap_interval_ms: default_reap_interval_ms(),
            lease_grace_secs: default_lease_grace_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProviderKind,
    /// Try a generative resize before the local strategies.
    #[serde(default)]
    pub use_image_editor: bool,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,
    #[serde(default = "default_editor_model")]
    pub editor_model: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_analysis_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_editor_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderKind::default(),
            use_image_editor: false,
            api_key: None,
            api_key_file: None,
            api_key_env: None,
            base_url: default_base_url(),
            analysis_model: default_analysis_model(),
            editor_model: default_editor_model(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Overrides for one task type. Unset fields keep the built-in value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOverride {
    #[serde(default)]
    pub rate_limit_per_min: Option<u32>,
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub soft_time_limit_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub backoff_base: Option<u32>,
    #[serde(default)]
    pub redelivery_limit: Option<u32>,
}

impl Config {
    /// Configured database path or the per-user default.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"version": "1.0", "upload_dir": "/srv/uploads"}"#).unwrap();
        assert_eq!(config.worker.count, num_cpus::get());
        assert_eq!(config.worker.queues.len(), 3);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.ai.provider, AiProviderKind::Offline);
        assert!(!config.ai.use_image_editor);
        assert!(config.task_overrides.is_empty());
        assert!(config
            .database_path()
            .unwrap()
            .ends_with(".creatflow/data/creatflow.db"));
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let config = AiConfig {
            api_key: Some("secret".into()),
            ..AiConfig::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        assert!(value.get("api_key").is_none());
    }
}
