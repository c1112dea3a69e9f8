use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::queue::TaskKind;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.upload_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "upload_dir must not be empty".to_string(),
        });
    }

    if config.worker.count == 0 {
        return Err(ConfigError::Validation {
            message: "worker.count must be at least 1".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for queue in &config.worker.queues {
        if !seen.insert(queue) {
            return Err(ConfigError::Validation {
                message: format!("Queue '{}' listed twice", queue),
            });
        }
    }

    for (name, over) in &config.task_overrides {
        if TaskKind::parse(name).is_none() {
            return Err(ConfigError::InvalidTaskOverride {
                task: name.clone(),
                reason: "Unknown task type".to_string(),
            });
        }
        if let (Some(soft), Some(hard)) = (over.soft_time_limit_secs, over.time_limit_secs) {
            if soft >= hard {
                return Err(ConfigError::InvalidTaskOverride {
                    task: name.clone(),
                    reason: format!(
                        "soft_time_limit_secs ({}) must be below time_limit_secs ({})",
                        soft, hard
                    ),
                });
            }
        }
    }

    Ok(())
}
